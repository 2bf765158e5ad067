//! Capture and record service.
//!
//! - `record`: the per-set completeness record and the audit log row format
//! - `store`: `CaptureStore` trait and the filesystem implementation
//! - `service`: direct and preview submit state machines

mod record;
mod service;
mod store;

pub use record::{
    audit_row, csv_field, set_id_for, CaptureRecord, AUDIT_HEADER, AUDIT_TIMESTAMP_FORMAT,
    FILE_TIMESTAMP_FORMAT,
};
pub use service::{CaptureReceipt, CaptureService, PreviewTicket, Rejection, SubmitOutcome};
pub use store::{CaptureStore, FsCaptureStore, StorageLayout, OUTPUT_HEIGHT, OUTPUT_WIDTH};
pub(crate) use store::audit_rows;
