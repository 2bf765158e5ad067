use chrono::{DateTime, Local};
use std::borrow::Cow;
use std::path::PathBuf;

use crate::tracker::{ObjectSnapshot, RequiredObjectSet};

/// Timestamp format used in file names and set ids.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Timestamp format used in the audit log.
pub const AUDIT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Header line of the audit log.
pub const AUDIT_HEADER: &str = "Timestamp,Object List";

/// One completeness record, written once per successful submit.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureRecord {
    pub set_id: String,
    pub captured_at: DateTime<Local>,
    /// `(object name, 1 | 0)` in required-set order.
    pub presence: Vec<(String, u8)>,
    pub image_path: PathBuf,
}

impl CaptureRecord {
    pub fn new(
        set_id: String,
        captured_at: DateTime<Local>,
        required: &RequiredObjectSet,
        detected: &ObjectSnapshot,
        image_path: PathBuf,
    ) -> Self {
        let presence = required
            .names()
            .iter()
            .map(|name| (name.clone(), u8::from(detected.contains(name))))
            .collect();
        Self {
            set_id,
            captured_at,
            presence,
            image_path,
        }
    }

    pub fn all_present(&self) -> bool {
        self.presence.iter().all(|(_, flag)| *flag == 1)
    }

    /// Names flagged present, in required-set order.
    pub fn present_names(&self) -> Vec<&str> {
        self.presence
            .iter()
            .filter(|(_, flag)| *flag == 1)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Record file contents: `Set,<object_1>,...` header plus one data row.
    pub fn to_csv(&self) -> String {
        let mut header = vec![Cow::Borrowed("Set")];
        header.extend(self.presence.iter().map(|(name, _)| csv_field(name)));
        let mut row = vec![csv_field(&self.set_id)];
        row.extend(self.presence.iter().map(|(_, flag)| Cow::Owned(flag.to_string())));
        format!("{}\n{}\n", header.join(","), row.join(","))
    }
}

/// `Set_<timestamp>` id for a capture.
pub fn set_id_for(stamp: &str) -> String {
    format!("Set_{}", stamp)
}

/// Audit log row: timestamp and the quoted, comma-joined object list.
pub fn audit_row(captured_at: &DateTime<Local>, names: &[&str]) -> String {
    let list = names.join(", ");
    format!(
        "{},\"{}\"\n",
        captured_at.format(AUDIT_TIMESTAMP_FORMAT),
        list.replace('"', "\"\"")
    )
}

/// Quote a CSV field when it contains a separator, quote or line break.
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}
