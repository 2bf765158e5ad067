pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scripted::{ScriptHandle, ScriptedBackend};

#[cfg(feature = "backend-tract")]
pub use tract::TractYoloBackend;
