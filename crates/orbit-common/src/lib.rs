pub mod action;
pub mod capture;
pub mod envelope;
pub mod error;
pub mod modality;
pub mod recording;
pub mod result;
pub mod snapshot;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
