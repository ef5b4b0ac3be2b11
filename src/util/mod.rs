pub mod file;
pub mod rand_kv;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, stamped into every record at append
/// time. Falls back to zero on a clock set before the epoch.
pub(crate) fn now_millis() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map_or(0, |d| d.as_millis() as u64)
}
