use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch. Observation timestamps use whole seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
