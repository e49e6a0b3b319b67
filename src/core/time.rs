//! Timestamp and identifier helpers shared by the batch driver and run traces.

use ulid::Ulid;

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

/// Fresh identifier for one batch run; every trace line of the run carries it.
pub fn new_run_id() -> String {
    format!("R_{}", Ulid::new())
}

/// Milliseconds elapsed since `start`, saturating at `u64::MAX`.
pub fn elapsed_ms(start: std::time::Instant) -> u64 {
    start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_epoch_z_format() {
        let result = now_epoch_z();
        assert!(result.ends_with('Z'));
        let numeric_part = result.trim_end_matches('Z');
        assert!(numeric_part.parse::<u64>().is_ok());
    }

    #[test]
    fn test_new_run_id_is_unique() {
        let id1 = new_run_id();
        let id2 = new_run_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_new_run_id_wraps_valid_ulid() {
        let id = new_run_id();
        let raw = id.strip_prefix("R_").expect("run id prefix");
        assert!(ulid::Ulid::from_string(raw).is_ok());
    }
}
