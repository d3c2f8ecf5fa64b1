//! Small shared helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds, saturating to 0 on clock errors.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_nonzero() {
        assert!(now_millis() > 0);
    }
}
