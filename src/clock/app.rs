//! Application Time
//!
//! The clock that Berkeley synchronization adjusts. It is kept as an
//! offset over system time so it keeps running between adjustments.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch as a float
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Adjustable application clock
#[derive(Debug, Default)]
pub struct AppClock {
    /// Seconds added to system time
    offset: Mutex<f64>,
}

impl AppClock {
    /// Create a clock aligned with system time
    pub fn new() -> Self {
        Self::default()
    }

    /// Current application time in seconds since the epoch
    pub fn now(&self) -> f64 {
        unix_now() + self.offset()
    }

    /// Set the application time to `time`
    pub fn set(&self, time: f64) {
        self.set_at(time, unix_now());
    }

    /// Set the application time to `time`, given the system time `now`
    pub fn set_at(&self, time: f64, now: f64) {
        if !time.is_finite() {
            tracing::warn!("Ignoring non-finite clock adjustment {}", time);
            return;
        }
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset = time - now;
        tracing::debug!("Application clock offset set to {:+.3}s", *offset);
    }

    /// Current offset from system time in seconds
    pub fn offset(&self) -> f64 {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_aligned() {
        let clock = AppClock::new();
        assert_eq!(clock.offset(), 0.0);
        assert!((clock.now() - unix_now()).abs() < 1.0);
    }

    #[test]
    fn test_set_at_moves_offset() {
        let clock = AppClock::new();
        clock.set_at(1_000.0, 990.0);
        assert_eq!(clock.offset(), 10.0);
        clock.set_at(1_000.0, 1_005.0);
        assert_eq!(clock.offset(), -5.0);
    }

    #[test]
    fn test_ignores_nan() {
        let clock = AppClock::new();
        clock.set_at(f64::NAN, 10.0);
        assert_eq!(clock.offset(), 0.0);
    }
}
