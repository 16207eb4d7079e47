//! Timing policy shared by the countdown scheduler and the scan engine.
//!
//! The values were tuned empirically; they are kept as named constants and
//! can be overridden through [`crate::config::Settings`].

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::ScannerSettings;

/// Period applied to TOTP accounts that do not declare one
pub const DEFAULT_PERIOD_SECS: u32 = 30;

/// A previous remaining value at or below this marks a possible rollover
pub const ROLLOVER_THRESHOLD_SECS: u32 = 2;

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Delay between opening the scanner window and the first capture
pub const INITIAL_SCAN_DELAY: Duration = Duration::from_millis(500);

/// Time given to the compositor to drop the hidden window from the frame
pub const SETTLE_DELAY: Duration = Duration::from_millis(60);

/// Delay between two failed attempts
pub const RETRY_INTERVAL: Duration = Duration::from_millis(700);

/// How long the success indicator stays visible before the window closes
pub const SUCCESS_DWELL: Duration = Duration::from_millis(500);

/// Source of wall-clock time in whole seconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn epoch_secs(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Delays driving one scan session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTimings {
    pub initial_delay: Duration,
    pub settle_delay: Duration,
    pub retry_interval: Duration,
    pub success_dwell: Duration,
}

impl Default for ScanTimings {
    fn default() -> Self {
        Self {
            initial_delay: INITIAL_SCAN_DELAY,
            settle_delay: SETTLE_DELAY,
            retry_interval: RETRY_INTERVAL,
            success_dwell: SUCCESS_DWELL,
        }
    }
}

impl From<&ScannerSettings> for ScanTimings {
    fn from(settings: &ScannerSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
            retry_interval: Duration::from_millis(settings.retry_interval_ms),
            success_dwell: Duration::from_millis(settings.success_dwell_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scan_timings_snapshot() {
        insta::assert_debug_snapshot!(ScanTimings::default(), @r###"
        ScanTimings {
            initial_delay: 500ms,
            settle_delay: 60ms,
            retry_interval: 700ms,
            success_dwell: 500ms,
        }
        "###);
    }

    #[test]
    fn test_timings_from_settings() {
        let settings = ScannerSettings {
            retry_interval_ms: 1200,
            ..ScannerSettings::default()
        };
        let timings = ScanTimings::from(&settings);

        assert_eq!(timings.retry_interval, Duration::from_millis(1200));
        assert_eq!(timings.settle_delay, SETTLE_DELAY);
    }

    #[test]
    fn test_retry_slower_than_settle() {
        let timings = ScanTimings::default();
        assert!(timings.retry_interval > timings.settle_delay);
        assert!(timings.initial_delay > timings.settle_delay);
    }

    #[test]
    fn test_system_clock_is_past_2020() {
        assert!(SystemClock.epoch_secs() > 1_577_836_800);
    }
}
