use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::timing::{
    DEFAULT_PERIOD_SECS, INITIAL_SCAN_DELAY, RETRY_INTERVAL, ROLLOVER_THRESHOLD_SECS,
    SETTLE_DELAY, SUCCESS_DWELL, TICK_INTERVAL,
};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub countdown: CountdownSettings,
    #[serde(default)]
    pub scanner: ScannerSettings,
    pub log_level: String,
}

/// Coordinates of the OTP-management backend
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ServerSettings {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CountdownSettings {
    pub default_period_secs: u32,
    pub rollover_threshold_secs: u32,
    pub tick_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScannerSettings {
    pub initial_delay_ms: u64,
    pub settle_delay_ms: u64,
    pub retry_interval_ms: u64,
    pub success_dwell_ms: u64,
    pub window_label: String,
    pub window_title: String,
    pub window_size: u32,
}

impl CountdownSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            countdown: CountdownSettings::default(),
            scanner: ScannerSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for CountdownSettings {
    fn default() -> Self {
        Self {
            default_period_secs: DEFAULT_PERIOD_SECS,
            rollover_threshold_secs: ROLLOVER_THRESHOLD_SECS,
            tick_interval_ms: TICK_INTERVAL.as_millis() as u64,
        }
    }
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: INITIAL_SCAN_DELAY.as_millis() as u64,
            settle_delay_ms: SETTLE_DELAY.as_millis() as u64,
            retry_interval_ms: RETRY_INTERVAL.as_millis() as u64,
            success_dwell_ms: SUCCESS_DWELL.as_millis() as u64,
            window_label: "scan-overlay".to_string(),
            window_title: "Scan QR Code".to_string(),
            window_size: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();

        assert_eq!(settings.log_level, "info");
        assert!(settings.server.url.is_none());
        assert!(settings.server.api_token.is_none());

        // Countdown defaults
        assert_eq!(settings.countdown.default_period_secs, 30);
        assert_eq!(settings.countdown.rollover_threshold_secs, 2);
        assert_eq!(settings.countdown.tick_interval(), Duration::from_secs(1));

        // Scanner defaults
        assert_eq!(settings.scanner.initial_delay_ms, 500);
        assert_eq!(settings.scanner.settle_delay_ms, 60);
        assert_eq!(settings.scanner.retry_interval_ms, 700);
        assert_eq!(settings.scanner.success_dwell_ms, 500);
        assert_eq!(settings.scanner.window_label, "scan-overlay");
        assert_eq!(settings.scanner.window_size, 300);
    }

    #[test]
    fn test_partial_sections_fall_back_to_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"log_level": "debug"}"#).unwrap();

        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.countdown.default_period_secs, 30);
        assert_eq!(settings.scanner.retry_interval_ms, 700);
    }
}
