use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use otpview_core::config::Settings;
use otpview_core::timing::{
    DEFAULT_PERIOD_SECS, INITIAL_SCAN_DELAY, RETRY_INTERVAL, ROLLOVER_THRESHOLD_SECS,
    SETTLE_DELAY, SUCCESS_DWELL, TICK_INTERVAL,
};

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "otpview", "otpview")
}

pub fn get_configuration_with_paths(
    current_dir_path: Option<PathBuf>,
    system_config_dir_path: Option<PathBuf>,
) -> Result<Settings, config::ConfigError> {
    let config_directory = current_dir_path.unwrap_or_else(|| {
        std::env::current_dir()
            .map(|p| p.join("config"))
            .unwrap_or_else(|_| PathBuf::from("config"))
    });

    let system_config_dir = system_config_dir_path.unwrap_or_else(|| {
        project_dirs()
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("config"))
    });

    let settings = Config::builder()
        // Countdown
        .set_default("countdown.default_period_secs", i64::from(DEFAULT_PERIOD_SECS))?
        .set_default(
            "countdown.rollover_threshold_secs",
            i64::from(ROLLOVER_THRESHOLD_SECS),
        )?
        .set_default("countdown.tick_interval_ms", TICK_INTERVAL.as_millis() as i64)?
        // Scanner
        .set_default("scanner.initial_delay_ms", INITIAL_SCAN_DELAY.as_millis() as i64)?
        .set_default("scanner.settle_delay_ms", SETTLE_DELAY.as_millis() as i64)?
        .set_default("scanner.retry_interval_ms", RETRY_INTERVAL.as_millis() as i64)?
        .set_default("scanner.success_dwell_ms", SUCCESS_DWELL.as_millis() as i64)?
        .set_default("scanner.window_label", "scan-overlay")?
        .set_default("scanner.window_title", "Scan QR Code")?
        .set_default("scanner.window_size", 300_i64)?
        .set_default("log_level", "info")?
        .add_source(File::from(system_config_dir.join("config.toml")).required(false))
        .add_source(File::from(config_directory.join("config.toml")).required(false))
        .add_source(Environment::with_prefix("OTPVIEW").separator("__"))
        .build()?;

    settings.try_deserialize::<Settings>()
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    get_configuration_with_paths(None, None)
}
