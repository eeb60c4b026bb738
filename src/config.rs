//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, UplinkError};
use crate::link::modem::MODEM_BAUD_RATE;
use crate::link::protocol::{
    DeviceIdentity, OtaaParams, APP_EUI_LEN, APP_KEY_LEN, DEV_EUI_LEN, MAX_APP_PORT, MIN_APP_PORT,
};
use crate::link::simulated::SimulatedSettings;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub device: DeviceConfig,

    #[serde(default)]
    pub lorawan: LoRaWanConfig,

    #[serde(default)]
    pub uplink: UplinkConfig,

    #[serde(default)]
    pub downlink: DownlinkConfig,

    #[serde(default)]
    pub stack: StackConfig,

    #[serde(default)]
    pub sensor: SensorConfig,

    #[serde(default)]
    pub journal: JournalConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device identity for over-the-air activation (hex strings)
#[derive(Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(deserialize_with = "hex_bytes")]
    pub dev_eui: [u8; DEV_EUI_LEN],

    #[serde(deserialize_with = "hex_bytes")]
    pub app_eui: [u8; APP_EUI_LEN],

    #[serde(deserialize_with = "hex_bytes")]
    pub app_key: [u8; APP_KEY_LEN],
}

impl std::fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.identity(), f)
    }
}

impl DeviceConfig {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            dev_eui: self.dev_eui,
            app_eui: self.app_eui,
            app_key: self.app_key,
        }
    }
}

/// LoRaWAN stack settings
#[derive(Debug, Deserialize, Clone)]
pub struct LoRaWanConfig {
    #[serde(default = "default_confirmed_msg_retries")]
    pub confirmed_msg_retries: u8,

    #[serde(default = "default_adaptive_datarate")]
    pub adaptive_datarate: bool,

    #[serde(default = "default_join_trials")]
    pub join_trials: u8,

    #[serde(default = "default_retry_on_join_failure")]
    pub retry_on_join_failure: bool,

    #[serde(default = "default_join_retry_delay_ms")]
    pub join_retry_delay_ms: u64,
}

/// Uplink scheduling and payload settings
#[derive(Debug, Deserialize, Clone)]
pub struct UplinkConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(default = "default_port")]
    pub port: u8,

    #[serde(default = "default_confirmed")]
    pub confirmed: bool,

    #[serde(default = "default_channel")]
    pub channel: u8,

    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
}

/// Downlink settings
#[derive(Debug, Deserialize, Clone)]
pub struct DownlinkConfig {
    #[serde(default = "default_rx_buffer_size")]
    pub rx_buffer_size: usize,
}

/// Which stack implementation to drive
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StackKind {
    Simulated,
    Serial,
}

/// Stack selection and transport settings
#[derive(Debug, Deserialize, Clone)]
pub struct StackConfig {
    #[serde(default = "default_stack_kind")]
    pub kind: StackKind,

    /// Serial device path; empty means auto-detect
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default)]
    pub simulated_duty_cycle_ms: u64,

    #[serde(default)]
    pub simulated_downlink_every: u32,
}

/// Which temperature source to read
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Simulated,
    ThermalZone,
}

/// Sensor selection
#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    #[serde(default = "default_sensor_kind")]
    pub kind: SensorKind,

    #[serde(default = "default_thermal_path")]
    pub path: String,

    #[serde(default = "default_baseline_celsius")]
    pub baseline_celsius: f32,
}

/// Status journal configuration
#[derive(Debug, Deserialize, Clone)]
pub struct JournalConfig {
    #[serde(default = "default_journal_enabled")]
    pub enabled: bool,

    #[serde(default = "default_journal_dir")]
    pub dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for a daily-rolling log file; empty logs to stdout only
    #[serde(default)]
    pub file_dir: String,
}

// Default value functions
fn default_confirmed_msg_retries() -> u8 { 3 }
fn default_adaptive_datarate() -> bool { false }
fn default_join_trials() -> u8 { 10 }
fn default_retry_on_join_failure() -> bool { false }
fn default_join_retry_delay_ms() -> u64 { 30000 }

fn default_interval_ms() -> u64 { 10000 }
fn default_backoff_ms() -> u64 { 3000 }
fn default_port() -> u8 { 15 }
fn default_confirmed() -> bool { false }
fn default_channel() -> u8 { 1 }
fn default_max_payload_size() -> usize { 50 }

fn default_rx_buffer_size() -> usize { 50 }

fn default_stack_kind() -> StackKind { StackKind::Simulated }
fn default_baud_rate() -> u32 { MODEM_BAUD_RATE }

fn default_sensor_kind() -> SensorKind { SensorKind::Simulated }
fn default_thermal_path() -> String { "/sys/class/thermal/thermal_zone0/temp".to_string() }
fn default_baseline_celsius() -> f32 { 21.5 }

fn default_journal_enabled() -> bool { false }
fn default_journal_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

fn default_log_level() -> String { "info".to_string() }

impl Default for LoRaWanConfig {
    fn default() -> Self {
        Self {
            confirmed_msg_retries: default_confirmed_msg_retries(),
            adaptive_datarate: default_adaptive_datarate(),
            join_trials: default_join_trials(),
            retry_on_join_failure: default_retry_on_join_failure(),
            join_retry_delay_ms: default_join_retry_delay_ms(),
        }
    }
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            backoff_ms: default_backoff_ms(),
            port: default_port(),
            confirmed: default_confirmed(),
            channel: default_channel(),
            max_payload_size: default_max_payload_size(),
        }
    }
}

impl Default for DownlinkConfig {
    fn default() -> Self {
        Self { rx_buffer_size: default_rx_buffer_size() }
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            kind: default_stack_kind(),
            port: String::new(),
            baud_rate: default_baud_rate(),
            simulated_duty_cycle_ms: 0,
            simulated_downlink_every: 0,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: default_sensor_kind(),
            path: default_thermal_path(),
            baseline_celsius: default_baseline_celsius(),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: default_journal_enabled(),
            dir: default_journal_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_dir: String::new(),
        }
    }
}

/// Decode a fixed-length hex string, tolerating `:`, `-` and space separators
fn hex_bytes<'de, D, const N: usize>(deserializer: D) -> std::result::Result<[u8; N], D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .collect();

    let mut bytes = [0u8; N];
    hex::decode_to_slice(&cleaned, &mut bytes).map_err(|e| {
        D::Error::custom(format!("expected {} bytes as hex, got {:?}: {}", N, text, e))
    })?;
    Ok(bytes)
}

impl LoRaWanConfig {
    pub fn join_retry_delay(&self) -> Duration {
        Duration::from_millis(self.join_retry_delay_ms)
    }
}

impl UplinkConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl StackConfig {
    pub fn simulated_settings(&self) -> SimulatedSettings {
        SimulatedSettings {
            duty_cycle_gap: Duration::from_millis(self.simulated_duty_cycle_ms),
            downlink_every: self.simulated_downlink_every,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use lora_uplink::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if parsing or validation fails
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// OTAA parameters for the connect request
    pub fn otaa_params(&self) -> OtaaParams {
        OtaaParams {
            identity: self.device.identity(),
            nb_trials: self.lorawan.join_trials,
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Validate uplink timing
        if self.uplink.interval_ms == 0 || self.uplink.interval_ms > 86_400_000 {
            return Err(invalid("interval_ms must be between 1 and 86400000"));
        }

        if self.uplink.backoff_ms == 0 || self.uplink.backoff_ms >= self.uplink.interval_ms {
            return Err(invalid("backoff_ms must be greater than 0 and shorter than interval_ms"));
        }

        // Validate application port
        if !(MIN_APP_PORT..=MAX_APP_PORT).contains(&self.uplink.port) {
            return Err(invalid(&format!(
                "port must be between {} and {}",
                MIN_APP_PORT, MAX_APP_PORT
            )));
        }

        // A single temperature record is 4 bytes
        if self.uplink.max_payload_size < 4 || self.uplink.max_payload_size > 242 {
            return Err(invalid("max_payload_size must be between 4 and 242"));
        }

        if self.downlink.rx_buffer_size == 0 || self.downlink.rx_buffer_size > 242 {
            return Err(invalid("rx_buffer_size must be between 1 and 242"));
        }

        // Validate LoRaWAN settings
        if self.lorawan.confirmed_msg_retries == 0 {
            return Err(invalid("confirmed_msg_retries must be greater than 0"));
        }

        if self.lorawan.join_trials == 0 {
            return Err(invalid("join_trials must be greater than 0"));
        }

        if self.lorawan.retry_on_join_failure && self.lorawan.join_retry_delay_ms == 0 {
            return Err(invalid("join_retry_delay_ms must be greater than 0 when retrying joins"));
        }

        // Validate stack transport
        if self.stack.kind == StackKind::Serial
            && ![9600, 19200, 38400, 57600, 115200].contains(&self.stack.baud_rate)
        {
            return Err(invalid("baud_rate must be one of: 9600, 19200, 38400, 57600, 115200"));
        }

        // Validate sensor
        if self.sensor.kind == SensorKind::ThermalZone && self.sensor.path.is_empty() {
            return Err(invalid("sensor path cannot be empty for thermal_zone"));
        }

        if !self.sensor.baseline_celsius.is_finite() {
            return Err(invalid("baseline_celsius must be a finite number"));
        }

        // Validate journal
        if self.journal.enabled {
            if self.journal.dir.is_empty() {
                return Err(invalid("journal dir cannot be empty when enabled"));
            }
            if self.journal.max_records_per_file == 0 {
                return Err(invalid("max_records_per_file must be greater than 0"));
            }
            if self.journal.max_files_to_keep == 0 {
                return Err(invalid("max_files_to_keep must be greater than 0"));
            }
        }

        // Validate log level
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> UplinkError {
    UplinkError::Config(toml::de::Error::custom(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE_TOML: &str = r#"
[device]
dev_eui = "00A77C67D2B17FB3"
app_eui = "70B3D57ED000AADF"
app_key = "88FAC31FB53DCAE9FEBB42F569C51894"
"#;

    fn create_valid_config() -> Config {
        Config::from_toml(DEVICE_TOML).unwrap()
    }

    #[test]
    fn test_defaults_with_device_only() {
        let config = create_valid_config();

        assert_eq!(config.uplink.interval(), Duration::from_millis(10000));
        assert_eq!(config.uplink.backoff(), Duration::from_millis(3000));
        assert_eq!(config.uplink.port, 15);
        assert!(!config.uplink.confirmed);
        assert_eq!(config.downlink.rx_buffer_size, 50);
        assert_eq!(config.lorawan.confirmed_msg_retries, 3);
        assert!(!config.lorawan.adaptive_datarate);
        assert!(!config.lorawan.retry_on_join_failure);
        assert_eq!(config.stack.kind, StackKind::Simulated);
        assert_eq!(config.sensor.kind, SensorKind::Simulated);
        assert!(!config.journal.enabled);
    }

    #[test]
    fn test_device_identity_decoding() {
        let config = create_valid_config();
        let params = config.otaa_params();

        assert_eq!(params.identity.dev_eui, [0x00, 0xA7, 0x7C, 0x67, 0xD2, 0xB1, 0x7F, 0xB3]);
        assert_eq!(params.identity.app_eui, [0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x00, 0xAA, 0xDF]);
        assert_eq!(params.identity.app_key[0], 0x88);
        assert_eq!(params.identity.app_key[15], 0x94);
        assert_eq!(params.nb_trials, 10);
    }

    #[test]
    fn test_device_identity_with_separators() {
        let toml_content = r#"
[device]
dev_eui = "00:A7:7C:67:D2:B1:7F:B3"
app_eui = "70-B3-D5-7E-D0-00-AA-DF"
app_key = "88FAC31F B53DCAE9 FEBB42F5 69C51894"
"#;
        let config = Config::from_toml(toml_content).unwrap();
        assert_eq!(config.device.dev_eui[1], 0xA7);
        assert_eq!(config.device.app_eui[7], 0xDF);
    }

    #[test]
    fn test_device_identity_wrong_length() {
        let toml_content = r#"
[device]
dev_eui = "00A77C67D2B17F"
app_eui = "70B3D57ED000AADF"
app_key = "88FAC31FB53DCAE9FEBB42F569C51894"
"#;
        assert!(Config::from_toml(toml_content).is_err());
    }

    #[test]
    fn test_device_identity_not_hex() {
        let toml_content = r#"
[device]
dev_eui = "ZZA77C67D2B17FB3"
app_eui = "70B3D57ED000AADF"
app_key = "88FAC31FB53DCAE9FEBB42F569C51894"
"#;
        assert!(Config::from_toml(toml_content).is_err());
    }

    #[test]
    fn test_missing_device_section() {
        assert!(Config::from_toml("[uplink]\ninterval_ms = 5000\n").is_err());
    }

    #[test]
    fn test_device_debug_redacts_key() {
        let config = create_valid_config();
        let text = format!("{:?}", config.device);
        assert!(text.contains("<redacted>"));
        assert!(!text.contains("88FAC31F"));
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = format!(
            "{}\n[uplink]\ninterval_ms = 60000\nbackoff_ms = 5000\n\n[stack]\nkind = \"serial\"\nport = \"/dev/ttyUSB1\"\n",
            DEVICE_TOML
        );

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.uplink.interval_ms, 60000);
        assert_eq!(config.uplink.backoff_ms, 5000);
        assert_eq!(config.stack.kind, StackKind::Serial);
        assert_eq!(config.stack.port, "/dev/ttyUSB1");
    }

    #[test]
    fn test_load_missing_file() {
        match Config::load("/nonexistent/lora-uplink.toml") {
            Err(UplinkError::Io(_)) => {}
            other => panic!("Expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_stack_kind() {
        let toml_content = format!("{}\n[stack]\nkind = \"zigbee\"\n", DEVICE_TOML);
        assert!(Config::from_toml(&toml_content).is_err());
    }

    #[test]
    fn test_interval_zero() {
        let mut config = create_valid_config();
        config.uplink.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_zero() {
        let mut config = create_valid_config();
        config.uplink.backoff_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_not_shorter_than_interval() {
        let mut config = create_valid_config();
        config.uplink.backoff_ms = config.uplink.interval_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_port_zero_is_reserved() {
        let mut config = create_valid_config();
        config.uplink.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_port_above_range() {
        let mut config = create_valid_config();
        config.uplink.port = 224;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_payload_too_small_for_temperature() {
        let mut config = create_valid_config();
        config.uplink.max_payload_size = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rx_buffer_zero() {
        let mut config = create_valid_config();
        config.downlink.rx_buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_confirmed_retries_zero() {
        let mut config = create_valid_config();
        config.lorawan.confirmed_msg_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_join_trials_zero() {
        let mut config = create_valid_config();
        config.lorawan.join_trials = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_join_retry_delay_zero_only_matters_when_retrying() {
        let mut config = create_valid_config();
        config.lorawan.join_retry_delay_ms = 0;
        assert!(config.validate().is_ok());

        config.lorawan.retry_on_join_failure = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_baud_rate_for_serial() {
        let mut config = create_valid_config();
        config.stack.kind = StackKind::Serial;
        config.stack.baud_rate = 420000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_baud_rates() {
        for &baud in &[9600, 19200, 38400, 57600, 115200] {
            let mut config = create_valid_config();
            config.stack.kind = StackKind::Serial;
            config.stack.baud_rate = baud;
            assert!(config.validate().is_ok(), "Baud rate {} should be valid", baud);
        }
    }

    #[test]
    fn test_thermal_zone_requires_path() {
        let mut config = create_valid_config();
        config.sensor.kind = SensorKind::ThermalZone;
        config.sensor.path = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_journal_dir_when_enabled() {
        let mut config = create_valid_config();
        config.journal.enabled = true;
        config.journal.dir = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_journal_dir_when_disabled() {
        let mut config = create_valid_config();
        config.journal.enabled = false;
        config.journal.dir = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_journal_limits_zero() {
        let mut config = create_valid_config();
        config.journal.enabled = true;
        config.journal.max_records_per_file = 0;
        assert!(config.validate().is_err());

        let mut config = create_valid_config();
        config.journal.enabled = true;
        config.journal.max_files_to_keep = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = create_valid_config();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_simulated_settings() {
        let mut config = create_valid_config();
        config.stack.simulated_duty_cycle_ms = 12000;
        config.stack.simulated_downlink_every = 3;

        let settings = config.stack.simulated_settings();
        assert_eq!(settings.duty_cycle_gap, Duration::from_secs(12));
        assert_eq!(settings.downlink_every, 3);
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_confirmed_msg_retries(), 3);
        assert_eq!(default_adaptive_datarate(), false);
        assert_eq!(default_join_trials(), 10);
        assert_eq!(default_retry_on_join_failure(), false);
        assert_eq!(default_join_retry_delay_ms(), 30000);
        assert_eq!(default_interval_ms(), 10000);
        assert_eq!(default_backoff_ms(), 3000);
        assert_eq!(default_port(), 15);
        assert_eq!(default_confirmed(), false);
        assert_eq!(default_channel(), 1);
        assert_eq!(default_max_payload_size(), 50);
        assert_eq!(default_rx_buffer_size(), 50);
        assert_eq!(default_stack_kind(), StackKind::Simulated);
        assert_eq!(default_baud_rate(), MODEM_BAUD_RATE);
        assert_eq!(default_baud_rate(), 115200);
        assert_eq!(default_sensor_kind(), SensorKind::Simulated);
        assert_eq!(default_thermal_path(), "/sys/class/thermal/thermal_zone0/temp");
        assert_eq!(default_baseline_celsius(), 21.5);
        assert_eq!(default_journal_enabled(), false);
        assert_eq!(default_journal_dir(), "./logs");
        assert_eq!(default_max_records_per_file(), 10000);
        assert_eq!(default_max_files_to_keep(), 10);
        assert_eq!(default_log_level(), "info");
    }
}
