//! Configuration management for Hestia
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. The file location can be overridden with the
//! `HESTIA_CONFIG` environment variable.

use crate::error::{HestiaError, Result};
use crate::model::PvUseStrategy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable that supplies the myVAILLANT password
pub const PASSWORD_ENV: &str = "HESTIA_MYVAILLANT_PASSWORD";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which device backend to talk to
    pub backend: BackendKind,

    /// myVAILLANT cloud account settings
    pub myvaillant: MyVaillantConfig,

    /// Local ebusd gateway settings
    pub ebusd: EbusdConfig,

    /// Quick mode selection settings
    pub heating: HeatingConfig,

    /// What the host sees when it treats the device as a charger
    pub charger: ChargerConfig,

    /// Cache, grace and timeout windows
    pub timing: TimingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Web server binding configuration
    pub web: WebConfig,
}

/// Device backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// myVAILLANT cloud REST API
    #[default]
    Myvaillant,
    /// ebusd daemon on the local network
    Ebusd,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Myvaillant => "myvaillant",
            BackendKind::Ebusd => "ebusd",
        }
    }
}

/// myVAILLANT cloud account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MyVaillantConfig {
    /// Account e-mail
    pub user: String,

    /// Account password; never written back, see [`PASSWORD_ENV`]
    #[serde(skip_serializing)]
    pub password: String,

    /// Keycloak realm (country specific)
    pub realm: String,

    /// REST API base URL
    pub api_base_url: String,

    /// Identity provider base URL (realms are appended)
    pub identity_base_url: String,

    /// Optional file the current token is persisted to
    pub token_file: Option<String>,
}

/// ebusd gateway connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EbusdConfig {
    /// `host:port` of the ebusd TCP interface
    pub address: String,

    /// Maximum age in seconds of values served from the ebusd cache
    pub max_age_seconds: u32,
}

/// Quick mode selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatingConfig {
    /// Which quick mode to prefer when PV surplus is available
    pub pv_use_strategy: PvUseStrategy,

    /// Heating zone used for quick veto (first zone is 1)
    pub zone: u32,

    /// Added to the zone setpoint when starting a quick veto
    pub temperature_offset: f64,

    /// Quick veto length in minutes
    pub veto_duration_minutes: u32,
}

/// Charger facade settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargerConfig {
    /// Phases reported to the host
    pub phases: u8,

    /// Power below this value is reported as 0 W
    pub standby_power_w: f64,

    /// Nominal power while hot water boost is active
    pub hotwater_power_w: f64,

    /// Nominal power while heating quick veto is active
    pub heating_power_w: f64,

    /// Nominal power while in the idle placeholder
    pub idle_power_w: f64,
}

/// Time windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long a telemetry snapshot is served from cache
    pub cache_ttl_seconds: u64,

    /// Minimum age of the last local transition before trusting device reports
    pub grace_period_seconds: u64,

    /// Idle placeholder is dropped after this long
    pub idle_timeout_seconds: u64,

    /// Suppress restarts this long after the device ended a quick mode.
    /// Unset uses the backend default, 0 disables.
    pub restart_cooldown_seconds: Option<u64>,

    /// Report disconnected after this long without a successful poll
    pub stale_after_seconds: u64,

    /// Upper bound for a single upstream request
    pub request_timeout_seconds: u64,

    /// Refresh tokens expiring within this window
    pub token_refresh_margin_seconds: u64,

    /// Interval of the internal reconciliation loop
    pub poll_interval_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

impl Default for MyVaillantConfig {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            realm: "vaillant-germany-b2c".to_string(),
            api_base_url:
                "https://api.vaillant-group.com/service-connected-control/end-user-app-api/v1"
                    .to_string(),
            identity_base_url: "https://identity.vaillant-group.com/auth/realms".to_string(),
            token_file: None,
        }
    }
}

impl Default for EbusdConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8888".to_string(),
            max_age_seconds: 60,
        }
    }
}

impl Default for HeatingConfig {
    fn default() -> Self {
        Self {
            pv_use_strategy: PvUseStrategy::HotwaterThenHeating,
            zone: 1,
            temperature_offset: 2.0,
            veto_duration_minutes: 30,
        }
    }
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            phases: 3,
            standby_power_w: 10.0,
            hotwater_power_w: 3000.0,
            heating_power_w: 1500.0,
            idle_power_w: 0.0,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 90,
            grace_period_seconds: 60,
            idle_timeout_seconds: 600,
            restart_cooldown_seconds: None,
            stale_after_seconds: 240,
            request_timeout_seconds: 30,
            token_refresh_margin_seconds: 180,
            poll_interval_seconds: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/hestia.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8089,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            myvaillant: MyVaillantConfig::default(),
            ebusd: EbusdConfig::default(),
            heating: HeatingConfig::default(),
            charger: ChargerConfig::default(),
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
            web: WebConfig::default(),
        }
    }
}

impl TimingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from `HESTIA_CONFIG` or the default locations,
    /// then fill secrets from the environment
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_env_with(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        if let Ok(path) = std::env::var("HESTIA_CONFIG")
            && !path.is_empty()
        {
            return Self::from_file(path);
        }

        let default_paths = ["hestia_config.yaml", "/etc/hestia/config.yaml"];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Take the password from [`PASSWORD_ENV`] when `lookup` has one
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup(PASSWORD_ENV).filter(|p| !p.is_empty()) {
            self.myvaillant.password = password;
        }
    }

    /// Save configuration to a YAML file.
    ///
    /// The myVAILLANT password is left out; supply it through
    /// [`PASSWORD_ENV`] or add it to the file by hand.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            BackendKind::Myvaillant => {
                if self.myvaillant.user.trim().is_empty() {
                    return Err(HestiaError::validation(
                        "myvaillant.user",
                        "User cannot be empty",
                    ));
                }
                if self.myvaillant.password.is_empty() {
                    return Err(HestiaError::validation(
                        "myvaillant.password",
                        "Password cannot be empty",
                    ));
                }
                if self.myvaillant.realm.trim().is_empty() {
                    return Err(HestiaError::validation(
                        "myvaillant.realm",
                        "Realm cannot be empty",
                    ));
                }
            }
            BackendKind::Ebusd => {
                if self.ebusd.address.trim().is_empty() {
                    return Err(HestiaError::validation(
                        "ebusd.address",
                        "Address cannot be empty",
                    ));
                }
                if !self.ebusd.address.contains(':') {
                    return Err(HestiaError::validation(
                        "ebusd.address",
                        "Address must be host:port",
                    ));
                }
            }
        }

        if self.heating.zone == 0 {
            return Err(HestiaError::validation(
                "heating.zone",
                "Zones are numbered from 1",
            ));
        }

        if !(-5.0..=5.0).contains(&self.heating.temperature_offset) {
            return Err(HestiaError::validation(
                "heating.temperature_offset",
                "Must be between -5 and 5 degrees",
            ));
        }

        if self.heating.veto_duration_minutes == 0 {
            return Err(HestiaError::validation(
                "heating.veto_duration_minutes",
                "Must be greater than 0",
            ));
        }

        if self.charger.phases != 1 && self.charger.phases != 3 {
            return Err(HestiaError::validation(
                "charger.phases",
                "Must be 1 or 3",
            ));
        }

        if self.charger.standby_power_w < 0.0 {
            return Err(HestiaError::validation(
                "charger.standby_power_w",
                "Must not be negative",
            ));
        }

        if self.timing.cache_ttl_seconds == 0 {
            return Err(HestiaError::validation(
                "timing.cache_ttl_seconds",
                "Must be greater than 0",
            ));
        }

        if self.timing.request_timeout_seconds == 0 {
            return Err(HestiaError::validation(
                "timing.request_timeout_seconds",
                "Must be greater than 0",
            ));
        }

        if self.timing.poll_interval_seconds == 0 {
            return Err(HestiaError::validation(
                "timing.poll_interval_seconds",
                "Must be greater than 0",
            ));
        }

        if !matches!(
            self.logging.level.to_uppercase().as_str(),
            "TRACE" | "DEBUG" | "INFO" | "WARN" | "WARNING" | "ERROR"
        ) {
            return Err(HestiaError::validation(
                "logging.level",
                "Must be one of TRACE, DEBUG, INFO, WARN, ERROR",
            ));
        }

        Ok(())
    }
}
