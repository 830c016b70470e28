//! TOML Configuration File Support
//!
//! Policy knobs for the arbiter, loaded from an optional TOML file at
//! `~/.config/glasses-arbiter/arbiter.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (when applicable)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [timing]
//! lock_timeout_ms = 10000
//! lock_inactive_timeout_ms = 2000
//! throttle_delay_ms = 300
//! boot_duration_ms = 3000
//! auto_clear_ms = 15000
//! refresh_buffer_ms = 1000
//!
//! [apps]
//! core_app = "org.augmentos.captions"
//! dashboard_app = "org.augmentos.dashboard"
//!
//! [apps.names]
//! "com.example.weather" = "Weather"
//!
//! [history]
//! limit = 50
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::AppId;

/// Default core app package name
pub const DEFAULT_CORE_APP: &str = "org.augmentos.captions";

/// Default dashboard app package name
pub const DEFAULT_DASHBOARD_APP: &str = "org.augmentos.dashboard";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the effective configuration came from
///
/// Reports the highest-priority layer that changed at least one value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Default value
    Default,
    /// Value from TOML configuration file
    File,
    /// Value from environment variable
    Env,
    /// Value from command-line argument
    Cli,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Arbitration policy knobs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArbiterConfig {
    /// Hard lifetime of a background lock
    pub lock_timeout: Duration,
    /// Release a lock whose holder has been silent this long
    pub lock_inactive_timeout: Duration,
    /// Minimum spacing between throttled sends
    pub throttle_delay: Duration,
    /// Boot grace period per starting app
    pub boot_duration: Duration,
    /// Glasses clear unattended content after this long
    pub auto_clear_time: Duration,
    /// Refresh persistent content this long before the auto-clear
    pub refresh_buffer: Duration,
    /// The always-present app with baseline priority
    pub core_app: AppId,
    /// The reserved overlay app that bypasses arbitration
    pub dashboard_app: AppId,
    /// Human-readable names for the boot screen
    pub app_names: HashMap<String, String>,
    /// Display attempts kept per app for debugging
    pub history_limit: usize,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        let app_names = HashMap::from([
            (DEFAULT_CORE_APP.to_string(), "Captions".to_string()),
            (DEFAULT_DASHBOARD_APP.to_string(), "Dashboard".to_string()),
        ]);

        Self {
            lock_timeout: Duration::from_secs(10),
            lock_inactive_timeout: Duration::from_secs(2),
            throttle_delay: Duration::from_millis(300),
            boot_duration: Duration::from_secs(3),
            auto_clear_time: Duration::from_secs(15),
            refresh_buffer: Duration::from_secs(1),
            core_app: AppId::from(DEFAULT_CORE_APP),
            dashboard_app: AppId::from(DEFAULT_DASHBOARD_APP),
            app_names,
            history_limit: 50,
        }
    }
}

impl ArbiterConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from defaults plus environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Interval between refreshes of a persistent display
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        self.auto_clear_time.saturating_sub(self.refresh_buffer)
    }

    /// Human-readable name for an app, falling back to its raw identifier
    #[must_use]
    pub fn display_name<'a>(&'a self, app: &'a AppId) -> &'a str {
        self.app_names
            .get(app.as_str())
            .map_or(app.as_str(), String::as_str)
    }

    /// Set the hard lock lifetime
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the lock inactivity timeout
    #[must_use]
    pub fn with_lock_inactive_timeout(mut self, timeout: Duration) -> Self {
        self.lock_inactive_timeout = timeout;
        self
    }

    /// Set the throttle delay
    #[must_use]
    pub fn with_throttle_delay(mut self, delay: Duration) -> Self {
        self.throttle_delay = delay;
        self
    }

    /// Set the boot grace period
    #[must_use]
    pub fn with_boot_duration(mut self, duration: Duration) -> Self {
        self.boot_duration = duration;
        self
    }

    /// Set the hardware auto-clear time and refresh buffer
    #[must_use]
    pub fn with_auto_clear(mut self, auto_clear_time: Duration, refresh_buffer: Duration) -> Self {
        self.auto_clear_time = auto_clear_time;
        self.refresh_buffer = refresh_buffer;
        self
    }

    /// Set the core app
    #[must_use]
    pub fn with_core_app(mut self, app: impl Into<AppId>) -> Self {
        self.core_app = app.into();
        self
    }

    /// Set the dashboard app
    #[must_use]
    pub fn with_dashboard_app(mut self, app: impl Into<AppId>) -> Self {
        self.dashboard_app = app.into();
        self
    }

    /// Register a human-readable app name
    #[must_use]
    pub fn with_app_name(mut self, app: impl Into<String>, name: impl Into<String>) -> Self {
        self.app_names.insert(app.into(), name.into());
        self
    }

    /// Check the configuration for values the engine cannot work with
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.throttle_delay.is_zero() {
            return Err(ConfigError::ValidationError(
                "throttle_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.boot_duration.is_zero() {
            return Err(ConfigError::ValidationError(
                "boot_duration_ms must be greater than 0".to_string(),
            ));
        }
        if self.lock_timeout.is_zero() || self.lock_inactive_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "lock timeouts must be greater than 0".to_string(),
            ));
        }
        if self.lock_inactive_timeout > self.lock_timeout {
            return Err(ConfigError::ValidationError(format!(
                "lock_inactive_timeout_ms ({}) cannot exceed lock_timeout_ms ({})",
                self.lock_inactive_timeout.as_millis(),
                self.lock_timeout.as_millis()
            )));
        }
        if self.refresh_buffer >= self.auto_clear_time {
            return Err(ConfigError::ValidationError(format!(
                "refresh_buffer_ms ({}) must be less than auto_clear_ms ({})",
                self.refresh_buffer.as_millis(),
                self.auto_clear_time.as_millis()
            )));
        }
        if self.core_app == self.dashboard_app {
            return Err(ConfigError::ValidationError(
                "core_app and dashboard_app must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply values from the TOML file layer; returns whether anything changed
    pub fn apply_toml(&mut self, toml: &ArbiterToml) -> bool {
        let before = self.clone();
        let timing = &toml.timing;

        set_ms(&mut self.lock_timeout, timing.lock_timeout_ms);
        set_ms(
            &mut self.lock_inactive_timeout,
            timing.lock_inactive_timeout_ms,
        );
        set_ms(&mut self.throttle_delay, timing.throttle_delay_ms);
        set_ms(&mut self.boot_duration, timing.boot_duration_ms);
        set_ms(&mut self.auto_clear_time, timing.auto_clear_ms);
        set_ms(&mut self.refresh_buffer, timing.refresh_buffer_ms);

        if let Some(app) = &toml.apps.core_app {
            self.core_app = AppId::new(app.clone());
        }
        if let Some(app) = &toml.apps.dashboard_app {
            self.dashboard_app = AppId::new(app.clone());
        }
        for (app, name) in &toml.apps.names {
            self.app_names.insert(app.clone(), name.clone());
        }
        if let Some(limit) = toml.history.limit {
            self.history_limit = limit;
        }

        *self != before
    }

    /// Apply values from environment-style lookups; returns whether anything changed
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        let before = self.clone();
        let ms = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        set_ms(&mut self.lock_timeout, ms("ARBITER_LOCK_TIMEOUT_MS"));
        set_ms(
            &mut self.lock_inactive_timeout,
            ms("ARBITER_LOCK_INACTIVE_TIMEOUT_MS"),
        );
        set_ms(&mut self.throttle_delay, ms("ARBITER_THROTTLE_DELAY_MS"));
        set_ms(&mut self.boot_duration, ms("ARBITER_BOOT_DURATION_MS"));
        set_ms(&mut self.auto_clear_time, ms("ARBITER_AUTO_CLEAR_MS"));
        set_ms(&mut self.refresh_buffer, ms("ARBITER_REFRESH_BUFFER_MS"));

        if let Some(app) = lookup("ARBITER_CORE_APP").filter(|v| !v.trim().is_empty()) {
            self.core_app = AppId::new(app.trim());
        }
        if let Some(app) = lookup("ARBITER_DASHBOARD_APP").filter(|v| !v.trim().is_empty()) {
            self.dashboard_app = AppId::new(app.trim());
        }

        *self != before
    }
}

fn set_ms(target: &mut Duration, value: Option<u64>) {
    if let Some(ms) = value {
        *target = Duration::from_millis(ms);
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Timing section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingToml {
    /// Hard lock lifetime in milliseconds
    pub lock_timeout_ms: Option<u64>,
    /// Lock inactivity timeout in milliseconds
    pub lock_inactive_timeout_ms: Option<u64>,
    /// Throttle delay in milliseconds
    pub throttle_delay_ms: Option<u64>,
    /// Boot grace period in milliseconds
    pub boot_duration_ms: Option<u64>,
    /// Hardware auto-clear time in milliseconds
    pub auto_clear_ms: Option<u64>,
    /// Refresh buffer in milliseconds
    pub refresh_buffer_ms: Option<u64>,
}

/// Apps section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppsToml {
    /// Core app package name
    pub core_app: Option<String>,
    /// Dashboard app package name
    pub dashboard_app: Option<String>,
    /// Package name to display name
    pub names: HashMap<String, String>,
}

/// History section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryToml {
    /// Attempts kept per app
    pub limit: Option<usize>,
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterToml {
    /// Timing knobs
    pub timing: TimingToml,
    /// App identities and names
    pub apps: AppsToml,
    /// Debug history
    pub history: HistoryToml,
}

impl ArbiterToml {
    /// Parse from a TOML string
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseError` if the TOML is malformed.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Values supplied on the command line
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Core app override
    pub core_app: Option<String>,
    /// Dashboard app override
    pub dashboard_app: Option<String>,
    /// Throttle delay override in milliseconds
    pub throttle_delay_ms: Option<u64>,
    /// Boot duration override in milliseconds
    pub boot_duration_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Apply overrides; returns whether anything changed
    pub fn apply(&self, config: &mut ArbiterConfig) -> bool {
        let before = config.clone();
        if let Some(app) = &self.core_app {
            config.core_app = AppId::new(app.clone());
        }
        if let Some(app) = &self.dashboard_app {
            config.dashboard_app = AppId::new(app.clone());
        }
        set_ms(&mut config.throttle_delay, self.throttle_delay_ms);
        set_ms(&mut config.boot_duration, self.boot_duration_ms);
        *config != before
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Default configuration file path
///
/// `$XDG_CONFIG_HOME/glasses-arbiter/arbiter.toml`, or `None` when no config
/// directory can be determined.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("glasses-arbiter").join("arbiter.toml"))
}

/// Load configuration from the default path plus environment
///
/// A missing file is not an error; defaults are used instead.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed, or the
/// resulting configuration is invalid.
pub fn load_config() -> Result<(ArbiterConfig, ConfigSource), ConfigError> {
    match default_config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => finish(ArbiterConfig::default(), ConfigSource::Default),
    }
}

/// Load configuration from a specific file plus environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or the resulting
/// configuration is invalid.
pub fn load_config_from_path(path: &Path) -> Result<(ArbiterConfig, ConfigSource), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let file = ArbiterToml::parse(&content)?;

    let mut config = ArbiterConfig::default();
    let source = if config.apply_toml(&file) {
        ConfigSource::File
    } else {
        ConfigSource::Default
    };
    tracing::debug!(path = %path.display(), "Loaded arbiter config file");
    finish(config, source)
}

fn finish(
    mut config: ArbiterConfig,
    mut source: ConfigSource,
) -> Result<(ArbiterConfig, ConfigSource), ConfigError> {
    if config.apply_env(|key| std::env::var(key).ok()) {
        source = ConfigSource::Env;
    }
    config.validate()?;
    Ok((config, source))
}
