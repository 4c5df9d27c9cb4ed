//! Runtime settings for modbuster
//!
//! Nothing is persisted. Defaults can be overridden per process through
//! `MODBUSTER_*` environment variables, and CLI flags override both.

use std::time::Duration;

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 502;
pub const DEFAULT_UNIT_ID: u8 = 0;
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Modbus TCP port (default: 502)
    pub port: u16,
    /// Unit/slave id used when none is given
    pub unit_id: u8,
    /// Receive timeout per request
    pub timeout_ms: u64,
    /// Connect timeout
    pub connect_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            unit_id: DEFAULT_UNIT_ID,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl Settings {
    /// Reject settings no command can run with
    pub fn validate(self) -> Result<Self, SettingsError> {
        if self.timeout_ms == 0 {
            return Err(SettingsError::Invalid("timeout_ms must be positive".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(SettingsError::Invalid(
                "connect_timeout_ms must be positive".into(),
            ));
        }
        Ok(self)
    }

    /// Build the connection target for one command invocation
    pub fn target(&self, host: impl Into<String>) -> TcpTarget {
        TcpTarget {
            host: host.into(),
            port: self.port,
            unit_id: self.unit_id,
            timeout: Duration::from_millis(self.timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

/// Where and how a command talks to its device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpTarget {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

/// Load settings from defaults and the process environment
pub fn load_settings() -> Result<Settings, SettingsError> {
    load_settings_from(Environment::with_prefix("MODBUSTER"))
}

fn load_settings_from(env: Environment) -> Result<Settings, SettingsError> {
    let defaults = Settings::default();

    let settings: Settings = Config::builder()
        .set_default("port", i64::from(defaults.port))?
        .set_default("unit_id", i64::from(defaults.unit_id))?
        .set_default("timeout_ms", defaults.timeout_ms as i64)?
        .set_default("connect_timeout_ms", defaults.connect_timeout_ms as i64)?
        .add_source(env.try_parsing(true))
        .build()?
        .try_deserialize()?;

    settings.validate()
}
