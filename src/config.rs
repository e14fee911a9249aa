use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::waveform::DEFAULT_MAX_STALLED_READS;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
pub struct ScopeConfig {
    pub connection: ConnectionConfig,
    pub waveform: WaveformSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// VISA-style resource string, e.g. `TCPIP0::192.168.1.20::5025::SOCKET`
    pub resource: String,
    pub timeout_ms: u64,
    /// Refuse to talk to any other model when set.
    pub expected_model: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct WaveformSettings {
    /// Timeout applied while a binary block is being transferred
    pub binary_timeout_ms: u64,
    pub max_stalled_reads: u32,
    /// Switch to WORD samples when the scope resolution exceeds 8 bits
    pub upgrade_byte_to_word: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            resource: "TCPIP0::127.0.0.1::5025::SOCKET".to_string(),
            timeout_ms: 2000,
            expected_model: None,
        }
    }
}

impl Default for WaveformSettings {
    fn default() -> Self {
        Self {
            binary_timeout_ms: 10_000,
            max_stalled_reads: DEFAULT_MAX_STALLED_READS,
            upgrade_byte_to_word: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl ConnectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl LoggingConfig {
    /// Parsed `log_level`, `Info` when the name is not a known level
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

impl WaveformSettings {
    pub fn binary_timeout(&self) -> Duration {
        Duration::from_millis(self.binary_timeout_ms)
    }
}

/// Load configuration from file with layered fallbacks
///
/// Defaults come first, then `config_path` (or `lecroy.toml` in the working
/// directory if present), then `LECROY__SECTION__KEY` environment variables.
pub fn load_config(config_path: Option<&Path>) -> Result<ScopeConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&ScopeConfig::default())?);

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
    } else if Path::new("lecroy.toml").exists() {
        builder = builder.add_source(File::with_name("lecroy.toml"));
    }

    builder = builder.add_source(
        Environment::with_prefix("LECROY")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize::<ScopeConfig>()
}

/// Load configuration, falling back to defaults on any error
pub fn load_config_or_default(config_path: Option<&Path>) -> ScopeConfig {
    match load_config(config_path) {
        Ok(config) => {
            log::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::warn!("Failed to load config ({}), using defaults", e);
            ScopeConfig::default()
        }
    }
}
