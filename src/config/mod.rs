//! Configuration for daqflow
//!
//! `FlowConfig` collects the tunables of the data-flow core: reader defaults,
//! input port notification, packet buffer sizing, connection diagnostics and
//! logging. Every field has a default, so a config file only needs the values
//! it changes.
//!
//! # File formats
//!
//! The format is chosen from the file extension:
//! - `.toml` - parsed with `toml`
//! - `.json` - parsed with `serde_json`
//!
//! # Default location
//!
//! - **Linux**: `~/.config/daqflow/daqflow.toml`
//! - **macOS**: `~/Library/Application Support/daqflow/daqflow.toml`
//! - **Windows**: `%APPDATA%\daqflow\daqflow.toml`
//!
//! # Example
//!
//! ```ignore
//! use daqflow::config::FlowConfig;
//!
//! let config = FlowConfig::load_or_default("daqflow.toml");
//! let _guard = daqflow::logging::init(&config.logging)?;
//! let reader = StreamReader::<f64>::with_config(&signal, &config.reader, &config.port)?;
//! ```

use crate::error::{DaqError, Result};
use crate::input_port::NotificationMode;
use crate::reader::ReadTimeoutType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for the config directory
pub const APP_ID: &str = "daqflow";

/// Default config filename
pub const CONFIG_FILE: &str = "daqflow.toml";

/// Default reader timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default tail reader history in samples
pub const DEFAULT_TAIL_HISTORY: usize = 1024;

/// Default packet buffer size (4 MiB)
pub const DEFAULT_PACKET_BUFFER_BYTES: usize = 4 * 1024 * 1024;

// ==================== Paths ====================

/// Directory holding the daqflow config file
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Path of the default config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(Self::Toml),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Self::Json),
            _ => Err(DaqError::Config(format!(
                "Unsupported config file extension: {:?}",
                path
            ))),
        }
    }
}

// ==================== Flow Config ====================

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub reader: ReaderConfig,
    pub port: PortConfig,
    pub packet_buffer: PacketBufferConfig,
    pub connection: ConnectionConfig,
    pub logging: LoggingConfig,
}

impl FlowConfig {
    /// Load a config file, choosing the parser from its extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            DaqError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = match format {
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| {
                DaqError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?,
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| {
                DaqError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config {:?}, using defaults: {}", path, e);
            Self::default()
        })
    }

    /// Load from [`default_config_path`], falling back to defaults
    pub fn load_default_location() -> Self {
        match default_config_path() {
            Some(path) if path.exists() => Self::load_or_default(path),
            _ => Self::default(),
        }
    }

    /// Save the config, choosing the format from the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DaqError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = match format {
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| DaqError::Serialization(format!("Failed to serialize config: {}", e)))?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| DaqError::Serialization(format!("Failed to serialize config: {}", e)))?,
        };

        std::fs::write(path, content).map_err(|e| {
            DaqError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.reader.block_size == 0 {
            return Err(DaqError::Config("reader.block_size must be non-zero".into()));
        }
        if self.reader.tail_history_size == 0 {
            return Err(DaqError::Config(
                "reader.tail_history_size must be non-zero".into(),
            ));
        }
        if self.packet_buffer.capacity_bytes == 0 {
            return Err(DaqError::Config(
                "packet_buffer.capacity_bytes must be non-zero".into(),
            ));
        }
        if !self.packet_buffer.alignment.is_power_of_two() {
            return Err(DaqError::Config(format!(
                "packet_buffer.alignment must be a power of two, got {}",
                self.packet_buffer.alignment
            )));
        }
        Ok(())
    }
}

// ==================== Reader Config ====================

/// Defaults applied to newly created readers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Timeout used by `read_default` style calls
    pub default_timeout_ms: u64,

    /// Samples kept by a tail reader
    pub tail_history_size: usize,

    /// Samples per block for block readers
    pub block_size: usize,

    /// Whether a read returns once any data arrived or waits for a full buffer
    pub timeout_type: ReadTimeoutType,

    /// Apply compatible descriptor changes without stopping the read
    pub skip_events: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            tail_history_size: DEFAULT_TAIL_HISTORY,
            block_size: 1,
            timeout_type: ReadTimeoutType::Any,
            skip_events: false,
        }
    }
}

// ==================== Port Config ====================

/// Input port behavior
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub notification_mode: NotificationMode,

    /// Check linear domain offsets for discontinuities
    pub gap_checking: bool,
}

// ==================== Packet Buffer Config ====================

/// Sizing of a [`PacketBuffer`](crate::alloc::PacketBuffer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketBufferConfig {
    pub capacity_bytes: usize,
    pub alignment: usize,
}

impl Default for PacketBufferConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_PACKET_BUFFER_BYTES,
            alignment: 64,
        }
    }
}

// ==================== Connection Config ====================

/// Connection diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Queue length (packets) past which a warning is logged; 0 disables it
    pub queue_warn_threshold: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_warn_threshold: 10_000,
        }
    }
}

// ==================== Logging Config ====================

/// Logging setup consumed by [`crate::logging::init`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub filter: String,

    /// Write a daily rolling log file into this directory
    pub directory: Option<PathBuf>,

    /// Log file name prefix
    pub file_prefix: String,

    /// Include thread ids in log lines
    pub thread_ids: bool,

    /// Use ANSI colors on the console layer
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "daqflow=info".to_string(),
            directory: None,
            file_prefix: APP_ID.to_string(),
            thread_ids: false,
            ansi: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = FlowConfig::default();
        assert_eq!(config.reader.default_timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.reader.timeout_type, ReadTimeoutType::Any);
        assert_eq!(config.port.notification_mode, NotificationMode::SameThread);
        assert!(!config.port.gap_checking);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flow.toml");

        let mut config = FlowConfig::default();
        config.reader.block_size = 16;
        config.port.gap_checking = true;
        config.port.notification_mode = NotificationMode::Scheduler;
        config.save(&path).unwrap();

        assert_eq!(FlowConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("flow.json");

        let mut config = FlowConfig::default();
        config.reader.timeout_type = ReadTimeoutType::All;
        config.logging.directory = Some(dir.path().join("logs"));
        config.save(&path).unwrap();

        assert_eq!(FlowConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[reader]\nblock_size = 32\n").unwrap();

        let config = FlowConfig::load(&path).unwrap();
        assert_eq!(config.reader.block_size, 32);
        assert_eq!(config.reader.tail_history_size, DEFAULT_TAIL_HISTORY);
        assert_eq!(config.packet_buffer, PacketBufferConfig::default());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flow.yaml");
        assert!(matches!(
            FlowConfig::default().save(&path),
            Err(DaqError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[packet_buffer]\nalignment = 12\n").unwrap();
        assert!(FlowConfig::load(&path).is_err());
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = FlowConfig::load_or_default("/nonexistent/daqflow.toml");
        assert_eq!(config, FlowConfig::default());
    }
}
