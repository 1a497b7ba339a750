//! Metering pipeline configuration
//!
//! Loaded from TOML; every field has a default so partial files work.
//!
//! ```toml
//! input_count = 8
//! docs_in_buffer = 65536
//! varied_doc_limit = 32768
//! window_size = 60
//! window_move_margin = 10
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Error type for configuration loading and validation
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read
    Io(std::io::Error),
    /// The file is not valid TOML for this schema
    Parse(toml::de::Error),
    /// A value is out of range
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Sizing and window parameters of the metering handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeteringConfig {
    /// Number of input shards, one sub-handler each
    pub input_count: usize,
    /// Live document cap per stash
    pub docs_in_buffer: usize,
    /// Distinct tag cap per stash between flushes
    pub varied_doc_limit: usize,
    /// Aggregation window in seconds
    pub window_size: u32,
    /// Grace period in seconds for documents of the closing window
    pub window_move_margin: u32,
    /// Capacity of each queue partition
    pub queue_size: usize,
    /// Idle time after which a shard read yields a tick
    pub recv_timeout_ms: u64,
    /// Stats polling interval
    pub stats_interval_ms: u64,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        MeteringConfig {
            input_count: 4,
            docs_in_buffer: 65536,
            varied_doc_limit: 32768,
            window_size: 60,
            window_move_margin: 10,
            queue_size: 65536,
            recv_timeout_ms: 1000,
            stats_interval_ms: 10_000,
        }
    }
}

impl MeteringConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: MeteringConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("input_count", self.input_count as u64),
            ("docs_in_buffer", self.docs_in_buffer as u64),
            ("varied_doc_limit", self.varied_doc_limit as u64),
            ("window_size", self.window_size as u64),
            ("queue_size", self.queue_size as u64),
            ("recv_timeout_ms", self.recv_timeout_ms),
            ("stats_interval_ms", self.stats_interval_ms),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
        }
        if self.window_move_margin >= self.window_size {
            return Err(ConfigError::Invalid(format!(
                "window_move_margin ({}) must be smaller than window_size ({})",
                self.window_move_margin, self.window_size
            )));
        }
        Ok(())
    }

    pub fn with_input_count(mut self, count: usize) -> Self {
        self.input_count = count;
        self
    }

    pub fn with_docs_in_buffer(mut self, docs: usize) -> Self {
        self.docs_in_buffer = docs;
        self
    }

    pub fn with_varied_doc_limit(mut self, limit: usize) -> Self {
        self.varied_doc_limit = limit;
        self
    }

    /// Set window size and move margin, both in seconds
    pub fn with_window(mut self, size: u32, move_margin: u32) -> Self {
        self.window_size = size;
        self.window_move_margin = move_margin;
        self
    }

    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}
