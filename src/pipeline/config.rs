//! Runtime configuration from environment variables
//!
//! `.env` files are loaded by the binaries (dotenv) before `from_env` runs.

use super::admission::{DEFAULT_ADMISSION_CEILING, DEFAULT_ADMISSION_WINDOW_MS};
use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be used
    Invalid { var: &'static str, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, reason } => write!(f, "invalid {}: {}", var, reason),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the kill statistics runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Directory holding the `.sql` migrations
    pub schema_dir: String,

    /// Accepted submissions per source per window
    pub admission_ceiling: u32,

    pub admission_window_ms: i64,

    /// Buffer of the submission channel
    pub ingest_channel_buffer: usize,

    /// Buffer of the persist channel
    pub persist_channel_buffer: usize,

    /// How often ingestion logs counters and sweeps admission state
    pub stats_interval_ms: u64,

    /// Persist events with a missing dimension (flagged incomplete)
    pub capture_incomplete: bool,

    /// Rebuild the index from stored kills on startup
    pub replay_on_start: bool,

    /// JSONL submission stream; None reads stdin
    pub submissions_path: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: "data/killstat.db".to_string(),
            schema_dir: "sql".to_string(),
            admission_ceiling: DEFAULT_ADMISSION_CEILING,
            admission_window_ms: DEFAULT_ADMISSION_WINDOW_MS,
            ingest_channel_buffer: 10_000,
            persist_channel_buffer: 10_000,
            stats_interval_ms: 10_000,
            capture_incomplete: true,
            replay_on_start: true,
            submissions_path: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `KILLSTAT_DB_PATH` (default: data/killstat.db)
    /// - `KILLSTAT_SCHEMA_DIR` (default: sql)
    /// - `ADMISSION_CEILING` (default: 3)
    /// - `ADMISSION_WINDOW_MS` (default: 1000)
    /// - `INGEST_CHANNEL_BUFFER` (default: 10000)
    /// - `PERSIST_CHANNEL_BUFFER` (default: 10000)
    /// - `STATS_LOG_INTERVAL_MS` (default: 10000)
    /// - `CAPTURE_INCOMPLETE_EVENTS` (default: true)
    /// - `REPLAY_ON_START` (default: true)
    /// - `KILLSTAT_SUBMISSIONS_PATH` (default: unset, read stdin)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            db_path: lookup("KILLSTAT_DB_PATH").unwrap_or(defaults.db_path),
            schema_dir: lookup("KILLSTAT_SCHEMA_DIR").unwrap_or(defaults.schema_dir),
            admission_ceiling: lookup("ADMISSION_CEILING")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.admission_ceiling),
            admission_window_ms: lookup("ADMISSION_WINDOW_MS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.admission_window_ms),
            ingest_channel_buffer: lookup("INGEST_CHANNEL_BUFFER")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.ingest_channel_buffer),
            persist_channel_buffer: lookup("PERSIST_CHANNEL_BUFFER")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.persist_channel_buffer),
            stats_interval_ms: lookup("STATS_LOG_INTERVAL_MS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.stats_interval_ms),
            capture_incomplete: lookup("CAPTURE_INCOMPLETE_EVENTS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.capture_incomplete),
            replay_on_start: lookup("REPLAY_ON_START")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.replay_on_start),
            submissions_path: lookup("KILLSTAT_SUBMISSIONS_PATH").filter(|p| !p.trim().is_empty()),
        }
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admission_window_ms <= 0 {
            return Err(ConfigError::Invalid {
                var: "ADMISSION_WINDOW_MS",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.ingest_channel_buffer == 0 {
            return Err(ConfigError::Invalid {
                var: "INGEST_CHANNEL_BUFFER",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.persist_channel_buffer == 0 {
            return Err(ConfigError::Invalid {
                var: "PERSIST_CHANNEL_BUFFER",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.db_path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "KILLSTAT_DB_PATH",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
