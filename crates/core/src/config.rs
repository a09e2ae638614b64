use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FlowError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.parse().ok())
}

/// Convert a size string such as `"5M"` into bytes (decimal suffixes).
///
/// A bare number is taken as bytes.
pub fn parse_byte_size(s: &str) -> Result<u64, FlowError> {
    let s = s.trim();
    let invalid = || FlowError::Config(format!("invalid byte size '{s}'"));
    let last = s.chars().last().ok_or_else(invalid)?;

    let (digits, multiplier) = match last.to_ascii_uppercase() {
        'B' => (&s[..s.len() - 1], 1),
        'K' => (&s[..s.len() - 1], 1_000),
        'M' => (&s[..s.len() - 1], 1_000_000),
        'G' => (&s[..s.len() - 1], 1_000_000_000),
        'T' => (&s[..s.len() - 1], 1_000_000_000_000),
        c if c.is_ascii_digit() => (s, 1),
        _ => return Err(invalid()),
    };

    let amount: u64 = digits.trim().parse().map_err(|_| invalid())?;
    amount.checked_mul(multiplier).ok_or_else(invalid)
}

// ── Top-level config ──────────────────────────────────────────

/// Settings shared by every script run, read from
/// `~/.config/blockflow/config.toml` and overridden by `BLOCKFLOW_*` env vars.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub slurm: SlurmConfig,
}

impl FlowConfig {
    /// Return the default config directory path: ~/.config/blockflow/
    pub fn default_config_dir() -> Result<PathBuf, FlowError> {
        dirs::config_dir()
            .map(|d| d.join("blockflow"))
            .ok_or_else(|| FlowError::Config("could not determine user config directory".into()))
    }

    /// Load the user config file (if present) and apply env overrides.
    pub fn load() -> Result<Self, FlowError> {
        load_dotenv();
        let path = Self::default_config_dir()?.join("config.toml");
        let mut config = Self::from_file_or_default(&path)?;
        config.apply_env();
        Ok(config)
    }

    /// Parse a TOML file; a missing file yields the defaults.
    pub fn from_file_or_default(path: &Path) -> Result<Self, FlowError> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, FlowError> {
        toml::from_str(content).map_err(|e| FlowError::Config(e.to_string()))
    }

    /// Override file values with `BLOCKFLOW_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Some(n) = env_parsed("BLOCKFLOW_PROCESSES") {
            self.execution.processes = Some(n);
        }
        if let Some(ms) = env_parsed("BLOCKFLOW_POLL_MS") {
            self.execution.poll_interval_ms = ms;
        }
        if let Some(t) = env_parsed("BLOCKFLOW_CACHE_TIME") {
            self.storage.cache_time = t;
        }
        if let Some(size) = env_opt("BLOCKFLOW_CACHE_SIZE") {
            self.storage.cache_size = size;
        }
        if let Some(delay) = env_parsed("BLOCKFLOW_NOTIFY_DELAY") {
            self.notifications.delay = delay;
        }
        if let Some(token) = env_opt("BLOCKFLOW_TELEGRAM_TOKEN") {
            self.notifications.telegram.token = Some(token);
        }
        if let Some(chat_id) = env_opt("BLOCKFLOW_TELEGRAM_CHAT_ID") {
            self.notifications.telegram.chat_id = Some(chat_id);
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::debug!("Config loaded:");
        tracing::debug!(
            "  execution:     processes={}, poll={}ms",
            self.execution
                .processes
                .map(|n| n.to_string())
                .unwrap_or_else(|| "auto".into()),
            self.execution.poll_interval_ms
        );
        tracing::debug!(
            "  storage:       cache_size={}, cache_time={}s, ext={}",
            self.storage.cache_size,
            self.storage.cache_time,
            self.storage.extension
        );
        tracing::debug!(
            "  notifications: telegram={}",
            self.notifications.telegram.is_configured()
        );
    }
}

// ── Execution ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Worker count. None = available parallelism.
    #[serde(default)]
    pub processes: Option<usize>,
    /// Coordinator wait between readiness passes, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Minimum interval between progress updates, in milliseconds.
    #[serde(default = "default_mininterval")]
    pub progress_mininterval_ms: u64,
}

fn default_poll_interval() -> u64 { 100 }
fn default_mininterval() -> u64 { 100 }

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            processes: None,
            poll_interval_ms: default_poll_interval(),
            progress_mininterval_ms: default_mininterval(),
        }
    }
}

impl ExecutionConfig {
    /// Resolve worker count (None means use available parallelism).
    pub fn resolved_processes(&self) -> usize {
        match self.processes {
            Some(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Streaming cache memory budget, e.g. "100M".
    #[serde(default = "default_cache_size")]
    pub cache_size: String,
    /// Seconds between forced streaming cache flushes.
    #[serde(default = "default_cache_time")]
    pub cache_time: f64,
    /// Record file extension (without the dot).
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_cache_size() -> String { "100M".to_string() }
fn default_cache_time() -> f64 { 300.0 }
fn default_extension() -> String { "rec".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            cache_time: default_cache_time(),
            extension: default_extension(),
        }
    }
}

impl StorageConfig {
    pub fn cache_size_bytes(&self) -> Result<u64, FlowError> {
        parse_byte_size(&self.cache_size)
    }
}

// ── Notifications ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Seconds to wait before sending end-of-run notifications.
    #[serde(default = "default_notify_delay")]
    pub delay: f64,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

fn default_notify_delay() -> f64 { 0.0 }

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            delay: default_notify_delay(),
            telegram: TelegramConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub token: Option<String>,
    pub chat_id: Option<String>,
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        self.token.is_some() && self.chat_id.is_some()
    }
}

// ── Slurm ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlurmConfig {
    #[serde(default = "default_partition")]
    pub partition: String,
    /// Maximum run-time, `{hours}:{minutes}:{seconds}`.
    #[serde(default = "default_time")]
    pub time: String,
    /// Memory per CPU in GB.
    #[serde(default = "default_memory")]
    pub memory: f64,
}

fn default_partition() -> String { "broadwl".to_string() }
fn default_time() -> String { "36".to_string() }
fn default_memory() -> f64 { 2.0 }

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            partition: default_partition(),
            time: default_time(),
            memory: default_memory(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes() {
        assert_eq!(parse_byte_size("5M").unwrap(), 5_000_000);
        assert_eq!(parse_byte_size("100M").unwrap(), 100_000_000);
        assert_eq!(parse_byte_size("2K").unwrap(), 2_000);
        assert_eq!(parse_byte_size("17B").unwrap(), 17);
        assert_eq!(parse_byte_size("42").unwrap(), 42);
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("10Q").is_err());
        assert!(parse_byte_size("xM").is_err());
        assert!(parse_byte_size("99999999999T").is_err());
    }

    #[test]
    fn defaults() {
        let config = FlowConfig::default();
        assert_eq!(config.execution.processes, None);
        assert_eq!(config.execution.poll_interval_ms, 100);
        assert_eq!(config.storage.cache_size, "100M");
        assert_eq!(config.storage.cache_time, 300.0);
        assert_eq!(config.storage.extension, "rec");
        assert_eq!(config.slurm.partition, "broadwl");
        assert!(!config.notifications.telegram.is_configured());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = FlowConfig::from_toml(
            r#"
            [storage]
            cache_time = 60

            [notifications.telegram]
            token = "123:ABC"
            chat_id = "42"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.cache_time, 60.0);
        assert_eq!(config.storage.cache_size, "100M");
        assert!(config.notifications.telegram.is_configured());
        assert_eq!(config.execution.poll_interval_ms, 100);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FlowConfig::from_file_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.storage.extension, "rec");
    }

    #[test]
    fn resolved_processes() {
        let mut config = ExecutionConfig::default();
        assert!(config.resolved_processes() > 0);

        config.processes = Some(8);
        assert_eq!(config.resolved_processes(), 8);
    }
}
