use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Poll cadence of the scheduler loop when the cache is empty, and the upper
/// bound on a single wait increment while sleeping towards a due time.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Top-level config (eventd.toml + EVENTD_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventdConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Scheduler subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Start the scheduler on server boot (default: true). The embedding
    /// server toggles the subsystem at runtime via start()/stop().
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Wait increment of the main loop in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Cap on concurrently running event executions. `None` means unlimited,
    /// matching the historical one-thread-per-firing behaviour.
    #[serde(default)]
    pub max_concurrent_executions: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_executions: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn bool_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.eventd/eventd.db")
}

impl EventdConfig {
    /// Load config from a TOML file with EVENTD_* env var overrides
    /// (double underscore separates nesting: EVENTD_SCHEDULER__POLL_INTERVAL_MS).
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: EventdConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("EVENTD_").split("__"))
            .extract()
            .map_err(|e| crate::error::EventdError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.eventd/eventd.toml")
}
