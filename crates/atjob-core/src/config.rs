use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 1000;
pub const DEFAULT_RESYNC_SECS: u64 = 30;
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RUNNER_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_MAX_RESTARTS: u32 = 6;
pub const DEFAULT_RESTART_BACKOFF_SECS: u64 = 10;
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 4_000;

/// Top-level config (atjob.toml + ATJOB_* env overrides).
///
/// Nested keys are separated by a double underscore in the environment,
/// e.g. `ATJOB_CONTROLLER__WORKERS=8`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtjobConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    /// Process-local; everything is lost on exit.
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// SQLite database file. Ignored by the memory backend.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
        }
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// First per-key retry delay after a failed reconcile; doubles each failure.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Cap on the per-key retry delay.
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Period of the full re-list that enqueues every job.
    #[serde(default = "default_resync_secs")]
    pub resync_secs: u64,
    /// Optimistic-concurrency conflicts absorbed inside one reconcile.
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
    /// Period of the orphaned-unit sweep.
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            resync_secs: DEFAULT_RESYNC_SECS,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            gc_interval_secs: DEFAULT_GC_INTERVAL_SECS,
        }
    }
}

/// Local process runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// When false, units are created but nothing in this process runs them.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Wall-clock limit per attempt; 0 means no limit.
    #[serde(default = "default_runner_timeout_secs")]
    pub timeout_secs: u64,
    /// Restarts allowed under the on-failure policy before the unit fails.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_backoff_secs")]
    pub restart_backoff_secs: u64,
    /// Captured stdout/stderr beyond this is middle-truncated.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: DEFAULT_RUNNER_TIMEOUT_SECS,
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_backoff_secs: DEFAULT_RESTART_BACKOFF_SECS,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_backend() -> StoreBackend {
    StoreBackend::Sqlite
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.atjob/atjob.db", home)
}
fn default_workers() -> usize {
    DEFAULT_WORKERS
}
fn default_backoff_base_ms() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}
fn default_backoff_max_secs() -> u64 {
    DEFAULT_BACKOFF_MAX_SECS
}
fn default_resync_secs() -> u64 {
    DEFAULT_RESYNC_SECS
}
fn default_max_conflict_retries() -> u32 {
    DEFAULT_MAX_CONFLICT_RETRIES
}
fn default_gc_interval_secs() -> u64 {
    DEFAULT_GC_INTERVAL_SECS
}
fn default_runner_timeout_secs() -> u64 {
    DEFAULT_RUNNER_TIMEOUT_SECS
}
fn default_max_restarts() -> u32 {
    DEFAULT_MAX_RESTARTS
}
fn default_restart_backoff_secs() -> u64 {
    DEFAULT_RESTART_BACKOFF_SECS
}
fn default_max_output_chars() -> usize {
    DEFAULT_MAX_OUTPUT_CHARS
}

impl AtjobConfig {
    /// Load config from a TOML file with ATJOB_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.atjob/atjob.toml
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("ATJOB_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::AtjobError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.atjob/atjob.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AtjobConfig::from_figment(Figment::from(Toml::string(""))).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.controller.workers, DEFAULT_WORKERS);
        assert!(config.runner.enabled);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let toml = r#"
            [store]
            backend = "memory"

            [controller]
            workers = 16
        "#;
        let config = AtjobConfig::from_figment(Figment::from(Toml::string(toml))).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.controller.workers, 16);
        assert_eq!(
            config.controller.max_conflict_retries,
            DEFAULT_MAX_CONFLICT_RETRIES
        );
        assert_eq!(config.runner.max_restarts, DEFAULT_MAX_RESTARTS);
    }

    #[test]
    fn unknown_backend_is_a_config_error() {
        let toml = "[store]\nbackend = \"etcd\"\n";
        let err = AtjobConfig::from_figment(Figment::from(Toml::string(toml))).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
