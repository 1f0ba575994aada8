use std::sync::Arc;

use atjob_core::{
    config::{StoreBackend, StoreConfig},
    ExecutionUnit, ScheduledJob,
};
use atjob_store::{MemoryStore, ObjectStore, SqliteStore};
use tracing::{info, warn};

/// The two object collections every command works against.
pub struct Stores {
    pub jobs: Arc<dyn ObjectStore<ScheduledJob>>,
    pub units: Arc<dyn ObjectStore<ExecutionUnit>>,
}

impl Stores {
    pub fn open(config: &StoreConfig) -> anyhow::Result<Self> {
        match config.backend {
            StoreBackend::Memory => {
                warn!("using the in-memory store; nothing survives this process");
                Ok(Self {
                    jobs: Arc::new(MemoryStore::<ScheduledJob>::new()),
                    units: Arc::new(MemoryStore::<ExecutionUnit>::new()),
                })
            }
            StoreBackend::Sqlite => {
                ensure_parent_dir(&config.path);
                info!(path = %config.path, "opening SQLite store");
                // One connection per collection; WAL lets them share the file.
                Ok(Self {
                    jobs: Arc::new(SqliteStore::<ScheduledJob>::open(&config.path)?),
                    units: Arc::new(SqliteStore::<ExecutionUnit>::open(&config.path)?),
                })
            }
        }
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
