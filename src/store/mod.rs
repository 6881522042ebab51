pub mod disk;
pub mod keyspace;
pub mod memory;

use crate::core::cache::RateStore;
use crate::core::config::{AppConfig, CacheBackend};
use anyhow::{Context, Result};
use disk::FileRateStore;
use keyspace::KeyspaceRateStore;
use std::sync::Arc;
use tracing::debug;

/// Opens the durable rate store selected by the configuration.
pub fn open_store(config: &AppConfig) -> Result<Arc<dyn RateStore>> {
    let path = config.cache_path()?;
    debug!(backend = ?config.cache.backend, path = %path.display(), "Opening rate store");

    let store: Arc<dyn RateStore> = match config.cache.backend {
        CacheBackend::Files => Arc::new(FileRateStore::new(path)),
        CacheBackend::Keyspace => Arc::new(
            KeyspaceRateStore::open(&path)
                .with_context(|| format!("Failed to open rate keyspace at {}", path.display()))?,
        ),
    };
    Ok(store)
}
