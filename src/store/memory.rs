use crate::core::cache::RateStore;
use crate::core::error::RateResult;
use crate::core::rate::{RateKey, RateRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// In-memory rate store. Contents are lost when the process exits.
#[derive(Clone, Default)]
pub struct MemoryRateStore {
    inner: Arc<Mutex<HashMap<RateKey, f64>>>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn get(&self, key: &RateKey) -> RateResult<Option<RateRecord>> {
        let cache = self.inner.lock().await;
        match cache.get(key) {
            Some(rate) => {
                debug!("Cache HIT for key: {}", key);
                Ok(Some(RateRecord {
                    key: key.clone(),
                    rate: *rate,
                }))
            }
            None => {
                debug!("Cache MISS for key: {}", key);
                Ok(None)
            }
        }
    }

    async fn put(&self, record: &RateRecord) -> RateResult<()> {
        let mut cache = self.inner.lock().await;
        debug!("Cache PUT for key: {}", record.key);
        cache.entry(record.key.clone()).or_insert(record.rate);
        Ok(())
    }
}
