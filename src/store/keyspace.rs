use crate::core::cache::RateStore;
use crate::core::error::{RateError, RateResult};
use crate::core::rate::{RateKey, RateRecord, format_rate, parse_rate};
use async_trait::async_trait;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

const PARTITION: &str = "rates";

/// Rate store backed by a `fjall` keyspace, keyed by `date/base/quote`.
pub struct KeyspaceRateStore {
    keyspace: Keyspace,
    partition: PartitionHandle,
    // Serialises the contains-then-insert in `put`.
    write_lock: Arc<Mutex<()>>,
}

impl KeyspaceRateStore {
    pub fn open(path: &Path) -> RateResult<Self> {
        std::fs::create_dir_all(path)?;

        let keyspace = fjall::Config::new(path).open()?;
        let partition = keyspace.open_partition(PARTITION, PartitionCreateOptions::default())?;
        Ok(Self {
            keyspace,
            partition,
            write_lock: Arc::new(Mutex::new(())),
        })
    }
}

fn read_record(partition: &PartitionHandle, key: &RateKey) -> RateResult<Option<RateRecord>> {
    let Some(value) = partition.get(key.to_string().as_bytes())? else {
        debug!("Cache MISS for key: {}", key);
        return Ok(None);
    };
    let text = std::str::from_utf8(&value)
        .map_err(|e| RateError::CacheIo(format!("Corrupted rate record for {key}: {e}")))?;
    let rate = parse_rate(text)?;
    debug!("Cache HIT for key: {}", key);
    Ok(Some(RateRecord {
        key: key.clone(),
        rate,
    }))
}

fn write_record(
    keyspace: &Keyspace,
    partition: &PartitionHandle,
    write_lock: &Mutex<()>,
    record: &RateRecord,
) -> RateResult<()> {
    let storage_key = record.key.to_string();
    let _guard = write_lock.lock().unwrap_or_else(PoisonError::into_inner);
    if partition.contains_key(storage_key.as_bytes())? {
        debug!("Cache record already present for key: {}", record.key);
        return Ok(());
    }
    partition.insert(storage_key.as_bytes(), format_rate(record.rate).as_bytes())?;
    keyspace.persist(PersistMode::SyncAll)?;
    debug!("Cache PUT for key: {}", record.key);
    Ok(())
}

#[async_trait]
impl RateStore for KeyspaceRateStore {
    async fn get(&self, key: &RateKey) -> RateResult<Option<RateRecord>> {
        let partition = self.partition.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || read_record(&partition, &key))
            .await
            .map_err(|e| RateError::CacheIo(format!("Cache I/O task failed: {e}")))?
    }

    async fn put(&self, record: &RateRecord) -> RateResult<()> {
        let keyspace = self.keyspace.clone();
        let partition = self.partition.clone();
        let write_lock = Arc::clone(&self.write_lock);
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            write_record(&keyspace, &partition, &write_lock, &record)
        })
        .await
        .map_err(|e| RateError::CacheIo(format!("Cache I/O task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn key(quote: &str) -> RateKey {
        RateKey::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "USD", quote).unwrap()
    }

    #[tokio::test]
    async fn test_keyspace_store_get_put() {
        let dir = tempdir().unwrap();
        let store = KeyspaceRateStore::open(dir.path()).unwrap();

        assert!(store.get(&key("EUR")).await.unwrap().is_none());

        let record = RateRecord::new(key("EUR"), 0.9).unwrap();
        store.put(&record).await.unwrap();

        assert_eq!(store.get(&key("EUR")).await.unwrap(), Some(record));
        assert!(store.get(&key("GBP")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keyspace_store_never_overwrites() {
        let dir = tempdir().unwrap();
        let store = KeyspaceRateStore::open(dir.path()).unwrap();
        store
            .put(&RateRecord::new(key("EUR"), 0.9).unwrap())
            .await
            .unwrap();
        store
            .put(&RateRecord::new(key("EUR"), 0.5).unwrap())
            .await
            .unwrap();
        assert_eq!(store.get(&key("EUR")).await.unwrap().unwrap().rate, 0.9);
    }

    #[tokio::test]
    async fn test_keyspace_store_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = KeyspaceRateStore::open(dir.path()).unwrap();
            store
                .put(&RateRecord::new(key("EUR"), 0.9).unwrap())
                .await
                .unwrap();
        }
        let reopened = KeyspaceRateStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&key("EUR")).await.unwrap().unwrap().rate, 0.9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_keyspace_concurrent_puts_keep_first() {
        let dir = tempdir().unwrap();
        let store = Arc::new(KeyspaceRateStore::open(dir.path()).unwrap());

        let tasks: Vec<_> = (1..=16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .put(&RateRecord::new(key("EUR"), i as f64).unwrap())
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let first = store.get(&key("EUR")).await.unwrap().unwrap().rate;
        store
            .put(&RateRecord::new(key("EUR"), 99.0).unwrap())
            .await
            .unwrap();
        assert_eq!(store.get(&key("EUR")).await.unwrap().unwrap().rate, first);
    }
}
