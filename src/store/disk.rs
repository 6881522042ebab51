use crate::core::cache::RateStore;
use crate::core::error::{RateError, RateResult};
use crate::core::rate::{RateKey, RateRecord, format_rate, parse_rate};
use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Stores each rate as a plain decimal string at `root/YYYY-MM-DD/BASE/QUOTE`.
///
/// Writes go to a temporary file in the target directory which is then linked
/// into place, so a reader sees either no file or the complete record.
pub struct FileRateStore {
    root: PathBuf,
}

impl FileRateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, key: &RateKey) -> PathBuf {
        self.root
            .join(key.date_string())
            .join(key.base())
            .join(key.quote())
    }
}

fn read_record(path: &Path, key: &RateKey) -> RateResult<Option<RateRecord>> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let rate = parse_rate(&text)
                .map_err(|e| RateError::CacheIo(format!("{} ({})", e, path.display())))?;
            debug!("Cache HIT for key: {}", key);
            Ok(Some(RateRecord {
                key: key.clone(),
                rate,
            }))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Cache MISS for key: {}", key);
            Ok(None)
        }
        Err(e) => Err(RateError::CacheIo(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

fn write_record(path: &Path, record: &RateRecord) -> RateResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| RateError::CacheIo(format!("No parent for {}", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(format_rate(record.rate).as_bytes())?;
    tmp.as_file().sync_all()?;

    match tmp.persist_noclobber(path) {
        Ok(_) => {
            debug!("Cache PUT for key: {}", record.key);
            Ok(())
        }
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
            debug!("Cache record already present for key: {}", record.key);
            Ok(())
        }
        Err(e) => Err(RateError::CacheIo(format!(
            "Failed to publish {}: {}",
            path.display(),
            e.error
        ))),
    }
}

/// Runs blocking file I/O on tokio's blocking pool.
async fn blocking<T, F>(op: F) -> RateResult<T>
where
    F: FnOnce() -> RateResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| RateError::CacheIo(format!("Cache I/O task failed: {e}")))?
}

#[async_trait]
impl RateStore for FileRateStore {
    async fn get(&self, key: &RateKey) -> RateResult<Option<RateRecord>> {
        let path = self.record_path(key);
        let key = key.clone();
        blocking(move || read_record(&path, &key)).await
    }

    async fn put(&self, record: &RateRecord) -> RateResult<()> {
        let path = self.record_path(&record.key);
        let record = record.clone();
        blocking(move || write_record(&path, &record)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn key(quote: &str) -> RateKey {
        RateKey::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "USD", quote).unwrap()
    }

    #[tokio::test]
    async fn test_file_store_get_put() {
        let dir = tempdir().unwrap();
        let store = FileRateStore::new(dir.path());

        assert!(store.get(&key("EUR")).await.unwrap().is_none());

        let record = RateRecord::new(key("EUR"), 0.9).unwrap();
        store.put(&record).await.unwrap();

        assert_eq!(store.get(&key("EUR")).await.unwrap(), Some(record));
        assert!(store.get(&key("GBP")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_layout() {
        let dir = tempdir().unwrap();
        let store = FileRateStore::new(dir.path());
        store
            .put(&RateRecord::new(key("EUR"), 1.0 / 0.9).unwrap())
            .await
            .unwrap();

        let path = dir.path().join("2024-01-01").join("USD").join("EUR");
        assert_eq!(store.record_path(&key("EUR")), path);
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.parse::<f64>().unwrap(), 1.0 / 0.9);

        // Only the published record remains in the directory.
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("2024-01-01").join("USD"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("EUR")]);
    }

    #[tokio::test]
    async fn test_file_store_never_overwrites() {
        let dir = tempdir().unwrap();
        let store = FileRateStore::new(dir.path());
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
    async fn test_file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileRateStore::new(dir.path());
            store
                .put(&RateRecord::new(key("EUR"), 0.9).unwrap())
                .await
                .unwrap();
        }
        let reopened = FileRateStore::new(dir.path());
        assert_eq!(reopened.get(&key("EUR")).await.unwrap().unwrap().rate, 0.9);
    }

    #[tokio::test]
    async fn test_interrupted_write_is_not_a_record() {
        let dir = tempdir().unwrap();
        let store = FileRateStore::new(dir.path());
        let quote_dir = dir.path().join("2024-01-01").join("USD");
        std::fs::create_dir_all(&quote_dir).unwrap();

        // A partially written temp file left behind by a crash.
        std::fs::write(quote_dir.join(".tmpXYZ123"), "0.").unwrap();

        assert!(store.get(&key("EUR")).await.unwrap().is_none());
        store
            .put(&RateRecord::new(key("EUR"), 0.9).unwrap())
            .await
            .unwrap();
        assert_eq!(store.get(&key("EUR")).await.unwrap().unwrap().rate, 0.9);
    }

    #[tokio::test]
    async fn test_corrupted_record_is_cache_io_error() {
        let dir = tempdir().unwrap();
        let store = FileRateStore::new(dir.path());
        let path = store.record_path(&key("EUR"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not-a-number").unwrap();

        assert!(matches!(
            store.get(&key("EUR")).await,
            Err(RateError::CacheIo(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_keep_one_record() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileRateStore::new(dir.path()));

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

        let rate = store.get(&key("EUR")).await.unwrap().unwrap().rate;
        assert!((1.0..=16.0).contains(&rate) && rate.fract() == 0.0);
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("2024-01-01").join("USD"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("EUR")]);
    }
}
