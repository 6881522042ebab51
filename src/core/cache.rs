//! Durable rate storage abstraction

use crate::core::error::RateResult;
use crate::core::rate::{RateKey, RateRecord};
use async_trait::async_trait;

/// Persistent storage for rate records.
///
/// Records are immutable: historical rates never change, so there is no
/// expiry, update or removal. `put` on a key that already holds a record
/// leaves the stored record untouched.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Returns the record for `key`, or `None` if it was never written.
    async fn get(&self, key: &RateKey) -> RateResult<Option<RateRecord>>;

    /// Durably and atomically stores `record` unless its key is already present.
    async fn put(&self, record: &RateRecord) -> RateResult<()>;
}
