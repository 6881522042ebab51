//! Rate provider abstraction

use crate::core::error::RateResult;
use crate::core::rate::ProviderSnapshot;
use async_trait::async_trait;
use chrono::NaiveDate;

/// A remote source of base-relative exchange rates.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Fetches every rate the provider reports for `date`, relative to the
    /// provider's base currency.
    async fn fetch(&self, date: NaiveDate) -> RateResult<ProviderSnapshot>;
}
