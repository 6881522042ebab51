//! Pairwise conversion factors and their application to amounts.

use crate::core::cache::RateStore;
use crate::core::currency::RateSource;
use crate::core::error::RateResult;
use crate::core::rate::{ConversionOutcome, MonetaryAmount, RateKey, normalize_currency};
use crate::providers::caching::RateCache;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Upper bound on conversions a batch drives at once.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 8;

pub struct ConversionEngine {
    source: Arc<dyn RateSource>,
    cache: RateCache,
    concurrency: usize,
}

impl ConversionEngine {
    pub fn new(source: Arc<dyn RateSource>, store: Arc<dyn RateStore>) -> Self {
        Self {
            source,
            cache: RateCache::new(store),
            concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    /// Limits how many batch elements are converted concurrently (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn cache(&self) -> &RateCache {
        &self.cache
    }

    /// Factor converting one unit of `from` into `to` on `date`.
    ///
    /// Identical currencies short-circuit to `1.0` without touching the cache
    /// or the provider.
    #[instrument(skip(self))]
    pub async fn get_exchange_rate(&self, from: &str, to: &str, date: NaiveDate) -> RateResult<f64> {
        if from.trim().eq_ignore_ascii_case(to.trim()) {
            return Ok(1.0);
        }
        let key = RateKey::new(date, from, to)?;
        let (from, to) = (key.base().to_string(), key.quote().to_string());
        let source = Arc::clone(&self.source);

        let record = self
            .cache
            .get_or_compute(key, move || async move {
                let snapshot = source.fetch(date).await?;
                snapshot.cross_rate(&from, &to)
            })
            .await?;
        debug!(rate = record.rate, "Resolved exchange rate");
        Ok(record.rate)
    }

    /// Returns a copy of `amount` expressed in `target`.
    pub async fn convert_amount(
        &self,
        amount: &MonetaryAmount,
        target: &str,
    ) -> RateResult<MonetaryAmount> {
        let target = normalize_currency(target)?;
        let rate = self
            .get_exchange_rate(&amount.currency, &target, amount.date)
            .await?;
        Ok(MonetaryAmount {
            value: amount.value * rate,
            currency: target,
            date: amount.date,
        })
    }

    /// Converts every element independently; a failure is reported in place
    /// and never affects the other elements. Outcomes keep input order.
    pub async fn convert_batch(
        &self,
        amounts: &[MonetaryAmount],
        target: &str,
    ) -> Vec<ConversionOutcome> {
        self.convert_batch_with_progress(amounts, target, &|| {})
            .await
    }

    /// Like [`Self::convert_batch`], calling `on_done` as each element finishes.
    pub async fn convert_batch_with_progress(
        &self,
        amounts: &[MonetaryAmount],
        target: &str,
        on_done: &(dyn Fn() + Sync),
    ) -> Vec<ConversionOutcome> {
        let conversions = amounts.iter().enumerate().map(|(index, amount)| async move {
            let outcome = match self.convert_amount(amount, target).await {
                Ok(converted) => ConversionOutcome::Converted(converted),
                Err(error) => {
                    debug!(index, %error, "Conversion failed");
                    ConversionOutcome::Failed { index, error }
                }
            };
            on_done();
            outcome
        });
        stream::iter(conversions)
            .buffered(self.concurrency)
            .collect()
            .await
    }
}
