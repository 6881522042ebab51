//! Error taxonomy for rate acquisition, caching and conversion.

use thiserror::Error;

/// Errors surfaced by the fetcher, the cache and the conversion engine.
///
/// The type is `Clone` so a single in-flight failure can be handed to every
/// caller waiting on the same rate key.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateError {
    /// Transport failure, non-success status or timeout talking to the provider.
    #[error("Rate provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider answered with HTTP 429.
    #[error("Rate provider rate limit exceeded{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// The provider body could not be parsed into the expected shape.
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// The currency code is invalid or absent from the provider snapshot.
    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    /// Durable storage failed while reading or writing a rate record.
    #[error("Rate cache I/O error: {0}")]
    CacheIo(String),
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|s| format!(" (retry after {s}s)"))
        .unwrap_or_default()
}

impl RateError {
    /// Whether a later attempt against the provider may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RateError::ProviderUnavailable(_)
                | RateError::RateLimited { .. }
                | RateError::MalformedResponse(_)
        )
    }
}

impl From<std::io::Error> for RateError {
    fn from(e: std::io::Error) -> Self {
        RateError::CacheIo(e.to_string())
    }
}

impl From<fjall::Error> for RateError {
    fn from(e: fjall::Error) -> Self {
        RateError::CacheIo(e.to_string())
    }
}

pub type RateResult<T> = Result<T, RateError>;
