//! Core domain types and abstractions

pub mod cache;
pub mod config;
pub mod currency;
pub mod error;
pub mod log;
pub mod rate;

// Re-export main types for cleaner imports
pub use cache::RateStore;
pub use currency::RateSource;
pub use error::{RateError, RateResult};
pub use rate::{ConversionOutcome, MonetaryAmount, ProviderSnapshot, RateKey, RateRecord};
