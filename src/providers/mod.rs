pub mod caching;
pub mod open_exchange_rates;
pub mod util;

pub use caching::RateCache;
pub use open_exchange_rates::OpenExchangeRatesProvider;
