use super::util::with_retry;
use crate::core::config::ProviderConfig;
use crate::core::currency::RateSource;
use crate::core::error::{RateError, RateResult};
use crate::core::rate::{ProviderSnapshot, normalize_currency};
use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{StatusCode, Url, header::RETRY_AFTER};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

#[derive(Debug, Deserialize)]
struct RatesResponse {
    base: Option<String>,
    rates: Option<HashMap<String, f64>>,
}

/// Fetches base-relative rates from an Open Exchange Rates style endpoint:
/// `GET <base_url>?app_id=<key>` answering `{"base": "USD", "rates": {...}}`.
pub struct OpenExchangeRatesProvider {
    base_url: String,
    app_id: String,
    base_currency: String,
    retries: usize,
    retry_delay_ms: u64,
    client: reqwest::Client,
}

impl OpenExchangeRatesProvider {
    pub fn new(
        base_url: &str,
        app_id: &str,
        base_currency: &str,
        timeout: Duration,
    ) -> RateResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("fxledger/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| RateError::ProviderUnavailable(format!("HTTP client error: {e}")))?;

        Ok(Self {
            base_url: base_url.to_string(),
            app_id: app_id.to_string(),
            base_currency: normalize_currency(base_currency)?,
            retries: 0,
            retry_delay_ms: 0,
            client,
        })
    }

    pub fn with_retries(mut self, retries: usize, retry_delay_ms: u64) -> Self {
        self.retries = retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn from_config(config: &ProviderConfig) -> anyhow::Result<Self> {
        let app_id = config.resolve_app_id()?;
        let provider = Self::new(
            &config.base_url,
            &app_id,
            &config.base_currency,
            config.timeout(),
        )
        .context("Failed to build rate provider")?;
        Ok(provider.with_retries(config.retries, config.retry_delay_ms))
    }

    /// The endpoint for `date`, without the credential.
    fn endpoint(&self, date: NaiveDate) -> String {
        self.base_url
            .replace("{date}", &date.format("%Y-%m-%d").to_string())
    }

    async fn fetch_once(&self, date: NaiveDate) -> RateResult<ProviderSnapshot> {
        let endpoint = self.endpoint(date);
        let url = Url::parse_with_params(&endpoint, &[("app_id", &self.app_id)])
            .map_err(|e| RateError::ProviderUnavailable(format!("Invalid provider URL {endpoint}: {e}")))?;
        debug!("Requesting rates from {}", endpoint);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                RateError::ProviderUnavailable(format!("Request timed out for {endpoint}"))
            } else {
                RateError::ProviderUnavailable(format!("Request error for {endpoint}: {}", e.without_url()))
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            warn!(?retry_after_secs, "Rate provider rate limit hit");
            return Err(RateError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(RateError::ProviderUnavailable(format!(
                "HTTP error: {status} for {endpoint}"
            )));
        }

        let text = response.text().await.map_err(|e| {
            RateError::ProviderUnavailable(format!("Failed to read response body: {}", e.without_url()))
        })?;
        if text.trim().is_empty() {
            return Err(RateError::MalformedResponse("Empty response body".to_string()));
        }

        let data: RatesResponse = serde_json::from_str(&text)
            .map_err(|e| RateError::MalformedResponse(format!("Failed to parse JSON response: {e}")))?;
        let rates = data
            .rates
            .ok_or_else(|| RateError::MalformedResponse("Response has no rates field".to_string()))?;

        let base = match data.base {
            Some(base) => normalize_currency(&base)
                .map_err(|_| RateError::MalformedResponse(format!("Invalid base currency: {base}")))?,
            None => self.base_currency.clone(),
        };
        let rates = rates
            .into_iter()
            .map(|(code, rate)| (code.to_ascii_uppercase(), rate))
            .collect::<HashMap<_, _>>();

        debug!(base = %base, count = rates.len(), "Parsed provider snapshot");
        Ok(ProviderSnapshot { base, rates })
    }
}

#[async_trait]
impl RateSource for OpenExchangeRatesProvider {
    #[instrument(name = "RateFetch", skip(self), fields(date = %date))]
    async fn fetch(&self, date: NaiveDate) -> RateResult<ProviderSnapshot> {
        with_retry(|| self.fetch_once(date), self.retries, self.retry_delay_ms).await
    }
}
