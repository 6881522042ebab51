use crate::conversion::ConversionEngine;
use crate::core::rate::normalize_currency;
use anyhow::Result;
use chrono::NaiveDate;

/// Formats a single rate lookup for display.
pub fn format_rate_line(from: &str, to: &str, date: NaiveDate, rate: f64) -> String {
    format!("1 {from} = {rate} {to} on {}", date.format("%Y-%m-%d"))
}

pub async fn run(engine: &ConversionEngine, from: &str, to: &str, date: NaiveDate) -> Result<()> {
    let rate = engine.get_exchange_rate(from, to, date).await?;
    println!(
        "{}",
        format_rate_line(&normalize_currency(from)?, &normalize_currency(to)?, date, rate)
    );
    Ok(())
}
