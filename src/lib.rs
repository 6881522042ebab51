pub mod cli;
pub mod conversion;
pub mod core;
pub mod providers;
pub mod store;

use crate::conversion::ConversionEngine;
use crate::core::config::AppConfig;
use crate::providers::OpenExchangeRatesProvider;
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Rate {
        from: String,
        to: String,
        date: Option<NaiveDate>,
    },
    Convert {
        file: PathBuf,
        target: Option<String>,
    },
}

/// Builds a conversion engine from configuration: HTTP provider plus the
/// configured durable store.
pub fn build_engine(config: &AppConfig) -> Result<ConversionEngine> {
    let provider = OpenExchangeRatesProvider::from_config(&config.provider)?;
    let store = store::open_store(config)?;
    Ok(ConversionEngine::new(Arc::new(provider), store))
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("fxledger starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let engine = build_engine(&config)?;

    match command {
        AppCommand::Rate { from, to, date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            cli::rate::run(&engine, &from, &to, date).await
        }
        AppCommand::Convert { file, target } => {
            let target = target.unwrap_or_else(|| config.currency.clone());
            cli::convert::run(&engine, &file, &target).await
        }
    }
}
