use super::ui;
use crate::conversion::ConversionEngine;
use crate::core::rate::{ConversionOutcome, MonetaryAmount};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use comfy_table::Cell;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// One expense as supplied by the ledger export.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Expense {
    #[serde(default)]
    pub description: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub date: NaiveDate,
}

impl From<&Expense> for MonetaryAmount {
    fn from(expense: &Expense) -> Self {
        MonetaryAmount {
            value: expense.amount,
            currency: expense.currency.clone(),
            date: expense.date,
        }
    }
}

pub fn load_expenses<P: AsRef<Path>>(path: P) -> Result<Vec<Expense>> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read expenses file: {}", path.as_ref().display()))?;
    let expenses: Vec<Expense> = serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse expenses file: {}", path.as_ref().display()))?;
    debug!(count = expenses.len(), "Loaded expenses");
    Ok(expenses)
}

/// Converted view of a list of expenses.
pub struct ConversionReport {
    pub target_currency: String,
    pub expenses: Vec<Expense>,
    pub outcomes: Vec<ConversionOutcome>,
}

impl ConversionReport {
    /// Sum of all converted rows; failed rows are excluded.
    pub fn total(&self) -> f64 {
        self.outcomes
            .iter()
            .filter_map(ConversionOutcome::converted)
            .map(|amount| amount.value)
            .sum()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn display_as_table(&self) -> String {
        let target_currency = &self.target_currency;
        let mut table = ui::new_styled_table();

        table.set_header(vec![
            ui::header_cell("Date"),
            ui::header_cell("Description"),
            ui::header_cell("Amount"),
            ui::header_cell(&format!("Value ({target_currency})")),
            ui::header_cell("Status"),
        ]);

        for (expense, outcome) in self.expenses.iter().zip(&self.outcomes) {
            let (value, status) = match outcome {
                ConversionOutcome::Converted(converted) => {
                    (ui::amount_cell(converted.value), Cell::new("ok"))
                }
                ConversionOutcome::Failed { error, .. } => {
                    (ui::na_cell(), ui::error_cell(&error.to_string()))
                }
            };
            table.add_row(vec![
                Cell::new(expense.date.format("%Y-%m-%d")),
                Cell::new(expense.description.as_deref().unwrap_or("-")),
                Cell::new(format!("{:.2} {}", expense.amount, expense.currency)),
                value,
                status,
            ]);
        }

        let mut output = format!(
            "{}\n\n",
            ui::style_text("Converted expenses", ui::StyleType::Title)
        );
        output.push_str(&table.to_string());
        output.push_str(&format!(
            "\n\nTotal ({}): {}",
            ui::style_text(target_currency, ui::StyleType::TotalLabel),
            ui::style_text(&format!("{:.2}", self.total()), ui::StyleType::TotalValue)
        ));

        let failed = self.failed();
        if failed > 0 {
            output.push_str(&format!(
                "\n{}",
                ui::style_text(
                    &format!("{failed} expense(s) could not be converted"),
                    ui::StyleType::Error
                )
            ));
        } else {
            output.push_str(&format!(
                "\n{}",
                ui::style_text("All expenses converted", ui::StyleType::Subtle)
            ));
        }
        output
    }
}

pub async fn convert_expenses(
    engine: &ConversionEngine,
    expenses: Vec<Expense>,
    target_currency: &str,
) -> ConversionReport {
    let amounts: Vec<MonetaryAmount> = expenses.iter().map(MonetaryAmount::from).collect();

    let pb = ui::new_progress_bar(amounts.len() as u64);
    pb.set_message("Converting expenses...");
    let outcomes = engine
        .convert_batch_with_progress(&amounts, target_currency, &|| pb.inc(1))
        .await;
    pb.finish_and_clear();

    ConversionReport {
        target_currency: target_currency.to_ascii_uppercase(),
        expenses,
        outcomes,
    }
}

pub async fn run(engine: &ConversionEngine, file: &Path, target_currency: &str) -> Result<()> {
    let expenses = load_expenses(file)?;
    let report = convert_expenses(engine, expenses, target_currency).await;
    println!("{}", report.display_as_table());
    Ok(())
}
