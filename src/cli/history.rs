use super::ui;
use crate::core::convert::quantize;
use crate::core::error::RateError;
use crate::core::history::{HistoryPeriod, RateHistory};
use crate::core::provider::RateProvider;
use crate::core::rates::{is_currency_code, normalize_code};
use crate::providers::yahoo_finance::YahooProvider;
use anyhow::{Result, bail};
use comfy_table::{Cell, Table};
use rust_decimal::Decimal;
use std::time::Duration;

/// Normalizes both codes and rejects malformed or identical ones.
pub fn currency_pair(from: &str, to: &str) -> Result<(String, String)> {
    let from = normalize_code(from);
    let to = normalize_code(to);
    for code in [&from, &to] {
        if !is_currency_code(code) {
            return Err(RateError::UnknownCurrency(code.clone()).into());
        }
    }
    if from == to {
        bail!("Source and target currency are both {from}");
    }
    Ok((from, to))
}

pub fn build_history_table(history: &RateHistory, decimal_places: u32) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell(&format!("1 {} in {}", history.from, history.to)),
    ]);

    for point in &history.points {
        table.add_row(vec![
            Cell::new(point.date.format("%Y-%m-%d")),
            ui::number_cell(quantize(point.rate, decimal_places).to_string()),
        ]);
    }
    table
}

/// "EUR/USD over 3mo: 1.0712 -> 1.0842 (+1.21%), low 1.0650, high 1.0901"
pub fn summary_line(history: &RateHistory, decimal_places: u32) -> Option<String> {
    let first = history.points.first()?.rate;
    let last = history.points.last()?.rate;
    let fmt = |value: Decimal| quantize(value, decimal_places).to_string();

    let change = history
        .change_percent()
        .map(|change| {
            let sign = if change > Decimal::ZERO { "+" } else { "" };
            format!(" ({sign}{}%)", quantize(change, 2))
        })
        .unwrap_or_default();

    Some(format!(
        "{}/{} over {}: {} -> {}{change}, low {}, high {}",
        history.from,
        history.to,
        history.period,
        fmt(first),
        fmt(last),
        fmt(history.low()?),
        fmt(history.high()?)
    ))
}

pub async fn run(
    provider: &YahooProvider,
    timeout: Duration,
    from: &str,
    to: &str,
    period: HistoryPeriod,
    decimal_places: u32,
    json: bool,
) -> Result<()> {
    let (from, to) = currency_pair(from, to)?;

    let spinner = ui::new_spinner(&format!("Fetching {from}/{to} history..."));
    let result = tokio::time::timeout(timeout, provider.history(&from, &to, period)).await;
    spinner.finish_and_clear();

    let history = result.map_err(|_| RateError::ProviderTimeout {
        provider: provider.name().to_string(),
        timeout_ms: timeout.as_millis(),
    })??;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    println!(
        "{}",
        ui::style_text(
            &format!("{from} to {to} exchange rate history"),
            ui::StyleType::Title
        )
    );
    println!("{}", build_history_table(&history, decimal_places));
    if let Some(summary) = summary_line(&history, decimal_places) {
        println!("{}", ui::style_text(&summary, ui::StyleType::Result));
    }
    Ok(())
}
