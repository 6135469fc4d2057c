use super::ui;
use crate::core::RateFetcher;
use crate::core::convert::quantize;
use crate::core::error::RateError;
use crate::core::rates::{RateTable, normalize_code};
use anyhow::Result;
use chrono::Utc;
use comfy_table::{Cell, Table};
use rust_decimal::Decimal;
use std::time::Duration;

/// Builds the rates table, limited to `codes` when any are given.
pub fn build_rates_table(
    table: &RateTable,
    codes: &[String],
    decimal_places: u32,
) -> Result<Table, RateError> {
    let selected: Vec<(String, Decimal)> = if codes.is_empty() {
        table
            .rates
            .iter()
            .map(|(code, rate)| (code.clone(), *rate))
            .collect()
    } else {
        codes
            .iter()
            .map(|code| {
                let code = normalize_code(code);
                table
                    .rate(&code)
                    .map(|rate| (code.clone(), rate))
                    .ok_or(RateError::UnknownCurrency(code))
            })
            .collect::<Result<_, _>>()?
    };

    let mut output = ui::new_styled_table();
    output.set_header(vec![
        ui::header_cell("Currency"),
        ui::header_cell(&format!("Per 1 {}", table.base)),
        ui::header_cell(&format!("In {}", table.base)),
    ]);

    for (code, rate) in selected {
        output.add_row(vec![
            Cell::new(&code),
            ui::number_cell(rate.normalize().to_string()),
            ui::number_cell(quantize(Decimal::ONE / rate, decimal_places).to_string()),
        ]);
    }
    Ok(output)
}

pub async fn run(fetcher: &RateFetcher, max_age: Duration, codes: &[String]) -> Result<()> {
    let table = fetcher.get_rates(max_age).await?;
    let output = build_rates_table(&table, codes, fetcher.decimal_places())?;

    println!(
        "{}",
        ui::style_text(
            &format!("Exchange rates against {}", table.base),
            ui::StyleType::Title
        )
    );
    println!("{output}");
    println!(
        "{}",
        ui::style_text(
            &format!(
                "Source: {}, fetched {}",
                table.source,
                ui::format_age(Utc::now() - table.fetched_at)
            ),
            ui::StyleType::Subtle
        )
    );
    if !table.is_fresh(max_age, Utc::now()) {
        println!(
            "{}",
            ui::style_text(
                "Providers are unreachable, showing cached rates",
                ui::StyleType::Warning
            )
        );
    }
    Ok(())
}
