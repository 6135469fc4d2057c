use super::ui;
use crate::core::RateFetcher;
use crate::core::convert::{convert, quantize};
use crate::core::error::RateError;
use crate::core::rates::{RateTable, normalize_code};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;

/// A finished conversion together with the rates it was computed from.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub amount: Decimal,
    pub src: String,
    pub dst: String,
    pub converted: Decimal,
    pub formatted_amount: String,
    pub formatted_converted: String,
    pub base: String,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
}

impl ConversionReport {
    pub fn from_table(
        table: &RateTable,
        amount: Decimal,
        from: &str,
        to: &str,
        decimal_places: u32,
        max_age: Duration,
    ) -> Result<Self, RateError> {
        let src = normalize_code(from);
        let dst = normalize_code(to);
        let converted = convert(amount, &src, &dst, table)?;

        Ok(ConversionReport {
            amount,
            formatted_amount: quantize(amount, decimal_places).to_string(),
            formatted_converted: quantize(converted, decimal_places).to_string(),
            converted,
            src,
            dst,
            base: table.base.clone(),
            source: table.source.clone(),
            fetched_at: table.fetched_at,
            stale: !table.is_fresh(max_age, Utc::now()),
        })
    }

    pub fn display(&self) -> String {
        let result = format!(
            "{} {} = {} {}",
            self.formatted_amount, self.src, self.formatted_converted, self.dst
        );
        let provenance = format!(
            "Rates from {} (base {}), fetched {} at {}",
            self.source,
            self.base,
            ui::format_age(Utc::now() - self.fetched_at),
            self.fetched_at.format("%Y-%m-%d %H:%M UTC")
        );

        let mut output = ui::style_text(&result, ui::StyleType::Result);
        output.push('\n');
        output.push_str(&ui::style_text(&provenance, ui::StyleType::Subtle));
        if self.stale {
            output.push('\n');
            output.push_str(&ui::style_text(
                "Providers are unreachable, showing cached rates",
                ui::StyleType::Warning,
            ));
        }
        output
    }
}

pub async fn run(
    fetcher: &RateFetcher,
    max_age: Duration,
    amount: Decimal,
    from: &str,
    to: &str,
    json: bool,
) -> Result<()> {
    let table = fetcher.get_rates(max_age).await?;
    let report =
        ConversionReport::from_table(&table, amount, from, to, fetcher.decimal_places(), max_age)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.display());
    }
    Ok(())
}
