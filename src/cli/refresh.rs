use super::ui;
use crate::core::RateFetcher;
use anyhow::Result;
use chrono::Utc;

/// Forces a provider round trip, reporting whether fresh rates were obtained.
pub async fn run(fetcher: &RateFetcher) -> Result<()> {
    let started_at = Utc::now();
    let spinner = ui::new_spinner("Fetching exchange rates...");

    let handle = fetcher.refresh_async();
    let result = handle.wait().await;
    spinner.finish_and_clear();

    let table = result?;
    if table.fetched_at >= started_at {
        println!(
            "{}",
            ui::style_text(
                &format!(
                    "Fetched {} rates against {} from {}",
                    table.rates.len(),
                    table.base,
                    table.source
                ),
                ui::StyleType::Result
            )
        );
    } else {
        println!(
            "{}",
            ui::style_text(
                &format!(
                    "All providers failed, keeping cached rates from {} ({})",
                    table.source,
                    ui::format_age(Utc::now() - table.fetched_at)
                ),
                ui::StyleType::Warning
            )
        );
    }
    Ok(())
}
