use crate::context::{AppContext, SourceKind};
use crate::indicators::{enrich, IndicatorConfig};
use crate::models::Interval;
use crate::price_source::PriceSource;
use anyhow::{anyhow, Context, Result};
use log::info;
use std::path::{Path, PathBuf};

/// Prints (or writes) the enriched series for one symbol as a JSON array.
pub async fn run(
    app: &AppContext,
    symbol: &str,
    interval: Interval,
    source: SourceKind,
    data: Option<&Path>,
    output: Option<PathBuf>,
) -> Result<()> {
    let source = app.price_source(source, data)?;
    let symbol = symbol.trim().to_uppercase();
    let prices = source.fetch(&symbol, interval).await?;
    if prices.is_empty() {
        return Err(anyhow!("No usable price rows for {}", symbol));
    }

    let config = IndicatorConfig::default();
    if prices.len() < config.required_history() {
        info!(
            "{} has {} rows; indicators need {} and will be empty",
            symbol,
            prices.len(),
            config.required_history()
        );
    }
    let series = enrich(&prices, &config);
    let payload = serde_json::to_string_pretty(&series)?;

    match output {
        Some(path) => {
            std::fs::write(&path, payload)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} enriched rows to {}", series.len(), path.display());
        }
        None => println!("{}", payload),
    }
    Ok(())
}
