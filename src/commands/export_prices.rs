use crate::context::{AppContext, SourceKind};
use crate::models::Interval;
use crate::price_source::{PriceSnapshot, PriceSource};
use anyhow::{anyhow, Result};
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::Path;

/// Fetches daily history for each symbol and stores it as a price snapshot
/// for offline evaluation.
pub async fn run(
    app: &AppContext,
    symbols: &[String],
    source: SourceKind,
    data: Option<&Path>,
    output_path: &Path,
) -> Result<()> {
    if source == SourceKind::Snapshot {
        return Err(anyhow!("export-prices reads from fmp or csv, not an existing snapshot"));
    }
    let source = app.price_source(source, data)?;
    info!("Generating price snapshot at {}", output_path.display());

    let mut series = BTreeMap::new();
    for symbol in symbols {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            continue;
        }
        match source.fetch(&symbol, Interval::Daily).await {
            Ok(points) if points.is_empty() => warn!("Skipping {}: no usable rows", symbol),
            Ok(points) => {
                info!("{}: {} daily rows", symbol, points.len());
                series.insert(symbol, points);
            }
            Err(err) => warn!("Skipping {}: {:#}", symbol, err),
        }
    }

    if series.is_empty() {
        return Err(anyhow!("No symbol returned usable prices; snapshot not written"));
    }
    let count = series.len();
    PriceSnapshot::new(series).save_to_file(output_path)?;
    info!(
        "Price snapshot with {} symbols written to {}",
        count,
        output_path.display()
    );
    Ok(())
}
