use crate::config::parse_feature_list;
use crate::context::{AppContext, SourceKind, TrainerKind};
use crate::harness::{EvaluationHarness, EvaluationRequest};
use crate::models::{EvaluationRunRecord, Interval};
use crate::run_log::{write_batch_json, RunLogWriter};
use anyhow::{anyhow, Result};
use chrono::{SubsecRound, Utc};
use log::{info, warn};
use std::path::PathBuf;

pub struct EvaluateOptions {
    pub symbols: Vec<String>,
    pub interval: Interval,
    pub rule_set: Option<String>,
    /// Each entry is one comma separated feature set.
    pub feature_sets: Vec<String>,
    pub lookahead: Option<usize>,
    pub epochs: Option<usize>,
    pub trainer: TrainerKind,
    pub source: SourceKind,
    pub data: Option<PathBuf>,
    pub log: Option<PathBuf>,
}

pub async fn run(app: &AppContext, options: EvaluateOptions) -> Result<()> {
    let settings = app.settings();
    let symbols: Vec<String> = options
        .symbols
        .iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        return Err(anyhow!("At least one symbol is required"));
    }

    let feature_sets: Vec<Vec<String>> = if options.feature_sets.is_empty() {
        vec![settings.features.clone()]
    } else {
        options
            .feature_sets
            .iter()
            .map(|raw| parse_feature_list(raw))
            .collect()
    };

    let request = EvaluationRequest {
        symbols,
        interval: options.interval,
        rule_set: options
            .rule_set
            .unwrap_or_else(|| settings.rule_set.clone()),
        feature_sets,
        lookahead: options.lookahead.unwrap_or(settings.lookahead),
        epochs: options.epochs.unwrap_or(settings.base_epochs),
    };

    let source = app.price_source(options.source, options.data.as_deref())?;
    let trainer = app.trainer(options.trainer)?;
    let log_path = options.log.unwrap_or_else(|| settings.run_log_path.clone());
    let mut writer = RunLogWriter::open(&log_path)?;

    let started = Utc::now().trunc_subsecs(0);
    let harness = EvaluationHarness::new(source, trainer)
        .with_epoch_policy(settings.epoch_policy)
        .with_rule_parameters(settings.rule_parameters.clone())
        .with_progress(true);
    let records = harness.run(&request, Some(&mut writer)).await;

    for record in &records {
        println!("{}", summarize(record));
    }
    info!(
        "Appended {} runs to {}",
        writer.rows_written(),
        writer.path().display()
    );

    let batch_timestamp = records.first().map(|r| r.timestamp).unwrap_or(started);
    match write_batch_json(&settings.results_dir, &records, batch_timestamp) {
        Ok(path) => info!("Batch results written to {}", path.display()),
        Err(err) => warn!("Failed to write batch results: {:#}", err),
    }

    Ok(())
}

fn summarize(record: &EvaluationRunRecord) -> String {
    let metric = |value: Option<f64>| match value {
        Some(v) => format!("{:.4}", v),
        None => "n/a".to_string(),
    };
    let mut line = format!(
        "{} {} {} [{}] mape={} accuracy={} labels buy={} hold={} sell={}",
        record.symbol,
        record.interval,
        record.rule_set,
        record.features_joined(),
        metric(record.mape),
        metric(record.accuracy),
        record.label_counts.buy,
        record.label_counts.hold,
        record.label_counts.sell
    );
    if let Some(error) = &record.error {
        line.push_str(&format!(" error={}", error));
    }
    line
}
