use crate::models::{EvaluationRunRecord, Interval, LabelCounts, RunIdentity};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

pub const RUN_LOG_COLUMNS: [&str; 10] = [
    "timestamp",
    "symbol",
    "interval",
    "ruleSet",
    "features",
    "label_buy",
    "label_hold",
    "label_sell",
    "accuracy",
    "mape",
];

/// One run-log line. Metrics are kept as text so that null round-trips as an
/// empty cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunLogRow {
    timestamp: String,
    symbol: String,
    interval: String,
    #[serde(rename = "ruleSet")]
    rule_set: String,
    features: String,
    label_buy: usize,
    label_hold: usize,
    label_sell: usize,
    accuracy: String,
    mape: String,
}

impl From<&EvaluationRunRecord> for RunLogRow {
    fn from(record: &EvaluationRunRecord) -> Self {
        Self {
            timestamp: record
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            symbol: record.symbol.clone(),
            interval: record.interval.as_str().to_string(),
            rule_set: record.rule_set.clone(),
            features: record.features_joined(),
            label_buy: record.label_counts.buy,
            label_hold: record.label_counts.hold,
            label_sell: record.label_counts.sell,
            accuracy: format_metric(record.accuracy),
            mape: format_metric(record.mape),
        }
    }
}

impl RunLogRow {
    fn into_record(self) -> Result<EvaluationRunRecord> {
        let timestamp = DateTime::parse_from_rfc3339(self.timestamp.trim())
            .with_context(|| format!("invalid run timestamp '{}'", self.timestamp))?
            .with_timezone(&Utc);
        let interval: Interval = self.interval.parse()?;
        let features = self
            .features
            .split('|')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Ok(EvaluationRunRecord {
            timestamp,
            symbol: self.symbol,
            interval,
            rule_set: self.rule_set,
            features,
            mape: parse_metric(&self.mape)?,
            accuracy: parse_metric(&self.accuracy)?,
            label_counts: LabelCounts {
                buy: self.label_buy,
                hold: self.label_hold,
                sell: self.label_sell,
            },
            error: None,
        })
    }
}

fn format_metric(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.6}", v),
        _ => String::new(),
    }
}

fn parse_metric(raw: &str) -> Result<Option<f64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|_| anyhow!("metric '{}' is not a number", trimmed))
}

/// Append-only run log owned by one batch. The header is written only when
/// the file is new or empty.
pub struct RunLogWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows_written: usize,
}

impl RunLogWriter {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open run log {}", path.display()))?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(RUN_LOG_COLUMNS)?;
            writer.flush()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows_written: 0,
        })
    }

    pub fn append(&mut self, record: &EvaluationRunRecord) -> Result<()> {
        self.writer
            .serialize(RunLogRow::from(record))
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        self.writer.flush()?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Writes the batch as a pretty JSON array to `eval-<SYMBOLS>-<timestamp>.json`
/// under `dir` and returns the file path.
pub fn write_batch_json(
    dir: &Path,
    records: &[EvaluationRunRecord],
    timestamp: DateTime<Utc>,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut symbols: Vec<&str> = Vec::new();
    for record in records {
        if !symbols.contains(&record.symbol.as_str()) {
            symbols.push(&record.symbol);
        }
    }
    let label = if symbols.is_empty() {
        "NONE".to_string()
    } else {
        symbols.join("_")
    };
    let path = dir.join(format!(
        "eval-{}-{}.json",
        label,
        timestamp.format("%Y%m%dT%H%M%SZ")
    ));

    let payload = serde_json::to_string_pretty(records)?;
    fs::write(&path, payload).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Reads a CSV run log or a JSON batch file, chosen by extension.
pub fn read_run_log(path: &Path) -> Result<Vec<EvaluationRunRecord>> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a JSON array of run records", path.display()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (line, row) in reader.deserialize::<RunLogRow>().enumerate() {
        match row.map_err(anyhow::Error::from).and_then(RunLogRow::into_record) {
            Ok(record) => records.push(record),
            Err(err) => warn!("Skipping line {} of {}: {}", line + 2, path.display(), err),
        }
    }
    Ok(records)
}

/// Keeps the first record for every identity key, preserving order.
pub fn dedup_records(records: Vec<EvaluationRunRecord>) -> Vec<EvaluationRunRecord> {
    let mut seen: HashSet<RunIdentity> = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.identity_key()))
        .collect()
}

/// Merges result files into a fresh summary CSV at `output`. Returns the
/// number of distinct runs written.
pub fn merge_run_logs(inputs: &[PathBuf], output: &Path) -> Result<usize> {
    let mut all = Vec::new();
    for input in inputs {
        let records = read_run_log(input)?;
        info!("Read {} run records from {}", records.len(), input.display());
        all.extend(records);
    }
    let total = all.len();
    let merged = dedup_records(all);

    if output.exists() {
        fs::remove_file(output)
            .with_context(|| format!("Failed to replace {}", output.display()))?;
    }
    let mut writer = RunLogWriter::open(output)?;
    for record in &merged {
        writer.append(record)?;
    }
    info!(
        "Merged {} records into {} distinct runs at {}",
        total,
        merged.len(),
        output.display()
    );
    Ok(merged.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(symbol: &str, features: &[&str], accuracy: Option<f64>) -> EvaluationRunRecord {
        EvaluationRunRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
            symbol: symbol.to_string(),
            interval: Interval::Daily,
            rule_set: "pct".to_string(),
            features: features.iter().map(|f| f.to_string()).collect(),
            mape: Some(0.0123456789),
            accuracy,
            label_counts: LabelCounts {
                buy: 3,
                hold: 4,
                sell: 1,
            },
            error: None,
        }
    }

    #[test]
    fn header_is_written_once_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.csv");
        {
            let mut writer = RunLogWriter::open(&path).unwrap();
            writer.append(&record("AAPL", &["close1", "rsi"], Some(0.5))).unwrap();
        }
        {
            let mut writer = RunLogWriter::open(&path).unwrap();
            writer.append(&record("MSFT", &["macd"], None)).unwrap();
            assert_eq!(writer.rows_written(), 1);
        }
        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], RUN_LOG_COLUMNS.join(","));
        assert!(lines[1].starts_with("2024-05-01T09:30:00Z,AAPL,daily,pct,close1|rsi,3,4,1,"));
        assert!(lines[1].ends_with("0.500000,0.012346"));
        assert!(lines[2].ends_with(",,0.012346"));
    }

    #[test]
    fn csv_rows_read_back_as_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.csv");
        let original = record("AAPL", &["close1", "rsi"], None);
        RunLogWriter::open(&path).unwrap().append(&original).unwrap();

        let records = read_run_log(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity_key(), original.identity_key());
        assert_eq!(records[0].accuracy, None);
        assert_eq!(records[0].mape, Some(0.012346));
        assert_eq!(records[0].label_counts, original.label_counts);
    }

    #[test]
    fn merging_the_same_file_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let batch = vec![
            record("AAPL", &["close1"], Some(0.4)),
            record("AAPL", &["close1", "rsi"], Some(0.6)),
            record("MSFT", &["close1"], Some(0.7)),
        ];
        let json = write_batch_json(dir.path(), &batch, batch[0].timestamp).unwrap();
        assert!(json
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("eval-AAPL_MSFT-"));

        let once = dir.path().join("once.csv");
        let twice = dir.path().join("twice.csv");
        let merged_once = merge_run_logs(&[json.clone()], &once).unwrap();
        let merged_twice = merge_run_logs(&[json.clone(), json], &twice).unwrap();
        assert_eq!(merged_once, 3);
        assert_eq!(merged_twice, merged_once);
        assert_eq!(read_run_log(&twice).unwrap().len(), 3);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let first = record("AAPL", &["close1"], Some(0.4));
        let mut second = first.clone();
        second.accuracy = Some(0.9);
        let merged = dedup_records(vec![first, second]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].accuracy, Some(0.4));
    }
}
