use crate::models::{Interval, PricePoint};
use crate::retry::retry_fetch;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const FMP_API_KEY_ENV: &str = "FMP_API_KEY";
const FMP_DEFAULT_BASE_URL: &str = "https://financialmodelingprep.com";
const PRICE_SNAPSHOT_VERSION: u32 = 1;

/// Supplies ordered price history for a symbol at an interval.
#[allow(async_fn_in_trait)]
pub trait PriceSource {
    fn name(&self) -> &str;
    async fn fetch(&self, symbol: &str, interval: Interval) -> Result<Vec<PricePoint>>;
}

/// A provider row before validation. Any field may be absent.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPriceRow {
    pub date: Option<String>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

/// Drops rows with gaps (missing or unparsable date, missing, non-finite or
/// non-positive close, missing volume), orders ascending, keeps the first row
/// per date and buckets to the interval. Nothing is interpolated.
pub fn normalize_rows(rows: Vec<RawPriceRow>, interval: Interval) -> Vec<PricePoint> {
    let total = rows.len();
    let mut points: Vec<PricePoint> = rows
        .into_iter()
        .filter_map(|row| {
            let date = NaiveDate::parse_from_str(row.date?.trim().get(..10)?, "%Y-%m-%d").ok()?;
            let close = row.close.filter(|c| c.is_finite() && *c > 0.0)?;
            let volume = row.volume.filter(|v| v.is_finite() && *v >= 0.0)?;
            Some(PricePoint {
                date,
                close,
                volume: volume.round() as i64,
            })
        })
        .collect();
    if points.len() < total {
        debug!("Filtered {} provider rows with gaps", total - points.len());
    }

    points.sort_by_key(|p| p.date);
    points.dedup_by_key(|p| p.date);
    bucket_by_interval(points, interval)
}

/// Monthly keeps the first trading day of each calendar month. Expects an
/// ascending series.
pub fn bucket_by_interval(points: Vec<PricePoint>, interval: Interval) -> Vec<PricePoint> {
    match interval {
        Interval::Daily => points,
        Interval::Monthly => {
            let mut seen: HashSet<(i32, u32)> = HashSet::new();
            points
                .into_iter()
                .filter(|p| seen.insert((p.date.year(), p.date.month())))
                .collect()
        }
    }
}

#[derive(Debug, Deserialize)]
struct FmpHistoricalResponse {
    #[serde(default)]
    historical: Vec<RawPriceRow>,
}

/// Financial Modeling Prep daily history client.
pub struct FmpClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl FmpClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self> {
        let api_key = api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(anyhow!("{} must not be empty", FMP_API_KEY_ENV));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        let base_url = base_url
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| FMP_DEFAULT_BASE_URL.to_string());
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub fn from_env(base_url: Option<String>) -> Result<Self> {
        let api_key = std::env::var(FMP_API_KEY_ENV)
            .with_context(|| format!("{} must be set to fetch prices", FMP_API_KEY_ENV))?;
        Self::new(api_key, base_url)
    }

    async fn fetch_rows(&self, symbol: &str) -> Result<Vec<RawPriceRow>> {
        let url = format!(
            "{}/api/v3/historical-price-full/{}",
            self.base_url,
            symbol.trim().to_uppercase()
        );
        let response = self
            .http
            .get(&url)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .with_context(|| format!("request for {} failed", symbol))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("price request for {} returned {}", symbol, status));
        }
        let payload: FmpHistoricalResponse = response
            .json()
            .await
            .with_context(|| format!("unexpected price payload for {}", symbol))?;
        Ok(payload.historical)
    }
}

impl PriceSource for FmpClient {
    fn name(&self) -> &str {
        "fmp"
    }

    async fn fetch(&self, symbol: &str, interval: Interval) -> Result<Vec<PricePoint>> {
        let rows = retry_fetch!(format!("fetch {symbol}"), self.fetch_rows(symbol))?;
        info!("Fetched {} rows for {} from FMP", rows.len(), symbol);
        Ok(normalize_rows(rows, interval))
    }
}

/// Reads `<dir>/<SYMBOL>.csv` files with `date,close,volume` columns.
pub struct CsvPriceSource {
    dir: PathBuf,
}

impl CsvPriceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir
            .join(format!("{}.csv", symbol.trim().to_uppercase()))
    }
}

pub fn read_price_csv(path: &Path) -> Result<Vec<RawPriceRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for (line, record) in reader.deserialize::<RawPriceRow>().enumerate() {
        match record {
            Ok(row) => rows.push(row),
            Err(err) => warn!("Skipping row {} of {}: {}", line + 2, path.display(), err),
        }
    }
    Ok(rows)
}

impl PriceSource for CsvPriceSource {
    fn name(&self) -> &str {
        "csv"
    }

    async fn fetch(&self, symbol: &str, interval: Interval) -> Result<Vec<PricePoint>> {
        let rows = read_price_csv(&self.path_for(symbol))?;
        Ok(normalize_rows(rows, interval))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub series: BTreeMap<String, Vec<PricePoint>>,
}

impl PriceSnapshot {
    pub fn new(series: BTreeMap<String, Vec<PricePoint>>) -> Self {
        Self {
            version: PRICE_SNAPSHOT_VERSION,
            created_at: Utc::now(),
            series,
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create price snapshot at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self).context("Failed to serialize price snapshot")?;
        writer
            .flush()
            .context("Failed to flush price snapshot to disk")?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open price snapshot at {}", path.display()))?;
        let snapshot: PriceSnapshot =
            bincode::deserialize_from(BufReader::new(file)).context("Snapshot decode failed")?;
        if snapshot.version != PRICE_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Price snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                PRICE_SNAPSHOT_VERSION
            ));
        }
        Ok(snapshot)
    }
}

/// Serves daily series from a snapshot written by `export-prices`.
pub struct SnapshotPriceSource {
    snapshot: PriceSnapshot,
}

impl SnapshotPriceSource {
    pub fn new(snapshot: PriceSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(PriceSnapshot::load_from_file(path)?))
    }
}

impl PriceSource for SnapshotPriceSource {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn fetch(&self, symbol: &str, interval: Interval) -> Result<Vec<PricePoint>> {
        let key = symbol.trim().to_uppercase();
        let series = self
            .snapshot
            .series
            .get(&key)
            .ok_or_else(|| anyhow!("{} is not in the price snapshot", key))?;
        Ok(bucket_by_interval(series.clone(), interval))
    }
}
