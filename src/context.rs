use crate::config::EvaluationSettings;
use crate::models::{Interval, PricePoint};
use crate::price_source::{CsvPriceSource, FmpClient, PriceSource, SnapshotPriceSource};
use crate::trainer::{
    GradientTrainer, LightGbmTrainer, ModelTrainer, TrainerError, TrainerOutput, TrainingTarget,
};
use anyhow::{anyhow, Context, Result};
use log::info;
use std::path::{Path, PathBuf};

const DEFAULT_CSV_DIR: &str = "data";
const DEFAULT_SNAPSHOT_FILE: &str = "data/prices.bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceKind {
    Fmp,
    Csv,
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TrainerKind {
    Gradient,
    Lightgbm,
}

/// Price source selected on the command line.
pub enum ConfiguredSource {
    Fmp(FmpClient),
    Csv(CsvPriceSource),
    Snapshot(SnapshotPriceSource),
}

impl PriceSource for ConfiguredSource {
    fn name(&self) -> &str {
        match self {
            ConfiguredSource::Fmp(source) => source.name(),
            ConfiguredSource::Csv(source) => source.name(),
            ConfiguredSource::Snapshot(source) => source.name(),
        }
    }

    async fn fetch(&self, symbol: &str, interval: Interval) -> Result<Vec<PricePoint>> {
        match self {
            ConfiguredSource::Fmp(source) => source.fetch(symbol, interval).await,
            ConfiguredSource::Csv(source) => source.fetch(symbol, interval).await,
            ConfiguredSource::Snapshot(source) => source.fetch(symbol, interval).await,
        }
    }
}

pub enum ConfiguredTrainer {
    Gradient(GradientTrainer),
    LightGbm(LightGbmTrainer),
}

impl ModelTrainer for ConfiguredTrainer {
    fn name(&self) -> &str {
        match self {
            ConfiguredTrainer::Gradient(trainer) => trainer.name(),
            ConfiguredTrainer::LightGbm(trainer) => trainer.name(),
        }
    }

    fn fit_predict(
        &self,
        x: &[Vec<f64>],
        target: TrainingTarget<'_>,
        epochs: usize,
    ) -> Result<TrainerOutput, TrainerError> {
        match self {
            ConfiguredTrainer::Gradient(trainer) => trainer.fit_predict(x, target, epochs),
            ConfiguredTrainer::LightGbm(trainer) => trainer.fit_predict(x, target, epochs),
        }
    }
}

pub struct AppContext {
    settings: EvaluationSettings,
}

impl AppContext {
    pub fn initialize() -> Result<Self> {
        let settings = EvaluationSettings::from_env().context("Failed to read PRICELAB settings")?;
        Ok(Self::with_settings(settings))
    }

    pub fn with_settings(settings: EvaluationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EvaluationSettings {
        &self.settings
    }

    pub fn price_source(&self, kind: SourceKind, data: Option<&Path>) -> Result<ConfiguredSource> {
        let source = match kind {
            SourceKind::Fmp => {
                if data.is_some() {
                    return Err(anyhow!("--data is not used with the fmp source"));
                }
                ConfiguredSource::Fmp(FmpClient::from_env(self.settings.fmp_base_url.clone())?)
            }
            SourceKind::Csv => {
                let dir = resolve_data_path(data, DEFAULT_CSV_DIR);
                if !dir.is_dir() {
                    return Err(anyhow!("CSV price directory {} not found", dir.display()));
                }
                ConfiguredSource::Csv(CsvPriceSource::new(dir))
            }
            SourceKind::Snapshot => {
                let path = resolve_data_path(data, DEFAULT_SNAPSHOT_FILE);
                ConfiguredSource::Snapshot(SnapshotPriceSource::load(&path)?)
            }
        };
        info!("Using {} price source", source.name());
        Ok(source)
    }

    pub fn trainer(&self, kind: TrainerKind) -> Result<ConfiguredTrainer> {
        Ok(match kind {
            TrainerKind::Gradient => ConfiguredTrainer::Gradient(GradientTrainer::default()),
            TrainerKind::Lightgbm => ConfiguredTrainer::LightGbm(LightGbmTrainer::locate()?),
        })
    }
}

fn resolve_data_path(cli_value: Option<&Path>, fallback: &str) -> PathBuf {
    cli_value
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(fallback))
}
