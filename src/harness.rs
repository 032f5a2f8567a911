use crate::config::EpochPolicy;
use crate::error::PipelineError;
use crate::features::{build_classification_matrix, build_regression_matrix};
use crate::indicators::{self, IndicatorConfig};
use crate::models::{EnrichedPoint, EvaluationRunRecord, Interval, Label, LabelCounts};
use crate::price_source::PriceSource;
use crate::rules::{create_rule, LabelRule, RuleSet};
use crate::run_log::RunLogWriter;
use crate::trainer::{
    argmax, ensure_prediction_shape, ModelTrainer, Predictions, TrainerError, TrainingTarget,
};
use chrono::{DateTime, SubsecRound, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub symbols: Vec<String>,
    pub interval: Interval,
    pub rule_set: String,
    pub feature_sets: Vec<Vec<String>>,
    pub lookahead: usize,
    /// Base epoch budget before the interval policy is applied.
    pub epochs: usize,
}

impl EvaluationRequest {
    pub fn combination_count(&self) -> usize {
        self.symbols.len() * self.feature_sets.len()
    }
}

/// The summary record plus the series annotated with forecasts and labels.
#[derive(Debug, Clone)]
pub struct CombinationOutcome {
    pub record: EvaluationRunRecord,
    pub series: Vec<EnrichedPoint>,
}

pub struct EvaluationHarness<S: PriceSource, T: ModelTrainer> {
    source: S,
    trainer: T,
    indicator_config: IndicatorConfig,
    epoch_policy: EpochPolicy,
    rule_parameters: HashMap<String, f64>,
    show_progress: bool,
}

impl<S: PriceSource, T: ModelTrainer> EvaluationHarness<S, T> {
    pub fn new(source: S, trainer: T) -> Self {
        Self {
            source,
            trainer,
            indicator_config: IndicatorConfig::default(),
            epoch_policy: EpochPolicy::default(),
            rule_parameters: HashMap::new(),
            show_progress: false,
        }
    }

    pub fn with_epoch_policy(mut self, policy: EpochPolicy) -> Self {
        self.epoch_policy = policy;
        self
    }

    pub fn with_rule_parameters(mut self, parameters: HashMap<String, f64>) -> Self {
        self.rule_parameters = parameters;
        self
    }

    pub fn with_indicator_config(mut self, config: IndicatorConfig) -> Self {
        self.indicator_config = config;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Evaluates every (symbol, feature set) pair in order. Each pair yields
    /// exactly one record; failures are recorded, never raised.
    pub async fn run(
        &self,
        request: &EvaluationRequest,
        mut log: Option<&mut RunLogWriter>,
    ) -> Vec<EvaluationRunRecord> {
        let outcomes = self.run_detailed(request, log.as_deref_mut()).await;
        outcomes.into_iter().map(|outcome| outcome.record).collect()
    }

    pub async fn run_detailed(
        &self,
        request: &EvaluationRequest,
        mut log: Option<&mut RunLogWriter>,
    ) -> Vec<CombinationOutcome> {
        let timestamp = Utc::now().trunc_subsecs(0);
        let rule_set: RuleSet = match request.rule_set.parse() {
            Ok(value) => value,
            Err(never) => match never {},
        };
        let rule = create_rule(&rule_set, &self.rule_parameters);
        let epochs = self.epoch_policy.epochs_for(request.interval, request.epochs);
        info!(
            "Evaluating {} combinations ({} symbols, {} feature sets, {} interval, rule set {}, {} epochs)",
            request.combination_count(),
            request.symbols.len(),
            request.feature_sets.len(),
            request.interval,
            request.rule_set,
            epochs
        );

        let progress = self.progress_bar(request.combination_count());
        let mut outcomes = Vec::with_capacity(request.combination_count());

        for symbol in &request.symbols {
            progress.set_message(symbol.clone());
            let enriched = self.load_series(symbol, request.interval).await;

            for features in &request.feature_sets {
                let outcome = match &enriched {
                    Ok(series) => self.evaluate_combination(
                        symbol,
                        request,
                        rule.as_ref(),
                        series.clone(),
                        features,
                        epochs,
                        timestamp,
                    ),
                    Err(err) => CombinationOutcome {
                        record: EvaluationRunRecord::failed(
                            timestamp,
                            symbol,
                            request.interval,
                            &request.rule_set,
                            features,
                            err.to_string(),
                        ),
                        series: Vec::new(),
                    },
                };

                if let Some(writer) = log.as_deref_mut() {
                    if let Err(err) = writer.append(&outcome.record) {
                        warn!("Failed to append run for {}: {:#}", symbol, err);
                    }
                }
                outcomes.push(outcome);
                progress.inc(1);
            }
        }

        progress.finish_and_clear();
        let failed = outcomes.iter().filter(|o| o.record.is_failed()).count();
        info!(
            "Evaluation finished: {} runs, {} failed",
            outcomes.len(),
            failed
        );
        outcomes
    }

    /// Fetches and enriches one symbol. Zero usable rows is an upstream failure.
    pub async fn load_series(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Vec<EnrichedPoint>, PipelineError> {
        let prices = self
            .source
            .fetch(symbol, interval)
            .await
            .map_err(|err| PipelineError::Upstream {
                symbol: symbol.to_string(),
                message: format!("{:#}", err),
            })?;
        if prices.is_empty() {
            return Err(PipelineError::NoUsableRows {
                symbol: symbol.to_string(),
            });
        }
        debug!(
            "Loaded {} {} rows for {} from {}",
            prices.len(),
            interval,
            symbol,
            self.source.name()
        );
        Ok(indicators::enrich(&prices, &self.indicator_config))
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_combination(
        &self,
        symbol: &str,
        request: &EvaluationRequest,
        rule: &(dyn LabelRule + Send + Sync),
        mut series: Vec<EnrichedPoint>,
        features: &[String],
        epochs: usize,
        timestamp: DateTime<Utc>,
    ) -> CombinationOutcome {
        let mut errors: Vec<String> = Vec::new();

        let mape = match self.forecast_next_close(&mut series, features, epochs) {
            Ok(metric) => metric,
            Err(err) => {
                warn!("Regression for {} [{}] failed: {}", symbol, features.join("|"), err);
                errors.push(format!("regression: {}", err));
                None
            }
        };

        let (accuracy, label_counts) =
            match self.classify(&mut series, features, request.lookahead, rule, epochs) {
                Ok(result) => result,
                Err((err, counts)) => {
                    warn!(
                        "Classification for {} [{}] failed: {}",
                        symbol,
                        features.join("|"),
                        err
                    );
                    errors.push(format!("classification: {}", err));
                    (None, counts)
                }
            };

        let record = EvaluationRunRecord {
            timestamp,
            symbol: symbol.to_string(),
            interval: request.interval,
            rule_set: request.rule_set.clone(),
            features: features.to_vec(),
            mape,
            accuracy,
            label_counts,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        };
        CombinationOutcome { record, series }
    }

    /// Trains on (row, next close) pairs and attaches each forecast to the row
    /// it was made from.
    fn forecast_next_close(
        &self,
        series: &mut [EnrichedPoint],
        features: &[String],
        epochs: usize,
    ) -> Result<Option<f64>, TrainerError> {
        let matrix = build_regression_matrix(series, features);
        if matrix.is_empty() {
            debug!("Too few rows for a regression sample");
            return Ok(None);
        }

        let output = self
            .trainer
            .fit_predict(&matrix.x, TrainingTarget::Values(&matrix.y), epochs)?;
        ensure_prediction_shape(&output, matrix.len())?;
        let Predictions::Values(values) = output.predictions else {
            return Err(TrainerError::ShapeMismatch(
                "expected value predictions for a regression target".to_string(),
            ));
        };

        for (meta, value) in matrix.meta.iter().zip(values) {
            series[meta.index].predicted = Some(value);
        }
        Ok(Some(output.metric))
    }

    /// Labels rows with the rule, trains on the one-hot labels and attaches the
    /// predicted label and its probability. Label counts survive a trainer
    /// failure.
    fn classify(
        &self,
        series: &mut [EnrichedPoint],
        features: &[String],
        lookahead: usize,
        rule: &(dyn LabelRule + Send + Sync),
        epochs: usize,
    ) -> Result<(Option<f64>, LabelCounts), (TrainerError, LabelCounts)> {
        let matrix = build_classification_matrix(series, features, lookahead, |c, f, h| {
            rule.label(c, f, h)
        });
        let counts: LabelCounts = matrix.labels().collect();
        for meta in &matrix.meta {
            series[meta.index].actual_label = meta.label;
        }
        if matrix.is_empty() {
            debug!("Too few rows for a classification sample");
            return Ok((None, counts));
        }

        let output = self
            .trainer
            .fit_predict(&matrix.x, TrainingTarget::OneHot(&matrix.y), epochs)
            .map_err(|err| (err, counts))?;
        ensure_prediction_shape(&output, matrix.len()).map_err(|err| (err, counts))?;
        let Predictions::Distributions(distributions) = output.predictions else {
            return Err((
                TrainerError::ShapeMismatch(
                    "expected class distributions for a one-hot target".to_string(),
                ),
                counts,
            ));
        };

        for (meta, distribution) in matrix.meta.iter().zip(&distributions) {
            let (class, probability) = argmax(distribution);
            let point = &mut series[meta.index];
            point.predicted_label = Label::from_index(class);
            point.confidence = Some(probability);
        }
        Ok((Some(output.metric), counts))
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PricePoint;
    use crate::trainer::TrainerOutput;
    use anyhow::{anyhow, Result};
    use chrono::NaiveDate;

    struct FixedSource(Vec<f64>);

    impl PriceSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn fetch(&self, symbol: &str, _interval: Interval) -> Result<Vec<PricePoint>> {
            if symbol == "DOWN" {
                return Err(anyhow!("provider unavailable"));
            }
            if symbol == "EMPTY" {
                return Ok(Vec::new());
            }
            let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            Ok(self
                .0
                .iter()
                .enumerate()
                .map(|(i, close)| PricePoint {
                    date: start + chrono::Duration::days(i as i64),
                    close: *close,
                    volume: 1_000,
                })
                .collect())
        }
    }

    /// Predicts the target itself, so metrics are perfect.
    struct EchoTrainer;

    impl ModelTrainer for EchoTrainer {
        fn name(&self) -> &str {
            "echo"
        }

        fn fit_predict(
            &self,
            _x: &[Vec<f64>],
            target: TrainingTarget<'_>,
            _epochs: usize,
        ) -> Result<TrainerOutput, TrainerError> {
            Ok(match target {
                TrainingTarget::Values(y) => TrainerOutput {
                    predictions: Predictions::Values(y.to_vec()),
                    metric: 0.0,
                },
                TrainingTarget::OneHot(y) => TrainerOutput {
                    predictions: Predictions::Distributions(y.to_vec()),
                    metric: 1.0,
                },
            })
        }
    }

    struct ShortTrainer;

    impl ModelTrainer for ShortTrainer {
        fn name(&self) -> &str {
            "short"
        }

        fn fit_predict(
            &self,
            _x: &[Vec<f64>],
            _target: TrainingTarget<'_>,
            _epochs: usize,
        ) -> Result<TrainerOutput, TrainerError> {
            Ok(TrainerOutput {
                predictions: Predictions::Values(vec![1.0]),
                metric: 0.5,
            })
        }
    }

    fn request(symbols: &[&str]) -> EvaluationRequest {
        EvaluationRequest {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            interval: Interval::Daily,
            rule_set: "pct".to_string(),
            feature_sets: vec![vec!["close".to_string()], vec!["close1".to_string()]],
            lookahead: 3,
            epochs: 5,
        }
    }

    const CLOSES: [f64; 10] = [100.0, 102.0, 101.0, 105.0, 110.0, 108.0, 115.0, 120.0, 118.0, 125.0];

    #[tokio::test]
    async fn forecasts_and_labels_are_attached_by_row_index() {
        let harness = EvaluationHarness::new(FixedSource(CLOSES.to_vec()), EchoTrainer);
        let outcomes = harness.run_detailed(&request(&["ACME"]), None).await;
        assert_eq!(outcomes.len(), 2);

        let outcome = &outcomes[0];
        assert!(!outcome.record.is_failed());
        assert_eq!(outcome.record.mape, Some(0.0));
        assert_eq!(outcome.record.accuracy, Some(1.0));
        assert_eq!(outcome.record.label_counts.total(), 7);

        let series = &outcome.series;
        assert_eq!(series[0].predicted, Some(102.0));
        assert_eq!(series[8].predicted, Some(125.0));
        assert_eq!(series[9].predicted, None);
        assert_eq!(series[0].actual_label, Some(Label::Buy));
        assert_eq!(series[0].predicted_label, Some(Label::Buy));
        assert_eq!(series[0].confidence, Some(1.0));
        assert_eq!(series[7].actual_label, None);
    }

    #[tokio::test]
    async fn failures_still_produce_one_record_each() {
        let harness = EvaluationHarness::new(FixedSource(CLOSES.to_vec()), EchoTrainer);
        let records = harness.run(&request(&["DOWN", "EMPTY", "ACME"]), None).await;
        assert_eq!(records.len(), 6);
        assert!(records[..4].iter().all(|r| r.is_failed() && r.mape.is_none()));
        assert!(records[2]
            .error
            .as_deref()
            .unwrap()
            .contains("no usable price rows"));
        assert!(records[4..].iter().all(|r| !r.is_failed()));
        assert!(records.iter().all(|r| r.timestamp == records[0].timestamp));
    }

    #[tokio::test]
    async fn shape_mismatch_is_caught_per_combination() {
        let harness = EvaluationHarness::new(FixedSource(CLOSES.to_vec()), ShortTrainer);
        let records = harness.run(&request(&["ACME"]), None).await;
        assert_eq!(records.len(), 2);
        for record in &records {
            assert!(record.is_failed());
            assert_eq!(record.mape, None);
            assert_eq!(record.accuracy, None);
            assert_eq!(record.label_counts.buy, 7);
        }
    }

    #[tokio::test]
    async fn short_series_yields_null_metrics_without_error() {
        let harness = EvaluationHarness::new(FixedSource(vec![100.0]), EchoTrainer);
        let records = harness.run(&request(&["ACME"]), None).await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| !r.is_failed()));
        assert!(records.iter().all(|r| r.mape.is_none() && r.accuracy.is_none()));
        assert_eq!(records[0].label_counts.total(), 0);
    }
}
