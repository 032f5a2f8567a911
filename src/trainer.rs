use crate::models::LABEL_COUNT;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("training set is empty")]
    EmptyDataset,
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("training diverged after {epochs} epochs")]
    Diverged { epochs: usize },
    #[error("trainer process failed: {0}")]
    Process(String),
    #[error("trainer I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Targets handed to a trainer: next-close values for regression, one-hot
/// buy/hold/sell rows for classification.
#[derive(Debug, Clone, Copy)]
pub enum TrainingTarget<'a> {
    Values(&'a [f64]),
    OneHot(&'a [[f64; LABEL_COUNT]]),
}

impl TrainingTarget<'_> {
    pub fn len(&self) -> usize {
        match self {
            TrainingTarget::Values(values) => values.len(),
            TrainingTarget::OneHot(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    Values(Vec<f64>),
    Distributions(Vec<[f64; LABEL_COUNT]>),
}

impl Predictions {
    pub fn len(&self) -> usize {
        match self {
            Predictions::Values(values) => values.len(),
            Predictions::Distributions(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainerOutput {
    pub predictions: Predictions,
    /// MAPE (as a fraction) for value targets, accuracy for one-hot targets.
    pub metric: f64,
}

/// Fits a model on `x` and returns in-sample predictions with a quality
/// metric. Trainers keep no state between calls.
pub trait ModelTrainer {
    fn name(&self) -> &str;
    fn fit_predict(
        &self,
        x: &[Vec<f64>],
        target: TrainingTarget<'_>,
        epochs: usize,
    ) -> Result<TrainerOutput, TrainerError>;
}

#[path = "trainers/gradient.rs"]
pub mod gradient;

pub use gradient::GradientTrainer;

#[path = "trainers/lightgbm.rs"]
pub mod lightgbm;

pub use lightgbm::LightGbmTrainer;

/// Checks that `x` is non-empty, rectangular and matches the target length.
/// Returns the feature width.
pub fn validate_inputs(x: &[Vec<f64>], target: &TrainingTarget<'_>) -> Result<usize, TrainerError> {
    if x.is_empty() || target.is_empty() {
        return Err(TrainerError::EmptyDataset);
    }
    if x.len() != target.len() {
        return Err(TrainerError::ShapeMismatch(format!(
            "{} feature rows but {} targets",
            x.len(),
            target.len()
        )));
    }
    let width = x[0].len();
    if let Some((row, values)) = x.iter().enumerate().find(|(_, r)| r.len() != width) {
        return Err(TrainerError::ShapeMismatch(format!(
            "row {} has {} features, expected {}",
            row,
            values.len(),
            width
        )));
    }
    Ok(width)
}

/// Confirms the trainer honored `len(predictions) == len(X)`.
pub fn ensure_prediction_shape(
    output: &TrainerOutput,
    expected_rows: usize,
) -> Result<(), TrainerError> {
    if output.predictions.len() != expected_rows {
        return Err(TrainerError::ShapeMismatch(format!(
            "trainer returned {} predictions for {} rows",
            output.predictions.len(),
            expected_rows
        )));
    }
    Ok(())
}

/// Mean absolute percentage error as a fraction; rows with a zero actual are
/// skipped.
pub fn mean_absolute_percentage_error(actual: &[f64], predicted: &[f64]) -> f64 {
    let (sum, count) = actual
        .iter()
        .zip(predicted)
        .filter(|(a, _)| **a != 0.0)
        .fold((0.0, 0usize), |(sum, count), (a, p)| {
            (sum + ((a - p) / a).abs(), count + 1)
        });
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

pub fn argmax(distribution: &[f64; LABEL_COUNT]) -> (usize, f64) {
    distribution
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        .unwrap_or((0, 0.0))
}

pub fn classification_accuracy(
    actual: &[[f64; LABEL_COUNT]],
    predicted: &[[f64; LABEL_COUNT]],
) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let correct = actual
        .iter()
        .zip(predicted)
        .filter(|(a, p)| argmax(a).0 == argmax(p).0)
        .count();
    correct as f64 / actual.len() as f64
}
