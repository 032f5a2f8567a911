use super::{
    classification_accuracy, mean_absolute_percentage_error, validate_inputs, ModelTrainer,
    Predictions, TrainerError, TrainerOutput, TrainingTarget,
};
use crate::models::LABEL_COUNT;
use log::debug;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

const DEFAULT_LEARNING_RATE: f64 = 0.1;
const DEFAULT_L2: f64 = 1e-4;
const DEFAULT_SEED: u64 = 4242;
const INIT_WEIGHT_SCALE: f64 = 0.01;

/// Full-batch gradient descent on standardized features: linear regression
/// for value targets, softmax regression for one-hot targets. Gradients are
/// accumulated across rows with rayon.
#[derive(Debug, Clone)]
pub struct GradientTrainer {
    learning_rate: f64,
    l2: f64,
    seed: u64,
}

impl Default for GradientTrainer {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LEARNING_RATE,
            l2: DEFAULT_L2,
            seed: DEFAULT_SEED,
        }
    }
}

impl GradientTrainer {
    pub fn new(learning_rate: f64, l2: f64, seed: u64) -> Self {
        Self {
            learning_rate,
            l2,
            seed,
        }
    }

    fn initial_weights(&self, rng: &mut rand::rngs::StdRng, width: usize) -> Vec<f64> {
        (0..width)
            .map(|_| rng.gen_range(-INIT_WEIGHT_SCALE..=INIT_WEIGHT_SCALE))
            .collect()
    }

    fn fit_values(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        width: usize,
        epochs: usize,
    ) -> Result<TrainerOutput, TrainerError> {
        let scaler = Standardizer::fit(x, width);
        let rows = scaler.transform(x);
        let (y_mean, y_scale) = mean_and_scale(y.iter().copied());
        let targets: Vec<f64> = y.iter().map(|v| (v - y_mean) / y_scale).collect();

        let mut rng = rand::rngs::StdRng::seed_from_u64(self.seed);
        let mut weights = self.initial_weights(&mut rng, width);
        let mut bias = 0.0f64;
        let n = rows.len() as f64;

        for epoch in 0..epochs {
            let (grad_w, grad_b) = rows
                .par_iter()
                .zip(targets.par_iter())
                .map(|(row, target)| {
                    let err = dot(&weights, row) + bias - target;
                    (row.iter().map(|v| v * err).collect::<Vec<f64>>(), err)
                })
                .reduce(
                    || (vec![0.0; width], 0.0),
                    |(mut acc_w, acc_b), (w, b)| {
                        add_assign(&mut acc_w, &w);
                        (acc_w, acc_b + b)
                    },
                );

            for (weight, grad) in weights.iter_mut().zip(&grad_w) {
                *weight -= self.learning_rate * (grad / n + self.l2 * *weight);
            }
            bias -= self.learning_rate * grad_b / n;

            if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
                return Err(TrainerError::Diverged { epochs: epoch + 1 });
            }
        }

        let predictions: Vec<f64> = rows
            .par_iter()
            .map(|row| (dot(&weights, row) + bias) * y_scale + y_mean)
            .collect();
        let metric = mean_absolute_percentage_error(y, &predictions);
        debug!("Linear fit over {} rows: mape={:.4}", rows.len(), metric);

        Ok(TrainerOutput {
            predictions: Predictions::Values(predictions),
            metric,
        })
    }

    fn fit_classes(
        &self,
        x: &[Vec<f64>],
        y: &[[f64; LABEL_COUNT]],
        width: usize,
        epochs: usize,
    ) -> Result<TrainerOutput, TrainerError> {
        let scaler = Standardizer::fit(x, width);
        let rows = scaler.transform(x);

        let mut rng = rand::rngs::StdRng::seed_from_u64(self.seed);
        let mut weights: Vec<Vec<f64>> = (0..LABEL_COUNT)
            .map(|_| self.initial_weights(&mut rng, width))
            .collect();
        let mut biases = [0.0f64; LABEL_COUNT];
        let n = rows.len() as f64;

        for epoch in 0..epochs {
            let (grad_w, grad_b) = rows
                .par_iter()
                .zip(y.par_iter())
                .map(|(row, target)| {
                    let probs = softmax(&weights, &biases, row);
                    let mut row_grad = vec![vec![0.0; width]; LABEL_COUNT];
                    let mut bias_grad = [0.0; LABEL_COUNT];
                    for k in 0..LABEL_COUNT {
                        let err = probs[k] - target[k];
                        bias_grad[k] = err;
                        for (slot, value) in row_grad[k].iter_mut().zip(row) {
                            *slot = value * err;
                        }
                    }
                    (row_grad, bias_grad)
                })
                .reduce(
                    || (vec![vec![0.0; width]; LABEL_COUNT], [0.0; LABEL_COUNT]),
                    |(mut acc_w, mut acc_b), (w, b)| {
                        for k in 0..LABEL_COUNT {
                            add_assign(&mut acc_w[k], &w[k]);
                            acc_b[k] += b[k];
                        }
                        (acc_w, acc_b)
                    },
                );

            for k in 0..LABEL_COUNT {
                for (weight, grad) in weights[k].iter_mut().zip(&grad_w[k]) {
                    *weight -= self.learning_rate * (grad / n + self.l2 * *weight);
                }
                biases[k] -= self.learning_rate * grad_b[k] / n;
            }

            if biases.iter().chain(weights.iter().flatten()).any(|w| !w.is_finite()) {
                return Err(TrainerError::Diverged { epochs: epoch + 1 });
            }
        }

        let distributions: Vec<[f64; LABEL_COUNT]> = rows
            .par_iter()
            .map(|row| softmax(&weights, &biases, row))
            .collect();
        let metric = classification_accuracy(y, &distributions);
        debug!("Softmax fit over {} rows: accuracy={:.4}", rows.len(), metric);

        Ok(TrainerOutput {
            predictions: Predictions::Distributions(distributions),
            metric,
        })
    }
}

impl ModelTrainer for GradientTrainer {
    fn name(&self) -> &str {
        "gradient"
    }

    fn fit_predict(
        &self,
        x: &[Vec<f64>],
        target: TrainingTarget<'_>,
        epochs: usize,
    ) -> Result<TrainerOutput, TrainerError> {
        let width = validate_inputs(x, &target)?;
        match target {
            TrainingTarget::Values(y) => self.fit_values(x, y, width, epochs),
            TrainingTarget::OneHot(y) => self.fit_classes(x, y, width, epochs),
        }
    }
}

/// Per-column z-score scaling; constant columns are centered only.
struct Standardizer {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl Standardizer {
    fn fit(x: &[Vec<f64>], width: usize) -> Self {
        let (means, scales) = (0..width)
            .map(|col| mean_and_scale(x.iter().map(|row| row[col])))
            .unzip();
        Self { means, scales }
    }

    fn transform(&self, x: &[Vec<f64>]) -> Vec<Vec<f64>> {
        x.iter()
            .map(|row| {
                row.iter()
                    .zip(self.means.iter().zip(&self.scales))
                    .map(|(value, (mean, scale))| (value - mean) / scale)
                    .collect()
            })
            .collect()
    }
}

fn mean_and_scale(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let count = values.clone().count();
    if count == 0 {
        return (0.0, 1.0);
    }
    let mean = values.clone().sum::<f64>() / count as f64;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    let std_dev = variance.sqrt();
    let scale = if std_dev > 1e-12 && std_dev.is_finite() {
        std_dev
    } else {
        1.0
    };
    (mean, scale)
}

fn dot(weights: &[f64], row: &[f64]) -> f64 {
    weights.iter().zip(row).map(|(w, v)| w * v).sum()
}

fn add_assign(acc: &mut [f64], values: &[f64]) {
    for (slot, value) in acc.iter_mut().zip(values) {
        *slot += value;
    }
}

fn softmax(weights: &[Vec<f64>], biases: &[f64; LABEL_COUNT], row: &[f64]) -> [f64; LABEL_COUNT] {
    let mut logits = [0.0; LABEL_COUNT];
    for k in 0..LABEL_COUNT {
        logits[k] = dot(&weights[k], row) + biases[k];
    }
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for logit in logits.iter_mut() {
        *logit = (*logit - max).exp();
        total += *logit;
    }
    for logit in logits.iter_mut() {
        *logit /= total;
    }
    logits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainer::argmax;

    #[test]
    fn linear_fit_recovers_a_linear_target() {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| 50.0 + 2.0 * r[0] - 0.5 * r[1]).collect();
        let output = GradientTrainer::default()
            .fit_predict(&x, TrainingTarget::Values(&y), 500)
            .expect("fit");
        assert_eq!(output.predictions.len(), x.len());
        assert!(output.metric < 0.02, "mape={}", output.metric);
    }

    #[test]
    fn softmax_fit_separates_classes() {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..30 {
            let v = i as f64;
            x.push(vec![v]);
            y.push(if v < 10.0 {
                [0.0, 0.0, 1.0]
            } else if v < 20.0 {
                [0.0, 1.0, 0.0]
            } else {
                [1.0, 0.0, 0.0]
            });
        }
        let output = GradientTrainer::new(0.5, 0.0, 7)
            .fit_predict(&x, TrainingTarget::OneHot(&y), 2000)
            .expect("fit");
        let Predictions::Distributions(rows) = &output.predictions else {
            panic!("expected distributions");
        };
        assert_eq!(rows.len(), 30);
        for row in rows {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        assert_eq!(argmax(&rows[0]).0, 2);
        assert_eq!(argmax(&rows[29]).0, 0);
        assert!(output.metric >= 0.8, "accuracy={}", output.metric);
    }

    #[test]
    fn zero_width_features_still_fit_a_bias() {
        let x = vec![Vec::new(); 4];
        let y = [10.0, 10.0, 10.0, 10.0];
        let output = GradientTrainer::default()
            .fit_predict(&x, TrainingTarget::Values(&y), 10)
            .expect("fit");
        assert!(output.metric < 1e-9);
    }

    #[test]
    fn runs_are_reproducible() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![(i as f64).sin()]).collect();
        let y: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let trainer = GradientTrainer::default();
        let a = trainer.fit_predict(&x, TrainingTarget::Values(&y), 50).unwrap();
        let b = trainer.fit_predict(&x, TrainingTarget::Values(&y), 50).unwrap();
        let (Predictions::Values(a_values), Predictions::Values(b_values)) =
            (&a.predictions, &b.predictions)
        else {
            panic!("expected values");
        };
        for (left, right) in a_values.iter().zip(b_values) {
            assert!((left - right).abs() < 1e-9);
        }
    }
}
