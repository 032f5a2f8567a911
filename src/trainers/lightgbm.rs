use super::{
    argmax, classification_accuracy, mean_absolute_percentage_error, validate_inputs,
    ModelTrainer, Predictions, TrainerError, TrainerOutput, TrainingTarget,
};
use crate::models::LABEL_COUNT;
use log::{info, warn};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use uuid::Uuid;

pub const LIGHTGBM_EXECUTABLE_ENV: &str = "PRICELAB_LIGHTGBM";

/// Trains through the LightGBM command-line binary. Datasets are written in
/// libsvm format to a scratch directory and removed after prediction.
#[derive(Debug, Clone)]
pub struct LightGbmTrainer {
    executable: PathBuf,
    work_dir: PathBuf,
    learning_rate: f64,
    num_leaves: u32,
    min_data_in_leaf: u32,
}

impl LightGbmTrainer {
    pub fn new(executable: PathBuf) -> Self {
        Self {
            executable,
            work_dir: std::env::temp_dir(),
            learning_rate: 0.05,
            num_leaves: 15,
            min_data_in_leaf: 5,
        }
    }

    pub fn locate() -> anyhow::Result<Self> {
        Ok(Self::new(resolve_lightgbm_executable()?))
    }

    pub fn with_work_dir(mut self, work_dir: PathBuf) -> Self {
        self.work_dir = work_dir;
        self
    }

    fn run(&self, args: &[String], phase: &str) -> Result<(), TrainerError> {
        let status = Command::new(&self.executable)
            .args(args)
            .status()
            .map_err(|err| {
                TrainerError::Process(format!(
                    "failed to spawn {} for {phase}: {err}",
                    self.executable.display()
                ))
            })?;
        if !status.success() {
            return Err(TrainerError::Process(format!(
                "lightgbm {phase} failed with status {status}"
            )));
        }
        Ok(())
    }

    fn train_and_predict(
        &self,
        dataset_path: &Path,
        model_path: &Path,
        predictions_path: &Path,
        objective_args: &[String],
        epochs: usize,
    ) -> Result<String, TrainerError> {
        let mut train_args = vec![String::from("task=train")];
        train_args.extend_from_slice(objective_args);
        train_args.extend([
            format!("num_iterations={}", epochs.max(1)),
            format!("learning_rate={}", self.learning_rate),
            format!("num_leaves={}", self.num_leaves),
            format!("min_data_in_leaf={}", self.min_data_in_leaf),
            format!("data={}", dataset_path.to_string_lossy()),
            format!("output_model={}", model_path.to_string_lossy()),
            String::from("verbosity=-1"),
        ]);
        self.run(&train_args, "training")?;

        let predict_args = vec![
            String::from("task=predict"),
            format!("data={}", dataset_path.to_string_lossy()),
            format!("input_model={}", model_path.to_string_lossy()),
            format!("output_result={}", predictions_path.to_string_lossy()),
            String::from("verbosity=-1"),
        ];
        self.run(&predict_args, "prediction")?;

        Ok(fs::read_to_string(predictions_path)?)
    }
}

impl ModelTrainer for LightGbmTrainer {
    fn name(&self) -> &str {
        "lightgbm"
    }

    fn fit_predict(
        &self,
        x: &[Vec<f64>],
        target: TrainingTarget<'_>,
        epochs: usize,
    ) -> Result<TrainerOutput, TrainerError> {
        validate_inputs(x, &target)?;

        let run_id = Uuid::new_v4();
        let dataset_path = self.work_dir.join(format!("pricelab_train_{run_id}.svm"));
        let model_path = self.work_dir.join(format!("pricelab_model_{run_id}.txt"));
        let predictions_path = sibling_path(&dataset_path, ".pred");

        let (labels, objective_args): (Vec<f64>, Vec<String>) = match target {
            TrainingTarget::Values(y) => (y.to_vec(), vec![String::from("objective=regression")]),
            TrainingTarget::OneHot(y) => (
                y.iter().map(|row| argmax(row).0 as f64).collect(),
                vec![
                    String::from("objective=multiclass"),
                    format!("num_class={LABEL_COUNT}"),
                ],
            ),
        };

        info!(
            "Launching LightGBM on {} rows ({})",
            x.len(),
            objective_args.join(" ")
        );
        write_libsvm_dataset(x, &labels, &dataset_path)?;
        let raw = self.train_and_predict(
            &dataset_path,
            &model_path,
            &predictions_path,
            &objective_args,
            epochs,
        );

        for path in [&dataset_path, &model_path, &predictions_path] {
            if let Err(err) = fs::remove_file(path) {
                if path.exists() {
                    warn!("Failed to remove {}: {err}", path.display());
                }
            }
        }
        let raw = raw?;

        match target {
            TrainingTarget::Values(y) => {
                let predictions = parse_value_predictions(&raw)?;
                let metric = mean_absolute_percentage_error(y, &predictions);
                Ok(TrainerOutput {
                    predictions: Predictions::Values(predictions),
                    metric,
                })
            }
            TrainingTarget::OneHot(y) => {
                let distributions = parse_distribution_predictions(&raw)?;
                let metric = classification_accuracy(y, &distributions);
                Ok(TrainerOutput {
                    predictions: Predictions::Distributions(distributions),
                    metric,
                })
            }
        }
    }
}

pub fn write_libsvm_dataset(
    x: &[Vec<f64>],
    labels: &[f64],
    path: &Path,
) -> Result<(), TrainerError> {
    let mut writer = BufWriter::new(File::create(path)?);

    for (row, label) in x.iter().zip(labels) {
        let mut line = format!("{}", label);
        for (idx, value) in row.iter().enumerate() {
            line.push(' ');
            line.push_str(&format!("{}:{:.10}", idx, value));
        }
        line.push('\n');
        writer.write_all(line.as_bytes())?;
    }

    writer.flush()?;
    Ok(())
}

fn parse_value_predictions(raw: &str) -> Result<Vec<f64>, TrainerError> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.split_whitespace()
                .next()
                .and_then(|token| token.parse::<f64>().ok())
                .ok_or_else(|| TrainerError::Process(format!("unreadable prediction '{line}'")))
        })
        .collect()
}

fn parse_distribution_predictions(raw: &str) -> Result<Vec<[f64; LABEL_COUNT]>, TrainerError> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let values: Vec<f64> = line
                .split_whitespace()
                .filter_map(|token| token.parse::<f64>().ok())
                .collect();
            <[f64; LABEL_COUNT]>::try_from(values.as_slice()).map_err(|_| {
                TrainerError::Process(format!(
                    "expected {LABEL_COUNT} class probabilities, got '{line}'"
                ))
            })
        })
        .collect()
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

fn resolve_lightgbm_executable() -> anyhow::Result<PathBuf> {
    if let Some(configured) = std::env::var_os(LIGHTGBM_EXECUTABLE_ENV) {
        let path = PathBuf::from(configured);
        if path.exists() {
            return Ok(path);
        }
        return Err(anyhow::anyhow!(
            "{} points to {}, which does not exist",
            LIGHTGBM_EXECUTABLE_ENV,
            path.display()
        ));
    }

    let binary = if cfg!(windows) {
        "lightgbm.exe"
    } else {
        "lightgbm"
    };
    if let Some(path) = find_in_path(binary) {
        return Ok(path);
    }

    Err(anyhow::anyhow!(
        "lightgbm executable not found in {} or PATH; install the LightGBM CLI to use this trainer",
        LIGHTGBM_EXECUTABLE_ENV
    ))
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path_value = std::env::var_os("PATH")?;
    for entry in std::env::split_paths(&path_value) {
        let candidate = entry.join(binary);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn libsvm_rows_carry_label_and_indexed_features() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.svm");
        write_libsvm_dataset(&[vec![1.5, -2.0], vec![0.0, 3.25]], &[2.0, 0.0], &path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "2 0:1.5000000000 1:-2.0000000000");
        assert_eq!(lines[1], "0 0:0.0000000000 1:3.2500000000");
    }

    #[test]
    fn parses_multiclass_prediction_lines() {
        let parsed = parse_distribution_predictions("0.7\t0.2\t0.1\n0.1 0.1 0.8\n").unwrap();
        assert_eq!(parsed, vec![[0.7, 0.2, 0.1], [0.1, 0.1, 0.8]]);
        assert!(parse_distribution_predictions("0.5 0.5\n").is_err());
        assert_eq!(parse_value_predictions("1.5\n\n2.5\n").unwrap(), vec![1.5, 2.5]);
    }

    #[test]
    fn missing_executable_is_a_process_error() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = LightGbmTrainer::new(dir.path().join("no-such-lightgbm"))
            .with_work_dir(dir.path().to_path_buf());
        let x = vec![vec![1.0], vec![2.0]];
        let err = trainer
            .fit_predict(&x, TrainingTarget::Values(&[1.0, 2.0]), 10)
            .unwrap_err();
        assert!(matches!(err, TrainerError::Process(_)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
