use crate::error::PipelineError;
use crate::features::DEFAULT_FEATURES;
use crate::models::Interval;
use crate::param_utils::parse_param_list;
use std::collections::HashMap;
use std::path::PathBuf;

type SettingResult<T> = Result<T, PipelineError>;

/// Coarser intervals have fewer, more distant samples and get a larger epoch
/// budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochPolicy {
    pub monthly_multiplier: usize,
}

impl Default for EpochPolicy {
    fn default() -> Self {
        Self {
            monthly_multiplier: 5,
        }
    }
}

impl EpochPolicy {
    pub fn epochs_for(&self, interval: Interval, base: usize) -> usize {
        match interval {
            Interval::Daily => base,
            Interval::Monthly => base.saturating_mul(self.monthly_multiplier),
        }
    }
}

/// Batch defaults read from `PRICELAB_*` settings. CLI flags override these.
#[derive(Debug, Clone)]
pub struct EvaluationSettings {
    pub rule_set: String,
    pub rule_parameters: HashMap<String, f64>,
    pub features: Vec<String>,
    pub lookahead: usize,
    pub base_epochs: usize,
    pub epoch_policy: EpochPolicy,
    pub results_dir: PathBuf,
    pub run_log_path: PathBuf,
    pub fmp_base_url: Option<String>,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            rule_set: "pct".to_string(),
            rule_parameters: HashMap::new(),
            features: DEFAULT_FEATURES.iter().map(|f| f.to_string()).collect(),
            lookahead: 5,
            base_epochs: 20,
            epoch_policy: EpochPolicy::default(),
            results_dir: PathBuf::from("results"),
            run_log_path: PathBuf::from("results/runs.csv"),
            fmp_base_url: None,
        }
    }
}

impl EvaluationSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> SettingResult<Self> {
        let defaults = Self::default();

        let rule_set = optional_setting(settings, "PRICELAB_RULE_SET")
            .map(str::to_string)
            .unwrap_or(defaults.rule_set);
        let rule_parameters = optional_setting(settings, "PRICELAB_RULE_PARAMS")
            .map(parse_param_list)
            .unwrap_or_default();
        let features = match optional_setting(settings, "PRICELAB_FEATURES") {
            Some(raw) => parse_feature_list(raw),
            None => defaults.features,
        };
        let lookahead =
            require_setting_usize(settings, "PRICELAB_LOOKAHEAD", defaults.lookahead, 1)?;
        let base_epochs =
            require_setting_usize(settings, "PRICELAB_EPOCHS", defaults.base_epochs, 1)?;
        let monthly_multiplier = require_setting_usize(
            settings,
            "PRICELAB_MONTHLY_EPOCH_MULTIPLIER",
            defaults.epoch_policy.monthly_multiplier,
            1,
        )?;
        let results_dir = optional_setting(settings, "PRICELAB_RESULTS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.results_dir);
        let run_log_path = optional_setting(settings, "PRICELAB_RUN_LOG")
            .map(PathBuf::from)
            .unwrap_or_else(|| results_dir.join("runs.csv"));
        let fmp_base_url = optional_setting(settings, "PRICELAB_FMP_BASE_URL").map(str::to_string);

        Ok(Self {
            rule_set,
            rule_parameters,
            features,
            lookahead,
            base_epochs,
            epoch_policy: EpochPolicy { monthly_multiplier },
            results_dir,
            run_log_path,
            fmp_base_url,
        })
    }

    pub fn from_env() -> SettingResult<Self> {
        let settings: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with("PRICELAB_"))
            .collect();
        Self::from_settings_map(&settings)
    }
}

/// Splits a feature list on commas or whitespace, keeping order.
pub fn parse_feature_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn require_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> SettingResult<usize> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw.parse::<f64>().map_err(|_| {
        PipelineError::Configuration(format!("Setting {} must be a number (value: {})", key, raw))
    })?;
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(PipelineError::Configuration(format!(
            "Setting {} must be an integer (value: {})",
            key, raw
        )));
    }
    if value < min as f64 {
        return Err(PipelineError::Configuration(format!(
            "Setting {} must be >= {} (value: {})",
            key, min, raw
        )));
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_settings_are_absent() {
        let parsed = EvaluationSettings::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(parsed.rule_set, "pct");
        assert_eq!(parsed.features, vec!["close1", "close2", "macd", "rsi"]);
        assert_eq!(parsed.lookahead, 5);
        assert_eq!(parsed.run_log_path, PathBuf::from("results/runs.csv"));
    }

    #[test]
    fn settings_override_defaults() {
        let parsed = EvaluationSettings::from_settings_map(&settings(&[
            ("PRICELAB_RULE_SET", "macd-direction"),
            ("PRICELAB_RULE_PARAMS", "threshold=0.5"),
            ("PRICELAB_FEATURES", "close, rsi  roc"),
            ("PRICELAB_EPOCHS", "40"),
            ("PRICELAB_MONTHLY_EPOCH_MULTIPLIER", "3"),
            ("PRICELAB_RESULTS_DIR", "/tmp/out"),
        ]))
        .unwrap();
        assert_eq!(parsed.rule_set, "macd-direction");
        assert_eq!(parsed.rule_parameters.get("threshold"), Some(&0.5));
        assert_eq!(parsed.features, vec!["close", "rsi", "roc"]);
        assert_eq!(parsed.epoch_policy.epochs_for(Interval::Monthly, parsed.base_epochs), 120);
        assert_eq!(parsed.run_log_path, PathBuf::from("/tmp/out/runs.csv"));
    }

    #[test]
    fn invalid_numbers_are_configuration_errors() {
        for bad in ["abc", "2.5", "0"] {
            let err = EvaluationSettings::from_settings_map(&settings(&[("PRICELAB_LOOKAHEAD", bad)]))
                .unwrap_err();
            assert!(matches!(err, PipelineError::Configuration(_)), "{bad}");
        }
    }

    #[test]
    fn monthly_gets_a_larger_epoch_budget() {
        let policy = EpochPolicy::default();
        assert_eq!(policy.epochs_for(Interval::Daily, 20), 20);
        assert_eq!(policy.epochs_for(Interval::Monthly, 20), 100);
    }
}
