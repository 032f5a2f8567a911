use crate::models::{EnrichedPoint, Label};
use crate::param_utils::get_param_f64_clamped;
use std::collections::HashMap;

const DEFAULT_THRESHOLD: f64 = 0.03;

/// Labels by the relative close change between the current and future rows.
pub struct PctRule {
    threshold: f64,
}

impl PctRule {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            threshold: get_param_f64_clamped(parameters, "threshold", DEFAULT_THRESHOLD, 0.0, 10.0),
        }
    }
}

pub fn label_pct_change(current_close: f64, future_close: f64, threshold: f64) -> Label {
    if current_close <= 0.0 || !current_close.is_finite() || !future_close.is_finite() {
        return Label::Hold;
    }
    let change = (future_close - current_close) / current_close;
    if change > threshold {
        Label::Buy
    } else if change < -threshold {
        Label::Sell
    } else {
        Label::Hold
    }
}

impl super::LabelRule for PctRule {
    fn name(&self) -> &str {
        "pct"
    }

    fn label(&self, current: &EnrichedPoint, future: &EnrichedPoint, _: &[EnrichedPoint]) -> Label {
        label_pct_change(current.close, future.close, self.threshold)
    }
}
