use crate::models::{EnrichedPoint, Label};
use crate::param_utils::get_param_f64_clamped;
use std::collections::HashMap;

const DEFAULT_UNIT_THRESHOLD: f64 = 1.0;

/// Labels by how far the MACD line moves between the current and future rows.
pub struct MacdDirectionRule {
    threshold: f64,
}

impl MacdDirectionRule {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            threshold: get_param_f64_clamped(
                parameters,
                "threshold",
                DEFAULT_UNIT_THRESHOLD,
                0.0,
                f64::MAX,
            ),
        }
    }
}

impl super::LabelRule for MacdDirectionRule {
    fn name(&self) -> &str {
        "macd-direction"
    }

    fn label(&self, current: &EnrichedPoint, future: &EnrichedPoint, _: &[EnrichedPoint]) -> Label {
        let (Some(now), Some(later)) = (current.indicators.macd, future.indicators.macd) else {
            return Label::Hold;
        };
        let change = later - now;
        if change > self.threshold {
            Label::Buy
        } else if change < -self.threshold {
            Label::Sell
        } else {
            Label::Hold
        }
    }
}
