use crate::models::{EnrichedPoint, Label};
use log::warn;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Maps a current row, the row `lookahead` steps later and the trailing
/// history (ending at the current row) to a label. Implementations hold no
/// mutable state, so identical inputs always give identical labels.
pub trait LabelRule {
    fn name(&self) -> &str;
    fn label(
        &self,
        current: &EnrichedPoint,
        future: &EnrichedPoint,
        history: &[EnrichedPoint],
    ) -> Label;
}

#[path = "labeling/pct.rs"]
pub mod pct;

pub use pct::PctRule;

#[path = "labeling/macd_cross.rs"]
pub mod macd_cross;

pub use macd_cross::MacdCrossRule;

#[path = "labeling/macd_direction.rs"]
pub mod macd_direction;

pub use macd_direction::MacdDirectionRule;

#[path = "labeling/custom_macd.rs"]
pub mod custom_macd;

pub use custom_macd::CustomMacdRule;

#[path = "labeling/momentum_macd.rs"]
pub mod momentum_macd;

pub use momentum_macd::MomentumMacdRule;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleSet {
    Pct,
    MacdCross,
    MacdDirection,
    CustomMacd,
    MomentumMacd,
    Unknown(String),
}

impl RuleSet {
    pub const KNOWN: [RuleSet; 5] = [
        RuleSet::Pct,
        RuleSet::MacdCross,
        RuleSet::MacdDirection,
        RuleSet::CustomMacd,
        RuleSet::MomentumMacd,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            RuleSet::Pct => "pct",
            RuleSet::MacdCross => "macd-cross",
            RuleSet::MacdDirection => "macd-direction",
            RuleSet::CustomMacd => "custom-macd",
            RuleSet::MomentumMacd => "momentum-macd",
            RuleSet::Unknown(name) => name,
        }
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleSet {
    type Err = std::convert::Infallible;

    /// Never fails: unrecognized names become `RuleSet::Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "pct" => RuleSet::Pct,
            "macd-cross" => RuleSet::MacdCross,
            "macd-direction" => RuleSet::MacdDirection,
            "custom-macd" => RuleSet::CustomMacd,
            "momentum-macd" => RuleSet::MomentumMacd,
            _ => RuleSet::Unknown(s.trim().to_string()),
        })
    }
}

/// Labels every sample `hold`; stands in for misconfigured rule-set names.
pub struct UnknownRule {
    name: String,
}

impl LabelRule for UnknownRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn label(&self, _: &EnrichedPoint, _: &EnrichedPoint, _: &[EnrichedPoint]) -> Label {
        Label::Hold
    }
}

pub fn create_rule(
    rule_set: &RuleSet,
    parameters: &HashMap<String, f64>,
) -> Box<dyn LabelRule + Send + Sync> {
    match rule_set {
        RuleSet::Pct => Box::new(PctRule::new(parameters)),
        RuleSet::MacdCross => Box::new(MacdCrossRule),
        RuleSet::MacdDirection => Box::new(MacdDirectionRule::new(parameters)),
        RuleSet::CustomMacd => Box::new(CustomMacdRule),
        RuleSet::MomentumMacd => Box::new(MomentumMacdRule),
        RuleSet::Unknown(name) => {
            warn!("Unknown rule set '{}'; every sample will be labeled hold", name);
            Box::new(UnknownRule { name: name.clone() })
        }
    }
}

/// One-off dispatch with default rule parameters.
pub fn label_for(
    rule_set: &str,
    current: &EnrichedPoint,
    future: &EnrichedPoint,
    history: &[EnrichedPoint],
) -> Label {
    let rule_set: RuleSet = match rule_set.parse() {
        Ok(value) => value,
        Err(never) => match never {},
    };
    create_rule(&rule_set, &HashMap::new()).label(current, future, history)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::{EnrichedPoint, IndicatorPoint};
    use chrono::NaiveDate;

    pub fn point(close: f64, indicators: IndicatorPoint) -> EnrichedPoint {
        EnrichedPoint {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            close,
            volume: 0,
            indicators,
            predicted: None,
            actual_label: None,
            predicted_label: None,
            confidence: None,
        }
    }

    pub fn macd_point(macd: f64, signal: f64) -> EnrichedPoint {
        point(
            100.0,
            IndicatorPoint {
                macd: Some(macd),
                signal: Some(signal),
                ..IndicatorPoint::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{macd_point, point};
    use super::*;
    use crate::models::IndicatorPoint;

    #[test]
    fn parses_known_names_and_keeps_unknown() {
        for rule_set in RuleSet::KNOWN {
            assert_eq!(rule_set.as_str().parse::<RuleSet>().unwrap(), rule_set);
        }
        assert_eq!(
            "pcnt".parse::<RuleSet>().unwrap(),
            RuleSet::Unknown("pcnt".to_string())
        );
    }

    #[test]
    fn unknown_rule_set_labels_everything_hold() {
        let low = point(10.0, IndicatorPoint::default());
        let high = point(1000.0, IndicatorPoint::default());
        assert_eq!(label_for("typo", &low, &high, &[low.clone()]), Label::Hold);
        assert_eq!(label_for("typo", &high, &low, &[high.clone()]), Label::Hold);
    }

    #[test]
    fn every_rule_is_deterministic() {
        let current = macd_point(-1.0, 0.5);
        let future = macd_point(2.0, 0.5);
        let history = vec![macd_point(-2.0, 0.0), macd_point(-1.5, 0.0), current.clone()];
        for rule_set in RuleSet::KNOWN {
            let rule = create_rule(&rule_set, &HashMap::new());
            let first = rule.label(&current, &future, &history);
            for _ in 0..5 {
                assert_eq!(rule.label(&current, &future, &history), first);
            }
        }
    }

    #[test]
    fn dispatch_reaches_the_named_rule() {
        let current = point(100.0, IndicatorPoint::default());
        let future = point(110.0, IndicatorPoint::default());
        assert_eq!(label_for("pct", &current, &future, &[]), Label::Buy);
        assert_eq!(label_for(" PCT ", &future, &current, &[]), Label::Sell);
        assert_eq!(label_for("macd-cross", &current, &future, &[]), Label::Hold);
    }
}
