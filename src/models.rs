use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const LABEL_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
    pub volume: i64,
}

/// Indicator values attached 1:1 to a price point by index. `None` means the
/// indicator has not accumulated enough history yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorPoint {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub signal: Option<f64>,
    #[serde(rename = "macd_1")]
    pub macd_delta1: Option<f64>,
    #[serde(rename = "macd_2")]
    pub macd_delta2: Option<f64>,
    #[serde(rename = "bb_upper")]
    pub bb_upper: Option<f64>,
    #[serde(rename = "bb_lower")]
    pub bb_lower: Option<f64>,
    #[serde(rename = "closeShortMA")]
    pub short_ma: Option<f64>,
    #[serde(rename = "closeLongMA")]
    pub long_ma: Option<f64>,
    pub roc: Option<f64>,
}

impl IndicatorPoint {
    pub fn is_empty(&self) -> bool {
        *self == IndicatorPoint::default()
    }
}

/// A price point together with its indicators and the annotations the
/// evaluation harness writes back after training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedPoint {
    pub date: NaiveDate,
    pub close: f64,
    pub volume: i64,
    #[serde(flatten)]
    pub indicators: IndicatorPoint,
    pub predicted: Option<f64>,
    pub actual_label: Option<Label>,
    pub predicted_label: Option<Label>,
    pub confidence: Option<f64>,
}

impl EnrichedPoint {
    pub fn new(price: &PricePoint, indicators: IndicatorPoint) -> Self {
        Self {
            date: price.date,
            close: price.close,
            volume: price.volume,
            indicators,
            predicted: None,
            actual_label: None,
            predicted_label: None,
            confidence: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Buy,
    Hold,
    Sell,
}

impl Label {
    pub const ALL: [Label; LABEL_COUNT] = [Label::Buy, Label::Hold, Label::Sell];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Buy => "buy",
            Label::Hold => "hold",
            Label::Sell => "sell",
        }
    }

    /// Position of this label in one-hot encodings and class distributions.
    pub fn index(&self) -> usize {
        match self {
            Label::Buy => 0,
            Label::Hold => 1,
            Label::Sell => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Label> {
        Label::ALL.get(index).copied()
    }

    pub fn one_hot(&self) -> [f64; LABEL_COUNT] {
        let mut encoded = [0.0; LABEL_COUNT];
        encoded[self.index()] = 1.0;
        encoded
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(Label::Buy),
            "hold" => Ok(Label::Hold),
            "sell" => Ok(Label::Sell),
            other => Err(anyhow!("Unknown label '{}'", other)),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Daily,
    Monthly,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Daily => "daily",
            Interval::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Interval::Daily),
            "monthly" => Ok(Interval::Monthly),
            other => Err(anyhow!("Unknown interval '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCounts {
    pub buy: usize,
    pub hold: usize,
    pub sell: usize,
}

impl LabelCounts {
    pub fn record(&mut self, label: Label) {
        match label {
            Label::Buy => self.buy += 1,
            Label::Hold => self.hold += 1,
            Label::Sell => self.sell += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.buy + self.hold + self.sell
    }
}

impl FromIterator<Label> for LabelCounts {
    fn from_iter<I: IntoIterator<Item = Label>>(iter: I) -> Self {
        let mut counts = LabelCounts::default();
        for label in iter {
            counts.record(label);
        }
        counts
    }
}

/// Summary of one (symbol, interval, rule set, feature set) evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRunRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub interval: Interval,
    pub rule_set: String,
    pub features: Vec<String>,
    pub mape: Option<f64>,
    pub accuracy: Option<f64>,
    pub label_counts: LabelCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvaluationRunRecord {
    pub fn failed(
        timestamp: DateTime<Utc>,
        symbol: &str,
        interval: Interval,
        rule_set: &str,
        features: &[String],
        error: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            symbol: symbol.to_string(),
            interval,
            rule_set: rule_set.to_string(),
            features: features.to_vec(),
            mape: None,
            accuracy: None,
            label_counts: LabelCounts::default(),
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn features_joined(&self) -> String {
        self.features.join("|")
    }

    /// Key under which repeated persistence of the same run collapses to one row.
    pub fn identity_key(&self) -> RunIdentity {
        RunIdentity {
            timestamp: self.timestamp.timestamp(),
            symbol: self.symbol.clone(),
            interval: self.interval,
            features: self.features_joined(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunIdentity {
    pub timestamp: i64,
    pub symbol: String,
    pub interval: Interval,
    pub features: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn label_round_trips_through_index_and_name() {
        for label in Label::ALL {
            assert_eq!(Label::from_index(label.index()), Some(label));
            assert_eq!(label.as_str().parse::<Label>().unwrap(), label);
            assert_eq!(label.one_hot()[label.index()], 1.0);
        }
        assert!("maybe".parse::<Label>().is_err());
    }

    #[test]
    fn identity_key_ignores_sub_second_precision() {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let features = vec!["close1".to_string(), "rsi".to_string()];
        let a = EvaluationRunRecord::failed(base, "AAPL", Interval::Daily, "pct", &features, "x");
        let mut b = a.clone();
        b.timestamp = base + chrono::Duration::milliseconds(250);
        b.rule_set = "macd-cross".to_string();
        assert_eq!(a.identity_key(), b.identity_key());

        b.interval = Interval::Monthly;
        assert_ne!(a.identity_key(), b.identity_key());
    }

    #[test]
    fn label_counts_collect_from_labels() {
        let counts: LabelCounts = [Label::Buy, Label::Buy, Label::Sell].into_iter().collect();
        assert_eq!(counts.buy, 2);
        assert_eq!(counts.hold, 0);
        assert_eq!(counts.sell, 1);
        assert_eq!(counts.total(), 3);
    }
}
