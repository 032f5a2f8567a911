use crate::models::{EnrichedPoint, Label, LABEL_COUNT};
use log::warn;
use std::collections::BTreeSet;

/// Accessor for a named feature at a row of the series.
type FeatureAccessor = fn(&[EnrichedPoint], usize) -> Option<f64>;

struct FeatureSpec {
    name: &'static str,
    accessor: FeatureAccessor,
    fallback: f64,
}

fn lagged_close(series: &[EnrichedPoint], index: usize, lag: usize) -> Option<f64> {
    index
        .checked_sub(lag)
        .and_then(|row| series.get(row))
        .map(|point| point.close)
}

/// Every named feature with its row offset. Lags are always relative to the
/// row being described, so the regression and classification builders agree.
const FEATURE_TABLE: &[FeatureSpec] = &[
    FeatureSpec {
        name: "close",
        accessor: |s, i| lagged_close(s, i, 0),
        fallback: 0.0,
    },
    FeatureSpec {
        name: "close1",
        accessor: |s, i| lagged_close(s, i, 1),
        fallback: 0.0,
    },
    FeatureSpec {
        name: "close2",
        accessor: |s, i| lagged_close(s, i, 2),
        fallback: 0.0,
    },
    FeatureSpec {
        name: "volume",
        accessor: |s, i| s.get(i).map(|p| p.volume as f64),
        fallback: 0.0,
    },
    FeatureSpec {
        name: "macd",
        accessor: |s, i| s.get(i).and_then(|p| p.indicators.macd),
        fallback: 0.0,
    },
    FeatureSpec {
        name: "macd_1",
        accessor: |s, i| s.get(i).and_then(|p| p.indicators.macd_delta1),
        fallback: 0.0,
    },
    FeatureSpec {
        name: "macd_2",
        accessor: |s, i| s.get(i).and_then(|p| p.indicators.macd_delta2),
        fallback: 0.0,
    },
    FeatureSpec {
        name: "signal",
        accessor: |s, i| s.get(i).and_then(|p| p.indicators.signal),
        fallback: 0.0,
    },
    FeatureSpec {
        name: "rsi",
        accessor: |s, i| s.get(i).and_then(|p| p.indicators.rsi),
        fallback: 50.0,
    },
    FeatureSpec {
        name: "bb_upper",
        accessor: |s, i| s.get(i).and_then(|p| p.indicators.bb_upper),
        fallback: 0.0,
    },
    FeatureSpec {
        name: "bb_lower",
        accessor: |s, i| s.get(i).and_then(|p| p.indicators.bb_lower),
        fallback: 0.0,
    },
    FeatureSpec {
        name: "closeShortMA",
        accessor: |s, i| s.get(i).and_then(|p| p.indicators.short_ma),
        fallback: 0.0,
    },
    FeatureSpec {
        name: "closeLongMA",
        accessor: |s, i| s.get(i).and_then(|p| p.indicators.long_ma),
        fallback: 0.0,
    },
    FeatureSpec {
        name: "roc",
        accessor: |s, i| s.get(i).and_then(|p| p.indicators.roc),
        fallback: 0.0,
    },
    FeatureSpec {
        name: "predicted",
        accessor: |s, i| s.get(i).and_then(|p| p.predicted),
        fallback: 0.0,
    },
];

pub const DEFAULT_FEATURES: [&str; 4] = ["close1", "close2", "macd", "rsi"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue {
    Value(f64),
    /// Known feature without a value at this row (warm-up or lag before the start).
    Missing(f64),
    Unknown,
}

impl FeatureValue {
    pub fn or_fill(self) -> f64 {
        match self {
            FeatureValue::Value(value) | FeatureValue::Missing(value) => value,
            FeatureValue::Unknown => 0.0,
        }
    }
}

pub fn known_features() -> impl Iterator<Item = &'static str> {
    FEATURE_TABLE.iter().map(|spec| spec.name)
}

pub fn is_known_feature(name: &str) -> bool {
    FEATURE_TABLE.iter().any(|spec| spec.name == name)
}

pub fn resolve_feature(series: &[EnrichedPoint], index: usize, name: &str) -> FeatureValue {
    let Some(spec) = FEATURE_TABLE.iter().find(|spec| spec.name == name) else {
        return FeatureValue::Unknown;
    };
    match (spec.accessor)(series, index) {
        Some(value) if value.is_finite() => FeatureValue::Value(value),
        _ => FeatureValue::Missing(spec.fallback),
    }
}

pub fn feature_vector(series: &[EnrichedPoint], index: usize, features: &[String]) -> Vec<f64> {
    features
        .iter()
        .map(|name| resolve_feature(series, index, name).or_fill())
        .collect()
}

fn warn_on_misconfiguration(features: &[String]) {
    if features.is_empty() {
        warn!("Feature list is empty; building zero-width feature rows");
        return;
    }
    let unknown: BTreeSet<&str> = features
        .iter()
        .map(String::as_str)
        .filter(|name| !is_known_feature(name))
        .collect();
    for name in unknown {
        warn!("Unknown feature '{}' will be zero-filled", name);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleMeta {
    pub index: usize,
    pub label: Option<Label>,
}

#[derive(Debug, Clone, Default)]
pub struct RegressionMatrix {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
    pub meta: Vec<SampleMeta>,
}

impl RegressionMatrix {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassificationMatrix {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<[f64; LABEL_COUNT]>,
    pub meta: Vec<SampleMeta>,
}

impl ClassificationMatrix {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.meta.iter().filter_map(|m| m.label)
    }
}

/// Rows describe `series[i]`; the target is the following close.
pub fn build_regression_matrix(series: &[EnrichedPoint], features: &[String]) -> RegressionMatrix {
    warn_on_misconfiguration(features);

    let rows = series.len().saturating_sub(1);
    let mut matrix = RegressionMatrix {
        x: Vec::with_capacity(rows),
        y: Vec::with_capacity(rows),
        meta: Vec::with_capacity(rows),
    };
    for i in 0..rows {
        matrix.x.push(feature_vector(series, i, features));
        matrix.y.push(series[i + 1].close);
        matrix.meta.push(SampleMeta {
            index: i,
            label: None,
        });
    }
    matrix
}

/// One sample per row that has a future row `lookahead` steps ahead. The label
/// function receives the current row, the future row and the history up to and
/// including the current row.
pub fn build_classification_matrix<F>(
    series: &[EnrichedPoint],
    features: &[String],
    lookahead: usize,
    mut label_fn: F,
) -> ClassificationMatrix
where
    F: FnMut(&EnrichedPoint, &EnrichedPoint, &[EnrichedPoint]) -> Label,
{
    warn_on_misconfiguration(features);
    let lookahead = if lookahead == 0 {
        warn!("Lookahead of 0 has no future row; using 1");
        1
    } else {
        lookahead
    };

    let rows = series.len().saturating_sub(lookahead);
    let mut matrix = ClassificationMatrix {
        x: Vec::with_capacity(rows),
        y: Vec::with_capacity(rows),
        meta: Vec::with_capacity(rows),
    };
    for i in 0..rows {
        let label = label_fn(&series[i], &series[i + lookahead], &series[..=i]);
        matrix.x.push(feature_vector(series, i, features));
        matrix.y.push(label.one_hot());
        matrix.meta.push(SampleMeta {
            index: i,
            label: Some(label),
        });
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{enrich, IndicatorConfig};
    use crate::models::PricePoint;
    use chrono::{Duration, NaiveDate};

    fn enriched(closes: &[f64]) -> Vec<EnrichedPoint> {
        let start = NaiveDate::from_ymd_opt(2023, 5, 1).unwrap();
        let prices: Vec<PricePoint> = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PricePoint {
                date: start + Duration::days(i as i64),
                close,
                volume: 500 + i as i64,
            })
            .collect();
        enrich(&prices, &IndicatorConfig::default())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn lag_features_look_backwards_from_the_row() {
        let series = enriched(&[10.0, 11.0, 12.0, 13.0]);
        assert_eq!(resolve_feature(&series, 3, "close"), FeatureValue::Value(13.0));
        assert_eq!(resolve_feature(&series, 3, "close1"), FeatureValue::Value(12.0));
        assert_eq!(resolve_feature(&series, 3, "close2"), FeatureValue::Value(11.0));
        assert_eq!(resolve_feature(&series, 1, "close2"), FeatureValue::Missing(0.0));
        assert_eq!(resolve_feature(&series, 3, "rsi"), FeatureValue::Missing(50.0));
        assert_eq!(resolve_feature(&series, 3, "nope"), FeatureValue::Unknown);
    }

    #[test]
    fn regression_has_one_row_less_than_series() {
        let series = enriched(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let matrix = build_regression_matrix(&series, &names(&["close1", "close2", "macd"]));
        assert_eq!(matrix.x.len(), 5);
        assert_eq!(matrix.y.len(), 5);
        assert_eq!(matrix.meta.len(), 5);
        assert_eq!(matrix.y[0], 2.0);
        assert_eq!(matrix.y[4], 6.0);
        assert_eq!(matrix.x[4], vec![4.0, 3.0, 0.0]);

        assert!(build_regression_matrix(&series[..1], &names(&["close"])).is_empty());
    }

    #[test]
    fn unknown_features_are_zero_filled() {
        let series = enriched(&[1.0, 2.0, 3.0]);
        let matrix = build_regression_matrix(&series, &names(&["close", "bogus"]));
        assert_eq!(matrix.x[1], vec![2.0, 0.0]);
    }

    #[test]
    fn classification_skips_rows_without_future() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let series = enriched(&closes);
        let matrix =
            build_classification_matrix(&series, &names(&["close"]), 5, |_, _, _| Label::Hold);
        assert_eq!(matrix.len(), 5);
        assert_eq!(matrix.y.len(), 5);
        assert_eq!(matrix.meta.len(), 5);
        assert!(matrix.meta.iter().all(|m| m.index + 5 < closes.len()));

        let none = build_classification_matrix(&series, &names(&["close"]), 10, |_, _, _| {
            Label::Hold
        });
        assert!(none.is_empty());
    }

    #[test]
    fn label_function_sees_history_ending_at_current_row() {
        let series = enriched(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let matrix = build_classification_matrix(&series, &names(&["close"]), 2, |cur, fut, hist| {
            assert_eq!(hist.last().map(|p| p.close), Some(cur.close));
            assert_eq!(fut.close, cur.close + 2.0);
            Label::Buy
        });
        assert_eq!(matrix.len(), 3);
        assert_eq!(matrix.y[0], [1.0, 0.0, 0.0]);
        assert_eq!(matrix.labels().count(), 3);
    }
}
