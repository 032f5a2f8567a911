use crate::models::{EnrichedPoint, Label};

/// Buys on a zero-line MACD cross, a short/long MA cross, or a close under the
/// long MA; sells when MACD momentum turns down. Needs two rows of history and
/// falls back to the current row when they are missing.
pub struct CustomMacdRule;

fn crossed_above(
    now: Option<f64>,
    now_ref: Option<f64>,
    prev: Option<f64>,
    prev_ref: Option<f64>,
) -> bool {
    matches!(
        (now, now_ref, prev, prev_ref),
        (Some(a), Some(b), Some(c), Some(d)) if a > b && c < d
    )
}

impl super::LabelRule for CustomMacdRule {
    fn name(&self) -> &str {
        "custom-macd"
    }

    fn label(&self, current: &EnrichedPoint, _: &EnrichedPoint, history: &[EnrichedPoint]) -> Label {
        let previous = history
            .len()
            .checked_sub(2)
            .and_then(|i| history.get(i))
            .unwrap_or(current);
        let prev2 = history
            .len()
            .checked_sub(3)
            .and_then(|i| history.get(i))
            .unwrap_or(previous);

        let now = &current.indicators;
        let prev = &previous.indicators;

        let zero_cross = crossed_above(now.macd, Some(0.0), prev.macd, Some(0.0));
        let ma_cross = crossed_above(now.short_ma, now.long_ma, prev.short_ma, prev.long_ma);
        let below_long_ma = now.long_ma.is_some_and(|long| current.close < long);
        if zero_cross || ma_cross || below_long_ma {
            return Label::Buy;
        }

        if let (Some(m0), Some(m1), Some(m2)) = (now.macd, prev.macd, prev2.indicators.macd) {
            if m0 - m1 < 0.0 && m1 - m2 > 0.0 {
                return Label::Sell;
            }
        }

        Label::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndicatorPoint;
    use crate::rules::test_support::point;
    use crate::rules::LabelRule;

    fn row(close: f64, macd: f64, short_ma: f64, long_ma: f64) -> EnrichedPoint {
        point(
            close,
            IndicatorPoint {
                macd: Some(macd),
                short_ma: Some(short_ma),
                long_ma: Some(long_ma),
                ..IndicatorPoint::default()
            },
        )
    }

    #[test]
    fn buys_on_zero_cross() {
        let history = vec![row(100.0, -0.2, 95.0, 90.0), row(100.0, 0.3, 95.0, 90.0)];
        let current = history[1].clone();
        assert_eq!(CustomMacdRule.label(&current, &current, &history), Label::Buy);
    }

    #[test]
    fn buys_on_moving_average_cross() {
        let history = vec![row(100.0, 1.0, 89.0, 90.0), row(100.0, 1.0, 91.0, 90.0)];
        let current = history[1].clone();
        assert_eq!(CustomMacdRule.label(&current, &current, &history), Label::Buy);
    }

    #[test]
    fn buys_when_close_under_long_average() {
        let current = row(80.0, 1.0, 95.0, 90.0);
        assert_eq!(
            CustomMacdRule.label(&current, &current, &[current.clone()]),
            Label::Buy
        );
    }

    #[test]
    fn sells_when_momentum_reverses() {
        let history = vec![
            row(100.0, 1.0, 95.0, 90.0),
            row(100.0, 2.0, 95.0, 90.0),
            row(100.0, 1.5, 95.0, 90.0),
        ];
        let current = history[2].clone();
        assert_eq!(CustomMacdRule.label(&current, &current, &history), Label::Sell);
    }

    #[test]
    fn single_row_history_holds() {
        let current = row(100.0, 1.0, 95.0, 90.0);
        assert_eq!(
            CustomMacdRule.label(&current, &current, &[current.clone()]),
            Label::Hold
        );
    }
}
