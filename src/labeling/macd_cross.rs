use crate::models::{EnrichedPoint, Label};

/// Buy when MACD moves from below its signal line to above it between the
/// current and future rows; sell on the opposite cross.
pub struct MacdCrossRule;

impl super::LabelRule for MacdCrossRule {
    fn name(&self) -> &str {
        "macd-cross"
    }

    fn label(&self, current: &EnrichedPoint, future: &EnrichedPoint, _: &[EnrichedPoint]) -> Label {
        let (Some(macd_now), Some(signal_now), Some(macd_future), Some(signal_future)) = (
            current.indicators.macd,
            current.indicators.signal,
            future.indicators.macd,
            future.indicators.signal,
        ) else {
            return Label::Hold;
        };

        if macd_now < signal_now && macd_future > signal_future {
            Label::Buy
        } else if macd_now > signal_now && macd_future < signal_future {
            Label::Sell
        } else {
            Label::Hold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndicatorPoint;
    use crate::rules::test_support::{macd_point, point};
    use crate::rules::LabelRule;

    #[test]
    fn detects_crosses_in_both_directions() {
        let rule = MacdCrossRule;
        let below = macd_point(-0.5, 0.2);
        let above = macd_point(0.8, 0.1);
        assert_eq!(rule.label(&below, &above, &[]), Label::Buy);
        assert_eq!(rule.label(&above, &below, &[]), Label::Sell);
        assert_eq!(rule.label(&above, &above, &[]), Label::Hold);
    }

    #[test]
    fn touching_the_signal_line_is_not_a_cross() {
        let rule = MacdCrossRule;
        assert_eq!(
            rule.label(&macd_point(0.2, 0.2), &macd_point(0.9, 0.1), &[]),
            Label::Hold
        );
    }

    #[test]
    fn missing_values_hold() {
        let rule = MacdCrossRule;
        let empty = point(100.0, IndicatorPoint::default());
        assert_eq!(rule.label(&empty, &macd_point(1.0, 0.0), &[]), Label::Hold);
    }
}
