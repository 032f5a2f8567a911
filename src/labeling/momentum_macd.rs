use crate::models::{EnrichedPoint, Label};

/// Buys while a MACD trough is forming (negative MACD, rising with positive
/// curvature) and sells while a peak is forming.
pub struct MomentumMacdRule;

impl super::LabelRule for MomentumMacdRule {
    fn name(&self) -> &str {
        "momentum-macd"
    }

    fn label(&self, current: &EnrichedPoint, _: &EnrichedPoint, _: &[EnrichedPoint]) -> Label {
        let indicators = &current.indicators;
        let (Some(macd), Some(d1), Some(d2)) =
            (indicators.macd, indicators.macd_delta1, indicators.macd_delta2)
        else {
            return Label::Hold;
        };

        if macd < 0.0 && d1 > 0.0 && d2 > 0.0 {
            Label::Buy
        } else if macd > 0.0 && d1 < 0.0 && d2 < 0.0 {
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
    use crate::rules::test_support::point;
    use crate::rules::LabelRule;

    fn momentum(macd: Option<f64>, d1: Option<f64>, d2: Option<f64>) -> EnrichedPoint {
        point(
            100.0,
            IndicatorPoint {
                macd,
                macd_delta1: d1,
                macd_delta2: d2,
                ..IndicatorPoint::default()
            },
        )
    }

    #[test]
    fn trough_buys_and_peak_sells() {
        let trough = momentum(Some(-1.0), Some(0.2), Some(0.1));
        let peak = momentum(Some(1.0), Some(-0.2), Some(-0.1));
        let flat = momentum(Some(1.0), Some(0.2), Some(-0.1));
        assert_eq!(MomentumMacdRule.label(&trough, &trough, &[]), Label::Buy);
        assert_eq!(MomentumMacdRule.label(&peak, &peak, &[]), Label::Sell);
        assert_eq!(MomentumMacdRule.label(&flat, &flat, &[]), Label::Hold);
    }

    #[test]
    fn missing_derivative_holds() {
        let partial = momentum(Some(-1.0), Some(0.2), None);
        assert_eq!(MomentumMacdRule.label(&partial, &partial, &[]), Label::Hold);
    }
}
