use crate::models::{EnrichedPoint, IndicatorPoint, PricePoint};
use log::debug;
use statrs::statistics::Statistics;

#[derive(Debug, Clone, Copy)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_std_dev: f64,
    pub short_ma_period: usize,
    pub long_ma_period: usize,
    pub roc_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_std_dev: 2.0,
            short_ma_period: 12,
            long_ma_period: 26,
            roc_period: 12,
        }
    }
}

impl IndicatorConfig {
    /// First index at which the MACD line and its signal are reported.
    pub fn macd_start(&self) -> usize {
        (self.macd_slow + self.macd_signal).saturating_sub(2)
    }

    /// Shortest history for which every indicator can produce a value.
    pub fn required_history(&self) -> usize {
        [
            self.rsi_period + 1,
            self.bollinger_period,
            self.macd_start() + 1,
            self.short_ma_period,
            self.long_ma_period,
            self.roc_period + 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// Computes index-aligned indicators for the series. When the series is shorter
/// than the longest warm-up every point is left empty.
pub fn compute(prices: &[PricePoint], config: &IndicatorConfig) -> Vec<IndicatorPoint> {
    let mut points = vec![IndicatorPoint::default(); prices.len()];
    if prices.len() < config.required_history() {
        debug!(
            "Skipping indicators: {} points available, {} required",
            prices.len(),
            config.required_history()
        );
        return points;
    }

    let closes: Vec<f64> = prices.iter().map(|p| p.close).collect();
    let rsi = calculate_rsi(&closes, config.rsi_period);
    let macd = calculate_macd(
        &closes,
        config.macd_fast,
        config.macd_slow,
        config.macd_signal,
    );
    let (bb_upper, bb_lower) =
        calculate_bollinger_bands(&closes, config.bollinger_period, config.bollinger_std_dev);
    let short_ma = calculate_sma(&closes, config.short_ma_period);
    let long_ma = calculate_sma(&closes, config.long_ma_period);
    let roc = calculate_roc(&closes, config.roc_period);

    for (i, point) in points.iter_mut().enumerate() {
        *point = IndicatorPoint {
            rsi: rsi[i],
            macd: macd.macd[i],
            signal: macd.signal[i],
            macd_delta1: macd.delta1[i],
            macd_delta2: macd.delta2[i],
            bb_upper: bb_upper[i],
            bb_lower: bb_lower[i],
            short_ma: short_ma[i],
            long_ma: long_ma[i],
            roc: roc[i],
        };
    }

    points
}

/// Returns a new series pairing every price with its indicators. The input is
/// left untouched so repeated evaluations start from the same data.
pub fn enrich(prices: &[PricePoint], config: &IndicatorConfig) -> Vec<EnrichedPoint> {
    compute(prices, config)
        .into_iter()
        .zip(prices)
        .map(|(indicators, price)| EnrichedPoint::new(price, indicators))
        .collect()
}

/// Simple rolling mean; `None` until the window is full.
pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut sma_values = vec![None; prices.len()];
    if period == 0 || prices.len() < period {
        return sma_values;
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    sma_values[period - 1] = Some(window_sum / period as f64);
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        sma_values[i] = Some(window_sum / period as f64);
    }

    sma_values
}

/// Exponential moving average seeded with the first value.
pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_values = Vec::with_capacity(prices.len());
    ema_values.push(prices[0]);

    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

#[derive(Debug, Clone, Default)]
pub struct MacdSeries {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub delta1: Vec<Option<f64>>,
    pub delta2: Vec<Option<f64>>,
}

pub fn calculate_macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> MacdSeries {
    let fast_ema = calculate_ema(prices, fast_period);
    let slow_ema = calculate_ema(prices, slow_period);

    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(fast, slow)| fast - slow)
        .collect();
    let signal_line = calculate_ema(&macd_line, signal_period);

    let start = (slow_period + signal_period).saturating_sub(2);
    let macd: Vec<Option<f64>> = macd_line
        .iter()
        .enumerate()
        .map(|(i, &value)| (i >= start).then_some(value))
        .collect();
    let signal: Vec<Option<f64>> = signal_line
        .iter()
        .enumerate()
        .map(|(i, &value)| (i >= start).then_some(value))
        .collect();
    let delta1 = difference(&macd);
    let delta2 = difference(&delta1);

    MacdSeries {
        macd,
        signal,
        delta1,
        delta2,
    }
}

fn difference(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut diffs = vec![None; values.len()];
    for i in 1..values.len() {
        if let (Some(current), Some(previous)) = (values[i], values[i - 1]) {
            diffs[i] = Some(current - previous);
        }
    }
    diffs
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Wilder-smoothed RSI. The first `period` entries are `None`.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut rsi_values = vec![None; prices.len()];
    if period == 0 || prices.len() < period + 1 {
        return rsi_values;
    }

    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..=period {
        let delta = prices[i] - prices[i - 1];
        if delta >= 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let mut avg_gain = sum_gain / period as f64;
    let mut avg_loss = sum_loss / period as f64;
    rsi_values[period] = Some(rsi_from_avgs(avg_gain, avg_loss));

    for i in (period + 1)..prices.len() {
        let delta = prices[i] - prices[i - 1];
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        rsi_values[i] = Some(rsi_from_avgs(avg_gain, avg_loss));
    }

    rsi_values
}

/// Upper and lower bands from the rolling mean and population standard deviation.
pub fn calculate_bollinger_bands(
    prices: &[f64],
    period: usize,
    std_dev: f64,
) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let mut upper = vec![None; prices.len()];
    let mut lower = vec![None; prices.len()];
    if period == 0 || prices.len() < period {
        return (upper, lower);
    }

    for i in (period - 1)..prices.len() {
        let window = &prices[i + 1 - period..=i];
        let mean = window.iter().mean();
        let standard_deviation = window.iter().population_std_dev();
        upper[i] = Some(mean + std_dev * standard_deviation);
        lower[i] = Some(mean - std_dev * standard_deviation);
    }

    (upper, lower)
}

/// Percentage rate of change against the close `period` rows back.
pub fn calculate_roc(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut roc_values = vec![None; prices.len()];
    if period == 0 {
        return roc_values;
    }
    for i in period..prices.len() {
        let base = prices[i - period];
        if base != 0.0 {
            roc_values[i] = Some((prices[i] - base) / base * 100.0);
        }
    }
    roc_values
}
