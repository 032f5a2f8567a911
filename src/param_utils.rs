use std::collections::HashMap;

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

/// Extract a parameter as f64, clamped to a range with finite checks
pub fn get_param_f64_clamped(
    params: &HashMap<String, f64>,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> f64 {
    let raw = get_param_f64(params, key, default);
    if !raw.is_finite() {
        return default;
    }
    raw.clamp(min, max)
}

/// Parses `key=value` pairs separated by commas into a parameter map,
/// skipping entries whose value is not numeric.
pub fn parse_param_list(raw: &str) -> HashMap<String, f64> {
    raw.split(',')
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            let value = value.trim().parse::<f64>().ok()?;
            Some((key.trim().to_string(), value))
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}
