use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;

/// Longest rolling window a strategy may ask for. Windows are allocated when
/// the first observation arrives, so the bound is enforced at construction.
pub const MAX_WINDOW_LENGTH: usize = 1_000_000;

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

/// Extract a parameter as usize with a default value (rounded, negatives clamp to zero)
pub fn get_param_usize(params: &HashMap<String, f64>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v.round().max(0.0) as usize)
        .unwrap_or(default)
}

/// Binary flags are encoded as numbers; anything >= 0.5 is on.
pub fn get_param_flag(params: &HashMap<String, f64>, key: &str, default: bool) -> bool {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v >= 0.5)
        .unwrap_or(default)
}

/// Window-length parameter within `[1, MAX_WINDOW_LENGTH]`.
pub fn require_window(params: &HashMap<String, f64>, key: &str, default: usize) -> EngineResult<usize> {
    if let Some(raw) = params.get(key) {
        if !raw.is_finite() || *raw < 0.0 {
            return Err(EngineError::config(format!(
                "{} must be a non-negative number (value: {})",
                key, raw
            )));
        }
    }
    let value = get_param_usize(params, key, default);
    if value == 0 {
        return Err(EngineError::config(format!("{} must be at least 1", key)));
    }
    check_window_length(key, value)
}

pub fn check_window_length(key: &str, value: usize) -> EngineResult<usize> {
    if value > MAX_WINDOW_LENGTH {
        return Err(EngineError::config(format!(
            "{} must be at most {} (value: {})",
            key, MAX_WINDOW_LENGTH, value
        )));
    }
    Ok(value)
}

/// Finite f64 parameter within `[min, max]`.
pub fn require_f64_in_range(
    params: &HashMap<String, f64>,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> EngineResult<f64> {
    let value = get_param_f64(params, key, default);
    if !value.is_finite() || value < min || value > max {
        return Err(EngineError::config(format!(
            "{} must be within [{}, {}] (value: {})",
            key, min, max, value
        )));
    }
    Ok(value)
}

/// Parses `key=value` pairs as given on the command line.
pub fn parse_parameter_pairs(pairs: &[String]) -> EngineResult<HashMap<String, f64>> {
    let mut parameters = HashMap::new();
    for pair in pairs {
        let (key, raw) = pair.split_once('=').ok_or_else(|| {
            EngineError::config(format!("parameter '{}' must be written as key=value", pair))
        })?;
        let value = raw.trim().parse::<f64>().map_err(|_| {
            EngineError::config(format!("parameter {} must be a number (value: {})", key, raw))
        })?;
        parameters.insert(key.trim().to_string(), value);
    }
    Ok(parameters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_window_is_rejected() {
        let mut params = HashMap::new();
        params.insert("avgRange".to_string(), 0.0);
        assert!(require_window(&params, "avgRange", 10).is_err());
        assert_eq!(require_window(&HashMap::new(), "avgRange", 10).unwrap(), 10);
    }

    #[test]
    fn oversized_window_is_rejected() {
        let mut params = HashMap::new();
        params.insert("windowSize".to_string(), 1e11);
        assert!(matches!(
            require_window(&params, "windowSize", 32),
            Err(EngineError::Configuration(_))
        ));
        params.insert("windowSize".to_string(), MAX_WINDOW_LENGTH as f64);
        assert_eq!(require_window(&params, "windowSize", 32).unwrap(), MAX_WINDOW_LENGTH);
    }

    #[test]
    fn range_check_rejects_non_finite() {
        let mut params = HashMap::new();
        params.insert("beta".to_string(), f64::NAN);
        assert!(require_f64_in_range(&params, "beta", 0.9, 0.0, 1.0).is_err());
    }

    #[test]
    fn parses_cli_pairs() {
        let pairs = vec!["fastPeriod=12".to_string(), "beta = 0.8".to_string()];
        let params = parse_parameter_pairs(&pairs).unwrap();
        assert_eq!(params.get("fastPeriod"), Some(&12.0));
        assert_eq!(params.get("beta"), Some(&0.8));
        assert!(parse_parameter_pairs(&["oops".to_string()]).is_err());
    }
}
