//! Periodized discrete wavelet transform used to denoise price windows.
//!
//! Decomposition follows the usual multi-resolution layout: the first entry
//! holds the coarsest approximation, the rest hold detail coefficients from
//! coarsest to finest. Odd-length inputs at any level are padded by repeating
//! the last sample and truncated again on reconstruction.

use crate::error::{EngineError, EngineResult};
use std::f64::consts::SQRT_2;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveletBasis {
    Haar,
    Db2,
    Db4,
}

impl WaveletBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaveletBasis::Haar => "haar",
            WaveletBasis::Db2 => "db2",
            WaveletBasis::Db4 => "db4",
        }
    }

    /// Orthonormal scaling (low-pass) filter; taps sum to sqrt(2).
    pub fn scaling_filter(&self) -> Vec<f64> {
        match self {
            WaveletBasis::Haar => vec![1.0 / SQRT_2, 1.0 / SQRT_2],
            WaveletBasis::Db2 => {
                let s3 = 3.0_f64.sqrt();
                let norm = 4.0 * SQRT_2;
                vec![
                    (1.0 + s3) / norm,
                    (3.0 + s3) / norm,
                    (3.0 - s3) / norm,
                    (1.0 - s3) / norm,
                ]
            }
            WaveletBasis::Db4 => vec![
                0.230_377_813_308_896_4,
                0.714_846_570_552_915_4,
                0.630_880_767_929_858_7,
                -0.027_983_769_416_859_9,
                -0.187_034_811_719_093_1,
                0.030_841_381_835_560_7,
                0.032_883_011_666_885_2,
                -0.010_597_401_785_069_0,
            ],
        }
    }

    /// Quadrature mirror of the scaling filter.
    pub fn wavelet_filter(&self) -> Vec<f64> {
        let h = self.scaling_filter();
        let len = h.len();
        (0..len)
            .map(|n| {
                let sign = if n % 2 == 0 { 1.0 } else { -1.0 };
                sign * h[len - 1 - n]
            })
            .collect()
    }

    pub fn filter_len(&self) -> usize {
        self.scaling_filter().len()
    }
}

impl FromStr for WaveletBasis {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "haar" | "db1" => Ok(WaveletBasis::Haar),
            "db2" => Ok(WaveletBasis::Db2),
            "db4" => Ok(WaveletBasis::Db4),
            other => Err(EngineError::config(format!(
                "unsupported wavelet basis '{}' (expected haar, db2 or db4)",
                other
            ))),
        }
    }
}

/// Coefficients of a multi-level decomposition plus the signal length at
/// each level, needed to undo odd-length padding.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub approximation: Vec<f64>,
    /// Coarsest level first.
    pub details: Vec<Vec<f64>>,
    lengths: Vec<usize>,
}

/// Deepest useful level: `floor(log2(n / (filter_len - 1)))`.
pub fn max_level(signal_len: usize, filter_len: usize) -> usize {
    if filter_len < 2 || signal_len < filter_len - 1 {
        return 0;
    }
    let ratio = signal_len / (filter_len - 1);
    if ratio == 0 {
        0
    } else {
        (usize::BITS - 1 - ratio.leading_zeros()) as usize
    }
}

fn pad_even(signal: &[f64]) -> Vec<f64> {
    let mut padded = signal.to_vec();
    if padded.len() % 2 == 1 {
        if let Some(&last) = padded.last() {
            padded.push(last);
        }
    }
    padded
}

fn analyze(signal: &[f64], low: &[f64], high: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let x = pad_even(signal);
    let n = x.len();
    let half = n / 2;
    let mut approx = vec![0.0; half];
    let mut detail = vec![0.0; half];
    for k in 0..half {
        for (tap, (&h, &g)) in low.iter().zip(high.iter()).enumerate() {
            let sample = x[(2 * k + tap) % n];
            approx[k] += h * sample;
            detail[k] += g * sample;
        }
    }
    (approx, detail)
}

fn synthesize(approx: &[f64], detail: &[f64], low: &[f64], high: &[f64], out_len: usize) -> Vec<f64> {
    let n = approx.len() * 2;
    let mut x = vec![0.0; n];
    for k in 0..approx.len() {
        for (tap, (&h, &g)) in low.iter().zip(high.iter()).enumerate() {
            x[(2 * k + tap) % n] += h * approx[k] + g * detail[k];
        }
    }
    x.truncate(out_len);
    x
}

pub fn wavedec(signal: &[f64], basis: WaveletBasis, level: Option<usize>) -> Decomposition {
    let low = basis.scaling_filter();
    let high = basis.wavelet_filter();
    let level = level.unwrap_or_else(|| max_level(signal.len(), low.len()));

    let mut approximation = signal.to_vec();
    let mut details = Vec::with_capacity(level);
    let mut lengths = Vec::with_capacity(level);
    for _ in 0..level {
        if approximation.len() < 2 {
            break;
        }
        lengths.push(approximation.len());
        let (a, d) = analyze(&approximation, &low, &high);
        approximation = a;
        details.push(d);
    }
    details.reverse();
    lengths.reverse();

    Decomposition {
        approximation,
        details,
        lengths,
    }
}

pub fn waverec(decomposition: &Decomposition, basis: WaveletBasis) -> Vec<f64> {
    let low = basis.scaling_filter();
    let high = basis.wavelet_filter();
    let mut signal = decomposition.approximation.clone();
    for (detail, &length) in decomposition.details.iter().zip(decomposition.lengths.iter()) {
        signal = synthesize(&signal, detail, &low, &high, length);
    }
    signal
}

pub fn soft_threshold(value: f64, threshold: f64) -> f64 {
    let magnitude = value.abs() - threshold;
    if magnitude <= 0.0 {
        0.0
    } else {
        value.signum() * magnitude
    }
}

/// Decomposes `signal`, soft-thresholds every detail band at
/// `threshold_ratio * max(signal)` and reconstructs a series of the same
/// length.
pub fn lowpass_filter(
    signal: &[f64],
    threshold_ratio: f64,
    basis: WaveletBasis,
) -> EngineResult<Vec<f64>> {
    if signal.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::Configuration(
            "wavelet filter input contains non-finite values".to_string(),
        ));
    }
    let peak = signal.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !peak.is_finite() {
        return Ok(Vec::new());
    }
    let threshold = (threshold_ratio * peak).abs();

    let mut decomposition = wavedec(signal, basis, None);
    for band in decomposition.details.iter_mut() {
        for coefficient in band.iter_mut() {
            *coefficient = soft_threshold(*coefficient, threshold);
        }
    }
    Ok(waverec(&decomposition, basis))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f64], b: &[f64], eps: f64) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < eps, "{} vs {}", x, y);
        }
    }

    #[test]
    fn filters_are_normalised() {
        for basis in [WaveletBasis::Haar, WaveletBasis::Db2, WaveletBasis::Db4] {
            let h = basis.scaling_filter();
            let sum: f64 = h.iter().sum();
            let energy: f64 = h.iter().map(|v| v * v).sum();
            assert!((sum - SQRT_2).abs() < 1e-9, "{:?} sum {}", basis, sum);
            assert!((energy - 1.0).abs() < 1e-9, "{:?} energy {}", basis, energy);
            let g_sum: f64 = basis.wavelet_filter().iter().sum();
            assert!(g_sum.abs() < 1e-9);
        }
    }

    #[test]
    fn reconstruction_is_exact_without_thresholding() {
        let signal: Vec<f64> = (0..32)
            .map(|i| 100.0 + (i as f64 / 3.0).sin() * 4.0 + i as f64 * 0.1)
            .collect();
        for basis in [WaveletBasis::Haar, WaveletBasis::Db2, WaveletBasis::Db4] {
            let decomposition = wavedec(&signal, basis, None);
            assert_close(&waverec(&decomposition, basis), &signal, 1e-8);
        }
    }

    #[test]
    fn odd_lengths_round_trip() {
        let signal = vec![3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0, 5.0, 3.0, 5.0];
        let decomposition = wavedec(&signal, WaveletBasis::Haar, Some(2));
        assert_close(&waverec(&decomposition, WaveletBasis::Haar), &signal, 1e-9);
    }

    #[test]
    fn max_level_matches_filter_support() {
        assert_eq!(max_level(32, 8), 2);
        assert_eq!(max_level(32, 2), 5);
        assert_eq!(max_level(4, 8), 0);
    }

    #[test]
    fn lowpass_keeps_constant_series() {
        let signal = vec![50.0; 16];
        let filtered = lowpass_filter(&signal, 0.63, WaveletBasis::Db4).unwrap();
        assert_close(&filtered, &signal, 1e-8);
    }

    #[test]
    fn lowpass_removes_alternating_noise() {
        let signal: Vec<f64> = (0..16)
            .map(|i| 10.0 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let filtered = lowpass_filter(&signal, 0.1, WaveletBasis::Haar).unwrap();
        for value in filtered {
            assert!((value - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn soft_threshold_shrinks_toward_zero() {
        assert_eq!(soft_threshold(5.0, 2.0), 3.0);
        assert_eq!(soft_threshold(-5.0, 2.0), -3.0);
        assert_eq!(soft_threshold(1.5, 2.0), 0.0);
    }

    #[test]
    fn unknown_basis_is_a_configuration_error() {
        assert!(matches!(
            "sym8".parse::<WaveletBasis>(),
            Err(EngineError::Configuration(_))
        ));
    }
}
