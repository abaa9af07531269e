use statrs::statistics::Statistics;
use std::collections::VecDeque;

/// Bounded FIFO of recent observations. Once full, every push evicts the
/// oldest value, so `len()` never exceeds the capacity given to `new`.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::new(),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.values.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &f64> + ExactSizeIterator {
        self.values.iter()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    pub fn max(&self) -> Option<f64> {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.max(v))))
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().mean())
    }

    pub fn population_std_dev(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().population_std_dev())
    }

    /// Relative change between the mean of the newer half and the mean of
    /// the older half, scaled by the newer half.
    pub fn half_split_trend(&self) -> Option<f64> {
        half_split_trend(self.to_vec())
    }
}

pub fn half_split_trend(values: impl AsRef<[f64]>) -> Option<f64> {
    let values = values.as_ref();
    if values.len() < 2 {
        return None;
    }
    let mid = values.len() / 2;
    let older = values[..mid].iter().mean();
    let newer = values[mid..].iter().mean();
    if newer == 0.0 || !newer.is_finite() || !older.is_finite() {
        return None;
    }
    Some((newer - older) / newer)
}

/// EMA-style decaying weights: `w[0] = beta`, `w[i] = (1 - beta) * w[i - 1]`.
pub fn exponential_weights(beta: f64, length: usize) -> Vec<f64> {
    let mut weights = Vec::with_capacity(length);
    if length == 0 {
        return weights;
    }
    weights.push(beta);
    for i in 1..length {
        weights.push((1.0 - beta) * weights[i - 1]);
    }
    weights
}

pub fn uniform_weights(length: usize) -> Vec<f64> {
    if length == 0 {
        return Vec::new();
    }
    vec![1.0 / length as f64; length]
}

/// Weighted mean of the `count` most recent values of `window`, where
/// `weights[0]` applies to the newest value. Weights are normalised over the
/// values actually used.
pub fn weighted_recent_average(window: &RollingWindow, weights: &[f64], count: usize) -> Option<f64> {
    let count = count.min(window.len()).min(weights.len());
    if count == 0 {
        return None;
    }

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (value, weight) in window.iter().rev().take(count).zip(weights.iter()) {
        weighted_sum += value * weight;
        weight_total += weight;
    }

    if weight_total.abs() < f64::EPSILON {
        return None;
    }
    Some(weighted_sum / weight_total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn window_evicts_oldest_once_full() {
        let mut window = RollingWindow::new(3);
        for value in [1.0, 2.0, 3.0, 4.0] {
            window.push(value);
        }
        assert!(window.is_full());
        assert_eq!(window.to_vec(), vec![2.0, 3.0, 4.0]);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn constant_window_has_zero_std() {
        let mut window = RollingWindow::new(4);
        for _ in 0..4 {
            window.push(7.5);
        }
        assert!(approx(window.mean().unwrap(), 7.5));
        assert!(approx(window.population_std_dev().unwrap(), 0.0));
    }

    #[test]
    fn population_std_matches_hand_computation() {
        let mut window = RollingWindow::new(4);
        for value in [2.0, 4.0, 4.0, 6.0] {
            window.push(value);
        }
        // mean 4, squared deviations 4 + 0 + 0 + 4 over 4
        assert!(approx(window.population_std_dev().unwrap(), 2.0_f64.sqrt()));
    }

    #[test]
    fn half_split_trend_is_relative_to_newer_half() {
        let trend = half_split_trend([10.0, 10.0, 20.0, 20.0]).unwrap();
        assert!(approx(trend, 0.5));
        assert!(half_split_trend([1.0]).is_none());
    }

    #[test]
    fn exponential_weights_decay_geometrically() {
        let weights = exponential_weights(0.5, 4);
        assert_eq!(weights, vec![0.5, 0.25, 0.125, 0.0625]);
    }

    #[test]
    fn weighted_average_favours_newest_value() {
        let mut window = RollingWindow::new(3);
        for value in [1.0, 1.0, 4.0] {
            window.push(value);
        }
        let weights = exponential_weights(0.5, 3);
        let average = weighted_recent_average(&window, &weights, 3).unwrap();
        // (4 * 0.5 + 1 * 0.25 + 1 * 0.125) / 0.875
        assert!(approx(average, 2.375 / 0.875));

        let uniform = weighted_recent_average(&window, &uniform_weights(2), 2).unwrap();
        assert!(approx(uniform, 2.5));
    }
}
