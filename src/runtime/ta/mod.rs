//! Indicator library.
//!
//! Window indicators (`sma`, `stdev`, `highest`, ...) are unavailable until a
//! full window of available values exists and whenever the window contains an
//! unavailable value. Recursive smoothers (`ema`, `rma` and everything built on
//! them) are seeded with the simple mean of their first full window, then skip
//! unavailable inputs without resetting.

mod cross;
mod momentum;
mod moving;
mod stats;
mod trend;
mod volatility;
mod volume;

pub use cross::{cross, crossover, crossunder};
pub use momentum::{cci, macd, mfi, mom, roc, rsi, stoch, wpr};
pub use moving::{alma, dema, ema, hma, rma, sma, tema, vwma, wma};
pub use stats::{
    change, correlation, covariance, cum, highest, lowest, median, mode, percentrank,
};
pub use trend::{adx, dmi, pivothigh, pivotlow, sar, supertrend};
pub use volatility::{atr, bb, kc, range, stdev, tr, variance};
pub use volume::{accdist, obv, vwap};

use crate::runtime::Series;

/// Apply `f` to each full window of `length` values ending at every bar.
fn rolling(source: &Series, length: usize, f: impl Fn(&[f64]) -> Option<f64>) -> Series {
    let values = source.values();
    let mut window = Vec::with_capacity(length);
    (0..values.len())
        .map(|i| {
            if length == 0 || i + 1 < length {
                return None;
            }
            window.clear();
            for v in &values[i + 1 - length..=i] {
                window.push((*v)?);
            }
            f(&window)
        })
        .collect()
}

/// Like [`rolling`] over two aligned series.
fn rolling_pair(
    a: &Series,
    b: &Series,
    length: usize,
    f: impl Fn(&[f64], &[f64]) -> Option<f64>,
) -> Series {
    let len = a.len().min(b.len());
    let mut xs = Vec::with_capacity(length);
    let mut ys = Vec::with_capacity(length);
    (0..len)
        .map(|i| {
            if length == 0 || i + 1 < length {
                return None;
            }
            xs.clear();
            ys.clear();
            for j in i + 1 - length..=i {
                xs.push(a.get(j)?);
                ys.push(b.get(j)?);
            }
            f(&xs, &ys)
        })
        .collect()
}

/// Exponential smoothing with factor `alpha`, seeded by the first full-window mean.
fn smooth(source: &Series, length: usize, alpha: f64) -> Series {
    let mut state: Option<f64> = None;
    let mut seed: Vec<f64> = Vec::with_capacity(length);

    source
        .iter()
        .map(|value| {
            if length == 0 {
                return None;
            }
            let v = value?;
            match state {
                Some(prev) => {
                    let next = alpha * v + (1.0 - alpha) * prev;
                    state = Some(next);
                    state
                }
                None => {
                    seed.push(v);
                    if seed.len() == length {
                        state = Some(mean(&seed));
                    }
                    state
                }
            }
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
fn population_variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::series;

    #[test]
    fn rolling_requires_full_available_window() {
        let s = Series::new(vec![Some(1.0), Some(2.0), None, Some(4.0), Some(5.0), Some(6.0)]);
        let sums = rolling(&s, 2, |w| Some(w.iter().sum()));
        assert_eq!(
            sums.values(),
            &[None, Some(3.0), None, None, Some(9.0), Some(11.0)]
        );
    }

    #[test]
    fn rolling_zero_length_is_unavailable() {
        let s = series(&[1.0, 2.0]);
        assert_eq!(rolling(&s, 0, |w| Some(w[0])), Series::na(2));
    }

    #[test]
    fn smooth_seeds_after_leading_gaps() {
        let s = Series::new(vec![None, Some(2.0), Some(4.0), Some(6.0)]);
        let out = smooth(&s, 2, 0.5);
        assert_eq!(out.values(), &[None, None, Some(3.0), Some(4.5)]);
    }
}
