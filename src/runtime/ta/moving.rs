//! Moving averages.

use super::{mean, rolling, smooth};
use crate::runtime::{Bars, Series, ops};

pub fn sma(source: &Series, length: usize) -> Series {
    rolling(source, length, |w| Some(mean(w)))
}

/// k = 2/(n+1), seeded with the first SMA.
pub fn ema(source: &Series, length: usize) -> Series {
    smooth(source, length, 2.0 / (length as f64 + 1.0))
}

/// Wilder's running average, alpha = 1/n.
pub fn rma(source: &Series, length: usize) -> Series {
    smooth(source, length, 1.0 / length.max(1) as f64)
}

/// Linearly weighted, newest bar weight n.
pub fn wma(source: &Series, length: usize) -> Series {
    let denom = (length * (length + 1)) as f64 / 2.0;
    rolling(source, length, |w| {
        let weighted: f64 = w
            .iter()
            .enumerate()
            .map(|(j, v)| v * (j + 1) as f64)
            .sum();
        Some(weighted / denom)
    })
}

pub fn vwma(bars: &Bars, source: &Series, length: usize) -> Series {
    let volume = bars.volume();
    ops::div(sma(&ops::mul(source, &volume), length), sma(&volume, length))
}

/// Hull: wma(2*wma(n/2) - wma(n), sqrt(n)).
pub fn hma(source: &Series, length: usize) -> Series {
    let half = wma(source, length / 2);
    let full = wma(source, length);
    let raw = ops::sub(ops::mul(&half, 2.0), &full);
    wma(&raw, (length as f64).sqrt().floor() as usize)
}

/// Arnaud Legoux: Gaussian weights centred at `offset * (n - 1)`.
pub fn alma(source: &Series, length: usize, offset: f64, sigma: f64) -> Series {
    let m = offset * (length as f64 - 1.0);
    let s = length as f64 / sigma;
    let weights: Vec<f64> = (0..length)
        .map(|i| (-((i as f64 - m).powi(2)) / (2.0 * s * s)).exp())
        .collect();
    let norm: f64 = weights.iter().sum();
    rolling(source, length, |w| {
        let sum: f64 = w.iter().zip(&weights).map(|(v, wt)| v * wt).sum();
        Some(sum / norm)
    })
}

pub fn dema(source: &Series, length: usize) -> Series {
    let e1 = ema(source, length);
    let e2 = ema(&e1, length);
    ops::sub(ops::mul(&e1, 2.0), &e2)
}

pub fn tema(source: &Series, length: usize) -> Series {
    let e1 = ema(source, length);
    let e2 = ema(&e1, length);
    let e3 = ema(&e2, length);
    ops::add(ops::sub(ops::mul(&e1, 3.0), ops::mul(&e2, 3.0)), &e3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::{ohlc_bars, series};
    use approx::assert_relative_eq;

    #[test]
    fn sma_warmup_and_values() {
        let s = sma(&series(&[10.0, 20.0, 30.0, 40.0]), 3);
        assert_eq!(s.get(0), None);
        assert_eq!(s.get(1), None);
        assert_relative_eq!(s.get(2).unwrap(), 20.0);
        assert_relative_eq!(s.get(3).unwrap(), 30.0);
    }

    #[test]
    fn ema_seed_is_sma() {
        let s = ema(&series(&[10.0, 20.0, 30.0, 40.0, 50.0]), 3);
        let k = 2.0 / 4.0;
        let seed = 20.0;
        assert_eq!(s.get(1), None);
        assert_relative_eq!(s.get(2).unwrap(), seed);
        let next = 40.0 * k + seed * (1.0 - k);
        assert_relative_eq!(s.get(3).unwrap(), next);
        assert_relative_eq!(s.get(4).unwrap(), 50.0 * k + next * (1.0 - k));
    }

    #[test]
    fn ema_period_zero_is_unavailable() {
        assert_eq!(ema(&series(&[1.0, 2.0]), 0), Series::na(2));
    }

    #[test]
    fn rma_uses_wilder_factor() {
        let s = rma(&series(&[2.0, 4.0, 8.0]), 2);
        assert_relative_eq!(s.get(1).unwrap(), 3.0);
        assert_relative_eq!(s.get(2).unwrap(), (3.0 + 8.0) / 2.0);
    }

    #[test]
    fn wma_weights_recent_bars() {
        let s = wma(&series(&[1.0, 2.0, 3.0]), 3);
        // (1*1 + 2*2 + 3*3) / 6
        assert_relative_eq!(s.get(2).unwrap(), 14.0 / 6.0);
    }

    #[test]
    fn vwma_weights_by_volume() {
        let bars = ohlc_bars(&[(1.0, 1.0, 1.0, 1.0, 1.0), (3.0, 3.0, 3.0, 3.0, 3.0)]);
        let s = vwma(&bars, &bars.close(), 2);
        // (1*1 + 3*3) / (1 + 3)
        assert_relative_eq!(s.get(1).unwrap(), 2.5);
    }

    #[test]
    fn constant_input_is_fixed_point() {
        let flat = series(&[5.0; 30]);
        for out in [
            hma(&flat, 9),
            alma(&flat, 9, 0.85, 6.0),
            dema(&flat, 5),
            tema(&flat, 5),
        ] {
            assert_relative_eq!(out.last().unwrap(), 5.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn alma_centre_weight_is_largest() {
        let s = alma(&series(&[0.0, 0.0, 10.0, 0.0, 0.0]), 5, 0.5, 6.0);
        let v = s.get(4).unwrap();
        assert!(v > 2.0 && v < 10.0);
    }
}
