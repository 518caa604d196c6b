//! Volatility measures and bands.

use super::moving::{ema, rma, sma};
use super::stats::{highest, lowest};
use super::{population_variance, rolling};
use crate::runtime::{Bars, Series, ops};

/// True range. Bar 0 has no previous close: high - low when `handle_na`,
/// otherwise unavailable.
pub fn tr(bars: &Bars, handle_na: bool) -> Series {
    let mut prev_close: Option<f64> = None;
    bars.iter()
        .map(|bar| {
            let value = match prev_close {
                Some(pc) => Some(bar.true_range(pc)),
                None if handle_na => Some(bar.high - bar.low),
                None => None,
            };
            prev_close = Some(bar.close);
            value
        })
        .collect()
}

/// Wilder-smoothed true range, seeded with the mean of the first `length` ranges.
pub fn atr(bars: &Bars, length: usize) -> Series {
    rma(&tr(bars, true), length)
}

/// Returns (basis, upper, lower) with population standard deviation.
pub fn bb(source: &Series, length: usize, mult: f64) -> (Series, Series, Series) {
    let basis = sma(source, length);
    let dev = ops::mul(stdev(source, length), mult);
    let upper = ops::add(&basis, &dev);
    let lower = ops::sub(&basis, &dev);
    (basis, upper, lower)
}

/// Keltner channel: (basis, upper, lower) around an EMA of the source.
pub fn kc(
    bars: &Bars,
    source: &Series,
    length: usize,
    mult: f64,
    use_true_range: bool,
) -> (Series, Series, Series) {
    let basis = ema(source, length);
    let span = if use_true_range {
        tr(bars, true)
    } else {
        ops::sub(bars.high(), bars.low())
    };
    let band = ops::mul(ema(&span, length), mult);
    let upper = ops::add(&basis, &band);
    let lower = ops::sub(&basis, &band);
    (basis, upper, lower)
}

/// Population standard deviation.
pub fn stdev(source: &Series, length: usize) -> Series {
    rolling(source, length, |w| Some(population_variance(w).sqrt()))
}

pub fn variance(source: &Series, length: usize) -> Series {
    rolling(source, length, |w| Some(population_variance(w)))
}

/// highest - lowest over the window.
pub fn range(source: &Series, length: usize) -> Series {
    ops::sub(highest(source, length), lowest(source, length))
}
