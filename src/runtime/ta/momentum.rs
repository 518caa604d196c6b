//! Momentum oscillators.

use super::moving::{ema, rma, sma};
use super::stats::{highest, lowest};
use super::{mean, rolling};
use crate::runtime::{Bars, Series, ops};

/// Wilder RSI. RSI = 100 - 100 / (1 + avg_gain / avg_loss); 100 when avg_loss is 0.
pub fn rsi(source: &Series, length: usize) -> Series {
    let change = ops::sub(source, source.shift(1));
    let gains = ops::apply(&change, |c| c.max(0.0));
    let losses = ops::apply(&change, |c| (-c).max(0.0));
    let avg_gain = rma(&gains, length);
    let avg_loss = rma(&losses, length);

    avg_gain.zip_with(&avg_loss, |gain, loss| {
        if loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + gain / loss)
        }
    })
}

/// Returns (macd line, signal line, histogram).
pub fn macd(source: &Series, fast: usize, slow: usize, signal: usize) -> (Series, Series, Series) {
    let line = ops::sub(ema(source, fast), ema(source, slow));
    let signal_line = ema(&line, signal);
    let histogram = ops::sub(&line, &signal_line);
    (line, signal_line, histogram)
}

/// Returns (%K, %D) where %D is the SMA of %K over `smooth_d` bars.
pub fn stoch(
    source: &Series,
    high: &Series,
    low: &Series,
    length: usize,
    smooth_d: usize,
) -> (Series, Series) {
    let hh = highest(high, length);
    let ll = lowest(low, length);
    let k = ops::mul(ops::div(ops::sub(source, &ll), ops::sub(&hh, &ll)), 100.0);
    let d = sma(&k, smooth_d);
    (k, d)
}

/// (source - sma) / (0.015 * mean deviation).
pub fn cci(source: &Series, length: usize) -> Series {
    rolling(source, length, |w| {
        let m = mean(w);
        let deviation = w.iter().map(|v| (v - m).abs()).sum::<f64>() / w.len() as f64;
        let last = *w.last()?;
        if deviation == 0.0 {
            None
        } else {
            Some((last - m) / (0.015 * deviation))
        }
    })
}

/// Money flow index over `source` (typically hlc3) weighted by volume.
pub fn mfi(bars: &Bars, source: &Series, length: usize) -> Series {
    let volume = bars.volume();
    let flow = ops::mul(source, &volume);
    let change = ops::sub(source, source.shift(1));
    let unavailable = ops::is_na(&change);
    let masked = |flows: Series| ops::select(&unavailable, Series::na(change.len()), flows);
    let positive = masked(ops::select(ops::gt(&change, 0.0), &flow, 0.0));
    let negative = masked(ops::select(ops::lt(&change, 0.0), &flow, 0.0));

    let up = rolling(&positive, length, |w| Some(w.iter().sum()));
    let down = rolling(&negative, length, |w| Some(w.iter().sum()));
    up.zip_with(&down, |u, d| {
        if d == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + u / d)
        }
    })
}

/// 100 * (source - source[n]) / source[n].
pub fn roc(source: &Series, length: usize) -> Series {
    let past = source.shift(length);
    ops::mul(ops::div(ops::sub(source, &past), &past), 100.0)
}

/// Williams %R over the bar highs and lows.
pub fn wpr(bars: &Bars, length: usize) -> Series {
    let hh = highest(&bars.high(), length);
    let ll = lowest(&bars.low(), length);
    ops::mul(
        ops::div(ops::sub(bars.close(), &hh), ops::sub(&hh, &ll)),
        100.0,
    )
}

/// source - source[n].
pub fn mom(source: &Series, length: usize) -> Series {
    ops::sub(source, source.shift(length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::{ohlc_bars, series};
    use approx::assert_relative_eq;

    #[test]
    fn rsi_all_gains_is_100() {
        let s = rsi(&series(&[1.0, 2.0, 3.0, 4.0, 5.0]), 3);
        assert_eq!(s.get(2), None);
        assert_relative_eq!(s.get(3).unwrap(), 100.0);
        assert_relative_eq!(s.get(4).unwrap(), 100.0);
    }

    #[test]
    fn rsi_balanced_moves_is_50() {
        let s = rsi(&series(&[10.0, 11.0, 10.0, 11.0, 10.0]), 2);
        // first average over changes +1, -1
        assert_relative_eq!(s.get(2).unwrap(), 50.0);
    }

    #[test]
    fn rsi_wilder_smoothing() {
        let s = rsi(&series(&[10.0, 12.0, 11.0, 13.0]), 2);
        // seed: gain (2+0)/2 = 1, loss (0+1)/2 = 0.5
        // next: gain (1*1 + 2)/2 = 1.5, loss (0.5*1 + 0)/2 = 0.25
        let expected = 100.0 - 100.0 / (1.0 + 1.5 / 0.25);
        assert_relative_eq!(s.get(3).unwrap(), expected);
    }

    #[test]
    fn macd_histogram_is_line_minus_signal() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let (line, signal, hist) = macd(&series(&prices), 12, 26, 9);
        let last = prices.len() - 1;
        assert_eq!(line.get(24), None);
        assert!(line.get(25).is_some());
        assert_eq!(signal.get(32), None);
        assert!(signal.get(33).is_some());
        assert_relative_eq!(
            hist.get(last).unwrap(),
            line.get(last).unwrap() - signal.get(last).unwrap()
        );
    }

    #[test]
    fn stoch_position_within_range() {
        let bars = ohlc_bars(&[
            (5.0, 10.0, 0.0, 5.0, 1.0),
            (5.0, 10.0, 0.0, 7.5, 1.0),
            (5.0, 10.0, 0.0, 10.0, 1.0),
        ]);
        let (k, d) = stoch(&bars.close(), &bars.high(), &bars.low(), 2, 2);
        assert_eq!(k.get(0), None);
        assert_relative_eq!(k.get(1).unwrap(), 75.0);
        assert_relative_eq!(k.get(2).unwrap(), 100.0);
        assert_relative_eq!(d.get(2).unwrap(), 87.5);
    }

    #[test]
    fn stoch_flat_range_is_unavailable() {
        let bars = ohlc_bars(&[(1.0, 1.0, 1.0, 1.0, 1.0); 3]);
        let (k, _) = stoch(&bars.close(), &bars.high(), &bars.low(), 2, 1);
        assert_eq!(k.get(2), None);
    }

    #[test]
    fn roc_and_mom() {
        let s = series(&[100.0, 110.0, 121.0]);
        assert_relative_eq!(roc(&s, 1).get(2).unwrap(), 10.0);
        assert_relative_eq!(mom(&s, 2).get(2).unwrap(), 21.0);
        assert_eq!(mom(&s, 2).get(1), None);
    }

    #[test]
    fn cci_of_linear_ramp() {
        let s = cci(&series(&[1.0, 2.0, 3.0]), 3);
        // mean 2, mean deviation 2/3
        assert_relative_eq!(s.get(2).unwrap(), 1.0 / (0.015 * (2.0 / 3.0)));
    }

    #[test]
    fn wpr_at_high_is_zero() {
        let bars = ohlc_bars(&[(1.0, 2.0, 0.0, 1.0, 1.0), (1.0, 4.0, 1.0, 4.0, 1.0)]);
        assert_relative_eq!(wpr(&bars, 2).get(1).unwrap(), 0.0);
    }

    #[test]
    fn mfi_rising_prices_is_100() {
        let bars = ohlc_bars(&[
            (1.0, 1.0, 1.0, 1.0, 10.0),
            (2.0, 2.0, 2.0, 2.0, 10.0),
            (3.0, 3.0, 3.0, 3.0, 10.0),
        ]);
        let s = mfi(&bars, &bars.hlc3(), 2);
        assert_eq!(s.get(1), None);
        assert_relative_eq!(s.get(2).unwrap(), 100.0);
    }
}
