//! Directional movement, pivots and trend-following stops.

use super::moving::rma;
use super::volatility::{atr, tr};
use crate::runtime::{Bars, Series, ops};

/// Returns (+DI, -DI, ADX).
pub fn dmi(bars: &Bars, di_length: usize, adx_smoothing: usize) -> (Series, Series, Series) {
    let high = bars.high();
    let low = bars.low();
    let up = ops::sub(&high, high.shift(1));
    let down = ops::sub(low.shift(1), &low);

    let plus_dm = up.zip_with(&down, |u, d| if u > d && u > 0.0 { u } else { 0.0 });
    let minus_dm = up.zip_with(&down, |u, d| if d > u && d > 0.0 { d } else { 0.0 });

    let range = rma(&tr(bars, true), di_length);
    let plus = ops::mul(ops::div(rma(&plus_dm, di_length), &range), 100.0);
    let minus = ops::mul(ops::div(rma(&minus_dm, di_length), &range), 100.0);

    let spread = plus.zip_with(&minus, |p, m| {
        let sum = p + m;
        (p - m).abs() / if sum == 0.0 { 1.0 } else { sum }
    });
    let adx = ops::mul(rma(&spread, adx_smoothing), 100.0);
    (plus, minus, adx)
}

pub fn adx(bars: &Bars, di_length: usize, adx_smoothing: usize) -> Series {
    dmi(bars, di_length, adx_smoothing).2
}

/// Value of `source` at a confirmed pivot high, reported `right` bars later.
pub fn pivothigh(source: &Series, left: usize, right: usize) -> Series {
    pivot(source, left, right, |candidate, other| candidate > other)
}

pub fn pivotlow(source: &Series, left: usize, right: usize) -> Series {
    pivot(source, left, right, |candidate, other| candidate < other)
}

fn pivot(source: &Series, left: usize, right: usize, beats: impl Fn(f64, f64) -> bool) -> Series {
    (0..source.len())
        .map(|i| {
            let p = i.checked_sub(right)?;
            let start = p.checked_sub(left)?;
            let candidate = source.get(p)?;
            for j in start..=i {
                if j != p && !beats(candidate, source.get(j)?) {
                    return None;
                }
            }
            Some(candidate)
        })
        .collect()
}

/// Returns (supertrend line, direction) where direction is -1 in an uptrend
/// and 1 in a downtrend.
pub fn supertrend(bars: &Bars, factor: f64, atr_period: usize) -> (Series, Series) {
    let atr = atr(bars, atr_period);
    let hl2 = bars.hl2();
    let mut line = Vec::with_capacity(bars.len());
    let mut direction = Vec::with_capacity(bars.len());

    let mut prev_upper: Option<f64> = None;
    let mut prev_lower: Option<f64> = None;
    let mut prev_line: Option<f64> = None;
    let mut prev_close: Option<f64> = None;

    for (i, bar) in bars.iter().enumerate() {
        let (Some(a), Some(mid)) = (atr.get(i), hl2.get(i)) else {
            line.push(None);
            direction.push(None);
            prev_close = Some(bar.close);
            continue;
        };

        let mut upper = mid + factor * a;
        let mut lower = mid - factor * a;
        if let (Some(pl), Some(pc)) = (prev_lower, prev_close) {
            if !(lower > pl || pc < pl) {
                lower = pl;
            }
        }
        if let (Some(pu), Some(pc)) = (prev_upper, prev_close) {
            if !(upper < pu || pc > pu) {
                upper = pu;
            }
        }

        let dir = match (prev_line, prev_upper) {
            (None, _) => 1.0,
            (Some(pl), Some(pu)) if pl == pu => {
                if bar.close > upper {
                    -1.0
                } else {
                    1.0
                }
            }
            _ => {
                if bar.close < lower {
                    1.0
                } else {
                    -1.0
                }
            }
        };
        let value = if dir < 0.0 { lower } else { upper };

        line.push(Some(value));
        direction.push(Some(dir));
        prev_upper = Some(upper);
        prev_lower = Some(lower);
        prev_line = Some(value);
        prev_close = Some(bar.close);
    }

    (Series::new(line), Series::new(direction))
}

/// Parabolic stop and reverse.
pub fn sar(bars: &Bars, start: f64, increment: f64, maximum: f64) -> Series {
    let n = bars.len();
    let mut out = vec![None; n];
    let (Some(first), Some(second)) = (bars.get(0), bars.get(1)) else {
        return Series::new(out);
    };

    let mut long = second.close >= first.close;
    let mut sar = if long { first.low } else { first.high };
    let mut extreme = if long { second.high } else { second.low };
    let mut af = start;
    out[1] = Some(sar);

    for i in 2..n {
        let (Some(bar), Some(prev), Some(prev2)) = (bars.get(i), bars.get(i - 1), bars.get(i - 2))
        else {
            break;
        };
        sar += af * (extreme - sar);

        if long {
            sar = sar.min(prev.low).min(prev2.low);
            if bar.low < sar {
                long = false;
                sar = extreme;
                extreme = bar.low;
                af = start;
            } else if bar.high > extreme {
                extreme = bar.high;
                af = (af + increment).min(maximum);
            }
        } else {
            sar = sar.max(prev.high).max(prev2.high);
            if bar.high > sar {
                long = true;
                sar = extreme;
                extreme = bar.high;
                af = start;
            } else if bar.low < extreme {
                extreme = bar.low;
                af = (af + increment).min(maximum);
            }
        }
        out[i] = Some(sar);
    }

    Series::new(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::{ohlc_bars, series};

    fn trending_bars(n: usize, step: f64) -> Bars {
        let rows: Vec<_> = (0..n)
            .map(|i| {
                let c = 100.0 + step * i as f64;
                (c, c + 1.0, c - 1.0, c, 1000.0)
            })
            .collect();
        ohlc_bars(&rows)
    }

    #[test]
    fn pivot_high_confirmed_after_right_bars() {
        let s = series(&[1.0, 2.0, 5.0, 3.0, 2.0, 1.0]);
        let p = pivothigh(&s, 2, 2);
        assert_eq!(p.get(3), None);
        assert_eq!(p.get(4), Some(5.0));
        assert_eq!(p.get(5), None);
    }

    #[test]
    fn pivot_low_mirrors_high() {
        let s = series(&[5.0, 4.0, 1.0, 4.0, 5.0]);
        assert_eq!(pivotlow(&s, 2, 2).get(4), Some(1.0));
        assert_eq!(pivothigh(&s, 2, 2).get(4), None);
    }

    #[test]
    fn dmi_uptrend_favours_plus() {
        let bars = trending_bars(40, 1.0);
        let (plus, minus, adx) = dmi(&bars, 14, 14);
        let last = bars.len() - 1;
        assert!(plus.get(last).unwrap() > minus.get(last).unwrap());
        assert!(adx.get(last).unwrap() > 50.0);
        assert_eq!(super::adx(&bars, 14, 14), adx);
    }

    #[test]
    fn supertrend_flags_uptrend() {
        let bars = trending_bars(30, 2.0);
        let (line, direction) = supertrend(&bars, 3.0, 10);
        assert_eq!(direction.get(5), None);
        let last = bars.len() - 1;
        assert_eq!(direction.get(last), Some(-1.0));
        assert!(line.get(last).unwrap() < bars.get(last).unwrap().close);
    }

    #[test]
    fn sar_trails_below_rising_prices() {
        let bars = trending_bars(20, 1.0);
        let s = sar(&bars, 0.02, 0.02, 0.2);
        assert_eq!(s.get(0), None);
        for i in 1..bars.len() {
            assert!(s.get(i).unwrap() < bars.get(i).unwrap().low + 1e-9);
        }
    }

    #[test]
    fn sar_needs_two_bars() {
        let bars = trending_bars(1, 1.0);
        assert_eq!(sar(&bars, 0.02, 0.02, 0.2), Series::na(1));
    }
}
