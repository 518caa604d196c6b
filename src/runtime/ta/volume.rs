//! Volume-based indicators.

use super::stats::cum;
use crate::runtime::{Bars, Series, ops};

/// Cumulative volume-weighted price from the first bar (no session anchoring).
pub fn vwap(bars: &Bars, source: &Series) -> Series {
    let volume = bars.volume();
    ops::div(cum(&ops::mul(source, &volume)), cum(&volume))
}

/// OBV[0] = volume[0]; then add volume on up closes, subtract on down closes.
pub fn obv(bars: &Bars) -> Series {
    let mut total = 0.0;
    let mut prev_close: Option<f64> = None;
    bars.iter()
        .map(|bar| {
            match prev_close {
                None => total = bar.volume,
                Some(pc) if bar.close > pc => total += bar.volume,
                Some(pc) if bar.close < pc => total -= bar.volume,
                Some(_) => {}
            }
            prev_close = Some(bar.close);
            Some(total)
        })
        .collect()
}

/// Accumulation/distribution: cumulative close-location value times volume.
pub fn accdist(bars: &Bars) -> Series {
    let mut total = 0.0;
    bars.iter()
        .map(|bar| {
            let spread = bar.high - bar.low;
            if spread != 0.0 {
                let clv = ((bar.close - bar.low) - (bar.high - bar.close)) / spread;
                total += clv * bar.volume;
            }
            Some(total)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::ohlc_bars;
    use approx::assert_relative_eq;

    #[test]
    fn obv_follows_close_direction() {
        let bars = ohlc_bars(&[
            (1.0, 1.0, 1.0, 10.0, 100.0),
            (1.0, 1.0, 1.0, 11.0, 50.0),
            (1.0, 1.0, 1.0, 11.0, 70.0),
            (1.0, 1.0, 1.0, 9.0, 30.0),
        ]);
        assert_eq!(
            obv(&bars).values(),
            &[Some(100.0), Some(150.0), Some(150.0), Some(120.0)]
        );
    }

    #[test]
    fn vwap_weights_by_volume() {
        let bars = ohlc_bars(&[(2.0, 2.0, 2.0, 2.0, 1.0), (4.0, 4.0, 4.0, 4.0, 3.0)]);
        let s = vwap(&bars, &bars.hlc3());
        assert_relative_eq!(s.get(0).unwrap(), 2.0);
        assert_relative_eq!(s.get(1).unwrap(), 14.0 / 4.0);
    }

    #[test]
    fn accdist_close_at_high_adds_volume() {
        let bars = ohlc_bars(&[(1.0, 2.0, 0.0, 2.0, 10.0), (1.0, 2.0, 0.0, 0.0, 4.0)]);
        assert_eq!(accdist(&bars).values(), &[Some(10.0), Some(6.0)]);
    }
}
