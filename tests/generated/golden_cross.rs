//! Generated by pinecast from "Golden Cross" (strategy, version 5).
//!
//! Checked in so the runtime API it calls is compiled and exercised.

use pinecast::runtime::{ops, ta, Bars, Direction, Order, Plot, PlotKind, RunOutput};

/// Inputs of "Golden Cross".
#[derive(Debug, Clone, PartialEq)]
pub struct GoldenCrossParams {
    /// Fast length
    pub fast_len: i64,
    /// Slow length
    pub slow_len: i64,
}

impl Default for GoldenCrossParams {
    fn default() -> Self {
        Self {
            fast_len: 3,
            slow_len: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GoldenCross {
    pub params: GoldenCrossParams,
}

impl GoldenCross {
    pub fn new(params: GoldenCrossParams) -> Self {
        Self { params }
    }

    #[allow(unused_variables, unused_mut, unused_parens)]
    pub fn run(&self, bars: &Bars) -> RunOutput {
        let params = &self.params;
        let close = bars.close();
        let mut out = RunOutput::new();
        let fast_ma = ta::sma(&close, ops::length(params.fast_len));
        let slow_ma = ta::sma(&close, ops::length(params.slow_len));
        let cond_0 = ta::crossover(&fast_ma, &slow_ma);
        let cond_1 = ta::crossunder(&fast_ma, &slow_ma);
        out.plot(Plot::new(PlotKind::Line, "Fast", fast_ma.clone()));
        out.plot(Plot::new(PlotKind::Line, "Slow", slow_ma.clone()));
        for idx in 0..bars.len() {
            if ops::truthy(&cond_0, idx) {
                out.order(Order::entry("Long", Direction::Long, idx));
            }
            if ops::truthy(&cond_1, idx) {
                out.order(Order::close("Long", idx));
            }
        }
        out
    }
}
