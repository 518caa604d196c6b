//! Runtime library for converted scripts.
//!
//! Generated code depends only on this module: [`Bars`] supplies the implicit
//! OHLCV series, [`Series`] carries per-bar values, [`ops`] provides the
//! elementwise operators and [`ta`] the indicator library. A converted script
//! returns a [`RunOutput`] holding its plots and the orders it issued.
//!
//! Bars before an indicator's lookback is satisfied hold `None`. Arithmetic
//! that produces a non-finite value also yields `None`.

pub mod ops;
pub mod ta;

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

/// Per-bar values with an explicit "not yet available" state.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Series {
    values: Vec<Option<f64>>,
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

impl Series {
    pub fn new(values: Vec<Option<f64>>) -> Self {
        Self {
            values: values.into_iter().map(finite).collect(),
        }
    }

    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        values.into_iter().map(Some).collect()
    }

    /// A series of `len` unavailable values.
    pub fn na(len: usize) -> Self {
        Self {
            values: vec![None; len],
        }
    }

    pub fn constant(value: f64, len: usize) -> Self {
        Self::new(vec![Some(value); len])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<f64> {
        self.values.get(idx).copied().flatten()
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<f64>> + '_ {
        self.values.iter().copied()
    }

    pub fn last(&self) -> Option<f64> {
        self.values.last().copied().flatten()
    }

    /// Value `n` bars in the past at every bar (`x[n]`).
    pub fn shift(&self, n: usize) -> Series {
        (0..self.len())
            .map(|i| i.checked_sub(n).and_then(|j| self.get(j)))
            .collect()
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Series {
        self.iter().map(|v| v.map(&f)).collect()
    }

    /// Combine two series bar by bar; the result has the longer length.
    pub fn zip_with(&self, other: &Series, f: impl Fn(f64, f64) -> f64) -> Series {
        let len = self.len().max(other.len());
        (0..len)
            .map(|i| match (self.get(i), other.get(i)) {
                (Some(a), Some(b)) => Some(f(a, b)),
                _ => None,
            })
            .collect()
    }

    /// Boolean reading of bar `idx`: available and non-zero.
    pub fn is_true(&self, idx: usize) -> bool {
        self.get(idx).is_some_and(|v| v != 0.0)
    }
}

impl FromIterator<Option<f64>> for Series {
    fn from_iter<I: IntoIterator<Item = Option<f64>>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(finite).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

/// Price source selectable through a source input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Source {
    Open,
    High,
    Low,
    Close,
    Volume,
    Hl2,
    Hlc3,
    Ohlc4,
    Hlcc4,
}

impl Source {
    pub fn from_name(name: &str) -> Option<Source> {
        let source = match name {
            "open" => Source::Open,
            "high" => Source::High,
            "low" => Source::Low,
            "close" => Source::Close,
            "volume" => Source::Volume,
            "hl2" => Source::Hl2,
            "hlc3" => Source::Hlc3,
            "ohlc4" => Source::Ohlc4,
            "hlcc4" => Source::Hlcc4,
            _ => return None,
        };
        Some(source)
    }

    fn of(self, bar: &Bar) -> f64 {
        match self {
            Source::Open => bar.open,
            Source::High => bar.high,
            Source::Low => bar.low,
            Source::Close => bar.close,
            Source::Volume => bar.volume,
            Source::Hl2 => (bar.high + bar.low) / 2.0,
            Source::Hlc3 => bar.typical_price(),
            Source::Ohlc4 => (bar.open + bar.high + bar.low + bar.close) / 4.0,
            Source::Hlcc4 => (bar.high + bar.low + 2.0 * bar.close) / 4.0,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Source::Open => "open",
            Source::High => "high",
            Source::Low => "low",
            Source::Close => "close",
            Source::Volume => "volume",
            Source::Hl2 => "hl2",
            Source::Hlc3 => "hlc3",
            Source::Ohlc4 => "ohlc4",
            Source::Hlcc4 => "hlcc4",
        };
        write!(f, "{}", name)
    }
}

/// Chronologically ordered bars for one instrument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bars {
    bars: Vec<Bar>,
}

impl Bars {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self { bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Bar> {
        self.bars.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bar> {
        self.bars.iter()
    }

    pub fn source(&self, source: Source) -> Series {
        Series::from_values(self.bars.iter().map(|b| source.of(b)))
    }

    pub fn open(&self) -> Series {
        self.source(Source::Open)
    }

    pub fn high(&self) -> Series {
        self.source(Source::High)
    }

    pub fn low(&self) -> Series {
        self.source(Source::Low)
    }

    pub fn close(&self) -> Series {
        self.source(Source::Close)
    }

    pub fn volume(&self) -> Series {
        self.source(Source::Volume)
    }

    pub fn hl2(&self) -> Series {
        self.source(Source::Hl2)
    }

    pub fn hlc3(&self) -> Series {
        self.source(Source::Hlc3)
    }

    pub fn ohlc4(&self) -> Series {
        self.source(Source::Ohlc4)
    }

    pub fn hlcc4(&self) -> Series {
        self.source(Source::Hlcc4)
    }

    /// Zero-based bar number.
    pub fn bar_index(&self) -> Series {
        Series::from_values((0..self.len()).map(|i| i as f64))
    }
}

impl From<Vec<Bar>> for Bars {
    fn from(bars: Vec<Bar>) -> Self {
        Self::new(bars)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OrderKind {
    Entry,
    Order,
    Close,
    CloseAll,
    Exit,
    Cancel,
    CancelAll,
}

/// An order request issued on bar `bar`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub kind: OrderKind,
    pub id: Option<String>,
    pub direction: Option<Direction>,
    pub bar: usize,
    pub qty: Option<f64>,
    pub stop: Option<f64>,
    pub limit: Option<f64>,
    pub from_entry: Option<String>,
}

impl Order {
    fn new(kind: OrderKind, id: Option<&str>, direction: Option<Direction>, bar: usize) -> Self {
        Self {
            kind,
            id: id.map(str::to_string),
            direction,
            bar,
            qty: None,
            stop: None,
            limit: None,
            from_entry: None,
        }
    }

    pub fn entry(id: &str, direction: Direction, bar: usize) -> Self {
        Self::new(OrderKind::Entry, Some(id), Some(direction), bar)
    }

    pub fn order(id: &str, direction: Direction, bar: usize) -> Self {
        Self::new(OrderKind::Order, Some(id), Some(direction), bar)
    }

    pub fn close(id: &str, bar: usize) -> Self {
        Self::new(OrderKind::Close, Some(id), None, bar)
    }

    pub fn close_all(bar: usize) -> Self {
        Self::new(OrderKind::CloseAll, None, None, bar)
    }

    pub fn exit(id: &str, bar: usize) -> Self {
        Self::new(OrderKind::Exit, Some(id), None, bar)
    }

    pub fn cancel(id: &str, bar: usize) -> Self {
        Self::new(OrderKind::Cancel, Some(id), None, bar)
    }

    pub fn cancel_all(bar: usize) -> Self {
        Self::new(OrderKind::CancelAll, None, None, bar)
    }

    pub fn with_qty(mut self, qty: Option<f64>) -> Self {
        self.qty = qty;
        self
    }

    pub fn with_stop(mut self, stop: Option<f64>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_limit(mut self, limit: Option<f64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_from_entry(mut self, from_entry: &str) -> Self {
        self.from_entry = Some(from_entry.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PlotKind {
    Line,
    Shape,
    Char,
    Arrow,
    Hline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plot {
    pub kind: PlotKind,
    pub title: String,
    /// Color expression as written in the script.
    pub color: Option<String>,
    pub series: Series,
}

impl Plot {
    pub fn new(kind: PlotKind, title: &str, series: Series) -> Self {
        Self {
            kind,
            title: title.to_string(),
            color: None,
            series,
        }
    }

    pub fn with_color(mut self, color: &str) -> Self {
        self.color = Some(color.to_string());
        self
    }
}

/// Everything a converted script produces for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunOutput {
    pub plots: Vec<Plot>,
    pub orders: Vec<Order>,
}

impl RunOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plot(&mut self, plot: Plot) {
        self.plots.push(plot);
    }

    pub fn order(&mut self, order: Order) {
        self.orders.push(order);
    }

    pub fn plot_named(&self, title: &str) -> Option<&Plot> {
        self.plots.iter().find(|p| p.title == title)
    }
}
