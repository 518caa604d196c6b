//! Indicator registry.
//!
//! Fixed table mapping `ta.*` names to the runtime indicator library. Each
//! entry records the positional parameter order with defaults written as
//! script expressions, whether the runtime function takes the bar set, and
//! how many series the call yields. The table is built once on first use and
//! never mutated.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ParamKind {
    /// Series argument, passed as `&Series`.
    Source,
    /// Window length, lowered to `usize`.
    Length,
    /// Scalar `f64`.
    Value,
    /// Scalar `bool`.
    Flag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    /// Default as script source text, e.g. `"close"` or `"14"`.
    pub default: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Category {
    MovingAverage,
    Momentum,
    Volatility,
    Volume,
    Cross,
    Statistics,
    Directional,
    Pivot,
    Trend,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::MovingAverage => "moving average",
            Category::Momentum => "momentum",
            Category::Volatility => "volatility",
            Category::Volume => "volume",
            Category::Cross => "cross",
            Category::Statistics => "statistics",
            Category::Directional => "directional",
            Category::Pivot => "pivot",
            Category::Trend => "trend",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mapping {
    pub qualified_name: &'static str,
    /// Function name in `runtime::ta`.
    pub callable: &'static str,
    pub params: &'static [ParamSpec],
    /// The runtime function takes `&Bars` as its first argument.
    pub needs_bars: bool,
    pub outputs: usize,
    pub category: Category,
    pub description: &'static str,
    /// The first parameter may be omitted (`ta.highest(10)`).
    pub leading_source_optional: bool,
}

impl Mapping {
    pub fn positional_names(&self) -> Vec<&'static str> {
        self.params.iter().map(|p| p.name).collect()
    }

    pub fn defaults(&self) -> BTreeMap<&'static str, &'static str> {
        self.params
            .iter()
            .filter_map(|p| p.default.map(|d| (p.name, d)))
            .collect()
    }

    pub fn param(&self, name: &str) -> Option<(usize, &ParamSpec)> {
        self.params.iter().enumerate().find(|(_, p)| p.name == name)
    }

    pub fn required_params(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }

    /// Runtime call path used in generated code.
    pub fn target_path(&self) -> String {
        format!("ta::{}", self.callable)
    }
}

const fn source(name: &'static str, default: Option<&'static str>) -> ParamSpec {
    ParamSpec {
        name,
        kind: ParamKind::Source,
        default,
    }
}

const fn length(name: &'static str, default: Option<&'static str>) -> ParamSpec {
    ParamSpec {
        name,
        kind: ParamKind::Length,
        default,
    }
}

const fn value(name: &'static str, default: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind: ParamKind::Value,
        default: Some(default),
    }
}

const fn flag(name: &'static str, default: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind: ParamKind::Flag,
        default: Some(default),
    }
}

const SOURCE_LENGTH: &[ParamSpec] = &[source("source", Some("close")), length("length", None)];

struct Entry {
    name: &'static str,
    params: &'static [ParamSpec],
    needs_bars: bool,
    outputs: usize,
    category: Category,
    description: &'static str,
}

const fn entry(
    name: &'static str,
    params: &'static [ParamSpec],
    category: Category,
    description: &'static str,
) -> Entry {
    Entry {
        name,
        params,
        needs_bars: false,
        outputs: 1,
        category,
        description,
    }
}

const fn with_bars(mut e: Entry) -> Entry {
    e.needs_bars = true;
    e
}

const fn outputs(mut e: Entry, n: usize) -> Entry {
    e.outputs = n;
    e
}

use Category::*;

const ENTRIES: &[Entry] = &[
    // moving averages
    entry("ta.sma", SOURCE_LENGTH, MovingAverage, "Simple moving average"),
    entry("ta.ema", SOURCE_LENGTH, MovingAverage, "Exponential moving average, seeded with the SMA"),
    entry("ta.wma", SOURCE_LENGTH, MovingAverage, "Linearly weighted moving average"),
    entry("ta.rma", SOURCE_LENGTH, MovingAverage, "Wilder's running moving average"),
    with_bars(entry("ta.vwma", SOURCE_LENGTH, MovingAverage, "Volume-weighted moving average")),
    entry("ta.hma", SOURCE_LENGTH, MovingAverage, "Hull moving average"),
    entry(
        "ta.alma",
        &[
            source("series", Some("close")),
            length("length", None),
            value("offset", "0.85"),
            value("sigma", "6"),
        ],
        MovingAverage,
        "Arnaud Legoux moving average",
    ),
    entry("ta.tema", SOURCE_LENGTH, MovingAverage, "Triple exponential moving average"),
    entry("ta.dema", SOURCE_LENGTH, MovingAverage, "Double exponential moving average"),
    // momentum
    entry(
        "ta.rsi",
        &[source("source", Some("close")), length("length", Some("14"))],
        Momentum,
        "Relative strength index with Wilder smoothing",
    ),
    outputs(
        entry(
            "ta.macd",
            &[
                source("source", Some("close")),
                length("fastlen", Some("12")),
                length("slowlen", Some("26")),
                length("siglen", Some("9")),
            ],
            Momentum,
            "MACD line, signal line and histogram",
        ),
        3,
    ),
    outputs(
        entry(
            "ta.stoch",
            &[
                source("source", Some("close")),
                source("high", Some("high")),
                source("low", Some("low")),
                length("length", Some("14")),
                length("smooth_d", Some("3")),
            ],
            Momentum,
            "Stochastic %K and its %D average",
        ),
        2,
    ),
    entry(
        "ta.cci",
        &[source("source", Some("hlc3")), length("length", Some("20"))],
        Momentum,
        "Commodity channel index",
    ),
    with_bars(entry(
        "ta.mfi",
        &[source("series", Some("hlc3")), length("length", Some("14"))],
        Momentum,
        "Money flow index",
    )),
    entry("ta.roc", SOURCE_LENGTH, Momentum, "Rate of change in percent"),
    with_bars(entry(
        "ta.wpr",
        &[length("length", Some("14"))],
        Momentum,
        "Williams %R",
    )),
    entry("ta.mom", SOURCE_LENGTH, Momentum, "Momentum: source minus source n bars ago"),
    // volatility
    with_bars(entry(
        "ta.atr",
        &[length("length", Some("14"))],
        Volatility,
        "Average true range",
    )),
    with_bars(entry(
        "ta.tr",
        &[flag("handle_na", "false")],
        Volatility,
        "True range",
    )),
    outputs(
        entry(
            "ta.bb",
            &[
                source("series", Some("close")),
                length("length", Some("20")),
                value("mult", "2.0"),
            ],
            Volatility,
            "Bollinger Bands: basis, upper and lower",
        ),
        3,
    ),
    outputs(
        with_bars(entry(
            "ta.kc",
            &[
                source("series", Some("close")),
                length("length", Some("20")),
                value("mult", "1.5"),
                flag("useTrueRange", "true"),
            ],
            Volatility,
            "Keltner Channels: basis, upper and lower",
        )),
        3,
    ),
    entry("ta.stdev", SOURCE_LENGTH, Volatility, "Population standard deviation"),
    entry("ta.variance", SOURCE_LENGTH, Volatility, "Population variance"),
    entry("ta.range", SOURCE_LENGTH, Volatility, "Highest minus lowest over the window"),
    // volume
    with_bars(entry(
        "ta.vwap",
        &[source("source", Some("hlc3"))],
        Volume,
        "Cumulative volume-weighted average price",
    )),
    with_bars(entry("ta.obv", &[], Volume, "On-balance volume")),
    with_bars(entry("ta.accdist", &[], Volume, "Accumulation/distribution")),
    // cross detection
    entry(
        "ta.crossover",
        &[source("source1", None), source("source2", None)],
        Cross,
        "True when the first series crosses above the second",
    ),
    entry(
        "ta.crossunder",
        &[source("source1", None), source("source2", None)],
        Cross,
        "True when the first series crosses below the second",
    ),
    entry(
        "ta.cross",
        &[source("source1", None), source("source2", None)],
        Cross,
        "True when the series cross in either direction",
    ),
    // statistics
    entry(
        "ta.highest",
        &[source("source", Some("high")), length("length", None)],
        Statistics,
        "Highest value over the window",
    ),
    entry(
        "ta.lowest",
        &[source("source", Some("low")), length("length", None)],
        Statistics,
        "Lowest value over the window",
    ),
    entry(
        "ta.change",
        &[source("source", Some("close")), length("length", Some("1"))],
        Statistics,
        "Difference from the value n bars ago",
    ),
    entry("ta.cum", &[source("source", None)], Statistics, "Cumulative sum"),
    entry(
        "ta.correlation",
        &[source("source1", None), source("source2", None), length("length", None)],
        Statistics,
        "Pearson correlation coefficient",
    ),
    entry(
        "ta.covariance",
        &[source("source1", None), source("source2", None), length("length", None)],
        Statistics,
        "Population covariance",
    ),
    entry("ta.median", SOURCE_LENGTH, Statistics, "Median over the window"),
    entry("ta.mode", SOURCE_LENGTH, Statistics, "Most frequent value over the window"),
    entry(
        "ta.percentrank",
        SOURCE_LENGTH,
        Statistics,
        "Percent of previous values at or below the current one",
    ),
    // directional movement
    with_bars(entry(
        "ta.adx",
        &[length("diLength", Some("14")), length("adxSmoothing", Some("14"))],
        Directional,
        "Average directional index",
    )),
    outputs(
        with_bars(entry(
            "ta.dmi",
            &[length("diLength", Some("14")), length("adxSmoothing", Some("14"))],
            Directional,
            "+DI, -DI and ADX",
        )),
        3,
    ),
    // pivots
    entry(
        "ta.pivothigh",
        &[
            source("source", Some("high")),
            length("leftbars", None),
            length("rightbars", None),
        ],
        Pivot,
        "Pivot high value, reported rightbars later",
    ),
    entry(
        "ta.pivotlow",
        &[
            source("source", Some("low")),
            length("leftbars", None),
            length("rightbars", None),
        ],
        Pivot,
        "Pivot low value, reported rightbars later",
    ),
    // trend
    outputs(
        with_bars(entry(
            "ta.supertrend",
            &[value("factor", "3.0"), length("atrPeriod", Some("10"))],
            Trend,
            "Supertrend line and direction",
        )),
        2,
    ),
    with_bars(entry(
        "ta.sar",
        &[value("start", "0.02"), value("inc", "0.02"), value("max", "0.2")],
        Trend,
        "Parabolic stop and reverse",
    )),
];

/// Entries whose first argument may be left out.
const LEADING_SOURCE_OPTIONAL: &[&str] = &["highest", "lowest", "pivothigh", "pivotlow"];

pub struct Registry {
    mappings: BTreeMap<&'static str, Mapping>,
}

impl Registry {
    fn build() -> Self {
        let mappings = ENTRIES
            .iter()
            .map(|e| {
                let callable = e.name.strip_prefix("ta.").unwrap_or(e.name);
                let mapping = Mapping {
                    qualified_name: e.name,
                    callable,
                    params: e.params,
                    needs_bars: e.needs_bars,
                    outputs: e.outputs,
                    category: e.category,
                    description: e.description,
                    leading_source_optional: LEADING_SOURCE_OPTIONAL.contains(&callable),
                };
                (e.name, mapping)
            })
            .collect();
        Self { mappings }
    }

    pub fn lookup(&self, qualified_name: &str) -> Option<&Mapping> {
        self.mappings.get(qualified_name)
    }

    pub fn list_all(&self) -> Vec<&'static str> {
        self.mappings.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.values()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::build);

pub fn registry() -> &'static Registry {
    &REGISTRY
}

pub fn lookup(qualified_name: &str) -> Option<&'static Mapping> {
    REGISTRY.lookup(qualified_name)
}

pub fn list_all() -> Vec<&'static str> {
    REGISTRY.list_all()
}
