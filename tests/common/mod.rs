#![allow(dead_code)]

use chrono::{Days, NaiveDate};
use pinecast::domain::converter::NamedScript;
use pinecast::domain::error::PinecastError;
use pinecast::ports::script_port::ScriptPort;
use pinecast::runtime::{Bar, Bars};
use std::io::Write;

pub const SMA_INDICATOR: &str = "\
//@version=5
indicator(\"S\")
len=input.int(20,\"Length\")
ma=ta.sma(close,len)
plot(ma)
";

pub const GOLDEN_CROSS: &str = "\
//@version=5
strategy(\"Golden Cross\")
fastLen = input.int(3, \"Fast length\")
slowLen = input.int(5, \"Slow length\")
fastMA = ta.sma(close, fastLen)
slowMA = ta.sma(close, slowLen)
if ta.crossover(fastMA, slowMA)
    strategy.entry(\"Long\", strategy.long)
if ta.crossunder(fastMA, slowMA)
    strategy.close(\"Long\")
plot(fastMA, \"Fast\")
plot(slowMA, \"Slow\")
";

pub const RSI_FILTERED_ENTRY: &str = "\
//@version=5
strategy(\"RSI filtered cross\")
fastMA = ta.ema(close, 9)
slowMA = ta.ema(close, 21)
rsi = ta.rsi(close, 14)
crossCondition = ta.crossover(fastMA, slowMA) and rsi < 70
strategy.entry(\"Long\", strategy.long, when=crossCondition)
";

pub const UNKNOWN_INDICATOR: &str = "\
//@version=5
indicator(\"Broken\")
x = ta.notreal(close, 5)
plot(x)
";

/// Two arrow functions, four indicators, conditions three deep and enough
/// code lines to land in the hybrid band.
pub fn busy_script() -> String {
    let mut s = String::from(
        "\
//@version=5
indicator(\"Busy\")
double(x) => x * 2
triple(x) => x * 3
fast = ta.sma(close, 10)
slow = ta.ema(close, 20)
r = ta.rsi(close, 14)
a = ta.atr(14)
",
    );
    for i in 0..16 {
        s.push_str(&format!("v{} = close + {}\n", i, i));
    }
    s.push_str(
        "\
if r > 50
    if fast > slow
        if close > open
            alert(\"up\")
",
    );
    for i in 0..110 {
        s.push_str(&format!("plot(close, \"p{}\")\n", i));
    }
    s
}

pub struct MockScriptPort {
    pub scripts: Vec<NamedScript>,
}

impl MockScriptPort {
    pub fn new(scripts: &[(&str, &str)]) -> Self {
        Self {
            scripts: scripts
                .iter()
                .map(|(name, source)| NamedScript::new(*name, *source))
                .collect(),
        }
    }
}

impl ScriptPort for MockScriptPort {
    fn load_scripts(&self) -> Result<Vec<NamedScript>, PinecastError> {
        if self.scripts.is_empty() {
            return Err(PinecastError::NoScripts {
                path: "<mock>".to_string(),
            });
        }
        Ok(self.scripts.clone())
    }
}

pub fn write_temp_file(content: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Daily bars with open = previous close and a one-point range.
pub fn bars_from_closes(closes: &[f64]) -> Bars {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                date: start.checked_add_days(Days::new(i as u64)).unwrap(),
                open,
                high: open.max(close) + 0.5,
                low: open.min(close) - 0.5,
                close,
                volume: 1000.0,
            }
        })
        .collect();
    Bars::new(bars)
}
