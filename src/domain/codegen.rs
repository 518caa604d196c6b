//! Code generator.
//!
//! Assembles one Rust module per script from the parsed [`Script`] and its
//! [`TransformedExpressions`]:
//!
//! - a `<Name>Params` struct holding the inputs, with their defaults,
//! - a `<Name>` struct whose `run(&self, bars)` computes every variable in
//!   document order, records plots, and walks the bars once to issue orders.
//!
//! The output is parsed with `syn` before it is returned; a failure there is
//! a bug in this module or the transformer, never in the script.

use crate::domain::ast::{
    Branch, Direction, PlotKind, ScopeRef, Script, ScriptKind, StrategyCall, StrategyCallKind,
};
use crate::domain::error::GeneratorInvariantViolation;
use crate::domain::transform::{ExprKey, TransformedExpr, TransformedExpressions, ValueKind};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use tracing::{debug, error};

pub const DEFAULT_RUNTIME_PATH: &str = "pinecast::runtime";

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorOptions {
    /// Path the generated `use` line imports the runtime from.
    pub runtime_path: String,
    /// Emit `out.plot(..)` calls for plot statements.
    pub emit_plots: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            runtime_path: DEFAULT_RUNTIME_PATH.to_string(),
            emit_plots: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSource {
    pub text: String,
    /// Name of the generated script struct.
    pub type_name: String,
}

const RUNTIME_ITEMS: &[&str] = &[
    "Bar", "Bars", "Direction", "Order", "OrderKind", "Plot", "PlotKind", "RunOutput", "Series",
    "Source", "Self",
];

/// CamelCase struct name for a script title.
pub(crate) fn type_name(script_name: &str) -> String {
    let mut name = String::new();
    for word in script_name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            name.push(first.to_ascii_uppercase());
            name.push_str(chars.as_str());
        }
    }
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "Script");
    }
    if RUNTIME_ITEMS.contains(&name.as_str()) {
        name.push_str("Script");
    }
    name
}

fn runtime_plot_kind(kind: PlotKind) -> Option<&'static str> {
    match kind {
        PlotKind::Plot => Some("Line"),
        PlotKind::Shape => Some("Shape"),
        PlotKind::Char => Some("Char"),
        PlotKind::Arrow => Some("Arrow"),
        PlotKind::Hline => Some("Hline"),
        _ => None,
    }
}

/// Boolean test of a hoisted binding on bar `idx`.
fn truth(item: &TransformedExpr, name: &str, imports: &mut BTreeSet<&'static str>) -> String {
    match item.value.kind {
        ValueKind::Bool => name.to_string(),
        ValueKind::Number => format!("{} != 0.0", name),
        _ => {
            imports.insert("ops");
            format!("ops::truthy(&{}, idx)", name)
        }
    }
}

/// `Option<f64>` value of a hoisted binding on bar `idx`.
fn value_at(item: &TransformedExpr, name: &str, imports: &mut BTreeSet<&'static str>) -> String {
    match item.value.kind {
        ValueKind::Number => format!("Some({})", name),
        _ => {
            imports.insert("ops");
            format!("ops::value_at(&{}, idx)", name)
        }
    }
}

struct Emitter<'a> {
    script: &'a Script,
    exprs: &'a TransformedExpressions,
    out: String,
    imports: BTreeSet<&'static str>,
}

impl<'a> Emitter<'a> {
    fn line(&mut self, indent: usize, text: &str) {
        let pad = " ".repeat(indent * 4);
        for part in text.lines() {
            self.out.push_str(&pad);
            self.out.push_str(part);
            self.out.push('\n');
        }
        if text.is_empty() {
            self.out.push('\n');
        }
    }

    fn hoisted(&self, key: ExprKey) -> Option<(&'a TransformedExpr, &'a str)> {
        let item = self.exprs.get(key)?;
        Some((item, item.binding.as_deref()?))
    }

    fn order(&mut self, call: &StrategyCall, index: usize) -> Result<String, String> {
        self.imports.insert("Order");
        let id = call
            .id
            .as_deref()
            .map(|id| format!("{:?}", id))
            .filter(|_| call.kind.needs_id());
        let direction = match call.direction {
            Some(Direction::Long) => "Direction::Long",
            Some(Direction::Short) => "Direction::Short",
            None => "",
        };
        let needs = |what: &str| format!("{} call without {}", call.kind.qualified_name(), what);
        let mut text = match call.kind {
            StrategyCallKind::Entry | StrategyCallKind::Order => {
                let id = id.ok_or_else(|| needs("an id"))?;
                if direction.is_empty() {
                    return Err(needs("a direction"));
                }
                self.imports.insert("Direction");
                let constructor = if call.kind == StrategyCallKind::Entry { "entry" } else { "order" };
                format!("Order::{}({}, {}, idx)", constructor, id, direction)
            }
            StrategyCallKind::Close => format!("Order::close({}, idx)", id.ok_or_else(|| needs("an id"))?),
            StrategyCallKind::Exit => format!("Order::exit({}, idx)", id.ok_or_else(|| needs("an id"))?),
            StrategyCallKind::Cancel => format!("Order::cancel({}, idx)", id.ok_or_else(|| needs("an id"))?),
            StrategyCallKind::CloseAll => "Order::close_all(idx)".to_string(),
            StrategyCallKind::CancelAll => "Order::cancel_all(idx)".to_string(),
        };
        let modifiers = [
            (ExprKey::StrategyQty(index), "with_qty"),
            (ExprKey::StrategyStop(index), "with_stop"),
            (ExprKey::StrategyLimit(index), "with_limit"),
        ];
        for (key, method) in modifiers {
            if let Some((item, name)) = self.hoisted(key) {
                let value = value_at(item, name, &mut self.imports);
                let _ = write!(text, ".{}({})", method, value);
            }
        }
        if let Some(from_entry) = &call.from_entry {
            let _ = write!(text, ".with_from_entry({:?})", from_entry);
        }
        Ok(text)
    }

    fn strategy_call(&mut self, index: usize, indent: usize) -> Result<(), String> {
        let script = self.script;
        let call = &script.strategy_calls()[index];
        let order = self.order(call, index)?;
        match self.hoisted(ExprKey::StrategyWhen(index)) {
            Some((item, name)) => {
                let test = truth(item, name, &mut self.imports);
                self.line(indent, &format!("if {} {{", test));
                self.line(indent + 1, &format!("out.order({});", order));
                self.line(indent, "}");
            }
            None => self.line(indent, &format!("out.order({});", order)),
        }
        Ok(())
    }

    /// Statements of one condition body, or of the top level when `scope` is `None`.
    fn block(&mut self, scope: Option<ScopeRef>, indent: usize) -> Result<(), String> {
        let script = self.script;
        let mut entries: Vec<(usize, bool, usize)> = Vec::new();
        for (i, call) in script.strategy_calls().iter().enumerate() {
            if call.scope == scope {
                entries.push((call.span.start, false, i));
            }
        }
        for (i, cond) in script.conditions().iter().enumerate() {
            if cond.parent == scope && cond.chained_from.is_none() {
                entries.push((cond.span.start, true, i));
            }
        }
        entries.sort();
        for (_, is_condition, i) in entries {
            if is_condition {
                self.condition(i, indent)?;
            } else {
                self.strategy_call(i, indent)?;
            }
        }
        Ok(())
    }

    fn condition_test(&mut self, index: usize) -> Result<String, String> {
        let (item, name) = self
            .hoisted(ExprKey::Predicate(index))
            .ok_or_else(|| format!("condition {} was not lowered", index))?;
        Ok(truth(item, name, &mut self.imports))
    }

    fn condition(&mut self, head: usize, indent: usize) -> Result<(), String> {
        let script = self.script;
        let mut chain: Vec<usize> = script
            .conditions()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.chained_from == Some(head))
            .map(|(i, _)| i)
            .collect();
        chain.sort_by_key(|&i| script.conditions()[i].span.start);

        let test = self.condition_test(head)?;
        self.line(indent, &format!("if {} {{", test));
        self.block(Some(ScopeRef { condition: head, branch: Branch::Then }), indent + 1)?;
        for &link in &chain {
            let test = self.condition_test(link)?;
            self.line(indent, &format!("}} else if {} {{", test));
            self.block(Some(ScopeRef { condition: link, branch: Branch::Then }), indent + 1)?;
        }

        let last = chain.last().copied().unwrap_or(head);
        let otherwise = Some(ScopeRef { condition: last, branch: Branch::Else });
        let has_else = script.strategy_calls().iter().any(|c| c.scope == otherwise)
            || script.conditions().iter().any(|c| c.parent == otherwise);
        if has_else {
            self.line(indent, "} else {");
            self.block(otherwise, indent + 1)?;
        }
        self.line(indent, "}");
        Ok(())
    }

    fn plot(&mut self, index: usize, indent: usize) {
        let script = self.script;
        let plot = &script.plots()[index];
        let Some(kind) = runtime_plot_kind(plot.kind) else {
            return;
        };
        let Some(item) = self.exprs.get(ExprKey::PlotSeries(index)) else {
            return;
        };
        let value = &item.value;
        if value.kind != ValueKind::Series {
            self.imports.insert("ops");
        }
        self.imports.insert("Plot");
        self.imports.insert("PlotKind");
        let title = match (&plot.title, plot.series_expr) {
            (Some(title), _) => title.clone(),
            (None, Some(span)) => script.text(span).trim().to_string(),
            (None, None) => plot.kind.name().to_string(),
        };
        let mut call = format!(
            "Plot::new(PlotKind::{}, {:?}, {})",
            kind,
            title,
            value.series_value()
        );
        if let Some(color) = plot.color_expr {
            let _ = write!(call, ".with_color({:?})", script.text(color).trim());
        }
        self.line(indent, &format!("out.plot({});", call));
    }
}

fn violation(script: &Script, message: impl Into<String>) -> GeneratorInvariantViolation {
    GeneratorInvariantViolation {
        script: script.name().to_string(),
        message: message.into(),
    }
}

/// Generate the Rust module for `script`.
pub fn generate(
    script: &Script,
    exprs: &TransformedExpressions,
    options: &GeneratorOptions,
) -> Result<GeneratedSource, GeneratorInvariantViolation> {
    let name = type_name(script.name());
    let params_name = format!("{}Params", name);

    let mut em = Emitter {
        script,
        exprs,
        out: String::new(),
        imports: BTreeSet::from(["Bars", "RunOutput"]),
    };
    if exprs.uses.ops {
        em.imports.insert("ops");
    }
    if !exprs.uses.indicators.is_empty() {
        em.imports.insert("ta");
    }
    if exprs.uses.series_type {
        em.imports.insert("Series");
    }
    if exprs.uses.direction {
        em.imports.insert("Direction");
    }

    // Body of `run`, indented two levels.
    if !exprs.inputs.is_empty() {
        em.line(2, "let params = &self.params;");
    }
    for series in &exprs.uses.builtins {
        let accessor = series.name();
        em.line(2, &format!("let {} = bars.{}();", accessor, accessor));
    }
    for derived in &exprs.uses.derived {
        em.line(2, &format!("let {} = bars.{}();", derived, derived));
    }
    if exprs.uses.bar_index {
        em.line(2, "let bar_index = bars.bar_index();");
    }
    for input in exprs.inputs.iter().filter(|i| i.rust_type() == "Source") {
        em.line(2, &format!("let {} = bars.source(params.{});", input.field, input.field));
    }
    em.line(2, "let mut out = RunOutput::new();");

    // Bindings and plots interleaved in document order.
    for item in &exprs.items {
        match (&item.binding, item.key) {
            (Some(pattern), _) => {
                em.line(2, &format!("let {} = {};", pattern, item.value.code));
            }
            (None, ExprKey::PlotSeries(i)) if options.emit_plots => em.plot(i, 2),
            _ => {}
        }
    }

    if !script.strategy_calls().is_empty() {
        em.line(2, "for idx in 0..bars.len() {");
        em.block(None, 3).map_err(|m| violation(script, m))?;
        em.line(2, "}");
    }
    em.line(2, "out");
    let body = std::mem::take(&mut em.out);

    let mut text = String::new();
    let kind = match script.kind() {
        ScriptKind::Indicator => "indicator",
        ScriptKind::Strategy => "strategy",
    };
    let _ = writeln!(
        text,
        "//! Generated by pinecast from {:?} ({}, version {}).",
        script.name(),
        kind,
        script.version()
    );
    if !exprs.uses.indicators.is_empty() {
        let list: Vec<&str> = exprs.uses.indicators.iter().copied().collect();
        let _ = writeln!(text, "//!\n//! Indicators: {}.", list.join(", "));
    }
    text.push('\n');

    if exprs.inputs.iter().any(|i| i.rust_type() == "Source") {
        em.imports.insert("Source");
    }
    let mut imports: Vec<&str> = em.imports.iter().copied().collect();
    imports.sort_by_key(|item| (item.starts_with(|c: char| c.is_ascii_uppercase()), *item));
    let _ = writeln!(text, "use {}::{{{}}};", options.runtime_path, imports.join(", "));
    text.push('\n');

    let _ = writeln!(text, "/// Inputs of {:?}.", script.name());
    if exprs.inputs.is_empty() {
        let _ = writeln!(text, "#[derive(Debug, Clone, Default, PartialEq)]");
        let _ = writeln!(text, "pub struct {} {{}}", params_name);
    } else {
        let _ = writeln!(text, "#[derive(Debug, Clone, PartialEq)]");
        let _ = writeln!(text, "pub struct {} {{", params_name);
        for input in &exprs.inputs {
            if let Some(title) = &input.title {
                let _ = writeln!(text, "    /// {}", title);
            }
            let _ = writeln!(text, "    pub {}: {},", input.field, input.rust_type());
        }
        let _ = writeln!(text, "}}\n");
        let _ = writeln!(text, "impl Default for {} {{", params_name);
        let _ = writeln!(text, "    fn default() -> Self {{");
        let _ = writeln!(text, "        Self {{");
        for input in &exprs.inputs {
            let _ = writeln!(text, "            {}: {},", input.field, input.default);
        }
        let _ = writeln!(text, "        }}\n    }}\n}}");
    }
    text.push('\n');

    let _ = writeln!(text, "#[derive(Debug, Clone, Default)]");
    let _ = writeln!(text, "pub struct {} {{", name);
    let _ = writeln!(text, "    pub params: {},", params_name);
    let _ = writeln!(text, "}}\n");
    let _ = writeln!(text, "impl {} {{", name);
    let _ = writeln!(text, "    pub fn new(params: {}) -> Self {{", params_name);
    let _ = writeln!(text, "        Self {{ params }}");
    let _ = writeln!(text, "    }}\n");
    let _ = writeln!(text, "    #[allow(unused_variables, unused_mut, unused_parens)]");
    let _ = writeln!(text, "    pub fn run(&self, bars: &Bars) -> RunOutput {{");
    text.push_str(&body);
    let _ = writeln!(text, "    }}");
    let _ = writeln!(text, "}}");

    if let Err(e) = syn::parse_file(&text) {
        error!(script = script.name(), error = %e, "generated source does not parse");
        return Err(violation(script, e.to_string()));
    }
    debug!(script = script.name(), type_name = %name, bytes = text.len(), "generated module");
    Ok(GeneratedSource {
        text,
        type_name: name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parser::parse_source;
    use crate::domain::transform::transform_script;

    fn generate_source(source: &str) -> GeneratedSource {
        let script = parse_source(source).unwrap();
        let exprs = transform_script(&script).unwrap();
        generate(&script, &exprs, &GeneratorOptions::default()).unwrap()
    }

    #[test]
    fn type_names() {
        assert_eq!(type_name("My RSI strategy"), "MyRSIStrategy");
        assert_eq!(type_name("sma-cross"), "SmaCross");
        assert_eq!(type_name("200 day"), "Script200Day");
        assert_eq!(type_name("!!!"), "Script");
        assert_eq!(type_name("series"), "SeriesScript");
    }

    #[test]
    fn simple_indicator() {
        let generated = generate_source(
            "//@version=5\nindicator(\"My SMA\")\nlen = input.int(20, \"Length\")\nma = ta.sma(close, len)\nplot(ma, color=color.blue)\n",
        );
        let text = &generated.text;
        assert_eq!(generated.type_name, "MySMA");
        assert!(text.contains("use pinecast::runtime::{ops, ta, Bars, Plot, PlotKind, RunOutput};"), "{text}");
        assert!(text.contains("pub struct MySMAParams {"));
        assert!(text.contains("    /// Length\n    pub len: i64,"));
        assert!(text.contains("            len: 20,"));
        assert!(text.contains("        let close = bars.close();"));
        assert!(text.contains("        let ma = ta::sma(&close, ops::length(params.len));"));
        assert!(text.contains(
            "        out.plot(Plot::new(PlotKind::Line, \"ma\", ma.clone()).with_color(\"color.blue\"));"
        ));
        assert!(!text.contains("for idx"));
    }

    #[test]
    fn strategy_loop() {
        let generated = generate_source(
            "\
//@version=5
strategy(\"Cross\")
fast = ta.ema(close, 9)
slow = ta.ema(close, 21)
if ta.crossover(fast, slow)
    strategy.entry(\"Long\", strategy.long, qty=2)
else if ta.crossunder(fast, slow)
    strategy.close(\"Long\")
else
    strategy.cancel_all()
strategy.exit(\"X\", from_entry=\"Long\", stop=low, when=close < open)
",
        );
        let text = &generated.text;
        assert!(text.contains("let cond_0 = ta::crossover(&fast, &slow);"), "{text}");
        assert!(text.contains("let qty_0 = 2.0;"));
        assert!(text.contains("let stop_0 = &low;"));
        assert!(text.contains("let when_0 = ops::lt(&close, &open);"));
        assert!(text.contains(
            "            if ops::truthy(&cond_0, idx) {
                out.order(Order::entry(\"Long\", Direction::Long, idx).with_qty(Some(qty_0)));
            } else if ops::truthy(&cond_1, idx) {
                out.order(Order::close(\"Long\", idx));
            } else {
                out.order(Order::cancel_all(idx));
            }"
        ));
        assert!(text.contains(
            "out.order(Order::exit(\"X\", idx).with_stop(ops::value_at(&stop_0, idx)).with_from_entry(\"Long\"));"
        ));
        assert!(text.contains("Direction, Order,"));
    }

    #[test]
    fn hline_and_source_input() {
        let generated = generate_source(
            "//@version=5\nindicator(\"Osc\")\nsrc = input.source(hl2, \"Source\")\nr = ta.rsi(src, 14)\nplot(r)\nhline(70)\n",
        );
        let text = &generated.text;
        assert!(text.contains("pub src: Source,"));
        assert!(text.contains("src: Source::Hl2,"));
        assert!(text.contains("let src = bars.source(params.src);"));
        assert!(text.contains("PlotKind::Hline, \"70\", ops::series(70.0, bars.len())"));
    }

    #[test]
    fn plots_can_be_disabled() {
        let script = parse_source("//@version=5\nindicator(\"P\")\nplot(close)\n").unwrap();
        let exprs = transform_script(&script).unwrap();
        let options = GeneratorOptions {
            emit_plots: false,
            ..GeneratorOptions::default()
        };
        let generated = generate(&script, &exprs, &options).unwrap();
        assert!(!generated.text.contains("out.plot"));
    }

    #[test]
    fn closures_are_emitted_in_order() {
        let generated = generate_source(
            "//@version=5\nindicator(\"F\")\nf(x, n) =>\n    a = ta.sma(x, n)\n    a * 2\ny = f(close, 5)\n",
        );
        let text = &generated.text;
        let closure = text.find("let f = |x: &Series, n: f64| -> Series {").unwrap();
        let call = text.find("let y = f(&close, 5.0);").unwrap();
        assert!(closure < call);
        assert!(text.contains("        let f = |x: &Series, n: f64| -> Series {\n            let a = ta::sma(&x, ops::length(n));\n            ops::mul(&a, 2.0)\n        };"), "{text}");
    }

    #[test]
    fn bad_runtime_path_is_a_violation() {
        let script = parse_source("//@version=5\nindicator(\"P\")\nplot(close)\n").unwrap();
        let exprs = transform_script(&script).unwrap();
        let options = GeneratorOptions {
            runtime_path: "not a path".into(),
            ..GeneratorOptions::default()
        };
        let err = generate(&script, &exprs, &options).unwrap_err();
        assert_eq!(err.script, "P");
    }
}
