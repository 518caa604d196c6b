//! Rule-based converter.
//!
//! Orchestrates parse → validate → transform → generate for one script and
//! reports either the generated module or a typed rejection. Rejections are
//! ordinary outcomes (the caller routes the script to the fallback
//! converter); only a generator self-check failure is an error.

use crate::domain::ast::{AssignMode, OtherKind, Persistence, Script, ScriptKind};
use crate::domain::codegen::{self, GeneratorOptions};
use crate::domain::complexity::{ComplexityFactors, Route, Thresholds};
use crate::domain::error::{
    ComplexityRejected, GeneratorInvariantViolation, SyntaxError, UnsupportedConstruct,
};
use crate::domain::parser::parse_source;
use crate::domain::token::Span;
use crate::domain::transform::transform_script;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Deepest condition nesting the generator reproduces (0 = top level).
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct ConverterSettings {
    pub thresholds: Thresholds,
    pub max_nesting_depth: usize,
    pub generator: GeneratorOptions,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            generator: GeneratorOptions::default(),
        }
    }
}

/// A construct that was recognised but left out of the generated module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl Warning {
    fn at(span: Span, message: impl Into<String>) -> Self {
        Self {
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversion {
    pub source_text: String,
    pub type_name: String,
    pub complexity_score: f64,
    pub factors: ComplexityFactors,
    pub route: Route,
    pub warnings: Vec<Warning>,
    pub indicators_used: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Rejection {
    #[error(transparent)]
    Syntax(SyntaxError),
    #[error(transparent)]
    Complexity(ComplexityRejected),
    #[error(transparent)]
    Unsupported(UnsupportedConstruct),
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::Syntax(_) => "syntax",
            Rejection::Complexity(_) => "complexity",
            Rejection::Unsupported(_) => "unsupported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConversionOutcome {
    Converted(Conversion),
    Rejected(Rejection),
}

impl ConversionOutcome {
    pub fn is_converted(&self) -> bool {
        matches!(self, ConversionOutcome::Converted(_))
    }
}

/// Statement counts reported by [`RuleBasedConverter::analyze`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub inputs: usize,
    pub variables: usize,
    pub functions: usize,
    pub strategy_calls: usize,
    pub plots: usize,
    pub conditions: usize,
    pub type_decls: usize,
    pub collection_ops: usize,
    pub drawing_calls: usize,
    pub total_lines: usize,
    pub code_lines: usize,
    pub max_nesting_depth: usize,
}

/// Classification of a script without conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub name: String,
    pub kind: ScriptKind,
    pub version: u32,
    pub score: f64,
    pub factors: ComplexityFactors,
    pub route: Route,
    pub indicators_used: Vec<String>,
    pub counts: Counts,
}

/// A script read from somewhere, keyed by a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedScript {
    pub name: String,
    pub source: String,
}

impl NamedScript {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

#[derive(Debug)]
pub struct BatchItem {
    pub name: String,
    pub outcome: Result<ConversionOutcome, GeneratorInvariantViolation>,
}

#[derive(Debug, Clone, Default)]
pub struct RuleBasedConverter {
    settings: ConverterSettings,
}

impl RuleBasedConverter {
    pub fn new(settings: ConverterSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ConverterSettings {
        &self.settings
    }

    /// Parse and classify `source` without transforming it.
    pub fn analyze(&self, source: &str) -> Result<Analysis, SyntaxError> {
        let script = parse_source(source)?;
        let route = Route::classify(script.complexity_score(), &self.settings.thresholds);
        debug!(script = script.name(), score = script.complexity_score(), %route, "classified");
        Ok(Analysis {
            name: script.name().to_string(),
            kind: script.kind(),
            version: script.version(),
            score: script.complexity_score(),
            factors: script.complexity_factors(),
            route,
            indicators_used: script.indicators_used().iter().cloned().collect(),
            counts: Counts {
                inputs: script.inputs().len(),
                variables: script.variables().len(),
                functions: script.functions().len(),
                strategy_calls: script.strategy_calls().len(),
                plots: script.plots().len(),
                conditions: script.conditions().len(),
                type_decls: script.type_decls().len(),
                collection_ops: script.collection_ops().len(),
                drawing_calls: script.drawing_calls().len(),
                total_lines: script.total_lines(),
                code_lines: script.code_lines(),
                max_nesting_depth: script.max_nesting_depth(),
            },
        })
    }

    /// Convert one script.
    ///
    /// Syntax errors, complexity and unsupported constructs come back as
    /// [`ConversionOutcome::Rejected`]. The `Err` case is reserved for
    /// generated code failing its own syntax check.
    pub fn convert(&self, source: &str) -> Result<ConversionOutcome, GeneratorInvariantViolation> {
        let script = match parse_source(source) {
            Ok(script) => script,
            Err(e) => {
                info!(line = e.line, column = e.column, "rejected: {}", e.message);
                return Ok(ConversionOutcome::Rejected(Rejection::Syntax(e)));
            }
        };
        let score = script.complexity_score();
        let route = Route::classify(score, &self.settings.thresholds);

        if let Err(rejection) = self.validate(&script) {
            info!(script = script.name(), score, reason = rejection.reason(), "rejected: {}", rejection);
            return Ok(ConversionOutcome::Rejected(rejection));
        }

        let exprs = match transform_script(&script) {
            Ok(exprs) => exprs,
            Err(e) => {
                info!(script = script.name(), line = e.span.line, "rejected: {}", e.description);
                return Ok(ConversionOutcome::Rejected(Rejection::Unsupported(e)));
            }
        };
        let generated = codegen::generate(&script, &exprs, &self.settings.generator)?;

        let warnings = warnings(&script, self.settings.generator.emit_plots);
        for w in &warnings {
            warn!(script = script.name(), line = w.line, "{}", w.message);
        }
        info!(
            script = script.name(),
            type_name = %generated.type_name,
            score,
            warnings = warnings.len(),
            "converted"
        );
        Ok(ConversionOutcome::Converted(Conversion {
            source_text: generated.text,
            type_name: generated.type_name,
            complexity_score: score,
            factors: script.complexity_factors(),
            route,
            warnings,
            indicators_used: script.indicators_used().iter().cloned().collect(),
        }))
    }

    /// Convert every script independently; one failure never affects the rest.
    pub fn convert_batch(&self, scripts: &[NamedScript]) -> Vec<BatchItem> {
        scripts
            .iter()
            .map(|s| BatchItem {
                name: s.name.clone(),
                outcome: self.convert(&s.source),
            })
            .collect()
    }

    /// Refuse anything the transformer or generator cannot reproduce.
    /// Runs before any expression is lowered.
    fn validate(&self, script: &Script) -> Result<(), Rejection> {
        let score = script.complexity_score();
        if score >= self.settings.thresholds.mechanical {
            return Err(Rejection::Complexity(ComplexityRejected {
                score,
                threshold: self.settings.thresholds.mechanical,
                factors: script.complexity_factors(),
            }));
        }
        let unsupported = |span: Span, what: String| Err(Rejection::Unsupported(UnsupportedConstruct::new(span, what)));

        if let Some(t) = script.type_decls().first() {
            return unsupported(t.span, format!("user-defined type `{}`", t.name));
        }
        if let Some(op) = script.collection_ops().first() {
            return unsupported(op.span, format!("collection operation `{}.{}`", op.namespace, op.function));
        }
        if let Some(f) = script.functions().iter().find(|f| !f.callees.is_empty()) {
            let callee = &f.callees[0];
            let what = if *callee == f.name {
                format!("function `{}` calls itself", f.name)
            } else {
                format!("function `{}` calls user function `{}`", f.name, callee)
            };
            return unsupported(f.span, what);
        }
        let max_depth = self.settings.max_nesting_depth;
        if let Some(c) = script.conditions().iter().find(|c| c.nesting_depth > max_depth) {
            return unsupported(
                c.span,
                format!("condition nested {} levels deep (limit {})", c.nesting_depth, max_depth),
            );
        }
        if let Some(o) = script.other_statements().iter().find(|o| o.kind.is_unsupported()) {
            return unsupported(o.span, o.kind.describe().to_string());
        }
        if let Some(v) = script.variables().iter().find(|v| v.scope.is_some()) {
            return unsupported(v.span, "assignment inside a condition body".to_string());
        }
        if let Some(p) = script.plots().iter().find(|p| p.scope.is_some()) {
            return unsupported(p.span, format!("`{}` inside a condition body", p.kind.name()));
        }

        let mut persistent: BTreeSet<&str> = BTreeSet::new();
        for v in script.variables() {
            match v.mode {
                AssignMode::Declare if v.persistence != Persistence::None => {
                    persistent.extend(v.target.names());
                }
                AssignMode::Reassign | AssignMode::Compound(_) => {
                    if let Some(name) = v.target.names().into_iter().find(|n| persistent.contains(n)) {
                        return unsupported(v.span, format!("reassignment of persistent variable `{}`", name));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Recognised statements that the generated module leaves out.
fn warnings(script: &Script, emit_plots: bool) -> Vec<Warning> {
    let mut out: Vec<(usize, Warning)> = Vec::new();
    for o in script.other_statements() {
        let skipped = matches!(o.kind, OtherKind::Alert | OtherKind::Drawing | OtherKind::Expression);
        if skipped {
            let text = script.text(o.span).lines().next().unwrap_or("").trim();
            out.push((o.span.start, Warning::at(o.span, format!("{} skipped: `{}`", o.kind.describe(), text))));
        }
    }
    for p in script.plots() {
        if p.kind.is_decoration() {
            out.push((p.span.start, Warning::at(p.span, format!("`{}` has no runtime counterpart and was skipped", p.kind.name()))));
        } else if !emit_plots {
            out.push((p.span.start, Warning::at(p.span, format!("`{}` omitted: plot output is disabled", p.kind.name()))));
        }
    }
    out.sort_by_key(|(start, _)| *start);
    out.into_iter().map(|(_, w)| w).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_header(body: &str) -> String {
        format!("//@version=5\nindicator(\"T\")\n{}", body)
    }

    fn strategy(body: &str) -> String {
        format!("//@version=5\nstrategy(\"S\")\n{}", body)
    }

    fn convert(source: &str) -> ConversionOutcome {
        RuleBasedConverter::default().convert(source).unwrap()
    }

    fn rejection(source: &str) -> Rejection {
        match convert(source) {
            ConversionOutcome::Rejected(r) => r,
            ConversionOutcome::Converted(c) => panic!("expected rejection, got:\n{}", c.source_text),
        }
    }

    fn unsupported(source: &str) -> UnsupportedConstruct {
        match rejection(source) {
            Rejection::Unsupported(u) => u,
            other => panic!("expected unsupported construct, got {:?}", other),
        }
    }

    #[test]
    fn simple_indicator_converts() {
        let source = with_header("len = input.int(20, \"Length\")\nma = ta.sma(close, len)\nplot(ma)\n");
        let ConversionOutcome::Converted(c) = convert(&source) else {
            panic!("expected conversion");
        };
        assert!(c.complexity_score < 0.05);
        assert_eq!(c.route, Route::Mechanical);
        assert_eq!(c.indicators_used, vec!["ta.sma".to_string()]);
        assert_eq!(c.type_name, "T");
        assert!(c.source_text.contains("ta::sma(&close, ops::length(params.len))"));
        assert!(c.warnings.is_empty());
    }

    #[test]
    fn syntax_error_is_a_rejection() {
        let r = rejection("x = 1\n");
        assert_eq!(r.reason(), "syntax");
    }

    #[test]
    fn lowered_threshold_rejects_on_complexity() {
        let settings = ConverterSettings {
            thresholds: Thresholds {
                mechanical: 0.01,
                fallback: 0.7,
            },
            ..ConverterSettings::default()
        };
        let converter = RuleBasedConverter::new(settings);
        let source = with_header("ma = ta.sma(close, 20)\nplot(ma)\n");
        match converter.convert(&source).unwrap() {
            ConversionOutcome::Rejected(Rejection::Complexity(c)) => {
                assert_eq!(c.threshold, 0.01);
                assert!(c.score >= 0.01);
            }
            other => panic!("expected complexity rejection, got {:?}", other),
        }
    }

    #[test]
    fn recursive_function_is_unsupported() {
        let err = unsupported(&with_header("f(x) => f(x[1])\ny = f(close)\n"));
        assert_eq!(err.description, "function `f` calls itself");
        assert_eq!(err.span.line, 3);
    }

    #[test]
    fn function_calling_function_is_unsupported() {
        let err = unsupported(&with_header("g(x) => x * 2\nf(x) => g(x) + 1\ny = f(close)\n"));
        assert_eq!(err.description, "function `f` calls user function `g`");
    }

    #[test]
    fn deep_nesting_is_unsupported() {
        let source = strategy(
            "\
a = close > open
if a
    if a
        if a
            strategy.entry(\"L\", strategy.long)
",
        );
        let err = unsupported(&source);
        assert_eq!(err.description, "condition nested 2 levels deep (limit 1)");
    }

    #[test]
    fn one_level_of_nesting_is_allowed() {
        let source = strategy(
            "\
a = close > open
if a
    if close > close[1]
        strategy.entry(\"L\", strategy.long)
",
        );
        assert!(convert(&source).is_converted());
    }

    #[test]
    fn loops_and_collections_are_unsupported() {
        let err = unsupported(&with_header("for i = 0 to 10\n    x = i\n"));
        assert_eq!(err.description, "for loop");
        let err = unsupported(&with_header("a = array.new_float(0)\n"));
        assert_eq!(err.description, "collection operation `array.new_float`");
        let err = unsupported(&with_header("type Pivot\n    float price\n"));
        assert_eq!(err.description, "user-defined type `Pivot`");
    }

    #[test]
    fn assignment_in_condition_body_is_unsupported() {
        let err = unsupported(&with_header("x = 0.0\nif close > open\n    x := 1.0\n"));
        assert_eq!(err.description, "assignment inside a condition body");
        assert_eq!(err.span.line, 5);
    }

    #[test]
    fn persistent_reassignment_is_unsupported() {
        let err = unsupported(&with_header("var total = 0.0\ntotal := total + 1\n"));
        assert_eq!(err.description, "reassignment of persistent variable `total`");
    }

    #[test]
    fn unknown_indicator_surfaces_from_transform() {
        let err = unsupported(&with_header("x = ta.notreal(close, 5)\nplot(x)\n"));
        assert_eq!(err.description, "unknown indicator `ta.notreal`");
        assert_eq!(err.span.line, 3);
    }

    #[test]
    fn overflowing_literal_is_unsupported() {
        let err = unsupported(&with_header("x = 1e400\nplot(close * x)\n"));
        assert_eq!(err.description, "number literal out of range");
        assert_eq!((err.span.line, err.span.column), (3, 5));
    }

    #[test]
    fn skipped_statements_become_warnings() {
        let source = with_header("alert(\"hi\")\nbgcolor(color.red)\nplot(close)\n");
        let ConversionOutcome::Converted(c) = convert(&source) else {
            panic!("expected conversion");
        };
        let lines: Vec<usize> = c.warnings.iter().map(|w| w.line).collect();
        assert_eq!(lines, vec![3, 4]);
        assert!(c.warnings[0].message.starts_with("alert skipped"));
        assert!(c.warnings[1].message.contains("bgcolor"));
    }

    #[test]
    fn stray_bracket_is_a_syntax_rejection() {
        match rejection(&with_header(")\n")) {
            Rejection::Syntax(e) => {
                assert_eq!((e.line, e.column), (3, 1));
                assert_eq!(e.message, "unbalanced `)`");
            }
            other => panic!("expected syntax rejection, got {:?}", other),
        }
    }

    #[test]
    fn rejection_is_deterministic() {
        let source = with_header("x = ta.notreal(close, 5)\n");
        assert_eq!(convert(&source), convert(&source));
    }

    #[test]
    fn analyze_reports_counts() {
        let source = strategy(
            "\
fast = ta.ema(close, 9)
slow = ta.ema(close, 21)
if ta.crossover(fast, slow)
    strategy.entry(\"L\", strategy.long)
",
        );
        let analysis = RuleBasedConverter::default().analyze(&source).unwrap();
        assert_eq!(analysis.kind, ScriptKind::Strategy);
        assert_eq!(analysis.counts.variables, 2);
        assert_eq!(analysis.counts.conditions, 1);
        assert_eq!(analysis.counts.strategy_calls, 1);
        assert_eq!(analysis.indicators_used, vec!["ta.crossover".to_string(), "ta.ema".to_string()]);
        assert_eq!(analysis.route, Route::Mechanical);
    }

    #[test]
    fn batch_converts_independently() {
        let scripts = vec![
            NamedScript::new("bad", "garbage"),
            NamedScript::new("good", with_header("plot(close)\n")),
        ];
        let results = RuleBasedConverter::default().convert_batch(&scripts);
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0].outcome,
            Ok(ConversionOutcome::Rejected(Rejection::Syntax(_)))
        ));
        assert!(matches!(results[1].outcome, Ok(ConversionOutcome::Converted(_))));
        assert_eq!(results[1].name, "good");
    }
}
