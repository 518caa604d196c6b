//! Expression transformer.
//!
//! Lowers script expressions to Rust expressions over the runtime library.
//! Every value is classified as a scalar (`f64`, `bool`) or a [`Series`];
//! scalar arithmetic stays native Rust and anything touching a series goes
//! through `runtime::ops`. Registry calls become `ta::*` calls with missing
//! arguments filled from the registry defaults.
//!
//! [`Series`]: crate::runtime::Series

use crate::domain::ast::{
    AssignMode, FuncDecl, FuncParam, InputDecl, InputKind, InputValue, Persistence, PlotKind,
    Script, Target, VarDecl,
};
use crate::domain::error::UnsupportedConstruct;
use crate::domain::expr::{Arg, BinaryOp, Expr, ExprKind, UnaryOp, parse_expression};
use crate::domain::lexer::tokenize;
use crate::domain::registry::{self, Mapping, ParamKind};
use crate::domain::token::{BuiltinSeries, Operator, Span, Token, TokenKind};
use std::collections::BTreeSet;
use tracing::trace;

/// Static classification of a lowered value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Scalar `f64`.
    Number,
    /// Scalar `bool`.
    Bool,
    /// String or color; only usable as plot metadata.
    Text,
    Series,
    /// `strategy.long` or `strategy.short`.
    Direction,
    /// Several series from one multi-output indicator.
    Tuple(usize),
}

impl ValueKind {
    fn describe(self) -> String {
        match self {
            ValueKind::Number => "number".into(),
            ValueKind::Bool => "bool".into(),
            ValueKind::Text => "string".into(),
            ValueKind::Series => "series".into(),
            ValueKind::Direction => "strategy direction".into(),
            ValueKind::Tuple(n) => format!("{}-value tuple", n),
        }
    }

    fn rust_type(self) -> &'static str {
        match self {
            ValueKind::Bool => "bool",
            ValueKind::Series => "Series",
            _ => "f64",
        }
    }
}

/// Runtime items and implicit locals a piece of generated code depends on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Uses {
    pub builtins: BTreeSet<BuiltinSeries>,
    /// `hl2`, `hlc3`, `ohlc4`, `hlcc4`.
    pub derived: BTreeSet<&'static str>,
    pub bar_index: bool,
    pub ops: bool,
    /// Qualified registry names invoked.
    pub indicators: BTreeSet<&'static str>,
    pub series_type: bool,
    pub direction: bool,
}

impl Uses {
    pub fn merge(&mut self, other: &Uses) {
        self.builtins.extend(other.builtins.iter().copied());
        self.derived.extend(other.derived.iter().copied());
        self.bar_index |= other.bar_index;
        self.ops |= other.ops;
        self.indicators.extend(other.indicators.iter().copied());
        self.series_type |= other.series_type;
        self.direction |= other.direction;
    }
}

/// A lowered expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub code: String,
    pub kind: ValueKind,
    /// `code` names an existing series binding rather than building a temporary.
    pub place: bool,
    pub uses: Uses,
}

impl Transformed {
    /// Form accepted by `ops::*` parameters.
    pub fn operand(&self) -> String {
        if self.place && self.kind == ValueKind::Series {
            format!("&{}", self.code)
        } else {
            self.code.clone()
        }
    }

    /// An owned `Series`, broadcasting scalars over the bar count.
    pub fn series_value(&self) -> String {
        match self.kind {
            ValueKind::Series if self.place => format!("{}.clone()", self.code),
            ValueKind::Series => self.code.clone(),
            _ => format!("ops::series({}, bars.len())", self.code),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnParam {
    pub name: String,
    pub rust_name: String,
    pub kind: ValueKind,
    /// Lowered default, already in the form the closure parameter takes.
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    pub params: Vec<FnParam>,
    pub returns: ValueKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    Input(InputKind),
    Value(ValueKind),
    Function(FunctionSig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub rust_name: String,
    pub role: Role,
}

const RESERVED: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "gen", "if", "impl", "in", "let", "loop", "match", "mod",
    "move", "mut", "pub", "ref", "return", "self", "static", "struct", "super", "trait", "true",
    "type", "unsafe", "use", "where", "while", "abstract", "become", "box", "do", "final",
    "macro", "override", "priv", "try", "typeof", "unsized", "virtual", "yield", "union", "_",
    // names the generated `run` body already uses
    "bars", "params", "out", "idx", "ops", "ta", "std", "core", "open", "high", "low", "close",
    "volume", "hl2", "hlc3", "ohlc4", "hlcc4", "bar_index", "f64", "i64", "usize", "bool", "str",
];

/// snake_case spelling of a script identifier.
pub(crate) fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = i.checked_sub(1).map(|j| chars[j]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.is_some_and(|n| n.is_ascii_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, 'v');
    }
    out
}

fn rust_ident(name: &str) -> String {
    let mut ident = snake_case(name);
    if RESERVED.contains(&ident.as_str()) {
        ident.push('_');
    }
    ident
}

/// Every name visible to the generated `run` body, in declaration order.
///
/// Rust names are unique except across reassignment, which rebinds the same
/// name so later code sees the new value through shadowing.
#[derive(Debug, Clone)]
pub struct Scope {
    bindings: Vec<Binding>,
    taken: BTreeSet<String>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            taken: RESERVED.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().rev().find(|b| b.name == name)
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    fn unique(&mut self, base: String) -> String {
        let mut candidate = base.clone();
        let mut n = 2;
        while self.taken.contains(&candidate) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }

    /// Bind `name` under a fresh Rust name and return it.
    pub fn declare(&mut self, name: &str, role: Role) -> String {
        let rust_name = self.unique(rust_ident(name));
        self.bindings.push(Binding {
            name: name.to_string(),
            rust_name: rust_name.clone(),
            role,
        });
        rust_name
    }

    /// Rebind an existing `name`, keeping its Rust name.
    pub fn redeclare(&mut self, name: &str, role: Role) -> Option<String> {
        let rust_name = self.lookup(name)?.rust_name.clone();
        self.bindings.push(Binding {
            name: name.to_string(),
            rust_name: rust_name.clone(),
            role,
        });
        Some(rust_name)
    }

    /// An unused Rust name `base_N` for a generated binding.
    pub fn fresh(&mut self, base: &str) -> String {
        let mut n = 0;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !self.taken.contains(&candidate) {
                self.taken.insert(candidate.clone());
                return candidate;
            }
            n += 1;
        }
    }
}

#[derive(Debug, Clone)]
struct Local {
    name: String,
    rust_name: String,
    kind: ValueKind,
}

/// Name resolution for one statement: the shared script scope plus the
/// parameters and locals of the function being lowered, if any.
pub struct TransformationContext<'s> {
    scope: &'s Scope,
    locals: Vec<Local>,
    expected_arity: Option<usize>,
}

impl<'s> TransformationContext<'s> {
    pub fn new(scope: &'s Scope) -> Self {
        Self {
            scope,
            locals: Vec::new(),
            expected_arity: None,
        }
    }

    /// Accept a multi-output call yielding exactly `arity` series.
    pub fn expecting(mut self, arity: usize) -> Self {
        self.expected_arity = Some(arity);
        self
    }

    fn local(&self, name: &str) -> Option<&Local> {
        self.locals.iter().rev().find(|l| l.name == name)
    }
}

/// Parse and lower `raw`, the source text found at `at`.
pub fn transform(
    raw: &str,
    at: Span,
    ctx: &TransformationContext<'_>,
) -> Result<Transformed, UnsupportedConstruct> {
    let expr = parse_expression(raw, at)?;
    transform_expr(&expr, ctx)
}

pub fn transform_expr(
    expr: &Expr,
    ctx: &TransformationContext<'_>,
) -> Result<Transformed, UnsupportedConstruct> {
    let mut lowerer = Lowerer {
        ctx,
        uses: Uses::default(),
    };
    let lowered = lowerer.lower(expr)?;
    match (lowered.kind, ctx.expected_arity) {
        (ValueKind::Tuple(n), Some(m)) if n == m => {}
        (ValueKind::Tuple(n), Some(m)) => {
            return Err(UnsupportedConstruct::new(
                expr.span,
                format!("call yields {} values but {} names are bound", n, m),
            ));
        }
        (ValueKind::Tuple(n), None) => {
            return Err(UnsupportedConstruct::new(
                expr.span,
                format!("call yields {} values and must be bound to a tuple", n),
            ));
        }
        (_, Some(m)) => {
            return Err(UnsupportedConstruct::new(
                expr.span,
                format!("a tuple of {} names needs a multi-output indicator call", m),
            ));
        }
        _ => {}
    }
    trace!(code = %lowered.code, "lowered expression");
    Ok(Transformed {
        code: lowered.code,
        kind: lowered.kind,
        place: lowered.place,
        uses: lowerer.uses,
    })
}

#[derive(Debug, Clone)]
struct Lowered {
    code: String,
    kind: ValueKind,
    place: bool,
    /// `usize` spelling when the value is used as a window length.
    length: Option<String>,
}

impl Lowered {
    fn scalar(code: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            code: code.into(),
            kind,
            place: false,
            length: None,
        }
    }

    fn series(code: impl Into<String>) -> Self {
        Self::scalar(code, ValueKind::Series)
    }

    fn place(name: impl Into<String>) -> Self {
        Self {
            place: true,
            ..Self::series(name)
        }
    }

    fn number_literal(value: f64, is_int: bool) -> Self {
        Self {
            length: is_int.then(|| format!("{}", value as i64)),
            ..Self::scalar(format!("{:?}", value), ValueKind::Number)
        }
    }

    fn is_scalar(&self) -> bool {
        matches!(self.kind, ValueKind::Number | ValueKind::Bool)
    }
}

fn unsupported(span: Span, description: impl Into<String>) -> UnsupportedConstruct {
    UnsupportedConstruct::new(span, description)
}

/// Where a registry call's arguments land, or an error naming the bad one.
fn bind_indicator_args<'e>(
    mapping: &Mapping,
    args: &'e [Arg],
    span: Span,
) -> Result<Vec<Option<&'e Expr>>, UnsupportedConstruct> {
    let params = mapping.params;
    let positional: Vec<&Arg> = args.iter().filter(|a| a.name.is_none()).collect();
    let first_named = args
        .iter()
        .any(|a| params.first().is_some_and(|p| a.name.as_deref() == Some(p.name)));
    let shift = usize::from(
        mapping.leading_source_optional && !first_named && positional.len() + 1 == params.len(),
    );
    if positional.len() + shift > params.len() {
        return Err(unsupported(
            span,
            format!(
                "`{}` takes at most {} arguments, got {}",
                mapping.qualified_name,
                params.len(),
                positional.len()
            ),
        ));
    }

    let mut slots: Vec<Option<&Expr>> = vec![None; params.len()];
    for (i, arg) in positional.iter().enumerate() {
        slots[i + shift] = Some(&arg.value);
    }
    for arg in args {
        let Some(name) = arg.name.as_deref() else {
            continue;
        };
        let Some((i, _)) = mapping.param(name) else {
            return Err(unsupported(
                arg.span,
                format!("`{}` has no parameter `{}`", mapping.qualified_name, name),
            ));
        };
        if slots[i].is_some() {
            return Err(unsupported(arg.span, format!("argument `{}` given twice", name)));
        }
        slots[i] = Some(&arg.value);
    }
    Ok(slots)
}

struct Lowerer<'c, 's> {
    ctx: &'c TransformationContext<'s>,
    uses: Uses,
}

impl Lowerer<'_, '_> {
    fn lower(&mut self, expr: &Expr) -> Result<Lowered, UnsupportedConstruct> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Number { value, is_int } => Ok(Lowered::number_literal(*value, *is_int)),
            ExprKind::Str(text) => Ok(Lowered::scalar(format!("{:?}", text), ValueKind::Text)),
            ExprKind::Color(text) => Ok(Lowered::scalar(format!("{:?}", text), ValueKind::Text)),
            ExprKind::Bool(b) => Ok(Lowered::scalar(b.to_string(), ValueKind::Bool)),
            ExprKind::Na => {
                self.uses.series_type = true;
                Ok(Lowered::series("Series::na(bars.len())"))
            }
            ExprKind::Series(series) => {
                self.uses.builtins.insert(*series);
                Ok(Lowered::place(series.name()))
            }
            ExprKind::Ident(name) => self.ident(name, span),
            ExprKind::Member { namespace, name } => self.member(namespace, name, span),
            ExprKind::Call { callee, args } => self.call(callee, args, span),
            ExprKind::Index { target, offset } => self.index(target, offset),
            ExprKind::Unary { op, operand } => self.unary(*op, operand, span),
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.lower(lhs)?;
                let r = self.lower(rhs)?;
                self.combine(*op, l, r, span)
            }
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => self.ternary(cond, then, otherwise, span),
            ExprKind::Tuple(_) => Err(unsupported(span, "tuple literal")),
        }
    }

    fn ident(&mut self, name: &str, span: Span) -> Result<Lowered, UnsupportedConstruct> {
        if let Some(local) = self.ctx.local(name) {
            return Ok(match local.kind {
                ValueKind::Series => Lowered::place(local.rust_name.clone()),
                kind => Lowered::scalar(local.rust_name.clone(), kind),
            });
        }
        let scope: &Scope = self.ctx.scope;
        if let Some(binding) = scope.lookup(name) {
            let rust = binding.rust_name.clone();
            return match &binding.role {
                Role::Input(InputKind::Int) => {
                    self.uses.ops = true;
                    Ok(Lowered {
                        length: Some(format!("ops::length(params.{})", rust)),
                        ..Lowered::scalar(format!("(params.{} as f64)", rust), ValueKind::Number)
                    })
                }
                Role::Input(InputKind::Float) => {
                    Ok(Lowered::scalar(format!("params.{}", rust), ValueKind::Number))
                }
                Role::Input(InputKind::Bool) => {
                    Ok(Lowered::scalar(format!("params.{}", rust), ValueKind::Bool))
                }
                Role::Input(InputKind::String | InputKind::Color) => Ok(Lowered::scalar(
                    format!("params.{}.as_str()", rust),
                    ValueKind::Text,
                )),
                // Source inputs are materialised as a series local of the same name.
                Role::Input(InputKind::Source) => Ok(Lowered::place(rust)),
                Role::Value(ValueKind::Series) => Ok(Lowered::place(rust)),
                Role::Value(kind) => Ok(Lowered::scalar(rust, *kind)),
                Role::Function(_) => Err(unsupported(
                    span,
                    format!("function `{}` used as a value", name),
                )),
            };
        }
        match name {
            "hl2" | "hlc3" | "ohlc4" | "hlcc4" => {
                let derived: &'static str = match name {
                    "hl2" => "hl2",
                    "hlc3" => "hlc3",
                    "ohlc4" => "ohlc4",
                    _ => "hlcc4",
                };
                self.uses.derived.insert(derived);
                Ok(Lowered::place(derived))
            }
            "bar_index" => {
                self.uses.bar_index = true;
                Ok(Lowered::place("bar_index"))
            }
            _ => Err(unsupported(span, format!("unknown identifier `{}`", name))),
        }
    }

    fn member(&mut self, namespace: &str, name: &str, span: Span) -> Result<Lowered, UnsupportedConstruct> {
        match (namespace, name) {
            ("strategy", "long") => {
                self.uses.direction = true;
                Ok(Lowered::scalar("Direction::Long", ValueKind::Direction))
            }
            ("strategy", "short") => {
                self.uses.direction = true;
                Ok(Lowered::scalar("Direction::Short", ValueKind::Direction))
            }
            ("math", "pi") => Ok(Lowered::scalar("std::f64::consts::PI", ValueKind::Number)),
            ("math", "e") => Ok(Lowered::scalar("std::f64::consts::E", ValueKind::Number)),
            ("color", _) => Ok(Lowered::scalar(
                format!("{:?}", format!("color.{}", name)),
                ValueKind::Text,
            )),
            ("ta", _) => {
                let qualified = format!("ta.{}", name);
                match registry::lookup(&qualified) {
                    Some(mapping) if mapping.required_params() == 0 => {
                        self.indicator(mapping, &[], span)
                    }
                    Some(_) => Err(unsupported(span, format!("`{}` needs arguments", qualified))),
                    None => Err(unsupported(span, format!("unknown indicator `{}`", qualified))),
                }
            }
            _ => Err(unsupported(
                span,
                format!("`{}.{}` is not supported", namespace, name),
            )),
        }
    }

    fn call(&mut self, callee: &Expr, args: &[Arg], span: Span) -> Result<Lowered, UnsupportedConstruct> {
        match &callee.kind {
            ExprKind::Member { namespace, name } => match namespace.as_str() {
                "ta" => {
                    let qualified = format!("ta.{}", name);
                    let mapping = registry::lookup(&qualified).ok_or_else(|| {
                        unsupported(callee.span, format!("unknown indicator `{}`", qualified))
                    })?;
                    self.indicator(mapping, args, span)
                }
                "math" => self.math(name, args, span),
                _ => Err(unsupported(
                    callee.span,
                    format!("`{}.{}()` is not supported", namespace, name),
                )),
            },
            ExprKind::Ident(name) => {
                let scope: &Scope = self.ctx.scope;
                if let Some(Binding {
                    rust_name,
                    role: Role::Function(sig),
                    ..
                }) = scope.lookup(name)
                {
                    return self.user_call(name, rust_name, sig, args, span);
                }
                match name.as_str() {
                    "nz" => self.nz(args, span),
                    "na" => self.na(args, span),
                    "int" => self.cast_int(args, span),
                    "float" => {
                        let [arg] = self.positional::<1>("float", args, span)?;
                        let value = self.lower(arg)?;
                        self.numeric(&value, arg.span, "argument of `float`")?;
                        Ok(value)
                    }
                    _ => Err(unsupported(callee.span, format!("unknown function `{}`", name))),
                }
            }
            _ => Err(unsupported(callee.span, "call of a value that is not a function")),
        }
    }

    fn positional<'e, const N: usize>(
        &self,
        function: &str,
        args: &'e [Arg],
        span: Span,
    ) -> Result<[&'e Expr; N], UnsupportedConstruct> {
        if let Some(named) = args.iter().find(|a| a.name.is_some()) {
            return Err(unsupported(
                named.span,
                format!("`{}` takes positional arguments only", function),
            ));
        }
        let exprs: Vec<&Expr> = args.iter().map(|a| &a.value).collect();
        exprs.try_into().map_err(|_| {
            unsupported(
                span,
                format!("`{}` takes {} argument(s), got {}", function, N, args.len()),
            )
        })
    }

    /// Reject values `ops` cannot take.
    fn check_operand(&self, value: &Lowered, span: Span) -> Result<(), UnsupportedConstruct> {
        match value.kind {
            ValueKind::Number | ValueKind::Bool | ValueKind::Series => Ok(()),
            ValueKind::Tuple(n) => Err(unsupported(
                span,
                format!("call yields {} values and must be bound to a tuple", n),
            )),
            kind => Err(unsupported(
                span,
                format!("{} used in an expression", kind.describe()),
            )),
        }
    }

    fn numeric(&self, value: &Lowered, span: Span, what: &str) -> Result<(), UnsupportedConstruct> {
        match value.kind {
            ValueKind::Number | ValueKind::Series => Ok(()),
            kind => Err(unsupported(
                span,
                format!("{} must be a number or series, found {}", what, kind.describe()),
            )),
        }
    }

    fn operand(&self, value: &Lowered) -> String {
        if value.place && value.kind == ValueKind::Series {
            format!("&{}", value.code)
        } else {
            value.code.clone()
        }
    }

    /// `&Series` argument; scalars are broadcast.
    fn series_ref(&mut self, value: &Lowered, span: Span, what: &str) -> Result<String, UnsupportedConstruct> {
        match value.kind {
            ValueKind::Series => Ok(format!("&{}", value.code)),
            ValueKind::Number | ValueKind::Bool => {
                self.uses.ops = true;
                Ok(format!("&ops::series({}, bars.len())", value.code))
            }
            kind => Err(unsupported(
                span,
                format!("{} must be a series, found {}", what, kind.describe()),
            )),
        }
    }

    fn length(&mut self, value: &Lowered, span: Span, what: &str) -> Result<String, UnsupportedConstruct> {
        if value.kind != ValueKind::Number {
            return Err(unsupported(
                span,
                format!("{} must be a number, found {}", what, value.kind.describe()),
            ));
        }
        if let Some(length) = &value.length {
            return Ok(length.clone());
        }
        self.uses.ops = true;
        Ok(format!("ops::length({})", value.code))
    }

    fn as_bool(value: &Lowered) -> String {
        match value.kind {
            ValueKind::Number => format!("({} != 0.0)", value.code),
            _ => value.code.clone(),
        }
    }

    fn combine(&mut self, op: BinaryOp, l: Lowered, r: Lowered, span: Span) -> Result<Lowered, UnsupportedConstruct> {
        self.check_operand(&l, span)?;
        self.check_operand(&r, span)?;
        if l.kind == ValueKind::Series || r.kind == ValueKind::Series {
            self.uses.ops = true;
            let code = format!("ops::{}({}, {})", op.ops_fn(), self.operand(&l), self.operand(&r));
            return Ok(Lowered::series(code));
        }
        let symbol = op.rust_symbol();
        if op.is_logical() {
            let code = format!("({} {} {})", Self::as_bool(&l), symbol, Self::as_bool(&r));
            return Ok(Lowered::scalar(code, ValueKind::Bool));
        }
        if op.is_comparison() {
            if l.kind != r.kind {
                return Err(unsupported(span, "comparison between a number and a bool"));
            }
            return Ok(Lowered::scalar(
                format!("({} {} {})", l.code, symbol, r.code),
                ValueKind::Bool,
            ));
        }
        if l.kind != ValueKind::Number || r.kind != ValueKind::Number {
            return Err(unsupported(span, "arithmetic on bool values"));
        }
        Ok(Lowered::scalar(
            format!("({} {} {})", l.code, symbol, r.code),
            ValueKind::Number,
        ))
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> Result<Lowered, UnsupportedConstruct> {
        let value = self.lower(operand)?;
        self.check_operand(&value, span)?;
        match (op, value.kind) {
            (UnaryOp::Plus, ValueKind::Number | ValueKind::Series) => Ok(value),
            (UnaryOp::Neg, ValueKind::Number) => Ok(Lowered::scalar(
                format!("(-{})", value.code),
                ValueKind::Number,
            )),
            (UnaryOp::Not, ValueKind::Bool) => {
                Ok(Lowered::scalar(format!("(!{})", value.code), ValueKind::Bool))
            }
            (UnaryOp::Not, ValueKind::Number) => Ok(Lowered::scalar(
                format!("({} == 0.0)", value.code),
                ValueKind::Bool,
            )),
            (UnaryOp::Neg | UnaryOp::Not, ValueKind::Series) => {
                self.uses.ops = true;
                let function = if op == UnaryOp::Neg { "neg" } else { "not" };
                Ok(Lowered::series(format!("ops::{}({})", function, self.operand(&value))))
            }
            _ => Err(unsupported(span, "sign applied to a bool")),
        }
    }

    fn ternary(&mut self, cond: &Expr, then: &Expr, otherwise: &Expr, span: Span) -> Result<Lowered, UnsupportedConstruct> {
        let c = self.lower(cond)?;
        let a = self.lower(then)?;
        let b = self.lower(otherwise)?;
        self.check_operand(&c, cond.span)?;
        self.check_operand(&a, then.span)?;
        self.check_operand(&b, otherwise.span)?;
        if c.is_scalar() && a.is_scalar() && b.is_scalar() {
            if a.kind != b.kind {
                return Err(unsupported(span, "conditional branches of different types"));
            }
            let code = format!(
                "(if {} {{ {} }} else {{ {} }})",
                Self::as_bool(&c),
                a.code,
                b.code
            );
            return Ok(Lowered::scalar(code, a.kind));
        }
        self.uses.ops = true;
        Ok(Lowered::series(format!(
            "ops::select({}, {}, {})",
            self.operand(&c),
            self.operand(&a),
            self.operand(&b)
        )))
    }

    fn index(&mut self, target: &Expr, offset: &Expr) -> Result<Lowered, UnsupportedConstruct> {
        let value = self.lower(target)?;
        let n = self.lower(offset)?;
        if n.kind == ValueKind::Series {
            return Err(unsupported(offset.span, "history offset that varies per bar"));
        }
        let n = self.length(&n, offset.span, "history offset")?;
        match value.kind {
            ValueKind::Series if value.place => {
                Ok(Lowered::series(format!("{}.shift({})", value.code, n)))
            }
            ValueKind::Series => Ok(Lowered::series(format!("({}).shift({})", value.code, n))),
            // A scalar has the same value on every bar.
            ValueKind::Number | ValueKind::Bool => Ok(value),
            kind => Err(unsupported(
                target.span,
                format!("history of a {}", kind.describe()),
            )),
        }
    }

    fn nz(&mut self, args: &[Arg], span: Span) -> Result<Lowered, UnsupportedConstruct> {
        let (value_expr, replacement) = match args {
            [value] => (value, None),
            [value, replacement] => (value, Some(replacement)),
            _ => return Err(unsupported(span, "`nz` takes one or two arguments")),
        };
        let value = self.lower(&value_expr.value)?;
        self.check_operand(&value, value_expr.span)?;
        if value.kind != ValueKind::Series {
            return Ok(value);
        }
        let replacement = match replacement {
            Some(arg) => {
                let r = self.lower(&arg.value)?;
                self.check_operand(&r, arg.span)?;
                self.operand(&r)
            }
            None => "0.0".to_string(),
        };
        self.uses.ops = true;
        Ok(Lowered::series(format!("ops::nz({}, {})", self.operand(&value), replacement)))
    }

    fn na(&mut self, args: &[Arg], span: Span) -> Result<Lowered, UnsupportedConstruct> {
        let [arg] = self.positional::<1>("na", args, span)?;
        let value = self.lower(arg)?;
        self.check_operand(&value, arg.span)?;
        if value.kind != ValueKind::Series {
            // literals and inputs are never missing
            return Ok(Lowered::scalar("false", ValueKind::Bool));
        }
        self.uses.ops = true;
        Ok(Lowered::series(format!("ops::is_na({})", self.operand(&value))))
    }

    fn cast_int(&mut self, args: &[Arg], span: Span) -> Result<Lowered, UnsupportedConstruct> {
        let [arg] = self.positional::<1>("int", args, span)?;
        let value = self.lower(arg)?;
        self.numeric(&value, arg.span, "argument of `int`")?;
        if value.kind == ValueKind::Number {
            return Ok(Lowered {
                length: value.length.clone(),
                ..Lowered::scalar(format!("({}).trunc()", value.code), ValueKind::Number)
            });
        }
        self.uses.ops = true;
        Ok(Lowered::series(format!("ops::apply({}, f64::trunc)", self.operand(&value))))
    }

    fn math(&mut self, name: &str, args: &[Arg], span: Span) -> Result<Lowered, UnsupportedConstruct> {
        let unary = match name {
            "abs" => Some("abs"),
            "ceil" => Some("ceil"),
            "floor" => Some("floor"),
            "round" => Some("round"),
            "sqrt" => Some("sqrt"),
            "exp" => Some("exp"),
            "log" => Some("ln"),
            "log10" => Some("log10"),
            "sign" => Some("sign"),
            _ => None,
        };
        if let Some(method) = unary {
            let qualified = format!("math.{}", name);
            let [arg] = self.positional::<1>(&qualified, args, span)?;
            let value = self.lower(arg)?;
            self.numeric(&value, arg.span, "math argument")?;
            return Ok(match (value.kind, method) {
                (ValueKind::Number, "sign") => {
                    self.uses.ops = true;
                    Lowered::scalar(format!("ops::sign({})", value.code), ValueKind::Number)
                }
                (ValueKind::Number, _) => {
                    Lowered::scalar(format!("({}).{}()", value.code, method), ValueKind::Number)
                }
                (_, "sign") => {
                    self.uses.ops = true;
                    Lowered::series(format!("ops::apply({}, ops::sign)", self.operand(&value)))
                }
                _ => {
                    self.uses.ops = true;
                    Lowered::series(format!("ops::apply({}, f64::{})", self.operand(&value), method))
                }
            });
        }

        match name {
            "max" | "min" | "pow" => {
                let method = if name == "pow" { "powf" } else { name };
                if args.len() < 2 || (name == "pow" && args.len() != 2) {
                    return Err(unsupported(span, format!("`math.{}` needs two arguments", name)));
                }
                if let Some(named) = args.iter().find(|a| a.name.is_some()) {
                    return Err(unsupported(named.span, "named argument to a math function"));
                }
                let mut acc = self.lower(&args[0].value)?;
                self.numeric(&acc, args[0].span, "math argument")?;
                for arg in &args[1..] {
                    let next = self.lower(&arg.value)?;
                    self.numeric(&next, arg.span, "math argument")?;
                    acc = if acc.kind == ValueKind::Number && next.kind == ValueKind::Number {
                        Lowered::scalar(
                            format!("({}).{}({})", acc.code, method, next.code),
                            ValueKind::Number,
                        )
                    } else {
                        self.uses.ops = true;
                        Lowered::series(format!(
                            "ops::apply2({}, {}, f64::{})",
                            self.operand(&acc),
                            self.operand(&next),
                            method
                        ))
                    };
                }
                Ok(acc)
            }
            "avg" => {
                if args.is_empty() {
                    return Err(unsupported(span, "`math.avg` needs arguments"));
                }
                let mut sum = self.lower(&args[0].value)?;
                for arg in &args[1..] {
                    let next = self.lower(&arg.value)?;
                    sum = self.combine(BinaryOp::Add, sum, next, arg.span)?;
                }
                let count = Lowered::number_literal(args.len() as f64, false);
                self.combine(BinaryOp::Div, sum, count, span)
            }
            _ => Err(unsupported(span, format!("`math.{}` is not supported", name))),
        }
    }

    fn indicator(&mut self, mapping: &Mapping, args: &[Arg], span: Span) -> Result<Lowered, UnsupportedConstruct> {
        let slots = bind_indicator_args(mapping, args, span)?;
        let mut rendered = Vec::with_capacity(slots.len() + 1);
        if mapping.needs_bars {
            rendered.push("bars".to_string());
        }
        for (param, slot) in mapping.params.iter().zip(slots) {
            let expr = match (slot, param.default) {
                (Some(expr), _) => expr.clone(),
                (None, Some(default)) => parse_expression(default, span)?,
                (None, None) => {
                    return Err(unsupported(
                        span,
                        format!("`{}` is missing argument `{}`", mapping.qualified_name, param.name),
                    ));
                }
            };
            let value = self.lower(&expr)?;
            let what = format!("argument `{}` of `{}`", param.name, mapping.qualified_name);
            let code = match param.kind {
                ParamKind::Source => self.series_ref(&value, expr.span, &what)?,
                ParamKind::Length => self.length(&value, expr.span, &what)?,
                ParamKind::Value if value.kind == ValueKind::Number => value.code,
                ParamKind::Flag if value.kind == ValueKind::Bool => value.code,
                ParamKind::Value | ParamKind::Flag => {
                    return Err(unsupported(
                        expr.span,
                        format!("{} must be a constant, found {}", what, value.kind.describe()),
                    ));
                }
            };
            rendered.push(code);
        }
        self.uses.indicators.insert(mapping.qualified_name);
        let code = format!("{}({})", mapping.target_path(), rendered.join(", "));
        Ok(Lowered {
            kind: if mapping.outputs > 1 {
                ValueKind::Tuple(mapping.outputs)
            } else {
                ValueKind::Series
            },
            ..Lowered::series(code)
        })
    }

    fn user_call(
        &mut self,
        name: &str,
        rust_name: &str,
        sig: &FunctionSig,
        args: &[Arg],
        span: Span,
    ) -> Result<Lowered, UnsupportedConstruct> {
        let positional: Vec<&Arg> = args.iter().filter(|a| a.name.is_none()).collect();
        if positional.len() > sig.params.len() {
            return Err(unsupported(
                span,
                format!("`{}` takes {} arguments, got {}", name, sig.params.len(), args.len()),
            ));
        }
        let mut slots: Vec<Option<&Expr>> = vec![None; sig.params.len()];
        for (i, arg) in positional.iter().enumerate() {
            slots[i] = Some(&arg.value);
        }
        for arg in args {
            let Some(arg_name) = arg.name.as_deref() else {
                continue;
            };
            let Some(i) = sig.params.iter().position(|p| p.name == arg_name) else {
                return Err(unsupported(
                    arg.span,
                    format!("`{}` has no parameter `{}`", name, arg_name),
                ));
            };
            slots[i] = Some(&arg.value);
        }

        let mut rendered = Vec::with_capacity(slots.len());
        for (param, slot) in sig.params.iter().zip(slots) {
            let Some(expr) = slot else {
                match &param.default {
                    Some(default) => {
                        rendered.push(default.clone());
                        continue;
                    }
                    None => {
                        return Err(unsupported(
                            span,
                            format!("`{}` is missing argument `{}`", name, param.name),
                        ));
                    }
                }
            };
            let value = self.lower(expr)?;
            let what = format!("argument `{}` of `{}`", param.name, name);
            rendered.push(self.convert_param(&value, param.kind, expr.span, &what)?);
        }

        let code = format!("{}({})", rust_name, rendered.join(", "));
        Ok(match sig.returns {
            ValueKind::Series => Lowered::series(code),
            kind => Lowered::scalar(code, kind),
        })
    }

    /// Spell `value` the way a closure parameter of `kind` takes it.
    fn convert_param(
        &mut self,
        value: &Lowered,
        kind: ValueKind,
        span: Span,
        what: &str,
    ) -> Result<String, UnsupportedConstruct> {
        match (kind, value.kind) {
            (ValueKind::Series, _) => self.series_ref(value, span, what),
            (ValueKind::Number, ValueKind::Number) => Ok(value.code.clone()),
            (ValueKind::Bool, ValueKind::Bool) => Ok(value.code.clone()),
            (expected, found) => Err(unsupported(
                span,
                format!("{} must be a {}, found {}", what, expected.describe(), found.describe()),
            )),
        }
    }
}

/// Key of a lowered expression in [`TransformedExpressions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExprKey {
    Variable(usize),
    Function(usize),
    Predicate(usize),
    StrategyWhen(usize),
    StrategyQty(usize),
    StrategyStop(usize),
    StrategyLimit(usize),
    PlotSeries(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformedExpr {
    pub key: ExprKey,
    /// Byte offset of the owning statement; items are kept in this order.
    pub position: usize,
    /// `let` pattern the value is bound to. Plot series are used inline.
    pub binding: Option<String>,
    pub value: Transformed,
}

/// One field of the generated parameter struct.
#[derive(Debug, Clone, PartialEq)]
pub struct InputField {
    pub name: String,
    pub field: String,
    pub kind: InputKind,
    pub title: Option<String>,
    /// Default as a Rust expression.
    pub default: String,
}

impl InputField {
    pub fn rust_type(&self) -> &'static str {
        match self.kind {
            InputKind::Int => "i64",
            InputKind::Float => "f64",
            InputKind::Bool => "bool",
            InputKind::String | InputKind::Color => "String",
            InputKind::Source => "Source",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransformedExpressions {
    pub items: Vec<TransformedExpr>,
    pub inputs: Vec<InputField>,
    pub uses: Uses,
}

impl TransformedExpressions {
    pub fn get(&self, key: ExprKey) -> Option<&TransformedExpr> {
        self.items.iter().find(|item| item.key == key)
    }

    fn push(&mut self, key: ExprKey, position: usize, binding: Option<String>, value: Transformed) {
        self.uses.merge(&value.uses);
        self.items.push(TransformedExpr {
            key,
            position,
            binding,
            value,
        });
    }
}

fn input_default(input: &InputDecl) -> Result<String, UnsupportedConstruct> {
    let default = match (input.kind, &input.default) {
        (InputKind::Int, InputValue::Int(v)) => v.to_string(),
        (InputKind::Float, InputValue::Float(v)) => format!("{:?}", v),
        (InputKind::Float, InputValue::Int(v)) => format!("{:?}", *v as f64),
        (InputKind::Bool, InputValue::Bool(v)) => v.to_string(),
        (InputKind::String, InputValue::Text(v))
        | (InputKind::Color, InputValue::Color(v) | InputValue::Text(v)) => {
            format!("{:?}.to_string()", v)
        }
        (InputKind::Source, InputValue::Source(name)) => {
            let mut variant = name.clone();
            if let Some(first) = variant.get_mut(..1) {
                first.make_ascii_uppercase();
            }
            format!("Source::{}", variant)
        }
        _ => {
            return Err(unsupported(
                input.span,
                format!("default of input `{}` does not match its type", input.name),
            ));
        }
    };
    Ok(default)
}

/// Lower a variable declaration and update `scope`.
///
/// Returns the `let` pattern and the bound value.
pub fn transform_declaration(
    script: &Script,
    decl: &VarDecl,
    scope: &mut Scope,
) -> Result<(String, Transformed), UnsupportedConstruct> {
    let expr = parse_expression(script.text(decl.raw_expr), decl.raw_expr)?;
    match (&decl.mode, &decl.target) {
        (AssignMode::Declare, Target::Single(name)) => {
            let mut value = transform_expr(&expr, &TransformationContext::new(scope))?;
            if value.kind == ValueKind::Direction {
                return Err(unsupported(decl.span, "strategy direction stored in a variable"));
            }
            if decl.persistence != Persistence::None && value.kind == ValueKind::Series {
                value.uses.ops = true;
                value.code = format!("ops::hold_first({})", value.operand());
                value.place = false;
            }
            let rust_name = scope.declare(name, Role::Value(value.kind));
            Ok((rust_name, finish_binding(value)))
        }
        (AssignMode::Declare, Target::Tuple(names)) => {
            let ctx = TransformationContext::new(scope).expecting(names.len());
            let value = transform_expr(&expr, &ctx)?;
            let rust_names: Vec<String> = names
                .iter()
                .map(|name| scope.declare(name, Role::Value(ValueKind::Series)))
                .collect();
            Ok((format!("({})", rust_names.join(", ")), value))
        }
        (AssignMode::Reassign | AssignMode::Compound(_), Target::Single(name)) => {
            match scope.lookup(name).map(|b| &b.role) {
                Some(Role::Value(_)) => {}
                Some(_) => {
                    return Err(unsupported(decl.span, format!("`{}` cannot be reassigned", name)));
                }
                None => {
                    return Err(unsupported(
                        decl.span,
                        format!("`{}` is reassigned before it is declared", name),
                    ));
                }
            }
            let recursive = expr.any(&|e| {
                matches!(&e.kind, ExprKind::Index { target, .. } if target.is_ident(name))
            });
            if recursive {
                return Err(unsupported(
                    decl.raw_expr,
                    format!("`{}` refers to its own history", name),
                ));
            }
            let expr = match decl.mode {
                AssignMode::Compound(op) => {
                    let op = BinaryOp::from_compound(op).ok_or_else(|| {
                        unsupported(decl.span, format!("operator `{}`", op.symbol()))
                    })?;
                    let current = Expr::new(ExprKind::Ident(name.clone()), decl.span);
                    let span = decl.span.to(expr.span);
                    Expr::new(
                        ExprKind::Binary {
                            op,
                            lhs: Box::new(current),
                            rhs: Box::new(expr),
                        },
                        span,
                    )
                }
                _ => expr,
            };
            let value = transform_expr(&expr, &TransformationContext::new(scope))?;
            let rust_name = scope
                .redeclare(name, Role::Value(value.kind))
                .ok_or_else(|| unsupported(decl.span, format!("`{}` is not declared", name)))?;
            Ok((rust_name, finish_binding(value)))
        }
        (_, Target::Tuple(_)) => Err(unsupported(decl.span, "tuple reassignment")),
    }
}

/// A bound value must own its series.
fn finish_binding(mut value: Transformed) -> Transformed {
    if value.place && value.kind == ValueKind::Series {
        value.code = value.series_value();
        value.place = false;
    }
    value
}

/// One statement of a multi-line function body.
struct BodyLine {
    /// Assigned local, if the line is an assignment.
    target: Option<(String, bool)>,
    text: String,
    span: Span,
}

fn body_lines(script: &Script, func: &FuncDecl) -> Vec<BodyLine> {
    let text = script.text(func.raw_body);
    if func.single_line {
        return vec![BodyLine {
            target: None,
            text: text.to_string(),
            span: func.raw_body,
        }];
    }

    let tokens = tokenize(text);
    let mut lines = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    for token in tokens {
        match token.kind {
            TokenKind::Newline | TokenKind::Eof => {
                if !current.is_empty() {
                    lines.push(body_line(text, &current, func.raw_body));
                    current.clear();
                }
            }
            TokenKind::Indent | TokenKind::Dedent | TokenKind::Comment => {}
            _ => current.push(token),
        }
    }
    if !current.is_empty() {
        lines.push(body_line(text, &current, func.raw_body));
    }
    lines
}

fn body_line(text: &str, tokens: &[Token], base: Span) -> BodyLine {
    let skip = tokens
        .iter()
        .take_while(|t| matches!(t.kind, TokenKind::Keyword(kw) if kw.is_type_word()))
        .count();
    let rest = &tokens[skip..];
    let assignment = match rest {
        [name, op, value, ..]
            if name.kind == TokenKind::Identifier
                && (op.is_operator(Operator::Assign) || op.is_operator(Operator::Reassign)) =>
        {
            Some((name.lexeme(text).to_string(), op.is_operator(Operator::Reassign), *value))
        }
        _ => None,
    };
    let last = tokens[tokens.len() - 1];
    let first = match &assignment {
        Some((_, _, value)) => *value,
        None => tokens[0],
    };
    let span = Span::new(first.span.start, last.span.end, first.span.line, first.span.column);
    BodyLine {
        target: assignment.map(|(name, reassign, _)| (name, reassign)),
        text: text[span.start..span.end].to_string(),
        span: span.offset_by(base),
    }
}

/// True if `name` feeds a slot that must be a constant number.
fn used_as_scalar(expr: &Expr, name: &str) -> bool {
    expr.any(&|e| match &e.kind {
        ExprKind::Index { offset, .. } => offset.is_ident(name),
        ExprKind::Call { callee, args } => {
            let ExprKind::Member { namespace, name: function } = &callee.kind else {
                return false;
            };
            if namespace != "ta" {
                return false;
            }
            let Some(mapping) = registry::lookup(&format!("ta.{}", function)) else {
                return false;
            };
            let Ok(slots) = bind_indicator_args(mapping, args, e.span) else {
                return false;
            };
            mapping.params.iter().zip(slots).any(|(param, slot)| {
                matches!(param.kind, ParamKind::Length | ParamKind::Value)
                    && slot.is_some_and(|s| s.is_ident(name))
            })
        }
        _ => false,
    })
}

fn param_kind(script: &Script, param: &FuncParam, body: &[Expr]) -> ValueKind {
    if let Some(hint) = &param.type_hint {
        let simple = hint.contains("simple") || hint.contains("const");
        if hint.contains("bool") {
            return if simple { ValueKind::Bool } else { ValueKind::Series };
        }
        if simple || hint.contains("int") {
            return ValueKind::Number;
        }
    }
    if let Some(default) = param.default
        && let Ok(expr) = parse_expression(script.text(default), default)
        && matches!(expr.kind, ExprKind::Number { .. })
    {
        return ValueKind::Number;
    }
    if body.iter().any(|e| used_as_scalar(e, &param.name)) {
        ValueKind::Number
    } else {
        ValueKind::Series
    }
}

/// Lower a function declaration to a closure.
pub fn transform_function(
    script: &Script,
    func: &FuncDecl,
    scope: &Scope,
) -> Result<(Transformed, FunctionSig), UnsupportedConstruct> {
    let lines = body_lines(script, func);
    let exprs = lines
        .iter()
        .map(|line| parse_expression(&line.text, line.span))
        .collect::<Result<Vec<_>, _>>()?;
    let Some((result_line, assignments)) = lines.split_last() else {
        return Err(unsupported(func.span, format!("function `{}` has an empty body", func.name)));
    };
    if result_line.target.is_some() {
        return Err(unsupported(
            result_line.span,
            format!("function `{}` must end with an expression", func.name),
        ));
    }
    if let Some(line) = assignments.iter().find(|l| l.target.is_none()) {
        return Err(unsupported(
            line.span,
            "only assignments may precede the result of a function",
        ));
    }

    let mut uses = Uses::default();
    let mut ctx = TransformationContext::new(scope);
    let mut params = Vec::with_capacity(func.params.len());
    let mut taken = BTreeSet::new();
    for param in &func.params {
        let kind = param_kind(script, param, &exprs);
        let default = match param.default {
            Some(span) => {
                let value = transform(script.text(span), span, &TransformationContext::new(scope))?;
                uses.merge(&value.uses);
                let lowered = Lowered {
                    code: value.code,
                    kind: value.kind,
                    place: value.place,
                    length: None,
                };
                let mut lowerer = Lowerer {
                    ctx: &ctx,
                    uses: Uses::default(),
                };
                let what = format!("default of `{}`", param.name);
                let code = lowerer.convert_param(&lowered, kind, span, &what)?;
                uses.merge(&lowerer.uses);
                Some(code)
            }
            None => None,
        };
        let rust_name = local_name(&mut taken, &param.name);
        ctx.locals.push(Local {
            name: param.name.clone(),
            rust_name: rust_name.clone(),
            kind,
        });
        params.push(FnParam {
            name: param.name.clone(),
            rust_name,
            kind,
            default,
        });
    }
    if params.iter().any(|p| p.kind == ValueKind::Series) {
        uses.series_type = true;
    }

    let mut statements = Vec::new();
    for (line, expr) in assignments.iter().zip(&exprs) {
        let Some((name, reassign)) = &line.target else {
            continue;
        };
        let value = transform_expr(expr, &ctx)?;
        if !matches!(value.kind, ValueKind::Number | ValueKind::Bool | ValueKind::Series) {
            return Err(unsupported(
                line.span,
                format!("local `{}` holds a {}", name, value.kind.describe()),
            ));
        }
        uses.merge(&value.uses);
        let existing = ctx.local(name).map(|l| l.rust_name.clone());
        let rust_name = match (reassign, existing) {
            (true, Some(existing)) => existing,
            (true, None) => {
                return Err(unsupported(
                    line.span,
                    format!("`{}` is reassigned before it is declared", name),
                ));
            }
            (false, _) => local_name(&mut taken, name),
        };
        let value = finish_binding(value);
        statements.push(format!("let {} = {};", rust_name, value.code));
        ctx.locals.push(Local {
            name: name.clone(),
            rust_name,
            kind: value.kind,
        });
    }

    let result = exprs
        .last()
        .map(|expr| transform_expr(expr, &ctx))
        .transpose()?
        .ok_or_else(|| unsupported(func.span, "function without a result"))?;
    if !matches!(result.kind, ValueKind::Number | ValueKind::Bool | ValueKind::Series) {
        return Err(unsupported(
            result_line.span,
            format!("function `{}` returns a {}", func.name, result.kind.describe()),
        ));
    }
    uses.merge(&result.uses);
    if result.kind == ValueKind::Series {
        uses.series_type = true;
    }

    let signature: Vec<String> = params
        .iter()
        .map(|p| {
            let ty = if p.kind == ValueKind::Series { "&Series" } else { p.kind.rust_type() };
            format!("{}: {}", p.rust_name, ty)
        })
        .collect();
    let result_code = finish_binding(result.clone()).code;
    let code = if statements.is_empty() {
        format!(
            "|{}| -> {} {{ {} }}",
            signature.join(", "),
            result.kind.rust_type(),
            result_code
        )
    } else {
        let mut body = String::new();
        for statement in &statements {
            body.push_str("    ");
            body.push_str(statement);
            body.push('\n');
        }
        format!(
            "|{}| -> {} {{\n{}    {}\n}}",
            signature.join(", "),
            result.kind.rust_type(),
            body,
            result_code
        )
    };

    let sig = FunctionSig {
        params,
        returns: result.kind,
    };
    Ok((
        Transformed {
            code,
            kind: result.kind,
            place: false,
            uses,
        },
        sig,
    ))
}

fn local_name(taken: &mut BTreeSet<String>, name: &str) -> String {
    let base = rust_ident(name);
    let mut candidate = base.clone();
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

/// Lower `span` and bind it to a fresh name so later rebinding cannot change it.
fn hoist(
    script: &Script,
    span: Span,
    scope: &mut Scope,
    base: &str,
    allowed: &[ValueKind],
    what: &str,
) -> Result<(String, Transformed), UnsupportedConstruct> {
    let mut value = transform(script.text(span), span, &TransformationContext::new(scope))?;
    if !allowed.contains(&value.kind) {
        return Err(unsupported(
            span,
            format!("{} cannot be a {}", what, value.kind.describe()),
        ));
    }
    if value.place {
        value.code = format!("&{}", value.code);
        value.place = false;
    }
    Ok((scope.fresh(base), value))
}

#[derive(Clone, Copy)]
enum Item {
    Variable(usize),
    Function(usize),
    Condition(usize),
    Strategy(usize),
    Plot(usize),
}

/// Lower every expression of `script` in document order against one shared scope.
pub fn transform_script(script: &Script) -> Result<TransformedExpressions, UnsupportedConstruct> {
    let mut scope = Scope::new();
    let mut out = TransformedExpressions::default();

    for input in script.inputs() {
        let field = scope.declare(&input.name, Role::Input(input.kind));
        out.inputs.push(InputField {
            name: input.name.clone(),
            field,
            kind: input.kind,
            title: input.title.clone(),
            default: input_default(input)?,
        });
    }

    let mut items: Vec<(usize, Item)> = Vec::new();
    items.extend(script.variables().iter().enumerate().map(|(i, v)| (v.span.start, Item::Variable(i))));
    items.extend(script.functions().iter().enumerate().map(|(i, f)| (f.span.start, Item::Function(i))));
    items.extend(script.conditions().iter().enumerate().map(|(i, c)| (c.span.start, Item::Condition(i))));
    items.extend(script.strategy_calls().iter().enumerate().map(|(i, s)| (s.span.start, Item::Strategy(i))));
    items.extend(script.plots().iter().enumerate().map(|(i, p)| (p.span.start, Item::Plot(i))));
    items.sort_by_key(|(position, _)| *position);

    let truth = [ValueKind::Bool, ValueKind::Number, ValueKind::Series];
    let number = [ValueKind::Number, ValueKind::Series];
    for (position, item) in items {
        match item {
            Item::Variable(i) => {
                let (pattern, value) = transform_declaration(script, &script.variables()[i], &mut scope)?;
                out.push(ExprKey::Variable(i), position, Some(pattern), value);
            }
            Item::Function(i) => {
                let func = &script.functions()[i];
                let (value, sig) = transform_function(script, func, &scope)?;
                let rust_name = scope.declare(&func.name, Role::Function(sig));
                out.push(ExprKey::Function(i), position, Some(rust_name), value);
            }
            Item::Condition(i) => {
                let predicate = script.conditions()[i].predicate;
                let (name, value) = hoist(script, predicate, &mut scope, "cond", &truth, "an `if` condition")?;
                out.push(ExprKey::Predicate(i), position, Some(name), value);
            }
            Item::Strategy(i) => {
                let call = &script.strategy_calls()[i];
                let parts = [
                    (call.when, ExprKey::StrategyWhen(i), "when", &truth[..], "`when`"),
                    (call.qty, ExprKey::StrategyQty(i), "qty", &number[..], "`qty`"),
                    (call.stop, ExprKey::StrategyStop(i), "stop", &number[..], "`stop`"),
                    (call.limit, ExprKey::StrategyLimit(i), "limit", &number[..], "`limit`"),
                ];
                for (span, key, base, allowed, what) in parts {
                    if let Some(span) = span {
                        let (name, value) = hoist(script, span, &mut scope, base, allowed, what)?;
                        out.push(key, position, Some(name), value);
                    }
                }
                if call.direction.is_some() {
                    out.uses.direction = true;
                }
            }
            Item::Plot(i) => {
                let plot = &script.plots()[i];
                if plot.kind.is_decoration() {
                    continue;
                }
                let Some(span) = plot.series_expr else {
                    continue;
                };
                let value = transform(script.text(span), span, &TransformationContext::new(&scope))?;
                if !number.contains(&value.kind) && value.kind != ValueKind::Bool {
                    return Err(unsupported(
                        span,
                        format!("`{}` needs a series, found {}", plot.kind.name(), value.kind.describe()),
                    ));
                }
                if plot.kind == PlotKind::Hline && value.kind != ValueKind::Number {
                    return Err(unsupported(span, "`hline` price must be a constant"));
                }
                out.push(ExprKey::PlotSeries(i), position, None, value);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parser::parse_source;

    fn script(body: &str) -> Script {
        parse_source(&format!("//@version=5\nindicator(\"T\")\n{}", body)).unwrap()
    }

    fn lowered(body: &str, key: ExprKey) -> TransformedExpr {
        let script = script(body);
        let out = transform_script(&script).unwrap();
        out.get(key).cloned().unwrap()
    }

    fn lower_err(body: &str) -> UnsupportedConstruct {
        transform_script(&script(body)).unwrap_err()
    }

    #[test]
    fn snake_case_names() {
        assert_eq!(snake_case("fastMA"), "fast_ma");
        assert_eq!(snake_case("myRSIValue"), "my_rsi_value");
        assert_eq!(snake_case("RSI"), "rsi");
        assert_eq!(snake_case("len2"), "len2");
        assert_eq!(rust_ident("type"), "type_");
        assert_eq!(rust_ident("out"), "out_");
    }

    #[test]
    fn scope_names_are_unique() {
        let mut scope = Scope::new();
        assert_eq!(scope.declare("fastMA", Role::Value(ValueKind::Series)), "fast_ma");
        assert_eq!(scope.declare("fast_ma", Role::Value(ValueKind::Series)), "fast_ma_2");
        assert_eq!(scope.fresh("cond"), "cond_0");
        assert_eq!(scope.fresh("cond"), "cond_1");
        assert_eq!(
            scope.redeclare("fastMA", Role::Value(ValueKind::Number)).as_deref(),
            Some("fast_ma")
        );
        assert_eq!(scope.lookup("fastMA").unwrap().role, Role::Value(ValueKind::Number));
    }

    #[test]
    fn crossover_and_comparison() {
        let body = "\
fastMA = ta.sma(close, 10)
slowMA = ta.sma(close, 30)
rsi = ta.rsi(close, 14)
longCondition = ta.crossover(fastMA, slowMA) and rsi < 70
";
        let item = lowered(body, ExprKey::Variable(3));
        assert_eq!(item.binding.as_deref(), Some("long_condition"));
        assert_eq!(
            item.value.code,
            "ops::and(ta::crossover(&fast_ma, &slow_ma), ops::lt(&rsi, 70.0))"
        );
        assert_eq!(item.value.kind, ValueKind::Series);
        assert!(item.value.uses.indicators.contains("ta.crossover"));
    }

    #[test]
    fn unknown_indicator_is_unsupported() {
        let err = lower_err("x = ta.notreal(close, 14)\n");
        assert_eq!(err.description, "unknown indicator `ta.notreal`");
        assert_eq!(err.span.line, 3);
        assert_eq!(err.span.column, 5);
    }

    #[test]
    fn defaults_fill_missing_arguments() {
        let item = lowered("r = ta.rsi(close)\n", ExprKey::Variable(0));
        assert_eq!(item.value.code, "ta::rsi(&close, 14)");
        let item = lowered("c = ta.cci(length=20)\n", ExprKey::Variable(0));
        assert_eq!(item.value.code, "ta::cci(&hlc3, 20)");
        assert!(item.value.uses.derived.contains("hlc3"));
    }

    #[test]
    fn leading_source_may_be_omitted() {
        let item = lowered("h = ta.highest(10)\n", ExprKey::Variable(0));
        assert_eq!(item.value.code, "ta::highest(&high, 10)");
    }

    #[test]
    fn bars_are_passed_when_needed() {
        let item = lowered("a = ta.atr(14)\n", ExprKey::Variable(0));
        assert_eq!(item.value.code, "ta::atr(bars, 14)");
        let item = lowered("o = ta.obv\n", ExprKey::Variable(0));
        assert_eq!(item.value.code, "ta::obv(bars)");
    }

    #[test]
    fn int_inputs_become_lengths() {
        let body = "len = input.int(20, \"Length\")\nma = ta.sma(close, len)\nscaled = len * 2\n";
        let item = lowered(body, ExprKey::Variable(0));
        assert_eq!(item.value.code, "ta::sma(&close, ops::length(params.len))");
        let item = lowered(body, ExprKey::Variable(1));
        assert_eq!(item.value.code, "((params.len as f64) * 2.0)");
        assert_eq!(item.value.kind, ValueKind::Number);
    }

    #[test]
    fn tuple_binding_of_multi_output_call() {
        let item = lowered("[m, s, h] = ta.macd(close, 12, 26, 9)\n", ExprKey::Variable(0));
        assert_eq!(item.binding.as_deref(), Some("(m, s, h)"));
        assert_eq!(item.value.code, "ta::macd(&close, 12, 26, 9)");
    }

    #[test]
    fn multi_output_call_needs_a_tuple() {
        let err = lower_err("m = ta.macd(close, 12, 26, 9)\n");
        assert!(err.description.contains("3 values"), "{}", err.description);
        let err = lower_err("[a, b] = ta.macd(close, 12, 26, 9)\n");
        assert!(err.description.contains("2 names"), "{}", err.description);
    }

    #[test]
    fn history_and_var() {
        let item = lowered("d = close - close[1]\n", ExprKey::Variable(0));
        assert_eq!(item.value.code, "ops::sub(&close, close.shift(1))");
        let item = lowered("var first = close\n", ExprKey::Variable(0));
        assert_eq!(item.value.code, "ops::hold_first(&close)");
    }

    #[test]
    fn reassignment_shadows_and_compound_expands() {
        let body = "x = close\nx := x * 2\ny = high\ny += 1\n";
        let item = lowered(body, ExprKey::Variable(1));
        assert_eq!(item.binding.as_deref(), Some("x"));
        assert_eq!(item.value.code, "ops::mul(&x, 2.0)");
        let item = lowered(body, ExprKey::Variable(3));
        assert_eq!(item.value.code, "ops::add(&y, 1.0)");
    }

    #[test]
    fn self_history_is_rejected() {
        let err = lower_err("x = close\nx := x[1] + 1\n");
        assert_eq!(err.description, "`x` refers to its own history");
    }

    #[test]
    fn scalar_arithmetic_stays_native() {
        let item = lowered("k = 2 * 3 + 1\n", ExprKey::Variable(0));
        assert_eq!(item.value.code, "((2.0 * 3.0) + 1.0)");
        let item = lowered("t = close > open ? 1 : 0\n", ExprKey::Variable(0));
        assert_eq!(item.value.code, "ops::select(ops::gt(&close, &open), 1.0, 0.0)");
        let item = lowered("u = 1 > 2 ? 3 : 4\n", ExprKey::Variable(0));
        assert_eq!(item.value.code, "(if (1.0 > 2.0) { 3.0 } else { 4.0 })");
    }

    #[test]
    fn builtin_helpers() {
        let item = lowered("a = nz(close[1], close)\n", ExprKey::Variable(0));
        assert_eq!(item.value.code, "ops::nz(close.shift(1), &close)");
        let item = lowered("b = math.max(close, open)\n", ExprKey::Variable(0));
        assert_eq!(item.value.code, "ops::apply2(&close, &open, f64::max)");
        let item = lowered("c = math.abs(-3)\n", ExprKey::Variable(0));
        assert_eq!(item.value.code, "((-3.0)).abs()");
        let item = lowered("e = na\n", ExprKey::Variable(0));
        assert_eq!(item.value.code, "Series::na(bars.len())");
    }

    #[test]
    fn functions_become_closures() {
        let body = "\
double(x) => x * 2
smooth(src, len) =>
    base = ta.sma(src, len)
    double(base)
s = smooth(close, 10)
";
        let script = script(body);
        let out = transform_script(&script).unwrap();
        let double = out.get(ExprKey::Function(0)).unwrap();
        assert_eq!(double.binding.as_deref(), Some("double"));
        assert_eq!(double.value.code, "|x: &Series| -> Series { ops::mul(&x, 2.0) }");
        let smooth = out.get(ExprKey::Function(1)).unwrap();
        assert_eq!(
            smooth.value.code,
            "|src: &Series, len: f64| -> Series {\n    let base = ta::sma(&src, ops::length(len));\n    double(&base)\n}"
        );
        let call = out.get(ExprKey::Variable(0)).unwrap();
        assert_eq!(call.value.code, "smooth(&close, 10.0)");
    }

    #[test]
    fn function_defaults_are_filled() {
        let body = "f(src, len = 5) => ta.ema(src, len)\nv = f(open)\n";
        let item = lowered(body, ExprKey::Variable(0));
        assert_eq!(item.value.code, "f(&open, 5.0)");
    }

    #[test]
    fn predicates_are_hoisted() {
        let body = "x = close\nif x > open\n    plot(x)\n";
        let script = script(body);
        // plot inside the condition still lowers here; the converter rejects it.
        let out = transform_script(&script).unwrap();
        let cond = out.get(ExprKey::Predicate(0)).unwrap();
        assert_eq!(cond.binding.as_deref(), Some("cond_0"));
        assert_eq!(cond.value.code, "ops::gt(&x, &open)");
    }

    #[test]
    fn source_inputs_are_series() {
        let body = "src = input.source(close, \"Source\")\nm = ta.sma(src, 5)\n";
        let script = script(body);
        let out = transform_script(&script).unwrap();
        assert_eq!(out.inputs[0].default, "Source::Close");
        assert_eq!(out.inputs[0].rust_type(), "Source");
        assert_eq!(out.get(ExprKey::Variable(0)).unwrap().value.code, "ta::sma(&src, 5)");
    }

    #[test]
    fn unknown_identifier() {
        let err = lower_err("x = foo + 1\n");
        assert_eq!(err.description, "unknown identifier `foo`");
    }
}
