//! Script AST.
//!
//! A [`Script`] owns its source text. Expression-bearing fields hold [`Span`]s
//! into that buffer and are parsed later by the expression transformer. The
//! parser is the only producer; once complexity has been computed the script
//! is read-only.

use crate::domain::complexity::ComplexityFactors;
use crate::domain::token::{Operator, Span};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScriptKind {
    Indicator,
    Strategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InputKind {
    Int,
    Float,
    Bool,
    String,
    Source,
    Color,
}

impl InputKind {
    /// Kind named by an `input.<suffix>` call.
    pub fn from_suffix(suffix: &str) -> Option<InputKind> {
        let kind = match suffix {
            "int" => InputKind::Int,
            "float" | "price" => InputKind::Float,
            "bool" => InputKind::Bool,
            "string" | "symbol" | "timeframe" | "session" | "text_area" => InputKind::String,
            "source" => InputKind::Source,
            "color" => InputKind::Color,
            _ => return None,
        };
        Some(kind)
    }
}

/// Literal default of an input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InputValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    /// Price source name such as `close` or `hl2`.
    Source(String),
    /// Color literal or `color.*` constant as written.
    Color(String),
}

/// Names accepted as price sources.
pub const SOURCE_NAMES: &[&str] = &[
    "open", "high", "low", "close", "volume", "hl2", "hlc3", "ohlc4", "hlcc4",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputDecl {
    pub kind: InputKind,
    pub name: String,
    pub default: InputValue,
    pub title: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Persistence {
    None,
    Var,
    Varip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Target {
    Single(String),
    Tuple(Vec<String>),
}

impl Target {
    pub fn names(&self) -> Vec<&str> {
        match self {
            Target::Single(name) => vec![name.as_str()],
            Target::Tuple(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssignMode {
    Declare,
    Reassign,
    /// `+=`, `-=`, `*=` or `/=`.
    Compound(Operator),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Branch {
    Then,
    Else,
}

/// Innermost enclosing condition body of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeRef {
    pub condition: usize,
    pub branch: Branch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarDecl {
    pub persistence: Persistence,
    pub target: Target,
    pub raw_expr: Span,
    pub declared_type: Option<String>,
    pub mode: AssignMode,
    pub scope: Option<ScopeRef>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuncParam {
    pub name: String,
    pub type_hint: Option<String>,
    pub default: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<FuncParam>,
    pub raw_body: Span,
    pub single_line: bool,
    /// User functions called from the body, including the function itself.
    pub callees: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StrategyCallKind {
    Entry,
    Order,
    Close,
    CloseAll,
    Exit,
    Cancel,
    CancelAll,
}

impl StrategyCallKind {
    pub fn from_name(name: &str) -> Option<StrategyCallKind> {
        let kind = match name {
            "entry" => StrategyCallKind::Entry,
            "order" => StrategyCallKind::Order,
            "close" => StrategyCallKind::Close,
            "close_all" => StrategyCallKind::CloseAll,
            "exit" => StrategyCallKind::Exit,
            "cancel" => StrategyCallKind::Cancel,
            "cancel_all" => StrategyCallKind::CancelAll,
            _ => return None,
        };
        Some(kind)
    }

    /// Positional parameter order of the call.
    pub fn positional(self) -> &'static [&'static str] {
        match self {
            StrategyCallKind::Entry | StrategyCallKind::Order => {
                &["id", "direction", "qty", "limit", "stop"]
            }
            StrategyCallKind::Close => &["id", "comment", "qty"],
            StrategyCallKind::CloseAll => &["comment"],
            StrategyCallKind::Exit => &["id", "from_entry", "qty", "qty_percent", "profit", "limit"],
            StrategyCallKind::Cancel => &["id"],
            StrategyCallKind::CancelAll => &[],
        }
    }

    pub fn qualified_name(self) -> &'static str {
        match self {
            StrategyCallKind::Entry => "strategy.entry",
            StrategyCallKind::Order => "strategy.order",
            StrategyCallKind::Close => "strategy.close",
            StrategyCallKind::CloseAll => "strategy.close_all",
            StrategyCallKind::Exit => "strategy.exit",
            StrategyCallKind::Cancel => "strategy.cancel",
            StrategyCallKind::CancelAll => "strategy.cancel_all",
        }
    }

    pub fn needs_id(self) -> bool {
        !matches!(self, StrategyCallKind::CloseAll | StrategyCallKind::CancelAll)
    }

    pub fn needs_direction(self) -> bool {
        matches!(self, StrategyCallKind::Entry | StrategyCallKind::Order)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyCall {
    pub kind: StrategyCallKind,
    pub id: Option<String>,
    pub direction: Option<Direction>,
    pub qty: Option<Span>,
    pub when: Option<Span>,
    pub stop: Option<Span>,
    pub limit: Option<Span>,
    pub from_entry: Option<String>,
    pub scope: Option<ScopeRef>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PlotKind {
    Plot,
    Shape,
    Char,
    Arrow,
    Hline,
    // Chart decorations with no series output.
    Background,
    BarColor,
    Fill,
    Candle,
    Bar,
}

impl PlotKind {
    pub fn from_name(name: &str) -> Option<PlotKind> {
        let kind = match name {
            "plot" => PlotKind::Plot,
            "plotshape" => PlotKind::Shape,
            "plotchar" => PlotKind::Char,
            "plotarrow" => PlotKind::Arrow,
            "hline" => PlotKind::Hline,
            "bgcolor" => PlotKind::Background,
            "barcolor" => PlotKind::BarColor,
            "fill" => PlotKind::Fill,
            "plotcandle" => PlotKind::Candle,
            "plotbar" => PlotKind::Bar,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_decoration(self) -> bool {
        matches!(
            self,
            PlotKind::Background
                | PlotKind::BarColor
                | PlotKind::Fill
                | PlotKind::Candle
                | PlotKind::Bar
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            PlotKind::Plot => "plot",
            PlotKind::Shape => "plotshape",
            PlotKind::Char => "plotchar",
            PlotKind::Arrow => "plotarrow",
            PlotKind::Hline => "hline",
            PlotKind::Background => "bgcolor",
            PlotKind::BarColor => "barcolor",
            PlotKind::Fill => "fill",
            PlotKind::Candle => "plotcandle",
            PlotKind::Bar => "plotbar",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotCall {
    pub kind: PlotKind,
    pub series_expr: Option<Span>,
    pub title: Option<String>,
    pub color_expr: Option<Span>,
    pub scope: Option<ScopeRef>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub predicate: Span,
    pub then_body: Span,
    pub else_body: Option<Span>,
    pub nesting_depth: usize,
    pub parent: Option<ScopeRef>,
    /// Head of the `if` this `else if` continues.
    pub chained_from: Option<usize>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeDecl {
    pub name: String,
    pub span: Span,
}

/// A call into the `array.`, `matrix.` or `map.` namespaces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionOp {
    pub namespace: String,
    pub function: String,
    pub span: Span,
}

/// A call creating or editing a chart drawing object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawingCall {
    pub namespace: String,
    pub function: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OtherKind {
    ForLoop,
    WhileLoop,
    Switch,
    /// `x = if ...` or `x = switch ...` with a block body.
    ConditionalExpr,
    Import,
    Method,
    Alert,
    Drawing,
    Expression,
}

impl OtherKind {
    /// Block statements and declarations the converter refuses.
    pub fn is_unsupported(self) -> bool {
        matches!(
            self,
            OtherKind::ForLoop
                | OtherKind::WhileLoop
                | OtherKind::Switch
                | OtherKind::ConditionalExpr
                | OtherKind::Import
                | OtherKind::Method
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            OtherKind::ForLoop => "for loop",
            OtherKind::WhileLoop => "while loop",
            OtherKind::Switch => "switch statement",
            OtherKind::ConditionalExpr => "conditional expression block",
            OtherKind::Import => "library import",
            OtherKind::Method => "method declaration",
            OtherKind::Alert => "alert",
            OtherKind::Drawing => "drawing statement",
            OtherKind::Expression => "expression statement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OtherStatement {
    pub kind: OtherKind,
    pub scope: Option<ScopeRef>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Complexity {
    pub score: f64,
    pub factors: ComplexityFactors,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Script {
    #[serde(skip)]
    pub(crate) source: String,
    pub(crate) version: u32,
    pub(crate) kind: ScriptKind,
    pub(crate) name: String,
    pub(crate) inputs: Vec<InputDecl>,
    pub(crate) variables: Vec<VarDecl>,
    pub(crate) functions: Vec<FuncDecl>,
    pub(crate) strategy_calls: Vec<StrategyCall>,
    pub(crate) plots: Vec<PlotCall>,
    pub(crate) conditions: Vec<Condition>,
    pub(crate) type_decls: Vec<TypeDecl>,
    pub(crate) collection_ops: Vec<CollectionOp>,
    pub(crate) drawing_calls: Vec<DrawingCall>,
    pub(crate) other_statements: Vec<OtherStatement>,
    pub(crate) indicators_used: BTreeSet<String>,
    pub(crate) complexity: Complexity,
    pub(crate) total_lines: usize,
    pub(crate) code_lines: usize,
}

impl Script {
    pub(crate) fn new(source: &str, version: u32, kind: ScriptKind, name: String) -> Self {
        Self {
            source: source.to_string(),
            version,
            kind,
            name,
            inputs: Vec::new(),
            variables: Vec::new(),
            functions: Vec::new(),
            strategy_calls: Vec::new(),
            plots: Vec::new(),
            conditions: Vec::new(),
            type_decls: Vec::new(),
            collection_ops: Vec::new(),
            drawing_calls: Vec::new(),
            other_statements: Vec::new(),
            indicators_used: BTreeSet::new(),
            complexity: Complexity::default(),
            total_lines: 0,
            code_lines: 0,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Source text covered by `span`.
    pub fn text(&self, span: Span) -> &str {
        self.source.get(span.start..span.end).unwrap_or("")
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[InputDecl] {
        &self.inputs
    }

    pub fn variables(&self) -> &[VarDecl] {
        &self.variables
    }

    pub fn functions(&self) -> &[FuncDecl] {
        &self.functions
    }

    pub fn strategy_calls(&self) -> &[StrategyCall] {
        &self.strategy_calls
    }

    pub fn plots(&self) -> &[PlotCall] {
        &self.plots
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn type_decls(&self) -> &[TypeDecl] {
        &self.type_decls
    }

    pub fn collection_ops(&self) -> &[CollectionOp] {
        &self.collection_ops
    }

    pub fn drawing_calls(&self) -> &[DrawingCall] {
        &self.drawing_calls
    }

    pub fn other_statements(&self) -> &[OtherStatement] {
        &self.other_statements
    }

    pub fn indicators_used(&self) -> &BTreeSet<String> {
        &self.indicators_used
    }

    pub fn complexity(&self) -> Complexity {
        self.complexity
    }

    pub fn complexity_score(&self) -> f64 {
        self.complexity.score
    }

    pub fn complexity_factors(&self) -> ComplexityFactors {
        self.complexity.factors
    }

    pub fn total_lines(&self) -> usize {
        self.total_lines
    }

    pub fn code_lines(&self) -> usize {
        self.code_lines
    }

    pub fn max_nesting_depth(&self) -> usize {
        self.conditions
            .iter()
            .map(|c| c.nesting_depth)
            .max()
            .unwrap_or(0)
    }
}
