//! Token types produced by the lexer.
//!
//! Tokens are small `Copy` values: a kind tag plus the byte span they cover.
//! The lexeme is always recovered from the source buffer through the span.

use serde::Serialize;
use std::fmt;

/// Byte span into a source buffer, with the 1-based line/column of its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// Span from the start of `self` to the end of `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start,
            end: other.end.max(self.end),
            line: self.line,
            column: self.column,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Re-base a span that was measured inside a substring starting at `base`.
    pub fn offset_by(self, base: Span) -> Span {
        let column = if self.line == 1 {
            base.column + self.column - 1
        } else {
            self.column
        };
        Span {
            start: base.start + self.start,
            end: base.start + self.end,
            line: base.line + self.line - 1,
            column,
        }
    }
}

impl Default for Span {
    fn default() -> Self {
        Self {
            start: 0,
            end: 0,
            line: 1,
            column: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Keyword {
    If,
    Else,
    For,
    To,
    By,
    In,
    While,
    Switch,
    Var,
    Varip,
    And,
    Or,
    Not,
    Import,
    Export,
    Type,
    Method,
    Indicator,
    Study,
    Strategy,
    Library,
    Input,
    Break,
    Continue,
    // Type qualifiers and type names.
    Series,
    Simple,
    Const,
    Int,
    Float,
    Bool,
    String,
    Color,
}

impl Keyword {
    pub fn from_ident(text: &str) -> Option<Keyword> {
        let kw = match text {
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "for" => Keyword::For,
            "to" => Keyword::To,
            "by" => Keyword::By,
            "in" => Keyword::In,
            "while" => Keyword::While,
            "switch" => Keyword::Switch,
            "var" => Keyword::Var,
            "varip" => Keyword::Varip,
            "and" => Keyword::And,
            "or" => Keyword::Or,
            "not" => Keyword::Not,
            "import" => Keyword::Import,
            "export" => Keyword::Export,
            "type" => Keyword::Type,
            "method" => Keyword::Method,
            "indicator" => Keyword::Indicator,
            "study" => Keyword::Study,
            "strategy" => Keyword::Strategy,
            "library" => Keyword::Library,
            "input" => Keyword::Input,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "series" => Keyword::Series,
            "simple" => Keyword::Simple,
            "const" => Keyword::Const,
            "int" => Keyword::Int,
            "float" => Keyword::Float,
            "bool" => Keyword::Bool,
            "string" => Keyword::String,
            "color" => Keyword::Color,
            _ => return None,
        };
        Some(kw)
    }

    /// Type names and qualifiers that may prefix a declaration.
    pub fn is_type_word(self) -> bool {
        matches!(
            self,
            Keyword::Series
                | Keyword::Simple
                | Keyword::Const
                | Keyword::Int
                | Keyword::Float
                | Keyword::Bool
                | Keyword::String
                | Keyword::Color
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operator {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    Assign,
    /// `:=`
    Reassign,
    /// `=>`
    Arrow,
    Question,
    /// `:` closing a ternary.
    Colon,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Star => "*",
            Operator::Slash => "/",
            Operator::Percent => "%",
            Operator::EqEq => "==",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Assign => "=",
            Operator::Reassign => ":=",
            Operator::Arrow => "=>",
            Operator::Question => "?",
            Operator::Colon => ":",
            Operator::PlusAssign => "+=",
            Operator::MinusAssign => "-=",
            Operator::StarAssign => "*=",
            Operator::SlashAssign => "/=",
        }
    }

    pub fn is_assignment(self) -> bool {
        matches!(
            self,
            Operator::Assign
                | Operator::Reassign
                | Operator::PlusAssign
                | Operator::MinusAssign
                | Operator::StarAssign
                | Operator::SlashAssign
        )
    }
}

/// Operator spellings, longest first so the scanner can take the longest match.
pub const OPERATORS: &[(&str, Operator)] = &[
    (":=", Operator::Reassign),
    ("=>", Operator::Arrow),
    ("==", Operator::EqEq),
    ("!=", Operator::NotEq),
    ("<=", Operator::Le),
    (">=", Operator::Ge),
    ("+=", Operator::PlusAssign),
    ("-=", Operator::MinusAssign),
    ("*=", Operator::StarAssign),
    ("/=", Operator::SlashAssign),
    ("+", Operator::Plus),
    ("-", Operator::Minus),
    ("*", Operator::Star),
    ("/", Operator::Slash),
    ("%", Operator::Percent),
    ("<", Operator::Lt),
    (">", Operator::Gt),
    ("=", Operator::Assign),
    ("?", Operator::Question),
    (":", Operator::Colon),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Delimiter {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

/// The five implicit OHLCV series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum BuiltinSeries {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl BuiltinSeries {
    pub const ALL: [BuiltinSeries; 5] = [
        BuiltinSeries::Open,
        BuiltinSeries::High,
        BuiltinSeries::Low,
        BuiltinSeries::Close,
        BuiltinSeries::Volume,
    ];

    pub fn from_ident(text: &str) -> Option<BuiltinSeries> {
        match text {
            "open" => Some(BuiltinSeries::Open),
            "high" => Some(BuiltinSeries::High),
            "low" => Some(BuiltinSeries::Low),
            "close" => Some(BuiltinSeries::Close),
            "volume" => Some(BuiltinSeries::Volume),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinSeries::Open => "open",
            BuiltinSeries::High => "high",
            BuiltinSeries::Low => "low",
            BuiltinSeries::Close => "close",
            BuiltinSeries::Volume => "volume",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LiteralKind {
    Number,
    String,
    Bool,
    Na,
    Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenKind {
    Keyword(Keyword),
    Operator(Operator),
    Delimiter(Delimiter),
    Identifier,
    /// Dotted namespace prefix such as `ta.`; the lexeme includes the dot.
    Namespace,
    BuiltinSeries(BuiltinSeries),
    Literal(LiteralKind),
    Comment,
    Newline,
    Indent,
    Dedent,
    Unknown,
    Eof,
}

impl TokenKind {
    /// Tokens that carry no statement content.
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            TokenKind::Comment | TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Keyword(kw) => write!(f, "keyword `{}`", format!("{:?}", kw).to_lowercase()),
            TokenKind::Operator(op) => write!(f, "`{}`", op.symbol()),
            TokenKind::Delimiter(d) => {
                let s = match d {
                    Delimiter::LParen => "(",
                    Delimiter::RParen => ")",
                    Delimiter::LBracket => "[",
                    Delimiter::RBracket => "]",
                    Delimiter::Comma => ",",
                    Delimiter::Dot => ".",
                };
                write!(f, "`{}`", s)
            }
            TokenKind::Identifier => write!(f, "identifier"),
            TokenKind::Namespace => write!(f, "namespace"),
            TokenKind::BuiltinSeries(s) => write!(f, "series `{}`", s.name()),
            TokenKind::Literal(LiteralKind::Number) => write!(f, "number"),
            TokenKind::Literal(LiteralKind::String) => write!(f, "string"),
            TokenKind::Literal(LiteralKind::Bool) => write!(f, "bool"),
            TokenKind::Literal(LiteralKind::Na) => write!(f, "na"),
            TokenKind::Literal(LiteralKind::Color) => write!(f, "color literal"),
            TokenKind::Comment => write!(f, "comment"),
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Indent => write!(f, "indent"),
            TokenKind::Dedent => write!(f, "dedent"),
            TokenKind::Unknown => write!(f, "unknown character"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn lexeme<'s>(&self, source: &'s str) -> &'s str {
        &source[self.span.start..self.span.end]
    }

    pub fn line(&self) -> usize {
        self.span.line
    }

    pub fn column(&self) -> usize {
        self.span.column
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        self.kind == TokenKind::Keyword(kw)
    }

    pub fn is_operator(&self, op: Operator) -> bool {
        self.kind == TokenKind::Operator(op)
    }

    pub fn is_delimiter(&self, d: Delimiter) -> bool {
        self.kind == TokenKind::Delimiter(d)
    }
}
