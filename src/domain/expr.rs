//! Expression trees.
//!
//! Recursive-descent parser for the expression text the AST keeps as raw
//! spans. The text is re-lexed with the script lexer and node spans are
//! re-based onto the original script so diagnostics point at the right
//! line and column.
//!
//! Precedence, loosest first: ternary, `or`, `and`, comparison, additive,
//! multiplicative, unary, postfix (call, history subscript), primary.

use crate::domain::error::UnsupportedConstruct;
use crate::domain::lexer::tokenize;
use crate::domain::token::{
    BuiltinSeries, Delimiter, Keyword, LiteralKind, Operator, Span, Token, TokenKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// Rust spelling for scalar operands.
    pub fn rust_symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Elementwise function in `runtime::ops`.
    pub fn ops_fn(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    fn from_operator(op: Operator) -> Option<BinaryOp> {
        let bin = match op {
            Operator::Plus => BinaryOp::Add,
            Operator::Minus => BinaryOp::Sub,
            Operator::Star => BinaryOp::Mul,
            Operator::Slash => BinaryOp::Div,
            Operator::Percent => BinaryOp::Rem,
            Operator::EqEq => BinaryOp::Eq,
            Operator::NotEq => BinaryOp::Ne,
            Operator::Lt => BinaryOp::Lt,
            Operator::Le => BinaryOp::Le,
            Operator::Gt => BinaryOp::Gt,
            Operator::Ge => BinaryOp::Ge,
            _ => return None,
        };
        Some(bin)
    }

    /// Binary operator a compound assignment applies.
    pub fn from_compound(op: Operator) -> Option<BinaryOp> {
        match op {
            Operator::PlusAssign => Some(BinaryOp::Add),
            Operator::MinusAssign => Some(BinaryOp::Sub),
            Operator::StarAssign => Some(BinaryOp::Mul),
            Operator::SlashAssign => Some(BinaryOp::Div),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number { value: f64, is_int: bool },
    Str(String),
    Bool(bool),
    Na,
    /// `#rrggbb` literal.
    Color(String),
    Ident(String),
    Series(BuiltinSeries),
    /// `namespace.name`, e.g. `strategy.long` or `ta.sma`.
    Member { namespace: String, name: String },
    Call { callee: Box<Expr>, args: Vec<Arg> },
    /// `target[offset]`: the value `offset` bars ago.
    Index { target: Box<Expr>, offset: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Ternary { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    Tuple(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// True if `pred` holds for this node or any node below it.
    pub fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        match &self.kind {
            ExprKind::Call { callee, args } => {
                callee.any(pred) || args.iter().any(|a| a.value.any(pred))
            }
            ExprKind::Index { target, offset } => target.any(pred) || offset.any(pred),
            ExprKind::Unary { operand, .. } => operand.any(pred),
            ExprKind::Binary { lhs, rhs, .. } => lhs.any(pred) || rhs.any(pred),
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => cond.any(pred) || then.any(pred) || otherwise.any(pred),
            ExprKind::Tuple(items) => items.iter().any(|e| e.any(pred)),
            _ => false,
        }
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, ExprKind::Ident(n) if n == name)
    }
}

/// Parse `text`, which sits at `base` in the script, into an expression.
pub fn parse_expression(text: &str, base: Span) -> Result<Expr, UnsupportedConstruct> {
    let tokens: Vec<Token> = tokenize(text)
        .into_iter()
        .filter(|t| !t.kind.is_trivia())
        .collect();
    if let Some(bad) = tokens.iter().find(|t| t.kind == TokenKind::Unknown) {
        return Err(UnsupportedConstruct::new(
            bad.span.offset_by(base),
            format!("unexpected character `{}`", bad.lexeme(text)),
        ));
    }

    let mut parser = ExprParser {
        text,
        base,
        tokens,
        pos: 0,
    };
    if parser.at_end() {
        return Err(UnsupportedConstruct::new(base, "empty expression"));
    }
    let expr = parser.ternary()?;
    if !parser.at_end() {
        let token = parser.peek();
        return Err(UnsupportedConstruct::new(
            parser.span(&token),
            format!("unexpected `{}` after expression", token.lexeme(text)),
        ));
    }
    Ok(expr)
}

struct ExprParser<'a> {
    text: &'a str,
    base: Span,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn peek(&self) -> Token {
        self.tokens
            .get(self.pos)
            .copied()
            .unwrap_or(Token::new(TokenKind::Eof, Span::new(self.text.len(), self.text.len(), 1, 1)))
    }

    fn peek_at(&self, n: usize) -> Option<Token> {
        self.tokens.get(self.pos + n).copied()
    }

    fn at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn bump(&mut self) -> Token {
        let token = self.peek();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn span(&self, token: &Token) -> Span {
        token.span.offset_by(self.base)
    }

    fn lexeme(&self, token: &Token) -> &'a str {
        token.lexeme(self.text)
    }

    fn unsupported(&self, token: &Token, description: impl Into<String>) -> UnsupportedConstruct {
        UnsupportedConstruct::new(self.span(token), description)
    }

    fn expect_delimiter(&mut self, d: Delimiter, what: &str) -> Result<Token, UnsupportedConstruct> {
        let token = self.peek();
        if token.is_delimiter(d) {
            Ok(self.bump())
        } else {
            Err(self.unsupported(&token, format!("expected {}", what)))
        }
    }

    fn ternary(&mut self) -> Result<Expr, UnsupportedConstruct> {
        let cond = self.or()?;
        if !self.peek().is_operator(Operator::Question) {
            return Ok(cond);
        }
        self.bump();
        let then = self.ternary()?;
        let colon = self.peek();
        if !colon.is_operator(Operator::Colon) {
            return Err(self.unsupported(&colon, "expected `:` in conditional expression"));
        }
        self.bump();
        let otherwise = self.ternary()?;
        let span = cond.span.to(otherwise.span);
        Ok(Expr::new(
            ExprKind::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            span,
        ))
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, UnsupportedConstruct>,
        op_of: fn(&Token) -> Option<BinaryOp>,
    ) -> Result<Expr, UnsupportedConstruct> {
        let mut lhs = next(self)?;
        while let Some(op) = op_of(&self.peek()) {
            self.bump();
            let rhs = next(self)?;
            let span = lhs.span.to(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn or(&mut self) -> Result<Expr, UnsupportedConstruct> {
        self.binary_level(Self::and, |t| t.is_keyword(Keyword::Or).then_some(BinaryOp::Or))
    }

    fn and(&mut self) -> Result<Expr, UnsupportedConstruct> {
        self.binary_level(Self::comparison, |t| {
            t.is_keyword(Keyword::And).then_some(BinaryOp::And)
        })
    }

    fn comparison(&mut self) -> Result<Expr, UnsupportedConstruct> {
        self.binary_level(Self::additive, |t| match t.kind {
            TokenKind::Operator(op) => BinaryOp::from_operator(op).filter(|b| b.is_comparison()),
            _ => None,
        })
    }

    fn additive(&mut self) -> Result<Expr, UnsupportedConstruct> {
        self.binary_level(Self::multiplicative, |t| match t.kind {
            TokenKind::Operator(Operator::Plus) => Some(BinaryOp::Add),
            TokenKind::Operator(Operator::Minus) => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn multiplicative(&mut self) -> Result<Expr, UnsupportedConstruct> {
        self.binary_level(Self::unary, |t| match t.kind {
            TokenKind::Operator(Operator::Star) => Some(BinaryOp::Mul),
            TokenKind::Operator(Operator::Slash) => Some(BinaryOp::Div),
            TokenKind::Operator(Operator::Percent) => Some(BinaryOp::Rem),
            _ => None,
        })
    }

    fn unary(&mut self) -> Result<Expr, UnsupportedConstruct> {
        let token = self.peek();
        let op = match token.kind {
            TokenKind::Operator(Operator::Minus) => UnaryOp::Neg,
            TokenKind::Operator(Operator::Plus) => UnaryOp::Plus,
            TokenKind::Keyword(Keyword::Not) => UnaryOp::Not,
            _ => return self.postfix(),
        };
        self.bump();
        let operand = self.unary()?;
        let span = self.span(&token).to(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn postfix(&mut self) -> Result<Expr, UnsupportedConstruct> {
        let mut expr = self.primary()?;
        loop {
            let token = self.peek();
            if token.is_delimiter(Delimiter::LParen) {
                if !matches!(expr.kind, ExprKind::Ident(_) | ExprKind::Member { .. }) {
                    return Err(self.unsupported(&token, "call of a value that is not a function"));
                }
                self.bump();
                let args = self.arguments()?;
                let close = self.expect_delimiter(Delimiter::RParen, "`)`")?;
                let span = expr.span.to(self.span(&close));
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    span,
                );
            } else if token.is_delimiter(Delimiter::LBracket) {
                if matches!(expr.kind, ExprKind::Index { .. }) {
                    return Err(self.unsupported(&token, "multi-dimensional indexing"));
                }
                self.bump();
                let offset = self.ternary()?;
                let next = self.peek();
                if next.is_delimiter(Delimiter::Comma) {
                    return Err(self.unsupported(&next, "multi-dimensional indexing"));
                }
                let close = self.expect_delimiter(Delimiter::RBracket, "`]`")?;
                let span = expr.span.to(self.span(&close));
                expr = Expr::new(
                    ExprKind::Index {
                        target: Box::new(expr),
                        offset: Box::new(offset),
                    },
                    span,
                );
            } else if token.is_delimiter(Delimiter::Dot) {
                return Err(self.unsupported(&token, "method call or field access"));
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Arg>, UnsupportedConstruct> {
        let mut args = Vec::new();
        if self.peek().is_delimiter(Delimiter::RParen) {
            return Ok(args);
        }
        loop {
            let first = self.peek();
            let named = matches!(first.kind, TokenKind::Identifier | TokenKind::Keyword(_))
                && self
                    .peek_at(1)
                    .is_some_and(|t| t.is_operator(Operator::Assign));
            let name = if named {
                self.bump();
                self.bump();
                Some(self.lexeme(&first).to_string())
            } else {
                None
            };
            let value = self.ternary()?;
            let span = self.span(&first).to(value.span);
            args.push(Arg { name, value, span });

            if self.peek().is_delimiter(Delimiter::Comma) {
                self.bump();
                if self.peek().is_delimiter(Delimiter::RParen) {
                    return Ok(args);
                }
            } else {
                return Ok(args);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, UnsupportedConstruct> {
        let token = self.bump();
        let span = self.span(&token);
        let lexeme = self.lexeme(&token);
        let next_is_call = self.peek().is_delimiter(Delimiter::LParen);

        let kind = match token.kind {
            TokenKind::Literal(LiteralKind::Number) => {
                let value = lexeme
                    .parse::<f64>()
                    .map_err(|_| self.unsupported(&token, format!("malformed number `{}`", lexeme)))?;
                if !value.is_finite() {
                    return Err(self.unsupported(&token, "number literal out of range"));
                }
                let is_int = !lexeme.contains(['.', 'e', 'E']);
                ExprKind::Number { value, is_int }
            }
            TokenKind::Literal(LiteralKind::String) => {
                let inner = lexeme.get(1..lexeme.len().saturating_sub(1)).unwrap_or("");
                ExprKind::Str(inner.replace("\\\"", "\"").replace("\\'", "'"))
            }
            TokenKind::Literal(LiteralKind::Bool) => ExprKind::Bool(lexeme == "true"),
            TokenKind::Literal(LiteralKind::Na) if next_is_call => ExprKind::Ident("na".into()),
            TokenKind::Literal(LiteralKind::Na) => ExprKind::Na,
            TokenKind::Literal(LiteralKind::Color) => ExprKind::Color(lexeme.to_string()),
            TokenKind::Identifier => ExprKind::Ident(lexeme.to_string()),
            TokenKind::BuiltinSeries(series) => ExprKind::Series(series),
            TokenKind::Keyword(
                Keyword::Int | Keyword::Float | Keyword::Bool | Keyword::String | Keyword::Color,
            ) if next_is_call => ExprKind::Ident(lexeme.to_string()),
            TokenKind::Namespace => {
                let name_token = self.peek();
                if !matches!(name_token.kind, TokenKind::Identifier | TokenKind::Keyword(_)) {
                    return Err(self.unsupported(&name_token, "expected a name after the namespace"));
                }
                self.bump();
                let member = Expr::new(
                    ExprKind::Member {
                        namespace: lexeme.trim_end_matches('.').to_string(),
                        name: self.lexeme(&name_token).to_string(),
                    },
                    span.to(self.span(&name_token)),
                );
                return Ok(member);
            }
            TokenKind::Delimiter(Delimiter::LParen) => {
                let inner = self.ternary()?;
                let close = self.expect_delimiter(Delimiter::RParen, "`)`")?;
                return Ok(Expr::new(inner.kind, span.to(self.span(&close))));
            }
            TokenKind::Delimiter(Delimiter::LBracket) => {
                let mut items = Vec::new();
                while !self.peek().is_delimiter(Delimiter::RBracket) {
                    items.push(self.ternary()?);
                    if self.peek().is_delimiter(Delimiter::Comma) {
                        self.bump();
                    } else {
                        break;
                    }
                }
                let close = self.expect_delimiter(Delimiter::RBracket, "`]`")?;
                let whole = span.to(self.span(&close));
                if items.is_empty() {
                    return Err(UnsupportedConstruct::new(whole, "empty tuple"));
                }
                return Ok(Expr::new(ExprKind::Tuple(items), whole));
            }
            TokenKind::Keyword(Keyword::If | Keyword::Switch) => {
                return Err(self.unsupported(&token, "conditional expression block"));
            }
            TokenKind::Eof => return Err(self.unsupported(&token, "expression ended early")),
            _ => {
                return Err(self.unsupported(&token, format!("unexpected `{}` in expression", lexeme)));
            }
        };
        Ok(Expr::new(kind, span))
    }
}
