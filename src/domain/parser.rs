//! Parser / AST builder.
//!
//! Two passes over the token stream. The first reads only the mandatory
//! header (`//@version=N` and the `indicator`/`strategy` declaration) so a
//! malformed script fails before anything else is built. The second groups
//! tokens into statements (one line plus the indented block it owns) and
//! sends each through a dispatch table of `(matcher, extractor)` rules keyed
//! on its leading keyword or namespace. Expressions are never parsed here:
//! nodes keep byte spans into the source for the expression transformer.

use crate::domain::ast::{
    AssignMode, Branch, CollectionOp, Complexity, Condition, Direction, DrawingCall, FuncDecl,
    FuncParam, InputDecl, InputKind, InputValue, OtherKind, OtherStatement, Persistence, PlotCall,
    PlotKind, SOURCE_NAMES, ScopeRef, Script, ScriptKind, StrategyCall, StrategyCallKind, Target,
    TypeDecl, VarDecl,
};
use crate::domain::complexity::calculate_complexity;
use crate::domain::error::SyntaxError;
use crate::domain::lexer::tokenize;
use crate::domain::token::{Delimiter, Keyword, LiteralKind, Operator, Span, Token, TokenKind};
use std::collections::BTreeSet;

const COLLECTION_NAMESPACES: &[&str] = &["array.", "matrix.", "map."];
const DRAWING_NAMESPACES: &[&str] = &["line.", "label.", "box.", "table.", "polyline.", "linefill."];

/// Tokenize and parse in one step.
pub fn parse_source(source: &str) -> Result<Script, SyntaxError> {
    let tokens = tokenize(source);
    parse(&tokens, source)
}

pub fn parse(tokens: &[Token], source: &str) -> Result<Script, SyntaxError> {
    if let Some(bad) = tokens.iter().find(|t| t.kind == TokenKind::Unknown) {
        let lexeme = bad.lexeme(source);
        let message = if lexeme == "\"" || lexeme == "'" {
            "unterminated string literal".to_string()
        } else {
            format!("unexpected character `{}`", lexeme)
        };
        return Err(SyntaxError::at(bad.span, message));
    }

    let significant: Vec<Token> = tokens
        .iter()
        .copied()
        .filter(|t| t.kind != TokenKind::Comment)
        .collect();

    let header = read_header(tokens, &significant, source)?;
    let tree = statement_tree(&significant);

    let mut builder = Builder {
        source,
        tokens: &significant,
        script: Script::new(source, header.version, header.kind, header.name),
        headers: 0,
    };
    builder.block(&tree, BlockState::default())?;
    Ok(builder.finish())
}

// ---------------------------------------------------------------------------
// Pass 1: header
// ---------------------------------------------------------------------------

struct Header {
    version: u32,
    kind: ScriptKind,
    name: String,
}

fn read_header(tokens: &[Token], significant: &[Token], source: &str) -> Result<Header, SyntaxError> {
    let annotation = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Comment)
        .find_map(|t| {
            t.lexeme(source)
                .strip_prefix("//@version=")
                .map(|rest| (t.span, rest.trim()))
        });
    let version = match annotation {
        Some((span, text)) => text.parse::<u32>().map_err(|_| {
            SyntaxError::at(span, format!("invalid version `{}`", text)).expecting(&["integer"])
        })?,
        None => {
            return Err(SyntaxError::at(Span::default(), "missing `//@version` annotation")
                .expecting(&["//@version=N"]));
        }
    };

    let first = significant
        .iter()
        .position(|t| !t.kind.is_trivia())
        .unwrap_or(significant.len().saturating_sub(1));
    let declaration = significant.get(first).copied().unwrap_or(Token::new(
        TokenKind::Eof,
        Span::default(),
    ));
    let kind = match declaration.kind {
        TokenKind::Keyword(Keyword::Indicator | Keyword::Study) => ScriptKind::Indicator,
        TokenKind::Keyword(Keyword::Strategy) => ScriptKind::Strategy,
        TokenKind::Keyword(Keyword::Library) => {
            return Err(SyntaxError::at(declaration.span, "library scripts cannot be converted")
                .expecting(&["indicator", "strategy"]));
        }
        _ => {
            return Err(SyntaxError::at(declaration.span, "expected a script declaration")
                .expecting(&["indicator", "strategy"]));
        }
    };

    let open = first + 1;
    if !significant
        .get(open)
        .is_some_and(|t| t.is_delimiter(Delimiter::LParen))
    {
        return Err(SyntaxError::at(declaration.span, "script declaration is not a call")
            .expecting(&["("]));
    }
    let (args, _) = call_args(significant, open, source)?;
    let bound = bind(&args, &["title"]);
    let name = bound
        .get("title")
        .and_then(|v| string_value(v, source))
        .ok_or_else(|| {
            SyntaxError::at(declaration.span, "script declaration has no title")
                .expecting(&["string"])
        })?;

    Ok(Header {
        version,
        kind,
        name,
    })
}

// ---------------------------------------------------------------------------
// Pass 2: statement tree
// ---------------------------------------------------------------------------

/// One logical line (`start..end` into the token vector) and its indented block.
#[derive(Debug)]
struct Statement {
    start: usize,
    end: usize,
    span: Span,
    block: Option<Block>,
}

#[derive(Debug)]
struct Block {
    statements: Vec<Statement>,
    span: Span,
}

impl Block {
    fn new(statements: Vec<Statement>) -> Option<Block> {
        let first = statements.first()?.span;
        let last = statements.last()?.span;
        Some(Block {
            span: first.to(last),
            statements,
        })
    }
}

fn statement_tree(tokens: &[Token]) -> Vec<Statement> {
    let mut pos = 0;
    let mut statements = Vec::new();
    loop {
        statements.extend(read_block(tokens, &mut pos));
        match tokens.get(pos).map(|t| t.kind) {
            Some(TokenKind::Dedent) => pos += 1,
            _ => break,
        }
    }
    statements
}

fn read_block(tokens: &[Token], pos: &mut usize) -> Vec<Statement> {
    let mut statements = Vec::new();
    while let Some(token) = tokens.get(*pos) {
        match token.kind {
            TokenKind::Eof | TokenKind::Dedent => break,
            TokenKind::Newline => *pos += 1,
            TokenKind::Indent => {
                // An indented run with no owning statement is read in place.
                *pos += 1;
                statements.extend(read_block(tokens, pos));
                skip_dedent(tokens, pos);
            }
            _ => statements.push(read_statement(tokens, pos)),
        }
    }
    statements
}

fn read_statement(tokens: &[Token], pos: &mut usize) -> Statement {
    let start = *pos;
    while tokens
        .get(*pos)
        .is_some_and(|t| !matches!(t.kind, TokenKind::Newline | TokenKind::Eof))
    {
        *pos += 1;
    }
    let end = *pos;
    let mut span = tokens[start].span.to(tokens[end - 1].span);

    while tokens.get(*pos).is_some_and(|t| t.kind == TokenKind::Newline) {
        *pos += 1;
    }
    let block = if tokens.get(*pos).is_some_and(|t| t.kind == TokenKind::Indent) {
        *pos += 1;
        let statements = read_block(tokens, pos);
        skip_dedent(tokens, pos);
        Block::new(statements)
    } else {
        None
    };
    if let Some(block) = &block {
        span = span.to(block.span);
    }

    Statement {
        start,
        end,
        span,
        block,
    }
}

fn skip_dedent(tokens: &[Token], pos: &mut usize) {
    if tokens.get(*pos).is_some_and(|t| t.kind == TokenKind::Dedent) {
        *pos += 1;
    }
}

// ---------------------------------------------------------------------------
// Dispatch table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementKind {
    Header,
    Input,
    Function,
    TypeDecl,
    Method,
    Import,
    Condition,
    Else,
    Loop,
    Switch,
    ConditionalExpr,
    Strategy,
    Plot,
    Alert,
    Drawing,
    Variable,
    Expression,
}

type Matcher = fn(&[Token], &str) -> bool;
type Extractor =
    for<'a> fn(&mut Builder<'a>, &Statement, &mut BlockState) -> Result<(), SyntaxError>;

struct Rule {
    kind: StatementKind,
    matches: Matcher,
    extract: Extractor,
    takes_block: bool,
}

const fn rule(kind: StatementKind, matches: Matcher, extract: Extractor, takes_block: bool) -> Rule {
    Rule {
        kind,
        matches,
        extract,
        takes_block,
    }
}

/// Checked in order; the first matching rule wins.
const RULES: &[Rule] = &[
    rule(StatementKind::Header, is_header, extract_header, false),
    rule(StatementKind::Input, is_input, extract_input, false),
    rule(StatementKind::Function, is_function, extract_function, true),
    rule(StatementKind::TypeDecl, is_type_decl, extract_type_decl, true),
    rule(StatementKind::Method, is_method, extract_method, true),
    rule(StatementKind::Import, is_import, extract_import, false),
    rule(StatementKind::Condition, is_if, extract_condition, true),
    rule(StatementKind::Else, is_else, extract_else, true),
    rule(StatementKind::Loop, is_loop, extract_loop, true),
    rule(StatementKind::Switch, is_switch, extract_switch, true),
    rule(StatementKind::ConditionalExpr, is_conditional_expr, extract_conditional_expr, true),
    rule(StatementKind::Strategy, is_strategy_call, extract_strategy_call, false),
    rule(StatementKind::Plot, is_plot, extract_plot, false),
    rule(StatementKind::Alert, is_alert, extract_alert, false),
    rule(StatementKind::Drawing, is_drawing, extract_drawing, false),
    rule(StatementKind::Variable, is_variable, extract_variable, false),
];

static EXPRESSION_RULE: Rule = rule(StatementKind::Expression, always, extract_expression, false);

fn always(_: &[Token], _: &str) -> bool {
    true
}

fn classify(line: &[Token], source: &str) -> &'static Rule {
    RULES
        .iter()
        .find(|r| (r.matches)(line, source))
        .unwrap_or(&EXPRESSION_RULE)
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

struct Builder<'a> {
    source: &'a str,
    tokens: &'a [Token],
    script: Script,
    headers: usize,
}

/// Position of a statement list inside the condition tree.
#[derive(Debug, Default)]
struct BlockState {
    scope: Option<ScopeRef>,
    depth: usize,
    /// `if` / `else if` chain an `else` may attach to.
    chain: Vec<usize>,
}

impl BlockState {
    fn nested(condition: usize, branch: Branch, depth: usize) -> Self {
        Self {
            scope: Some(ScopeRef { condition, branch }),
            depth,
            chain: Vec::new(),
        }
    }
}

impl<'a> Builder<'a> {
    fn line(&self, stmt: &Statement) -> &'a [Token] {
        &self.tokens[stmt.start..stmt.end]
    }

    fn block(&mut self, statements: &[Statement], mut state: BlockState) -> Result<(), SyntaxError> {
        for stmt in statements {
            check_brackets(self.line(stmt))?;
            let rule = classify(self.line(stmt), self.source);
            if !rule.takes_block {
                if let Some(block) = &stmt.block {
                    return Err(SyntaxError::at(block.span, "unexpected indented block")
                        .expecting(&["statement at the enclosing indentation"]));
                }
            }
            (rule.extract)(self, stmt, &mut state)?;
            if !matches!(rule.kind, StatementKind::Condition | StatementKind::Else) {
                state.chain.clear();
            }
        }
        Ok(())
    }

    fn push_other(&mut self, kind: OtherKind, stmt: &Statement, state: &BlockState) {
        self.script.other_statements.push(OtherStatement {
            kind,
            scope: state.scope,
            span: stmt.span,
        });
    }

    fn finish(mut self) -> Script {
        let tokens = self.tokens;
        let source = self.source;

        for (i, token) in tokens.iter().enumerate() {
            if token.kind != TokenKind::Namespace {
                continue;
            }
            let Some(next) = tokens
                .get(i + 1)
                .filter(|t| matches!(t.kind, TokenKind::Identifier | TokenKind::Keyword(_)))
            else {
                continue;
            };
            let namespace = token.lexeme(source);
            let function = next.lexeme(source).to_string();
            let span = token.span.to(next.span);
            let called = tokens
                .get(i + 2)
                .is_some_and(|t| t.is_delimiter(Delimiter::LParen));

            if namespace == "ta." {
                self.script.indicators_used.insert(format!("ta.{}", function));
            } else if COLLECTION_NAMESPACES.contains(&namespace) {
                self.script.collection_ops.push(CollectionOp {
                    namespace: namespace.trim_end_matches('.').to_string(),
                    function,
                    span,
                });
            } else if called && DRAWING_NAMESPACES.contains(&namespace) {
                self.script.drawing_calls.push(DrawingCall {
                    namespace: namespace.trim_end_matches('.').to_string(),
                    function,
                    span,
                });
            }
        }

        let names: BTreeSet<String> = self
            .script
            .functions
            .iter()
            .map(|f| f.name.clone())
            .collect();
        for function in &mut self.script.functions {
            let body = function.raw_body;
            let mut callees: Vec<String> = Vec::new();
            for (i, token) in tokens.iter().enumerate() {
                if token.kind != TokenKind::Identifier
                    || token.span.start < body.start
                    || token.span.end > body.end
                {
                    continue;
                }
                let name = token.lexeme(source);
                let is_call = tokens
                    .get(i + 1)
                    .is_some_and(|t| t.is_delimiter(Delimiter::LParen));
                if is_call && names.contains(name) && !callees.iter().any(|c| c == name) {
                    callees.push(name.to_string());
                }
            }
            function.callees = callees;
        }

        self.script.total_lines = source.lines().count();
        self.script.code_lines = tokens
            .iter()
            .filter(|t| !t.kind.is_trivia() && t.kind != TokenKind::Eof)
            .map(|t| t.span.line)
            .collect::<BTreeSet<_>>()
            .len();

        let (score, factors) = calculate_complexity(&self.script);
        self.script.complexity = Complexity { score, factors };

        tracing::debug!(
            script = %self.script.name,
            version = self.script.version,
            inputs = self.script.inputs.len(),
            variables = self.script.variables.len(),
            conditions = self.script.conditions.len(),
            score,
            "parsed script"
        );
        self.script
    }
}

// ---------------------------------------------------------------------------
// Matchers
// ---------------------------------------------------------------------------

fn first_kind(line: &[Token]) -> Option<TokenKind> {
    line.first().map(|t| t.kind)
}

fn is_header(line: &[Token], _: &str) -> bool {
    matches!(
        first_kind(line),
        Some(TokenKind::Keyword(
            Keyword::Indicator | Keyword::Study | Keyword::Strategy | Keyword::Library
        ))
    ) && line.get(1).is_some_and(|t| t.is_delimiter(Delimiter::LParen))
}

fn is_input(line: &[Token], source: &str) -> bool {
    assignment(line, source).is_some_and(|a| {
        a.mode == AssignMode::Declare
            && matches!(a.target, Target::Single(_))
            && input_call(&line[a.op + 1..], source).is_some()
    })
}

fn is_function(line: &[Token], _: &str) -> bool {
    first_kind(line) == Some(TokenKind::Identifier)
        && line.get(1).is_some_and(|t| t.is_delimiter(Delimiter::LParen))
        && matching_close(line, 1)
            .and_then(|close| line.get(close + 1))
            .is_some_and(|t| t.is_operator(Operator::Arrow))
}

fn leading_keyword(line: &[Token]) -> Option<Keyword> {
    let skip_export = usize::from(line.first().is_some_and(|t| t.is_keyword(Keyword::Export)));
    match line.get(skip_export)?.kind {
        TokenKind::Keyword(kw) => Some(kw),
        _ => None,
    }
}

fn is_type_decl(line: &[Token], _: &str) -> bool {
    leading_keyword(line) == Some(Keyword::Type)
}

fn is_method(line: &[Token], _: &str) -> bool {
    leading_keyword(line) == Some(Keyword::Method)
}

fn is_import(line: &[Token], _: &str) -> bool {
    first_kind(line) == Some(TokenKind::Keyword(Keyword::Import))
}

fn is_if(line: &[Token], _: &str) -> bool {
    first_kind(line) == Some(TokenKind::Keyword(Keyword::If))
}

fn is_else(line: &[Token], _: &str) -> bool {
    first_kind(line) == Some(TokenKind::Keyword(Keyword::Else))
}

fn is_loop(line: &[Token], _: &str) -> bool {
    matches!(
        first_kind(line),
        Some(TokenKind::Keyword(Keyword::For | Keyword::While))
    )
}

fn is_switch(line: &[Token], _: &str) -> bool {
    first_kind(line) == Some(TokenKind::Keyword(Keyword::Switch))
}

fn is_conditional_expr(line: &[Token], source: &str) -> bool {
    assignment(line, source).is_some_and(|a| {
        line.get(a.op + 1)
            .is_some_and(|t| t.is_keyword(Keyword::If) || t.is_keyword(Keyword::Switch))
    })
}

fn is_strategy_call(line: &[Token], source: &str) -> bool {
    match line {
        [ns, name, open, ..] => {
            ns.kind == TokenKind::Namespace
                && ns.lexeme(source) == "strategy."
                && StrategyCallKind::from_name(name.lexeme(source)).is_some()
                && open.is_delimiter(Delimiter::LParen)
        }
        _ => false,
    }
}

fn is_plot(line: &[Token], source: &str) -> bool {
    match line {
        [name, open, ..] => {
            name.kind == TokenKind::Identifier
                && PlotKind::from_name(name.lexeme(source)).is_some()
                && open.is_delimiter(Delimiter::LParen)
        }
        _ => false,
    }
}

fn is_alert(line: &[Token], source: &str) -> bool {
    match line {
        [name, open, ..] => {
            name.kind == TokenKind::Identifier
                && matches!(name.lexeme(source), "alert" | "alertcondition")
                && open.is_delimiter(Delimiter::LParen)
        }
        _ => false,
    }
}

fn is_drawing(line: &[Token], source: &str) -> bool {
    line.first().is_some_and(|t| {
        t.kind == TokenKind::Namespace && DRAWING_NAMESPACES.contains(&t.lexeme(source))
    })
}

fn is_variable(line: &[Token], source: &str) -> bool {
    assignment(line, source).is_some()
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

fn top_level_only(stmt: &Statement, state: &BlockState, what: &str) -> Result<(), SyntaxError> {
    if state.scope.is_some() {
        return Err(SyntaxError::at(
            stmt.span,
            format!("{} must be declared at the top level", what),
        ));
    }
    Ok(())
}

fn extract_header(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    top_level_only(stmt, state, "the script declaration")?;
    b.headers += 1;
    if b.headers > 1 {
        return Err(SyntaxError::at(stmt.span, "duplicate script declaration"));
    }
    Ok(())
}

fn extract_input(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    top_level_only(stmt, state, "inputs")?;
    let line = b.line(stmt);
    let source = b.source;
    let Some(assign) = assignment(line, source) else {
        return Err(SyntaxError::at(stmt.span, "malformed input declaration"));
    };
    let rhs = &line[assign.op + 1..];
    let Some((suffix_kind, open)) = input_call(rhs, source) else {
        return Err(SyntaxError::at(stmt.span, "malformed input declaration"));
    };
    let Target::Single(name) = assign.target else {
        return Err(SyntaxError::at(stmt.span, "an input binds a single name"));
    };

    let (args, _) = call_args(rhs, open, source)?;
    let bound = bind(&args, &["defval", "title"]);
    let hint = suffix_kind.or_else(|| bound.get("type").and_then(|v| legacy_input_type(v, source)));
    let default_tokens = bound.get("defval").ok_or_else(|| {
        SyntaxError::at(stmt.span, format!("input `{}` has no default value", name))
            .expecting(&["defval"])
    })?;
    let (kind, default) = input_default(hint, default_tokens, source)?;

    b.script.inputs.push(InputDecl {
        kind,
        name,
        default,
        title: bound.get("title").and_then(|v| string_value(v, source)),
        min: bound
            .get("minval")
            .and_then(|v| number_literal(v, source))
            .map(|(n, _)| n),
        max: bound
            .get("maxval")
            .and_then(|v| number_literal(v, source))
            .map(|(n, _)| n),
        span: stmt.span,
    });
    Ok(())
}

fn extract_function(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    top_level_only(stmt, state, "functions")?;
    let line = b.line(stmt);
    let source = b.source;
    let name = line[0].lexeme(source).to_string();
    let close = matching_close(line, 1)
        .ok_or_else(|| SyntaxError::at(line[1].span, "unclosed `(`").expecting(&[")"]))?;

    let params = split_top_level(&line[2..close])
        .into_iter()
        .filter(|p| !p.is_empty())
        .map(|p| func_param(p, source))
        .collect::<Result<Vec<_>, _>>()?;

    let arrow = line[close + 1];
    let inline = slice_span(&line[close + 2..]);
    let (raw_body, single_line) = match (inline, &stmt.block) {
        (Some(span), None) => (span, true),
        (None, Some(block)) => (block.span, false),
        (Some(_), Some(block)) => {
            return Err(SyntaxError::at(
                block.span,
                "function body mixes an inline expression and a block",
            ));
        }
        (None, None) => {
            return Err(SyntaxError::at(arrow.span, format!("function `{}` has no body", name))
                .expecting(&["expression", "indented block"]));
        }
    };

    b.script.functions.push(FuncDecl {
        name,
        params,
        raw_body,
        single_line,
        callees: Vec::new(),
        span: stmt.span,
    });
    Ok(())
}

fn func_param(tokens: &[Token], source: &str) -> Result<FuncParam, SyntaxError> {
    let (decl, default) = match tokens.iter().position(|t| t.is_operator(Operator::Assign)) {
        Some(i) => (&tokens[..i], slice_span(&tokens[i + 1..])),
        None => (tokens, None),
    };
    let Some((name, prefix)) = decl.split_last() else {
        return Err(SyntaxError::at(tokens[0].span, "expected a parameter name")
            .expecting(&["identifier"]));
    };
    if name.kind != TokenKind::Identifier {
        return Err(SyntaxError::at(name.span, "expected a parameter name").expecting(&["identifier"]));
    }
    Ok(FuncParam {
        name: name.lexeme(source).to_string(),
        type_hint: slice_span(prefix).map(|s| source[s.start..s.end].to_string()),
        default,
    })
}

fn extract_type_decl(b: &mut Builder<'_>, stmt: &Statement, _state: &mut BlockState) -> Result<(), SyntaxError> {
    let line = b.line(stmt);
    let name = line
        .iter()
        .find(|t| t.kind == TokenKind::Identifier)
        .map(|t| t.lexeme(b.source).to_string())
        .ok_or_else(|| SyntaxError::at(stmt.span, "type declaration has no name").expecting(&["identifier"]))?;
    b.script.type_decls.push(TypeDecl {
        name,
        span: stmt.span,
    });
    Ok(())
}

fn extract_method(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    b.push_other(OtherKind::Method, stmt, state);
    Ok(())
}

fn extract_import(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    b.push_other(OtherKind::Import, stmt, state);
    Ok(())
}

fn require_block<'s>(stmt: &'s Statement, line: &[Token], what: &str) -> Result<&'s Block, SyntaxError> {
    stmt.block.as_ref().ok_or_else(|| {
        SyntaxError::at(line[0].span, format!("{} needs an indented body", what))
            .expecting(&["indented block"])
    })
}

fn predicate_span(tokens: &[Token], keyword: &Token) -> Result<Span, SyntaxError> {
    slice_span(tokens).ok_or_else(|| {
        SyntaxError::at(keyword.span, "condition has no predicate").expecting(&["expression"])
    })
}

fn extract_condition(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    let line = b.line(stmt);
    let predicate = predicate_span(&line[1..], &line[0])?;
    let block = require_block(stmt, line, "`if`")?;

    let index = b.script.conditions.len();
    b.script.conditions.push(Condition {
        predicate,
        then_body: block.span,
        else_body: None,
        nesting_depth: state.depth,
        parent: state.scope,
        chained_from: None,
        span: stmt.span,
    });
    b.block(&block.statements, BlockState::nested(index, Branch::Then, state.depth + 1))?;
    state.chain = vec![index];
    Ok(())
}

fn extract_else(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    let line = b.line(stmt);
    let (Some(&head), Some(&last)) = (state.chain.first(), state.chain.last()) else {
        return Err(SyntaxError::at(line[0].span, "`else` without a matching `if`")
            .expecting(&["if"]));
    };
    let block = require_block(stmt, line, "`else`")?;
    let chained_if = line.get(1).is_some_and(|t| t.is_keyword(Keyword::If));

    let else_span = if chained_if {
        line[1].span.to(stmt.span)
    } else {
        block.span
    };
    for &member in &state.chain {
        let condition = &mut b.script.conditions[member];
        condition.else_body = Some(match condition.else_body {
            Some(existing) if member != last => existing.to(else_span),
            _ => else_span,
        });
    }

    if chained_if {
        let predicate = predicate_span(&line[2..], &line[1])?;
        let index = b.script.conditions.len();
        b.script.conditions.push(Condition {
            predicate,
            then_body: block.span,
            else_body: None,
            nesting_depth: state.depth,
            parent: state.scope,
            chained_from: Some(head),
            span: line[1].span.to(stmt.span),
        });
        b.block(&block.statements, BlockState::nested(index, Branch::Then, state.depth + 1))?;
        state.chain.push(index);
    } else {
        b.block(&block.statements, BlockState::nested(last, Branch::Else, state.depth + 1))?;
        state.chain.clear();
    }
    Ok(())
}

fn extract_loop(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    let line = b.line(stmt);
    let kind = if line[0].is_keyword(Keyword::For) {
        OtherKind::ForLoop
    } else {
        OtherKind::WhileLoop
    };
    require_block(stmt, line, "loop")?;
    b.push_other(kind, stmt, state);
    Ok(())
}

fn extract_switch(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    require_block(stmt, b.line(stmt), "`switch`")?;
    b.push_other(OtherKind::Switch, stmt, state);
    Ok(())
}

fn extract_conditional_expr(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    b.push_other(OtherKind::ConditionalExpr, stmt, state);
    Ok(())
}

fn extract_strategy_call(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    let line = b.line(stmt);
    let source = b.source;
    let name = line[1].lexeme(source);
    let Some(kind) = StrategyCallKind::from_name(name) else {
        return Err(SyntaxError::at(line[1].span, format!("unknown strategy call `{}`", name)));
    };
    let (args, close) = call_args(line, 2, source)?;
    reject_trailing(line, close)?;
    let bound = bind(&args, kind.positional());

    let id = match bound.get("id") {
        Some(v) => Some(string_value(v, source).ok_or_else(|| {
            SyntaxError::at(slice_span(v).unwrap_or(stmt.span), "order id must be a string literal")
                .expecting(&["string"])
        })?),
        None if kind.needs_id() => {
            return Err(SyntaxError::at(stmt.span, format!("strategy.{} requires an order id", name))
                .expecting(&["id"]));
        }
        None => None,
    };
    let direction = match bound.get("direction") {
        Some(v) => Some(direction_value(v, source).ok_or_else(|| {
            SyntaxError::at(slice_span(v).unwrap_or(stmt.span), "direction must be strategy.long or strategy.short")
                .expecting(&["strategy.long", "strategy.short"])
        })?),
        None if kind.needs_direction() => {
            return Err(SyntaxError::at(stmt.span, format!("strategy.{} requires a direction", name))
                .expecting(&["direction"]));
        }
        None => None,
    };
    let expr = |key: &str| bound.get(key).and_then(slice_span);

    b.script.strategy_calls.push(StrategyCall {
        kind,
        id,
        direction,
        qty: expr("qty"),
        when: expr("when"),
        stop: expr("stop"),
        limit: expr("limit"),
        from_entry: bound.get("from_entry").and_then(|v| string_value(v, source)),
        scope: state.scope,
        span: stmt.span,
    });
    Ok(())
}

fn plot_positional(kind: PlotKind) -> &'static [&'static str] {
    match kind {
        PlotKind::Plot => &["series", "title", "color"],
        PlotKind::Shape => &["series", "title", "style", "location", "color"],
        PlotKind::Char => &["series", "title", "char", "location", "color"],
        PlotKind::Arrow => &["series", "title", "colorup", "colordown"],
        PlotKind::Hline => &["price", "title", "color"],
        PlotKind::Background | PlotKind::BarColor => &["color"],
        PlotKind::Fill => &["plot1", "plot2", "color"],
        PlotKind::Candle | PlotKind::Bar => &["open", "high", "low", "close", "title", "color"],
    }
}

fn extract_plot(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    let line = b.line(stmt);
    let source = b.source;
    let name = line[0].lexeme(source);
    let Some(kind) = PlotKind::from_name(name) else {
        return Err(SyntaxError::at(line[0].span, format!("unknown plot call `{}`", name)));
    };
    let (args, close) = call_args(line, 1, source)?;
    reject_trailing(line, close)?;
    let bound = bind(&args, plot_positional(kind));

    let series_key = match kind {
        PlotKind::Plot | PlotKind::Shape | PlotKind::Char | PlotKind::Arrow => Some("series"),
        PlotKind::Hline => Some("price"),
        _ => None,
    };
    let series_expr = series_key.and_then(|key| bound.get(key)).and_then(slice_span);
    if series_key.is_some() && series_expr.is_none() {
        return Err(SyntaxError::at(stmt.span, format!("`{}` needs a series argument", name))
            .expecting(&["series"]));
    }
    let color_key = if kind == PlotKind::Arrow { "colorup" } else { "color" };

    b.script.plots.push(PlotCall {
        kind,
        series_expr,
        title: bound.get("title").and_then(|v| string_value(v, source)),
        color_expr: bound.get(color_key).and_then(slice_span),
        scope: state.scope,
        span: stmt.span,
    });
    Ok(())
}

fn extract_alert(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    b.push_other(OtherKind::Alert, stmt, state);
    Ok(())
}

fn extract_drawing(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    b.push_other(OtherKind::Drawing, stmt, state);
    Ok(())
}

fn extract_expression(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    b.push_other(OtherKind::Expression, stmt, state);
    Ok(())
}

fn extract_variable(b: &mut Builder<'_>, stmt: &Statement, state: &mut BlockState) -> Result<(), SyntaxError> {
    let line = b.line(stmt);
    let Some(assign) = assignment(line, b.source) else {
        return Err(SyntaxError::at(stmt.span, "malformed assignment"));
    };
    let raw_expr = slice_span(&line[assign.op + 1..]).ok_or_else(|| {
        SyntaxError::at(line[assign.op].span, "assignment has no value").expecting(&["expression"])
    })?;
    b.script.variables.push(VarDecl {
        persistence: assign.persistence,
        target: assign.target,
        raw_expr,
        declared_type: assign.declared_type,
        mode: assign.mode,
        scope: state.scope,
        span: stmt.span,
    });
    Ok(())
}

fn reject_trailing(line: &[Token], close: usize) -> Result<(), SyntaxError> {
    match line.get(close + 1) {
        Some(extra) => Err(SyntaxError::at(extra.span, "unexpected tokens after call")
            .expecting(&["end of statement"])),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Token helpers
// ---------------------------------------------------------------------------

struct Assignment {
    persistence: Persistence,
    declared_type: Option<String>,
    target: Target,
    op: usize,
    mode: AssignMode,
}

fn assignment(line: &[Token], source: &str) -> Option<Assignment> {
    let op = top_level_position(line, |t| {
        matches!(t.kind, TokenKind::Operator(op) if op.is_assignment())
    })?;
    let (persistence, lhs_start) = match line.first()?.kind {
        TokenKind::Keyword(Keyword::Var) => (Persistence::Var, 1),
        TokenKind::Keyword(Keyword::Varip) => (Persistence::Varip, 1),
        _ => (Persistence::None, 0),
    };
    let lhs = line.get(lhs_start..op)?;

    let (target, type_tokens) = if lhs.last()?.is_delimiter(Delimiter::RBracket) {
        let open = lhs.iter().position(|t| t.is_delimiter(Delimiter::LBracket))?;
        let names = lhs[open + 1..lhs.len() - 1]
            .split(|t| t.is_delimiter(Delimiter::Comma))
            .map(|part| match part {
                [t] if t.kind == TokenKind::Identifier => Some(t.lexeme(source).to_string()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        (Target::Tuple(names), &lhs[..open])
    } else {
        let (last, prefix) = lhs.split_last()?;
        if last.kind != TokenKind::Identifier {
            return None;
        }
        (Target::Single(last.lexeme(source).to_string()), prefix)
    };
    if !type_tokens.iter().all(is_type_token) {
        return None;
    }

    let mode = match line[op].kind {
        TokenKind::Operator(Operator::Assign) => AssignMode::Declare,
        TokenKind::Operator(Operator::Reassign) => AssignMode::Reassign,
        TokenKind::Operator(other) => AssignMode::Compound(other),
        _ => return None,
    };

    Some(Assignment {
        persistence,
        declared_type: slice_span(type_tokens).map(|s| source[s.start..s.end].to_string()),
        target,
        op,
        mode,
    })
}

fn is_type_token(token: &Token) -> bool {
    match token.kind {
        TokenKind::Keyword(kw) => kw.is_type_word(),
        TokenKind::Identifier => true,
        TokenKind::Operator(Operator::Lt | Operator::Gt) => true,
        TokenKind::Delimiter(Delimiter::Comma) => true,
        _ => false,
    }
}

/// `input(...)` or `input.<kind>(...)` spanning the whole right-hand side.
fn input_call(rhs: &[Token], source: &str) -> Option<(Option<InputKind>, usize)> {
    let (kind, open) = match rhs {
        [first, open, ..] if first.is_keyword(Keyword::Input) && open.is_delimiter(Delimiter::LParen) => {
            (None, 1)
        }
        [ns, suffix, open, ..]
            if ns.kind == TokenKind::Namespace
                && ns.lexeme(source) == "input."
                && open.is_delimiter(Delimiter::LParen) =>
        {
            (Some(InputKind::from_suffix(suffix.lexeme(source))?), 2)
        }
        _ => return None,
    };
    (matching_close(rhs, open)? == rhs.len() - 1).then_some((kind, open))
}

fn legacy_input_type(value: &[Token], source: &str) -> Option<InputKind> {
    match value {
        [ns, name] if ns.lexeme(source) == "input." => match name.lexeme(source) {
            "integer" => Some(InputKind::Int),
            other => InputKind::from_suffix(other),
        },
        _ => None,
    }
}

fn input_default(
    hint: Option<InputKind>,
    value: &[Token],
    source: &str,
) -> Result<(InputKind, InputValue), SyntaxError> {
    let span = slice_span(value).unwrap_or_default();
    let number = number_literal(value, source);
    let boolean = match value {
        [t] if t.kind == TokenKind::Literal(LiteralKind::Bool) => Some(t.lexeme(source) == "true"),
        _ => None,
    };
    let text = string_value(value, source);
    let color = color_value(value, source);
    let price_source = source_name(value, source);

    let kind = match hint {
        Some(kind) => kind,
        None => match (&number, &boolean, &text, &color, &price_source) {
            (Some((_, Some(_))), ..) => InputKind::Int,
            (Some(_), ..) => InputKind::Float,
            (_, Some(_), ..) => InputKind::Bool,
            (_, _, Some(_), ..) => InputKind::String,
            (_, _, _, Some(_), _) => InputKind::Color,
            (_, _, _, _, Some(_)) => InputKind::Source,
            _ => {
                return Err(SyntaxError::at(span, "input default must be a literal")
                    .expecting(&["number", "string", "bool", "color", "price source"]));
            }
        },
    };

    let default = match kind {
        InputKind::Int => number.and_then(|(_, int)| int).map(InputValue::Int),
        InputKind::Float => number.map(|(n, _)| InputValue::Float(n)),
        InputKind::Bool => boolean.map(InputValue::Bool),
        InputKind::String => text.map(InputValue::Text),
        InputKind::Source => price_source.map(InputValue::Source),
        InputKind::Color => color.map(InputValue::Color),
    };
    let expected = match kind {
        InputKind::Int => "integer",
        InputKind::Float => "number",
        InputKind::Bool => "bool",
        InputKind::String => "string",
        InputKind::Source => "price source",
        InputKind::Color => "color",
    };
    let default = default.ok_or_else(|| {
        SyntaxError::at(span, "input default must be a literal").expecting(&[expected])
    })?;
    Ok((kind, default))
}

/// A number literal with an optional leading minus, plus its integer value
/// when the lexeme is integral.
fn number_literal(value: &[Token], source: &str) -> Option<(f64, Option<i64>)> {
    let (negative, token) = match value {
        [t] => (false, t),
        [minus, t] if minus.is_operator(Operator::Minus) => (true, t),
        _ => return None,
    };
    if token.kind != TokenKind::Literal(LiteralKind::Number) {
        return None;
    }
    let lexeme = token.lexeme(source);
    let sign = if negative { -1.0 } else { 1.0 };
    let number = lexeme.parse::<f64>().ok()? * sign;
    let int = lexeme
        .parse::<i64>()
        .ok()
        .map(|n| if negative { -n } else { n });
    Some((number, int))
}

fn string_value(value: &[Token], source: &str) -> Option<String> {
    match value {
        [t] if t.kind == TokenKind::Literal(LiteralKind::String) => {
            let lexeme = t.lexeme(source);
            let inner = lexeme.get(1..lexeme.len().saturating_sub(1)).unwrap_or("");
            Some(unescape(inner))
        }
        _ => None,
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn color_value(value: &[Token], source: &str) -> Option<String> {
    match value {
        [t] if t.kind == TokenKind::Literal(LiteralKind::Color) => Some(t.lexeme(source).to_string()),
        [ns, name] if ns.lexeme(source) == "color." && name.kind == TokenKind::Identifier => {
            Some(format!("color.{}", name.lexeme(source)))
        }
        _ => None,
    }
}

fn source_name(value: &[Token], source: &str) -> Option<String> {
    match value {
        [t] if matches!(t.kind, TokenKind::BuiltinSeries(_) | TokenKind::Identifier)
            && SOURCE_NAMES.contains(&t.lexeme(source)) =>
        {
            Some(t.lexeme(source).to_string())
        }
        _ => None,
    }
}

fn direction_value(value: &[Token], source: &str) -> Option<Direction> {
    match value {
        [ns, name] if ns.lexeme(source) == "strategy." => match name.lexeme(source) {
            "long" => Some(Direction::Long),
            "short" => Some(Direction::Short),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn slice_span(tokens: &[Token]) -> Option<Span> {
    let first = tokens.first()?;
    let last = tokens.last()?;
    Some(first.span.to(last.span))
}

fn bracket_delta(token: &Token) -> isize {
    match token.kind {
        TokenKind::Delimiter(Delimiter::LParen | Delimiter::LBracket) => 1,
        TokenKind::Delimiter(Delimiter::RParen | Delimiter::RBracket) => -1,
        _ => 0,
    }
}

/// Every closer in `line` must pair with the innermost open bracket of the
/// same shape, and nothing may be left open.
fn check_brackets(line: &[Token]) -> Result<(), SyntaxError> {
    let mut open: Vec<(&Token, Delimiter)> = Vec::new();
    for token in line {
        let (opener, closer) = match token.kind {
            TokenKind::Delimiter(d @ (Delimiter::LParen | Delimiter::LBracket)) => {
                open.push((token, d));
                continue;
            }
            TokenKind::Delimiter(Delimiter::RParen) => ("(", ")"),
            TokenKind::Delimiter(Delimiter::RBracket) => ("[", "]"),
            _ => continue,
        };
        let want = if closer == ")" { Delimiter::LParen } else { Delimiter::LBracket };
        if !matches!(open.pop(), Some((_, d)) if d == want) {
            return Err(SyntaxError::at(token.span, format!("unbalanced `{}`", closer)).expecting(&[opener]));
        }
    }
    match open.pop() {
        Some((token, Delimiter::LBracket)) => Err(SyntaxError::at(token.span, "unclosed `[`").expecting(&["]"])),
        Some((token, _)) => Err(SyntaxError::at(token.span, "unclosed `(`").expecting(&[")"])),
        None => Ok(()),
    }
}

/// Index of the bracket closing the one at `open`.
fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0isize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        depth += bracket_delta(token);
        if depth == 0 {
            return Some(i);
        }
    }
    None
}

fn top_level_position(tokens: &[Token], pred: impl Fn(&Token) -> bool) -> Option<usize> {
    let mut depth = 0isize;
    for (i, token) in tokens.iter().enumerate() {
        if depth == 0 && pred(token) {
            return Some(i);
        }
        depth += bracket_delta(token);
    }
    None
}

fn split_top_level(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut depth = 0isize;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        if depth == 0 && token.is_delimiter(Delimiter::Comma) {
            parts.push(&tokens[start..i]);
            start = i + 1;
        }
        depth += bracket_delta(token);
    }
    parts.push(&tokens[start..]);
    parts
}

struct Arg<'a> {
    name: Option<&'a str>,
    value: &'a [Token],
}

/// Arguments of the call whose `(` is at `open`, and the index of its `)`.
fn call_args<'a>(tokens: &'a [Token], open: usize, source: &'a str) -> Result<(Vec<Arg<'a>>, usize), SyntaxError> {
    let close = matching_close(tokens, open)
        .ok_or_else(|| SyntaxError::at(tokens[open].span, "unclosed `(`").expecting(&[")"]))?;
    let args = split_top_level(&tokens[open + 1..close])
        .into_iter()
        .filter(|part| !part.is_empty())
        .map(|part| match part {
            [name, eq, rest @ ..]
                if matches!(name.kind, TokenKind::Identifier | TokenKind::Keyword(_))
                    && eq.is_operator(Operator::Assign) =>
            {
                Arg {
                    name: Some(name.lexeme(source)),
                    value: rest,
                }
            }
            _ => Arg {
                name: None,
                value: part,
            },
        })
        .collect();
    Ok((args, close))
}

/// Arguments keyed by parameter name: named ones as written, positional ones
/// by their place in `positional`.
struct BoundArgs<'a> {
    entries: Vec<(&'a str, &'a [Token])>,
}

impl<'a> BoundArgs<'a> {
    fn get(&self, name: &str) -> Option<&'a [Token]> {
        self.entries
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    }
}

fn bind<'a>(args: &[Arg<'a>], positional: &[&'static str]) -> BoundArgs<'a> {
    let mut entries = Vec::with_capacity(args.len());
    let mut next = 0;
    for arg in args {
        match arg.name {
            Some(name) => entries.push((name, arg.value)),
            None => {
                if let Some(&name) = positional.get(next) {
                    entries.push((name, arg.value));
                }
                next += 1;
            }
        }
    }
    BoundArgs { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SCENARIO_ONE: &str =
        "//@version=5\nindicator(\"S\")\nlen=input.int(20,\"Length\")\nma=ta.sma(close,len)\nplot(ma)";

    fn parse_ok(source: &str) -> Script {
        match parse_source(source) {
            Ok(script) => script,
            Err(e) => panic!("{}", e.display_with_context(source)),
        }
    }

    #[test]
    fn simple_indicator_scenario() {
        let script = parse_ok(SCENARIO_ONE);
        assert_eq!(script.version(), 5);
        assert_eq!(script.kind(), ScriptKind::Indicator);
        assert_eq!(script.name(), "S");
        assert!(script.complexity_score() < 0.05);

        assert_eq!(script.inputs().len(), 1);
        let input = &script.inputs()[0];
        assert_eq!(input.name, "len");
        assert_eq!(input.kind, InputKind::Int);
        assert_eq!(input.default, InputValue::Int(20));
        assert_eq!(input.title.as_deref(), Some("Length"));

        let used: Vec<_> = script.indicators_used().iter().cloned().collect();
        assert_eq!(used, vec!["ta.sma".to_string()]);

        assert_eq!(script.variables().len(), 1);
        let ma = &script.variables()[0];
        assert_eq!(ma.target, Target::Single("ma".into()));
        assert_eq!(script.text(ma.raw_expr), "ta.sma(close,len)");

        assert_eq!(script.plots().len(), 1);
        let plot = &script.plots()[0];
        assert_eq!(plot.kind, PlotKind::Plot);
        assert_eq!(plot.series_expr.map(|s| script.text(s)), Some("ma"));
        assert_eq!(script.code_lines(), 4);
        assert_eq!(script.total_lines(), 5);
    }

    #[test]
    fn strategy_entry_with_when() {
        let source = "//@version=4\nstrategy(\"X\")\ncrossCondition = close > open\nstrategy.entry(\"Long\", strategy.long, when=crossCondition)\n";
        let script = parse_ok(source);
        assert_eq!(script.kind(), ScriptKind::Strategy);
        let call = &script.strategy_calls()[0];
        assert_eq!(call.kind, StrategyCallKind::Entry);
        assert_eq!(call.id.as_deref(), Some("Long"));
        assert_eq!(call.direction, Some(Direction::Long));
        assert_eq!(call.when.map(|s| script.text(s)), Some("crossCondition"));
        assert_eq!(call.qty, None);
        assert_eq!(call.scope, None);
    }

    #[test]
    fn strategy_exit_named_and_positional() {
        let source = "//@version=5\nstrategy(title=\"X\")\nstrategy.exit(\"TP\", \"Long\", limit=close * 1.1, stop=low)\nstrategy.close_all()\n";
        let script = parse_ok(source);
        let exit = &script.strategy_calls()[0];
        assert_eq!(exit.kind, StrategyCallKind::Exit);
        assert_eq!(exit.from_entry.as_deref(), Some("Long"));
        assert_eq!(exit.limit.map(|s| script.text(s)), Some("close * 1.1"));
        assert_eq!(exit.stop.map(|s| script.text(s)), Some("low"));
        assert_eq!(script.strategy_calls()[1].kind, StrategyCallKind::CloseAll);
        assert_eq!(script.name(), "X");
    }

    #[test]
    fn entry_without_direction_is_rejected() {
        let source = "//@version=5\nstrategy(\"X\")\nstrategy.entry(\"L\")\n";
        let err = parse_source(source).unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.expected, vec!["direction".to_string()]);
    }

    #[test]
    fn non_literal_order_id_is_rejected() {
        let source = "//@version=5\nstrategy(\"X\")\nstrategy.close(name)\n";
        let err = parse_source(source).unwrap_err();
        assert!(err.message.contains("string literal"));
    }

    #[test]
    fn missing_version_annotation() {
        let err = parse_source("indicator(\"S\")\nplot(close)\n").unwrap_err();
        assert_eq!(err.expected, vec!["//@version=N".to_string()]);
    }

    #[test]
    fn missing_declaration() {
        let err = parse_source("//@version=5\nx = close\n").unwrap_err();
        assert_eq!((err.line, err.column), (2, 1));
        assert_eq!(err.expected, vec!["indicator".to_string(), "strategy".to_string()]);
    }

    #[test]
    fn stray_close_paren_is_rejected() {
        let err = parse_source("//@version=5\nindicator(\"x\")\n)\n").unwrap_err();
        assert_eq!((err.line, err.column), (3, 1));
        assert_eq!(err.message, "unbalanced `)`");
        assert_eq!(err.expected, vec!["(".to_string()]);
    }

    #[test]
    fn mismatched_brackets_are_rejected() {
        let err = parse_source("//@version=5\nindicator(\"x\")\nx = close[1)\n").unwrap_err();
        assert_eq!((err.line, err.column), (3, 12));
        assert_eq!(err.message, "unbalanced `)`");

        let err = parse_source("//@version=5\nindicator(\"x\")\nplot(close]\n").unwrap_err();
        assert_eq!(err.message, "unbalanced `]`");
        assert_eq!(err.expected, vec!["[".to_string()]);
    }

    #[test]
    fn library_is_not_convertible() {
        let err = parse_source("//@version=5\nlibrary(\"L\")\n").unwrap_err();
        assert!(err.message.contains("library"));
    }

    #[test]
    fn declaration_needs_title() {
        let err = parse_source("//@version=5\nindicator(overlay=true)\n").unwrap_err();
        assert!(err.message.contains("title"));
    }

    #[test]
    fn unknown_character_is_located() {
        let err = parse_source("//@version=5\nindicator(\"S\")\nx = close @ 2\n").unwrap_err();
        assert_eq!((err.line, err.column), (3, 11));
        assert!(err.message.contains('@'));
    }

    #[test]
    fn unterminated_string() {
        let err = parse_source("//@version=5\nindicator(\"S)\n").unwrap_err();
        assert_eq!(err.message, "unterminated string literal");
    }

    #[test]
    fn condition_tree_and_scopes() {
        let source = "\
//@version=5
strategy(\"N\")
a = close > open
if a
    if close > 0
        strategy.entry(\"L\", strategy.long)
    else if close < 0
        strategy.close(\"L\")
    else
        strategy.close_all()
";
        let script = parse_ok(source);
        let c = script.conditions();
        assert_eq!(c.len(), 3);
        assert_eq!(c[0].nesting_depth, 0);
        assert_eq!(c[0].parent, None);
        assert_eq!(script.text(c[0].predicate), "a");

        let then_of_outer = Some(ScopeRef { condition: 0, branch: Branch::Then });
        assert_eq!(c[1].nesting_depth, 1);
        assert_eq!(c[1].parent, then_of_outer);
        assert_eq!(c[2].nesting_depth, 1);
        assert_eq!(c[2].parent, then_of_outer);
        assert_eq!(c[2].chained_from, Some(1));
        assert_eq!(script.text(c[2].predicate), "close < 0");
        assert!(c[1].else_body.is_some());

        let scopes: Vec<_> = script.strategy_calls().iter().map(|s| s.scope).collect();
        assert_eq!(
            scopes,
            vec![
                Some(ScopeRef { condition: 1, branch: Branch::Then }),
                Some(ScopeRef { condition: 2, branch: Branch::Then }),
                Some(ScopeRef { condition: 2, branch: Branch::Else }),
            ]
        );
        assert_eq!(script.max_nesting_depth(), 1);
    }

    #[test]
    fn nesting_depth_counts_enclosing_conditions() {
        let source = "\
//@version=5
indicator(\"D\")
if close > open
    if high > low
        if volume > 0
            x = 1
";
        let script = parse_ok(source);
        let depths: Vec<_> = script.conditions().iter().map(|c| c.nesting_depth).collect();
        assert_eq!(depths, vec![0, 1, 2]);
        assert_eq!(
            script.variables()[0].scope,
            Some(ScopeRef { condition: 2, branch: Branch::Then })
        );
    }

    #[test]
    fn else_without_if() {
        let source = "//@version=5\nindicator(\"E\")\nx = 1\nelse\n    x := 2\n";
        let err = parse_source(source).unwrap_err();
        assert_eq!(err.line, 4);
        assert_eq!(err.expected, vec!["if".to_string()]);
    }

    #[test]
    fn if_needs_a_body() {
        let err = parse_source("//@version=5\nindicator(\"E\")\nif close > open\nx = 1\n").unwrap_err();
        assert_eq!(err.expected, vec!["indented block".to_string()]);
    }

    #[test]
    fn assignment_forms() {
        let source = "\
//@version=5
indicator(\"A\")
[m, s, h] = ta.macd(close, 12, 26, 9)
var float acc = 0.0
acc += 1
x = close
x := x * 2
";
        let script = parse_ok(source);
        let v = script.variables();
        assert_eq!(v.len(), 5);
        assert_eq!(v[0].target, Target::Tuple(vec!["m".into(), "s".into(), "h".into()]));
        assert_eq!(v[1].persistence, Persistence::Var);
        assert_eq!(v[1].declared_type.as_deref(), Some("float"));
        assert_eq!(v[2].mode, AssignMode::Compound(Operator::PlusAssign));
        assert_eq!(v[3].mode, AssignMode::Declare);
        assert_eq!(v[4].mode, AssignMode::Reassign);
        assert_eq!(script.text(v[4].raw_expr), "x * 2");
    }

    #[test]
    fn functions_and_callees() {
        let source = "\
//@version=5
indicator(\"F\")
double(x) => x * 2
smooth(float src, len = 10) =>
    base = ta.sma(src, len)
    double(base)
r(x) => r(x - 1)
";
        let script = parse_ok(source);
        let f = script.functions();
        assert_eq!(f.len(), 3);
        assert!(f[0].single_line);
        assert_eq!(script.text(f[0].raw_body), "x * 2");
        assert!(f[0].callees.is_empty());

        assert!(!f[1].single_line);
        assert_eq!(f[1].params.len(), 2);
        assert_eq!(f[1].params[0].type_hint.as_deref(), Some("float"));
        assert_eq!(f[1].params[1].default.map(|s| script.text(s)), Some("10"));
        assert!(script.text(f[1].raw_body).starts_with("base = ta.sma(src, len)"));
        assert!(script.text(f[1].raw_body).ends_with("double(base)"));
        assert_eq!(f[1].callees, vec!["double".to_string()]);

        assert_eq!(f[2].callees, vec!["r".to_string()]);
        assert!(script.indicators_used().contains("ta.sma"));
    }

    #[test]
    fn input_forms() {
        let source = "\
//@version=5
indicator(\"I\")
a = input(14, \"Len\")
b = input.source(close, \"Src\")
c = input.bool(true, title=\"Flag\")
d = input.float(1.5, minval=0.1, maxval=10)
e = input.color(color.red, \"Col\")
f = input(defval=2.5, title=\"Legacy\", type=input.float)
g = input.int(-3)
";
        let script = parse_ok(source);
        let inputs = script.inputs();
        assert_eq!(inputs[0].kind, InputKind::Int);
        assert_eq!(inputs[1].default, InputValue::Source("close".into()));
        assert_eq!(inputs[2].default, InputValue::Bool(true));
        assert_eq!(inputs[2].title.as_deref(), Some("Flag"));
        assert_eq!(inputs[3].min, Some(0.1));
        assert_eq!(inputs[3].max, Some(10.0));
        assert_eq!(inputs[4].default, InputValue::Color("color.red".into()));
        assert_eq!(inputs[5].kind, InputKind::Float);
        assert_eq!(inputs[5].default, InputValue::Float(2.5));
        assert_eq!(inputs[6].default, InputValue::Int(-3));
        assert!(script.variables().is_empty());
    }

    #[test]
    fn input_default_must_be_literal() {
        let source = "//@version=5\nindicator(\"I\")\nn = 3\nlen = input.int(n)\n";
        let err = parse_source(source).unwrap_err();
        assert_eq!(err.line, 4);
        assert_eq!(err.expected, vec!["integer".to_string()]);
    }

    #[test]
    fn unsupported_constructs_are_recorded() {
        let source = "\
//@version=5
indicator(\"U\")
type Pivot
    float price
arr = array.new_float(0)
array.push(arr, close)
line.new(bar_index, high, bar_index, low)
for i = 0 to 10
    x = i
alert(\"hi\")
";
        let script = parse_ok(source);
        assert_eq!(script.type_decls().len(), 1);
        assert_eq!(script.type_decls()[0].name, "Pivot");
        assert_eq!(script.collection_ops().len(), 2);
        assert_eq!(script.collection_ops()[0].function, "new_float");
        assert_eq!(script.drawing_calls().len(), 1);
        let kinds: Vec<_> = script.other_statements().iter().map(|o| o.kind).collect();
        assert_eq!(
            kinds,
            vec![OtherKind::Expression, OtherKind::Drawing, OtherKind::ForLoop, OtherKind::Alert]
        );
    }

    #[test]
    fn plot_family() {
        let source = "\
//@version=5
indicator(\"P\", overlay=true)
plot(close, \"Close\", color=color.blue)
hline(70, \"Upper\")
bgcolor(color.red)
plotshape(close > open, title=\"Up\")
";
        let script = parse_ok(source);
        let plots = script.plots();
        assert_eq!(plots[0].title.as_deref(), Some("Close"));
        assert_eq!(plots[0].color_expr.map(|s| script.text(s)), Some("color.blue"));
        assert_eq!(plots[1].kind, PlotKind::Hline);
        assert_eq!(plots[1].series_expr.map(|s| script.text(s)), Some("70"));
        assert!(plots[2].kind.is_decoration());
        assert_eq!(plots[2].series_expr, None);
        assert_eq!(plots[3].title.as_deref(), Some("Up"));
    }

    #[test]
    fn continuation_lines_join_statement() {
        let source = "//@version=5\nindicator(\"C\")\nx = close +\n   open\nplot(x)\n";
        let script = parse_ok(source);
        assert_eq!(script.text(script.variables()[0].raw_expr), "close +\n   open");
    }

    fn script_with(functions: usize, variables: usize) -> String {
        let mut source = String::from("//@version=5\nindicator(\"G\")\n");
        for i in 0..functions {
            source.push_str(&format!("f{i}(x) => x + {i}\n"));
        }
        for i in 0..variables {
            source.push_str(&format!("v{i} = ta.sma(close, {})\n", i + 2));
        }
        source
    }

    proptest! {
        #[test]
        fn complexity_is_deterministic(functions in 0usize..6, variables in 0usize..30) {
            let source = script_with(functions, variables);
            let a = parse_source(&source).unwrap();
            let b = parse_source(&source).unwrap();
            prop_assert_eq!(a.complexity_factors(), b.complexity_factors());
            prop_assert_eq!(a.complexity_score().to_bits(), b.complexity_score().to_bits());
        }

        #[test]
        fn adding_a_function_never_lowers_the_score(functions in 0usize..6, variables in 0usize..30) {
            let before = parse_source(&script_with(functions, variables)).unwrap();
            let after = parse_source(&script_with(functions + 1, variables)).unwrap();
            prop_assert!(after.complexity_score() >= before.complexity_score());
        }
    }
}
