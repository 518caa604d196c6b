//! Script lexer.
//!
//! Single left-to-right scan over the source. The lexer never fails: any
//! character it cannot classify becomes a one-character `Unknown` token so the
//! parser can report a located error instead.
//!
//! Layout is tracked the way indentation-structured languages do it: the
//! leading width of every non-blank, non-comment line is compared against an
//! indent stack and `Indent`/`Dedent` tokens are emitted. Newlines inside
//! brackets and Pine continuation lines (indented deeper by a width that is not
//! a multiple of four) do not end the statement.

use crate::domain::token::{
    BuiltinSeries, Delimiter, Keyword, LiteralKind, OPERATORS, Span, Token, TokenKind,
};

/// Namespaces recognised as dotted prefixes.
pub const NAMESPACES: &[&str] = &[
    "ta", "math", "input", "strategy", "color", "array", "matrix", "map", "line", "label", "box",
    "table", "polyline", "linefill", "request", "str", "plot", "shape", "location", "size",
    "syminfo", "timeframe", "barstate", "display", "position", "chart", "ticker", "session",
    "currency", "extend", "text", "font", "xloc", "yloc", "alert", "runtime", "log", "hline",
    "order", "scale", "barmerge", "format", "dayofweek", "adjustment",
];

const TAB_WIDTH: usize = 4;

pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).tokenize()
}

struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
    indents: Vec<usize>,
    depth: usize,
    at_line_start: bool,
    line_has_content: bool,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
            indents: vec![0],
            depth: 0,
            at_line_start: true,
            line_has_content: false,
        }
    }

    fn tokenize(mut self) -> Vec<Token> {
        loop {
            if self.at_line_start {
                self.at_line_start = false;
                self.handle_indentation();
            }

            let Some(ch) = self.peek() else {
                break;
            };

            match ch {
                '\n' => self.newline(),
                c if c.is_whitespace() => {
                    self.advance();
                }
                '/' if self.peek_at(1) == Some('/') => self.line_comment(),
                '/' if self.peek_at(1) == Some('*') => self.block_comment(),
                '"' | '\'' => self.string(ch),
                '#' => self.color(),
                c if c.is_ascii_digit() => self.number(),
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.number(),
                c if c.is_alphabetic() || c == '_' => self.identifier(),
                '(' | '[' => {
                    self.depth += 1;
                    let d = if ch == '(' {
                        Delimiter::LParen
                    } else {
                        Delimiter::LBracket
                    };
                    self.single(TokenKind::Delimiter(d));
                }
                ')' | ']' => {
                    self.depth = self.depth.saturating_sub(1);
                    let d = if ch == ')' {
                        Delimiter::RParen
                    } else {
                        Delimiter::RBracket
                    };
                    self.single(TokenKind::Delimiter(d));
                }
                ',' => self.single(TokenKind::Delimiter(Delimiter::Comma)),
                '.' => self.single(TokenKind::Delimiter(Delimiter::Dot)),
                _ => self.operator_or_unknown(),
            }
        }

        self.finish();
        self.tokens
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn push(&mut self, kind: TokenKind, start: usize, line: usize, column: usize) {
        if !kind.is_trivia() {
            self.line_has_content = true;
        }
        self.tokens
            .push(Token::new(kind, Span::new(start, self.pos, line, column)));
    }

    fn push_empty(&mut self, kind: TokenKind) {
        self.tokens.push(Token::new(
            kind,
            Span::new(self.pos, self.pos, self.line, self.column),
        ));
    }

    fn single(&mut self, kind: TokenKind) {
        let (start, line, column) = (self.pos, self.line, self.column);
        self.advance();
        self.push(kind, start, line, column);
    }

    /// Measure leading whitespace of a fresh line and emit layout tokens.
    fn handle_indentation(&mut self) {
        let mut width = 0;
        while let Some(ch) = self.peek() {
            match ch {
                ' ' => width += 1,
                '\t' => width += TAB_WIDTH,
                _ => break,
            }
            self.advance();
        }

        match self.peek() {
            None | Some('\n') | Some('\r') => return,
            Some('/') if matches!(self.peek_at(1), Some('/') | Some('*')) => return,
            _ => {}
        }

        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push_empty(TokenKind::Indent);
            return;
        }

        while width < self.indents.last().copied().unwrap_or(0) {
            self.indents.pop();
            self.push_empty(TokenKind::Dedent);
        }

        // Dedent to a width that was never opened: treat the remainder as a new block.
        if width > self.indents.last().copied().unwrap_or(0) {
            self.indents.push(width);
            self.push_empty(TokenKind::Indent);
        }
    }

    fn newline(&mut self) {
        if self.depth > 0 || (self.line_has_content && self.next_line_is_continuation()) {
            self.advance();
            return;
        }

        let (start, line, column) = (self.pos, self.line, self.column);
        self.advance();
        self.push(TokenKind::Newline, start, line, column);
        self.line_has_content = false;
        self.at_line_start = true;
    }

    /// Pine wraps a statement when the next line is indented deeper than the
    /// current block by a width that is not a multiple of four.
    fn next_line_is_continuation(&self) -> bool {
        let rest = &self.source[self.pos + 1..];
        let mut width = 0;
        let mut chars = rest.chars().peekable();
        while let Some(&ch) = chars.peek() {
            match ch {
                ' ' => width += 1,
                '\t' => width += TAB_WIDTH,
                _ => break,
            }
            chars.next();
        }
        match chars.next() {
            None | Some('\n') | Some('\r') => return false,
            Some('/') if matches!(chars.peek(), Some('/') | Some('*')) => return false,
            _ => {}
        }
        let current = self.indents.last().copied().unwrap_or(0);
        width > current && width % TAB_WIDTH != 0
    }

    fn line_comment(&mut self) {
        let (start, line, column) = (self.pos, self.line, self.column);
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
        self.push(TokenKind::Comment, start, line, column);
    }

    /// Block comments do not nest: the first `*/` closes the comment.
    fn block_comment(&mut self) {
        let (start, line, column) = (self.pos, self.line, self.column);
        self.advance();
        self.advance();
        while self.peek().is_some() {
            if self.source[self.pos..].starts_with("*/") {
                self.advance();
                self.advance();
                break;
            }
            self.advance();
        }
        self.push(TokenKind::Comment, start, line, column);
    }

    fn string(&mut self, quote: char) {
        let (start, line, column) = (self.pos, self.line, self.column);
        match self.string_end(quote) {
            Some(end) => {
                while self.pos < end {
                    self.advance();
                }
                self.push(TokenKind::Literal(LiteralKind::String), start, line, column);
            }
            None => self.single(TokenKind::Unknown),
        }
    }

    /// Byte offset just past the closing quote, if the string closes on this line.
    fn string_end(&self, quote: char) -> Option<usize> {
        let body = &self.source[self.pos + quote.len_utf8()..];
        let mut escaped = false;
        for (i, ch) in body.char_indices() {
            if ch == '\n' {
                return None;
            }
            if escaped {
                escaped = false;
                continue;
            }
            if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                return Some(self.pos + quote.len_utf8() + i + ch.len_utf8());
            }
        }
        None
    }

    fn color(&mut self) {
        let rest = &self.source[self.pos + 1..];
        let hex_len = rest.chars().take_while(|c| c.is_ascii_hexdigit()).count();
        let followed_by_word = rest[hex_len..]
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_');

        if (hex_len == 6 || hex_len == 8) && !followed_by_word {
            let (start, line, column) = (self.pos, self.line, self.column);
            for _ in 0..=hex_len {
                self.advance();
            }
            self.push(TokenKind::Literal(LiteralKind::Color), start, line, column);
        } else {
            self.single(TokenKind::Unknown);
        }
    }

    fn number(&mut self) {
        let (start, line, column) = (self.pos, self.line, self.column);

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        if self.peek() == Some('.')
            && !self
                .peek_at(1)
                .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '.')
        {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let exp_digit = match self.peek_at(1) {
                Some('+') | Some('-') => self.peek_at(2),
                other => other,
            };
            if exp_digit.is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.advance();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }

        self.push(TokenKind::Literal(LiteralKind::Number), start, line, column);
    }

    fn identifier(&mut self) {
        let (start, line, column) = (self.pos, self.line, self.column);
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.advance();
        }
        let text = &self.source[start..self.pos];

        let dotted = self.peek() == Some('.')
            && self
                .peek_at(1)
                .is_some_and(|c| c.is_alphabetic() || c == '_');
        if dotted && NAMESPACES.contains(&text) {
            self.advance();
            self.push(TokenKind::Namespace, start, line, column);
            return;
        }

        let kind = match text {
            "true" | "false" => TokenKind::Literal(LiteralKind::Bool),
            "na" => TokenKind::Literal(LiteralKind::Na),
            _ => {
                if let Some(kw) = Keyword::from_ident(text) {
                    TokenKind::Keyword(kw)
                } else if let Some(series) = BuiltinSeries::from_ident(text) {
                    TokenKind::BuiltinSeries(series)
                } else {
                    TokenKind::Identifier
                }
            }
        };
        self.push(kind, start, line, column);
    }

    fn operator_or_unknown(&mut self) {
        let rest = &self.source[self.pos..];
        let matched = OPERATORS
            .iter()
            .find(|(text, _)| rest.starts_with(text))
            .copied();

        match matched {
            Some((text, op)) => {
                let (start, line, column) = (self.pos, self.line, self.column);
                for _ in 0..text.len() {
                    self.advance();
                }
                self.push(TokenKind::Operator(op), start, line, column);
            }
            None => self.single(TokenKind::Unknown),
        }
    }

    fn finish(&mut self) {
        if self.line_has_content {
            self.push_empty(TokenKind::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push_empty(TokenKind::Dedent);
        }
        self.push_empty(TokenKind::Eof);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::token::Operator;
    use proptest::prelude::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    fn lexemes(source: &str) -> Vec<String> {
        tokenize(source)
            .iter()
            .filter(|t| !matches!(t.kind, TokenKind::Newline | TokenKind::Eof))
            .filter(|t| !t.span.is_empty())
            .map(|t| t.lexeme(source).to_string())
            .collect()
    }

    #[test]
    fn empty_source_is_just_eof() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
    }

    #[test]
    fn simple_assignment() {
        assert_eq!(
            kinds("ma = ta.sma(close, 14)"),
            vec![
                TokenKind::Identifier,
                TokenKind::Operator(Operator::Assign),
                TokenKind::Namespace,
                TokenKind::Identifier,
                TokenKind::Delimiter(Delimiter::LParen),
                TokenKind::BuiltinSeries(BuiltinSeries::Close),
                TokenKind::Delimiter(Delimiter::Comma),
                TokenKind::Literal(LiteralKind::Number),
                TokenKind::Delimiter(Delimiter::RParen),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn namespace_lexeme_includes_dot() {
        let src = "x = ta.rsi(close, 14)";
        let tokens = tokenize(src);
        let ns = tokens.iter().find(|t| t.kind == TokenKind::Namespace).unwrap();
        assert_eq!(ns.lexeme(src), "ta.");
    }

    #[test]
    fn strategy_keyword_versus_namespace() {
        let src = "strategy(\"S\")\nstrategy.entry(\"L\", strategy.long)";
        let k = kinds(src);
        assert_eq!(k[0], TokenKind::Keyword(Keyword::Strategy));
        assert!(k.contains(&TokenKind::Namespace));
    }

    #[test]
    fn compound_operators_take_longest_match() {
        assert_eq!(
            kinds("x := a >= b ? 1 : 2"),
            vec![
                TokenKind::Identifier,
                TokenKind::Operator(Operator::Reassign),
                TokenKind::Identifier,
                TokenKind::Operator(Operator::Ge),
                TokenKind::Identifier,
                TokenKind::Operator(Operator::Question),
                TokenKind::Literal(LiteralKind::Number),
                TokenKind::Operator(Operator::Colon),
                TokenKind::Literal(LiteralKind::Number),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn arrow_declaration() {
        let k = kinds("f(x) => x * 2");
        assert!(k.contains(&TokenKind::Operator(Operator::Arrow)));
    }

    #[test]
    fn comments_are_tokens() {
        let src = "//@version=5\nx = 1 // trailing\n/* block\n comment */ y = 2";
        let tokens = tokenize(src);
        let comments: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Comment)
            .map(|t| t.lexeme(src))
            .collect();
        assert_eq!(
            comments,
            vec!["//@version=5", "// trailing", "/* block\n comment */"]
        );
    }

    #[test]
    fn block_comment_ends_at_first_close() {
        let src = "/* a /* b */ c */";
        let tokens = tokenize(src);
        assert_eq!(tokens[0].kind, TokenKind::Comment);
        assert_eq!(tokens[0].lexeme(src), "/* a /* b */");
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
    }

    #[test]
    fn indentation_produces_indent_and_dedent() {
        let src = "if a\n    b := 1\nc = 2\n";
        assert_eq!(
            kinds(src),
            vec![
                TokenKind::Keyword(Keyword::If),
                TokenKind::Identifier,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Identifier,
                TokenKind::Operator(Operator::Reassign),
                TokenKind::Literal(LiteralKind::Number),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Identifier,
                TokenKind::Operator(Operator::Assign),
                TokenKind::Literal(LiteralKind::Number),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn nested_blocks_dedent_at_eof() {
        let src = "if a\n    if b\n        c := 1";
        let k = kinds(src);
        let indents = k.iter().filter(|k| **k == TokenKind::Indent).count();
        let dedents = k.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(indents, 2);
        assert_eq!(dedents, 2);
        assert_eq!(*k.last().unwrap(), TokenKind::Eof);
    }

    #[test]
    fn blank_and_comment_lines_do_not_dedent() {
        let src = "if a\n    b := 1\n\n// note\n    c := 2\nd = 3";
        let k = kinds(src);
        let dedents = k.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(dedents, 1);
    }

    #[test]
    fn newline_inside_parens_is_not_a_statement_break() {
        let src = "x = f(a,\n      b)\ny = 1";
        let newlines = kinds(src)
            .iter()
            .filter(|k| **k == TokenKind::Newline)
            .count();
        assert_eq!(newlines, 2);
    }

    #[test]
    fn continuation_line_is_joined() {
        let src = "x = a +\n  b\ny = 1";
        let k = kinds(src);
        assert_eq!(k.iter().filter(|k| **k == TokenKind::Newline).count(), 2);
        assert!(!k.contains(&TokenKind::Indent));
    }

    #[test]
    fn unknown_characters_become_tokens() {
        let src = "x = 1 @ 2";
        let tokens = tokenize(src);
        let unknown = tokens.iter().find(|t| t.kind == TokenKind::Unknown).unwrap();
        assert_eq!(unknown.lexeme(src), "@");
        assert_eq!(unknown.line(), 1);
        assert_eq!(unknown.column(), 7);
    }

    #[test]
    fn unterminated_string_yields_unknown_quote() {
        let src = "t = \"abc";
        let tokens = tokenize(src);
        assert_eq!(tokens[2].kind, TokenKind::Unknown);
        assert_eq!(tokens[2].lexeme(src), "\"");
        assert_eq!(tokens[3].kind, TokenKind::Identifier);
    }

    #[test]
    fn string_with_escaped_quote() {
        let src = r#"t = "a\"b""#;
        let tokens = tokenize(src);
        assert_eq!(tokens[2].kind, TokenKind::Literal(LiteralKind::String));
        assert_eq!(tokens[2].lexeme(src), r#""a\"b""#);
    }

    #[test]
    fn color_literal() {
        let src = "c = #ff0000";
        assert_eq!(lexemes(src), vec!["c", "=", "#ff0000"]);
        assert_eq!(kinds(src)[2], TokenKind::Literal(LiteralKind::Color));
    }

    #[test]
    fn numbers_with_fraction_and_exponent() {
        let src = "a = 1.5e-3 + .5 + 2.";
        assert_eq!(lexemes(src), vec!["a", "=", "1.5e-3", "+", ".5", "+", "2."]);
    }

    #[test]
    fn literal_keywords() {
        let k = kinds("x = na or true");
        assert_eq!(k[2], TokenKind::Literal(LiteralKind::Na));
        assert_eq!(k[3], TokenKind::Keyword(Keyword::Or));
        assert_eq!(k[4], TokenKind::Literal(LiteralKind::Bool));
    }

    #[test]
    fn line_and_column_tracking() {
        let src = "a = 1\nbb = close";
        let tokens = tokenize(src);
        let close = tokens
            .iter()
            .find(|t| matches!(t.kind, TokenKind::BuiltinSeries(_)))
            .unwrap();
        assert_eq!(close.line(), 2);
        assert_eq!(close.column(), 6);
    }

    fn strip_ws(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    proptest! {
        #[test]
        fn lexemes_reproduce_source_modulo_whitespace(src in "\\PC{0,200}") {
            let tokens = tokenize(&src);
            let joined: String = tokens
                .iter()
                .filter(|t| !matches!(t.kind, TokenKind::Indent | TokenKind::Dedent))
                .map(|t| t.lexeme(&src))
                .collect();
            prop_assert_eq!(strip_ws(&joined), strip_ws(&src));
        }

        #[test]
        fn script_like_input_round_trips(
            lines in proptest::collection::vec("[ a-z0-9_=+*/().,:?<>\"\\[\\]-]{0,30}", 0..12)
        ) {
            let src = lines.join("\n");
            let tokens = tokenize(&src);
            prop_assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof));
            let joined: String = tokens.iter().map(|t| t.lexeme(&src)).collect();
            prop_assert_eq!(strip_ws(&joined), strip_ws(&src));
        }
    }
}
