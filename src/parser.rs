// Recursive-descent parser
// Tokens in, `Expr` tree out; every node is registered with its span.

use std::rc::Rc;

use thiserror::Error;

use crate::ast::{
    ArithOp, AssignOp, CallTarget, Expr, ExprKind, ExprRef, FunctionDef, ObjectPatternEntry, Param,
    Pattern, PatternKey, ReduceMode, SourceInfo, Span, TemplatePart,
};
use crate::functions::{self, Builtin};
use crate::lexer::{tokenize, LexError, Spanned, StrPart, Token};
use crate::value::Json;

/// Parser errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    #[error("{}", expected_message(.expected, .found))]
    Expected {
        expected: String,
        found: Option<String>,
    },

    #[error("Parameter list cannot be empty; drop the parentheses instead.")]
    EmptyParameterList,

    #[error("Missing expression before {0}.")]
    EmptyPipeTerm(String),

    #[error("Malformed parameter list: {0}.")]
    MalformedParameterList(String),

    #[error("Malformed object construction: {0}.")]
    MalformedObject(String),

    #[error("Unexpected {0}.")]
    UnexpectedToken(String),

    #[error("Invalid destructuring pattern: {0}.")]
    InvalidPattern(String),

    #[error("{0}")]
    Lex(LexError),
}

fn expected_message(expected: &str, found: &Option<String>) -> String {
    match found {
        Some(found) => format!("Expected {}, but got {}.", expected, found),
        None => format!("Expected {}, but reached end of input.", expected),
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
}

impl ParseError {
    pub fn lex_error(&self) -> Option<&LexError> {
        match &self.kind {
            ParseErrorKind::Lex(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        let span = Span::new(err.offset, err.offset + 1);
        ParseError {
            kind: ParseErrorKind::Lex(err),
            span,
        }
    }
}

type PResult<T> = Result<T, ParseError>;

/// Parse program text into an expression tree and its source table.
pub fn parse(text: &str) -> PResult<(ExprRef, SourceInfo)> {
    parse_source(text, 0, "<program>")
}

/// Parse text registered under a given source id and display name.
pub fn parse_source(text: &str, id: u32, name: &str) -> PResult<(ExprRef, SourceInfo)> {
    let mut source = SourceInfo::new(id, name, text);
    let tokens = tokenize(text)?;
    let eof = text.chars().count();
    let root = {
        let mut parser = Parser::new(tokens, &mut source, eof);
        parser.parse_program()?
    };
    Ok((root, source))
}

pub struct Parser<'a> {
    tokens: Vec<Spanned>,
    position: usize,
    source: &'a mut SourceInfo,
    eof: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Spanned>, source: &'a mut SourceInfo, eof: usize) -> Self {
        Parser {
            tokens,
            position: 0,
            source,
            eof,
        }
    }

    // ── Token cursor ─────────────────────────────────────────────────────────

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.position + offset).map(|s| &s.token)
    }

    fn current_span(&self) -> Span {
        match self.tokens.get(self.position) {
            Some(s) => Span::new(s.start, s.end),
            None => Span::new(self.eof, self.eof),
        }
    }

    fn previous_end(&self) -> usize {
        match self.position.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(s) => s.end,
            None => 0,
        }
    }

    fn advance(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn found(&self) -> Option<String> {
        self.peek().map(Token::describe)
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            kind,
            span: self.current_span(),
        }
    }

    fn expected(&self, what: &str) -> ParseError {
        self.error(ParseErrorKind::Expected {
            expected: what.to_string(),
            found: self.found(),
        })
    }

    fn expect(&mut self, token: Token, what: &str) -> PResult<Span> {
        if self.check(&token) {
            let span = self.current_span();
            self.position += 1;
            Ok(span)
        } else {
            Err(self.expected(what))
        }
    }

    // ── Node construction ────────────────────────────────────────────────────

    fn node(&mut self, span: Span, kind: ExprKind) -> ExprRef {
        let id = self.source.register(span);
        Expr::new(id, kind)
    }

    fn span_of(&self, expr: &ExprRef) -> Span {
        self.source.span(expr.id).unwrap_or(Span::new(0, 0))
    }

    fn native_call(&mut self, builtin: &'static Builtin, args: Vec<ExprRef>) -> ExprRef {
        let span = match (args.first(), args.last()) {
            (Some(first), Some(last)) => self.span_of(first).to(self.span_of(last)),
            _ => Span::new(0, 0),
        };
        self.native_call_spanning(span, builtin, args)
    }

    fn native_call_spanning(&mut self, span: Span, builtin: &'static Builtin, args: Vec<ExprRef>) -> ExprRef {
        self.node(
            span,
            ExprKind::FunctionCall {
                target: CallTarget::Native(builtin),
                args,
            },
        )
    }

    fn identity_at(&mut self, span: Span) -> ExprRef {
        self.node(span, ExprKind::Identity)
    }

    // ── Grammar ──────────────────────────────────────────────────────────────

    fn parse_program(&mut self) -> PResult<ExprRef> {
        if self.tokens.is_empty() {
            return Ok(self.node(Span::new(0, 0), ExprKind::Identity));
        }
        let root = self.parse_pipe()?;
        if self.peek().is_some() {
            return Err(self.expected("end of input"));
        }
        Ok(root)
    }

    /// Tokens that close the pipe currently being parsed.
    fn at_pipe_end(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(Token::RightParen)
                | Some(Token::RightBracket)
                | Some(Token::RightBrace)
                | Some(Token::Semicolon)
                | Some(Token::Then)
                | Some(Token::Elif)
                | Some(Token::Else)
                | Some(Token::End)
                | Some(Token::Catch)
        )
    }

    fn parse_pipe(&mut self) -> PResult<ExprRef> {
        if self.check(&Token::Def) {
            let start = self.current_span().start;
            let def = self.parse_definition()?;
            let def_node = self.node(Span::new(start, self.previous_end()), ExprKind::FunctionDefinition(def));
            if self.at_pipe_end() {
                return Ok(def_node);
            }
            let rest = self.parse_pipe()?;
            let span = Span::new(start, self.span_of(&rest).end);
            return Ok(self.node(span, ExprKind::Compose(def_node, rest)));
        }

        let lhs = self.parse_comma()?;
        if self.eat(&Token::Pipe) {
            let rhs = self.parse_pipe()?;
            let span = self.span_of(&lhs).to(self.span_of(&rhs));
            return Ok(self.node(span, ExprKind::Compose(lhs, rhs)));
        }
        Ok(lhs)
    }

    fn parse_comma(&mut self) -> PResult<ExprRef> {
        let mut lhs = self.parse_assignment()?;
        while self.eat(&Token::Comma) {
            let rhs = self.parse_assignment()?;
            let span = self.span_of(&lhs).to(self.span_of(&rhs));
            lhs = self.node(span, ExprKind::Concat(lhs, rhs));
        }
        Ok(lhs)
    }

    fn parse_assignment(&mut self) -> PResult<ExprRef> {
        let lhs = self.parse_binding()?;
        let op = match self.peek() {
            Some(Token::Assign) => AssignOp::Set,
            Some(Token::UpdateAssign) => AssignOp::Update,
            Some(Token::PlusAssign) => AssignOp::Arithmetic(ArithOp::Add),
            Some(Token::MinusAssign) => AssignOp::Arithmetic(ArithOp::Subtract),
            Some(Token::StarAssign) => AssignOp::Arithmetic(ArithOp::Multiply),
            Some(Token::SlashAssign) => AssignOp::Arithmetic(ArithOp::Divide),
            Some(Token::PercentAssign) => AssignOp::Arithmetic(ArithOp::Modulo),
            Some(Token::AlternativeAssign) => AssignOp::Alternative,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_binding()?;
        let span = self.span_of(&lhs).to(self.span_of(&rhs));
        Ok(self.node(
            span,
            ExprKind::Assignment {
                op,
                path: lhs,
                value: rhs,
            },
        ))
    }

    fn parse_or(&mut self) -> PResult<ExprRef> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = self.native_call(&functions::OR, vec![lhs, rhs]);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<ExprRef> {
        let mut lhs = self.parse_comparison()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_comparison()?;
            lhs = self.native_call(&functions::AND, vec![lhs, rhs]);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> PResult<ExprRef> {
        let lhs = self.parse_additive()?;
        let builtin: &'static Builtin = match self.peek() {
            Some(Token::Equal) => &functions::EQUAL,
            Some(Token::NotEqual) => &functions::NOT_EQUAL,
            Some(Token::Less) => &functions::LESS,
            Some(Token::LessEqual) => &functions::LESS_EQUAL,
            Some(Token::Greater) => &functions::GREATER,
            Some(Token::GreaterEqual) => &functions::GREATER_EQUAL,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        Ok(self.native_call(builtin, vec![lhs, rhs]))
    }

    fn parse_additive(&mut self) -> PResult<ExprRef> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let builtin: &'static Builtin = match self.peek() {
                Some(Token::Plus) => &functions::PLUS,
                Some(Token::Minus) => &functions::MINUS,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = self.native_call(builtin, vec![lhs, rhs]);
        }
    }

    fn parse_multiplicative(&mut self) -> PResult<ExprRef> {
        let mut lhs = self.parse_alternative()?;
        loop {
            let builtin: &'static Builtin = match self.peek() {
                Some(Token::Star) => &functions::MULTIPLY,
                Some(Token::Slash) => &functions::DIVIDE,
                Some(Token::Percent) => &functions::MODULO,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_alternative()?;
            lhs = self.native_call(builtin, vec![lhs, rhs]);
        }
    }

    fn parse_alternative(&mut self) -> PResult<ExprRef> {
        let lhs = self.parse_unary()?;
        if self.eat(&Token::Alternative) {
            let rhs = self.parse_alternative()?;
            let span = self.span_of(&lhs).to(self.span_of(&rhs));
            return Ok(self.node(span, ExprKind::Alternative(lhs, rhs)));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<ExprRef> {
        if self.check(&Token::Minus) {
            let start = self.current_span().start;
            self.advance();
            let operand = self.parse_unary()?;
            let span = Span::new(start, self.span_of(&operand).end);
            return Ok(self.native_call_spanning(span, &functions::NEGATE, vec![operand]));
        }
        self.parse_postfix()
    }

    /// `expr as $pattern | body`; the bound expression is a full `or`-level
    /// expression, so `. + 1 as $x | ..` binds the sum.
    fn parse_binding(&mut self) -> PResult<ExprRef> {
        let term = self.parse_or()?;
        if !self.eat(&Token::As) {
            return Ok(term);
        }
        let pattern = self.parse_patterns()?;
        self.expect(Token::Pipe, "'|'")?;
        let body = self.parse_pipe()?;
        let span = self.span_of(&term).to(self.span_of(&body));
        Ok(self.node(
            span,
            ExprKind::Let {
                value: term,
                pattern,
                body,
            },
        ))
    }

    fn parse_postfix(&mut self) -> PResult<ExprRef> {
        let mut term = self.parse_primary()?;
        loop {
            let start = self.span_of(&term).start;
            match self.peek().cloned() {
                Some(Token::Field(name)) => {
                    self.advance();
                    let span = Span::new(start, self.previous_end());
                    term = self.node(
                        span,
                        ExprKind::StringSelector {
                            target: term,
                            key: name,
                            optional: false,
                        },
                    );
                }
                Some(Token::Dot) if matches!(self.peek_at(1), Some(Token::Str(_))) => {
                    self.advance();
                    term = self.parse_quoted_selector(term, start)?;
                }
                Some(Token::Dot) if matches!(self.peek_at(1), Some(Token::LeftBracket)) => {
                    self.advance();
                }
                Some(Token::LeftBracket) => {
                    term = self.parse_bracket_suffix(term, start)?;
                }
                Some(Token::Question) => {
                    self.advance();
                    let span = Span::new(start, self.previous_end());
                    term = self.make_optional(term, span);
                }
                _ => return Ok(term),
            }
        }
    }

    /// `."key"` or `."\(expr)"` following `target`.
    fn parse_quoted_selector(&mut self, target: ExprRef, start: usize) -> PResult<ExprRef> {
        let key = self.parse_string()?;
        let span = Span::new(start, self.previous_end());
        let kind = match &key.kind {
            ExprKind::Literal(Json::String(s)) => ExprKind::StringSelector {
                target,
                key: s.to_string(),
                optional: false,
            },
            _ => ExprKind::Selector {
                target,
                index: key,
                optional: false,
            },
        };
        Ok(self.node(span, kind))
    }

    fn parse_bracket_suffix(&mut self, target: ExprRef, start: usize) -> PResult<ExprRef> {
        self.expect(Token::LeftBracket, "'['")?;
        if self.eat(&Token::RightBracket) {
            let span = Span::new(start, self.previous_end());
            return Ok(self.node(
                span,
                ExprKind::Enumerate {
                    target,
                    optional: false,
                },
            ));
        }

        let from = if self.check(&Token::Colon) {
            None
        } else {
            Some(self.parse_pipe()?)
        };

        if self.eat(&Token::Colon) {
            let to = if self.check(&Token::RightBracket) {
                None
            } else {
                Some(self.parse_pipe()?)
            };
            if from.is_none() && to.is_none() {
                return Err(self.expected("a slice bound"));
            }
            self.expect(Token::RightBracket, "']'")?;
            let span = Span::new(start, self.previous_end());
            return Ok(self.node(
                span,
                ExprKind::SliceSelector {
                    target,
                    from,
                    to,
                    optional: false,
                },
            ));
        }

        self.expect(Token::RightBracket, "']'")?;
        let span = Span::new(start, self.previous_end());
        match from {
            Some(index) => Ok(self.node(
                span,
                ExprKind::Selector {
                    target,
                    index,
                    optional: false,
                },
            )),
            None => Err(self.expected("an index")),
        }
    }

    /// Postfix `?`: selectors become optional, anything else is wrapped in
    /// `try` without a handler.
    fn make_optional(&mut self, term: ExprRef, span: Span) -> ExprRef {
        let kind = match &term.kind {
            ExprKind::StringSelector { target, key, .. } => ExprKind::StringSelector {
                target: target.clone(),
                key: key.clone(),
                optional: true,
            },
            ExprKind::Selector { target, index, .. } => ExprKind::Selector {
                target: target.clone(),
                index: index.clone(),
                optional: true,
            },
            ExprKind::SliceSelector { target, from, to, .. } => ExprKind::SliceSelector {
                target: target.clone(),
                from: from.clone(),
                to: to.clone(),
                optional: true,
            },
            ExprKind::Enumerate { target, .. } => ExprKind::Enumerate {
                target: target.clone(),
                optional: true,
            },
            _ => ExprKind::TryCatch {
                body: term,
                catch: None,
            },
        };
        self.node(span, kind)
    }

    fn parse_primary(&mut self) -> PResult<ExprRef> {
        let span = self.current_span();
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.expected("an expression")),
        };

        match token {
            Token::Number(n) => {
                self.advance();
                Ok(self.node(span, ExprKind::Literal(Json::Number(n))))
            }
            Token::Str(_) => self.parse_string(),
            Token::Format(name) => {
                self.advance();
                if matches!(self.peek(), Some(Token::Str(_))) {
                    let template = self.parse_string()?;
                    let parts = match &template.kind {
                        ExprKind::Literal(Json::String(s)) => vec![TemplatePart::Literal(s.to_string())],
                        ExprKind::StringTemplate { parts, .. } => parts.clone(),
                        _ => Vec::new(),
                    };
                    let full = Span::new(span.start, self.previous_end());
                    return Ok(self.node(
                        full,
                        ExprKind::StringTemplate {
                            parts,
                            format: Some(name),
                        },
                    ));
                }
                Ok(self.node(span, ExprKind::Format(name)))
            }
            Token::Dot => {
                self.advance();
                if matches!(self.peek(), Some(Token::Str(_))) {
                    let identity = self.identity_at(span);
                    return self.parse_quoted_selector(identity, span.start);
                }
                Ok(self.identity_at(span))
            }
            Token::Field(name) => {
                self.advance();
                let identity = self.identity_at(span);
                Ok(self.node(
                    span,
                    ExprKind::StringSelector {
                        target: identity,
                        key: name,
                        optional: false,
                    },
                ))
            }
            Token::DotDot => {
                self.advance();
                Ok(self.node(
                    span,
                    ExprKind::FunctionCall {
                        target: CallTarget::Named("recurse".to_string()),
                        args: Vec::new(),
                    },
                ))
            }
            Token::Variable(name) => {
                self.advance();
                Ok(self.node(span, ExprKind::Variable(name)))
            }
            Token::Ident(name) => self.parse_identifier(name, span),
            Token::LeftParen => {
                self.advance();
                let inner = self.parse_pipe()?;
                self.expect(Token::RightParen, "')'")?;
                Ok(inner)
            }
            Token::LeftBracket => {
                self.advance();
                if self.eat(&Token::RightBracket) {
                    let full = Span::new(span.start, self.previous_end());
                    return Ok(self.node(full, ExprKind::ConstructArray(None)));
                }
                let inner = self.parse_pipe()?;
                self.expect(Token::RightBracket, "']'")?;
                let full = Span::new(span.start, self.previous_end());
                Ok(self.node(full, ExprKind::ConstructArray(Some(inner))))
            }
            Token::LeftBrace => self.parse_object(),
            Token::If => self.parse_if(),
            Token::Try => {
                self.advance();
                let body = self.parse_postfix()?;
                let catch = if self.eat(&Token::Catch) {
                    Some(self.parse_postfix()?)
                } else {
                    None
                };
                let full = Span::new(span.start, self.previous_end());
                Ok(self.node(full, ExprKind::TryCatch { body, catch }))
            }
            Token::Reduce => self.parse_reduce(ReduceMode::Reduce),
            Token::Foreach => self.parse_reduce(ReduceMode::Foreach),
            Token::Label => {
                self.advance();
                let name = match self.peek() {
                    Some(Token::Variable(name)) => name.clone(),
                    _ => return Err(self.expected("a label name")),
                };
                self.advance();
                self.expect(Token::Pipe, "'|'")?;
                let body = self.parse_pipe()?;
                let full = Span::new(span.start, self.span_of(&body).end);
                Ok(self.node(full, ExprKind::Label { name, body }))
            }
            Token::Def => {
                // `def` in term position, e.g. `1 + def f: 2; f`
                self.parse_pipe()
            }
            Token::Pipe
            | Token::Comma
            | Token::Semicolon
            | Token::RightParen
            | Token::RightBracket
            | Token::RightBrace => Err(self.error(ParseErrorKind::EmptyPipeTerm(token.describe()))),
            other => Err(self.error(ParseErrorKind::UnexpectedToken(other.describe()))),
        }
    }

    fn parse_identifier(&mut self, name: String, span: Span) -> PResult<ExprRef> {
        self.advance();
        match name.as_str() {
            "true" => return Ok(self.node(span, ExprKind::Literal(Json::Bool(true)))),
            "false" => return Ok(self.node(span, ExprKind::Literal(Json::Bool(false)))),
            "null" => return Ok(self.node(span, ExprKind::Literal(Json::Null))),
            "break" => {
                if let Some(Token::Variable(label)) = self.peek().cloned() {
                    self.advance();
                    let full = Span::new(span.start, self.previous_end());
                    return Ok(self.node(full, ExprKind::Break(label)));
                }
                return Err(self.expected("a label name after 'break'"));
            }
            _ => {}
        }

        let mut args = Vec::new();
        if self.eat(&Token::LeftParen) {
            loop {
                args.push(self.parse_pipe()?);
                if self.eat(&Token::Semicolon) {
                    continue;
                }
                if self.eat(&Token::RightParen) {
                    break;
                }
                return Err(self.expected("';' or ')'"));
            }
        }
        let full = Span::new(span.start, self.previous_end());
        Ok(self.node(
            full,
            ExprKind::FunctionCall {
                target: CallTarget::Named(name),
                args,
            },
        ))
    }

    /// A string literal token: a plain literal, or a template when it
    /// contains interpolations.
    fn parse_string(&mut self) -> PResult<ExprRef> {
        let spanned = match self.advance() {
            Some(spanned) => spanned,
            None => return Err(self.expected("a string")),
        };
        let span = Span::new(spanned.start, spanned.end);
        let parts = match spanned.token {
            Token::Str(parts) => parts,
            other => {
                self.position -= 1;
                return Err(self.error(ParseErrorKind::UnexpectedToken(other.describe())));
            }
        };

        if let [StrPart::Literal(text)] = parts.as_slice() {
            return Ok(self.node(span, ExprKind::Literal(Json::from(text.as_str()))));
        }

        let mut template = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                StrPart::Literal(text) => template.push(TemplatePart::Literal(text)),
                StrPart::Interpolation(tokens) => {
                    template.push(TemplatePart::Interpolation(self.parse_interpolation(tokens, span)?))
                }
            }
        }
        Ok(self.node(
            span,
            ExprKind::StringTemplate {
                parts: template,
                format: None,
            },
        ))
    }

    fn parse_interpolation(&mut self, tokens: Vec<Spanned>, outer: Span) -> PResult<ExprRef> {
        let eof = tokens.last().map_or(outer.end, |t| t.end);
        let mut inner = Parser::new(tokens, &mut *self.source, eof);
        if inner.tokens.is_empty() {
            return Err(ParseError {
                kind: ParseErrorKind::Expected {
                    expected: "an expression inside \\( )".to_string(),
                    found: None,
                },
                span: outer,
            });
        }
        let expr = inner.parse_pipe()?;
        if inner.peek().is_some() {
            return Err(inner.expected("')'"));
        }
        Ok(expr)
    }

    fn parse_object(&mut self) -> PResult<ExprRef> {
        let open = self.expect(Token::LeftBrace, "'{'")?;
        let mut entries = Vec::new();

        if !self.eat(&Token::RightBrace) {
            loop {
                entries.push(self.parse_object_entry()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                if self.eat(&Token::RightBrace) {
                    break;
                }
                if self.peek().is_none() {
                    return Err(self.expected("'}'"));
                }
                let found = self.found().unwrap_or_default();
                return Err(self.error(ParseErrorKind::MalformedObject(format!(
                    "expected ',' or '}}' but got {}",
                    found
                ))));
            }
        }

        let span = Span::new(open.start, self.previous_end());
        Ok(self.node(span, ExprKind::ConstructObject(entries)))
    }

    fn parse_object_entry(&mut self) -> PResult<(ExprRef, ExprRef)> {
        let span = self.current_span();
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.expected("an object key")),
        };

        let keyword = token.keyword_text().map(str::to_string);
        match token {
            Token::Variable(name) => {
                self.advance();
                let key = self.node(span, ExprKind::Literal(Json::from(name.as_str())));
                let value = self.node(span, ExprKind::Variable(name));
                Ok((key, value))
            }
            Token::Ident(_) | Token::Def | Token::As | Token::If | Token::Then | Token::Elif
            | Token::Else | Token::End | Token::And | Token::Or | Token::Try | Token::Catch
            | Token::Reduce | Token::Foreach | Token::Label => {
                self.advance();
                let name = match (token, keyword) {
                    (Token::Ident(name), _) => name,
                    (_, Some(kw)) => kw,
                    _ => String::new(),
                };
                let key = self.node(span, ExprKind::Literal(Json::from(name.as_str())));
                if self.eat(&Token::Colon) {
                    let value = self.parse_object_value()?;
                    return Ok((key, value));
                }
                let identity = self.identity_at(span);
                let value = self.node(
                    span,
                    ExprKind::StringSelector {
                        target: identity,
                        key: name,
                        optional: false,
                    },
                );
                Ok((key, value))
            }
            Token::Str(_) => {
                let key = self.parse_string()?;
                if self.eat(&Token::Colon) {
                    let value = self.parse_object_value()?;
                    return Ok((key, value));
                }
                let identity = self.identity_at(span);
                let value = self.node(
                    span,
                    ExprKind::Selector {
                        target: identity,
                        index: key.clone(),
                        optional: false,
                    },
                );
                Ok((key, value))
            }
            Token::LeftParen => {
                self.advance();
                let key = self.parse_pipe()?;
                self.expect(Token::RightParen, "')'")?;
                if !self.eat(&Token::Colon) {
                    return Err(self.error(ParseErrorKind::MalformedObject(
                        "a computed key must be followed by ':' and a value".to_string(),
                    )));
                }
                let value = self.parse_object_value()?;
                Ok((key, value))
            }
            other => Err(self.error(ParseErrorKind::MalformedObject(format!(
                "{} cannot be used as a key",
                other.describe()
            )))),
        }
    }

    /// Object values stop at `,` and `}`; pipes are allowed.
    fn parse_object_value(&mut self) -> PResult<ExprRef> {
        let mut value = self.parse_binding()?;
        while self.eat(&Token::Pipe) {
            let rhs = self.parse_binding()?;
            let span = self.span_of(&value).to(self.span_of(&rhs));
            value = self.node(span, ExprKind::Compose(value, rhs));
        }
        Ok(value)
    }

    fn parse_if(&mut self) -> PResult<ExprRef> {
        let start = self.expect(Token::If, "'if'")?.start;
        let cond = self.parse_pipe()?;
        self.expect(Token::Then, "'then'")?;
        let then = self.parse_pipe()?;

        let mut branches = Vec::new();
        while self.check(&Token::Elif) {
            let elif_start = self.current_span().start;
            self.advance();
            let c = self.parse_pipe()?;
            self.expect(Token::Then, "'then'")?;
            let t = self.parse_pipe()?;
            branches.push((elif_start, c, t));
        }

        let mut else_ = if self.eat(&Token::Else) {
            Some(self.parse_pipe()?)
        } else {
            None
        };
        self.expect(Token::End, "'end'")?;
        let end = self.previous_end();

        for (elif_start, c, t) in branches.into_iter().rev() {
            let node = self.node(
                Span::new(elif_start, end),
                ExprKind::IfThenElse {
                    cond: c,
                    then: t,
                    else_,
                },
            );
            else_ = Some(node);
        }

        Ok(self.node(Span::new(start, end), ExprKind::IfThenElse { cond, then, else_ }))
    }

    fn parse_reduce(&mut self, mode: ReduceMode) -> PResult<ExprRef> {
        let start = self.current_span().start;
        self.advance();
        let source = self.parse_postfix()?;
        self.expect(Token::As, "'as'")?;
        let pattern = self.parse_patterns()?;
        self.expect(Token::LeftParen, "'('")?;
        let init = self.parse_pipe()?;
        self.expect(Token::Semicolon, "';'")?;
        let update = self.parse_pipe()?;
        let extract = if mode == ReduceMode::Foreach && self.eat(&Token::Semicolon) {
            Some(self.parse_pipe()?)
        } else {
            None
        };
        self.expect(Token::RightParen, "')'")?;
        let span = Span::new(start, self.previous_end());
        Ok(self.node(
            span,
            ExprKind::Reduce {
                mode,
                source,
                pattern,
                init,
                update,
                extract,
            },
        ))
    }

    fn parse_definition(&mut self) -> PResult<Rc<FunctionDef>> {
        self.expect(Token::Def, "'def'")?;
        let name = match self.peek() {
            Some(Token::Ident(name)) => name.clone(),
            _ => return Err(self.expected("a function name")),
        };
        self.advance();

        let mut params = Vec::new();
        if self.eat(&Token::LeftParen) {
            if self.check(&Token::RightParen) {
                return Err(self.error(ParseErrorKind::EmptyParameterList));
            }
            loop {
                match self.peek().cloned() {
                    Some(Token::Variable(p)) => params.push(Param::Value(p)),
                    Some(Token::Ident(p)) => params.push(Param::Filter(p)),
                    Some(other) => {
                        return Err(self.error(ParseErrorKind::MalformedParameterList(format!(
                            "expected a parameter name, got {}",
                            other.describe()
                        ))))
                    }
                    None => return Err(self.expected("a parameter name")),
                }
                self.advance();
                if self.eat(&Token::Semicolon) {
                    continue;
                }
                if self.eat(&Token::RightParen) {
                    break;
                }
                return Err(self.error(ParseErrorKind::MalformedParameterList(format!(
                    "expected ';' or ')', got {}",
                    self.found().unwrap_or_else(|| "end of input".to_string())
                ))));
            }
        }

        self.expect(Token::Colon, "':'")?;
        let body = self.parse_pipe()?;
        self.expect(Token::Semicolon, "';'")?;
        Ok(Rc::new(FunctionDef { name, params, body }))
    }

    // ── Destructuring patterns ───────────────────────────────────────────────

    fn parse_patterns(&mut self) -> PResult<Pattern> {
        let first = self.parse_pattern()?;
        if self.eat(&Token::QuestionAlternative) {
            let rest = self.parse_patterns()?;
            return Ok(Pattern::Alternative(Box::new(first), Box::new(rest)));
        }
        Ok(first)
    }

    fn parse_pattern(&mut self) -> PResult<Pattern> {
        match self.peek().cloned() {
            Some(Token::Variable(name)) => {
                self.advance();
                Ok(Pattern::Variable(name))
            }
            Some(Token::LeftBracket) => {
                self.advance();
                if self.check(&Token::RightBracket) {
                    return Err(self.error(ParseErrorKind::InvalidPattern(
                        "array patterns need at least one element".to_string(),
                    )));
                }
                let mut items = Vec::new();
                loop {
                    items.push(self.parse_pattern()?);
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    self.expect(Token::RightBracket, "']'")?;
                    return Ok(Pattern::Array(items));
                }
            }
            Some(Token::LeftBrace) => {
                self.advance();
                let mut entries = Vec::new();
                loop {
                    entries.push(self.parse_object_pattern_entry()?);
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    self.expect(Token::RightBrace, "'}'")?;
                    return Ok(Pattern::Object(entries));
                }
            }
            Some(other) => Err(self.error(ParseErrorKind::InvalidPattern(format!(
                "expected a variable, array or object pattern, got {}",
                other.describe()
            )))),
            None => Err(self.expected("a pattern")),
        }
    }

    fn parse_object_pattern_entry(&mut self) -> PResult<ObjectPatternEntry> {
        let span = self.current_span();
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.expected("an object pattern key")),
        };

        let key = match token {
            Token::Variable(name) => {
                self.advance();
                let value = if self.eat(&Token::Colon) {
                    Some(self.parse_pattern()?)
                } else {
                    None
                };
                return Ok(ObjectPatternEntry {
                    key: PatternKey::Variable(name),
                    value,
                });
            }
            Token::Ident(name) => {
                self.advance();
                self.node(span, ExprKind::Literal(Json::from(name.as_str())))
            }
            Token::Str(_) => self.parse_string()?,
            Token::LeftParen => {
                self.advance();
                let key = self.parse_pipe()?;
                self.expect(Token::RightParen, "')'")?;
                key
            }
            ref other => match other.keyword_text() {
                Some(kw) => {
                    self.advance();
                    self.node(span, ExprKind::Literal(Json::from(kw)))
                }
                None => {
                    return Err(self.error(ParseErrorKind::InvalidPattern(format!(
                        "{} cannot be used as an object pattern key",
                        other.describe()
                    ))))
                }
            },
        };

        if !self.eat(&Token::Colon) {
            return Err(self.error(ParseErrorKind::InvalidPattern(
                "object pattern keys other than $name need ': pattern'".to_string(),
            )));
        }
        let value = self.parse_pattern()?;
        Ok(ObjectPatternEntry {
            key: PatternKey::Expr(key),
            value: Some(value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_expr(text: &str) -> ExprRef {
        parse(text).unwrap().0
    }

    fn parse_err(text: &str) -> ParseError {
        parse(text).unwrap_err()
    }

    fn native_name(expr: &ExprRef) -> &'static str {
        match &expr.kind {
            ExprKind::FunctionCall {
                target: CallTarget::Native(b),
                ..
            } => b.name,
            other => panic!("expected native call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_program_is_identity() {
        assert!(matches!(parse_expr("").kind, ExprKind::Identity));
        assert!(matches!(parse_expr("  # only a comment").kind, ExprKind::Identity));
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(parse_expr("42").kind, ExprKind::Literal(Json::from(42i64)));
        assert_eq!(parse_expr("\"hi\"").kind, ExprKind::Literal(Json::from("hi")));
        assert_eq!(parse_expr("true").kind, ExprKind::Literal(Json::Bool(true)));
        assert_eq!(parse_expr("null").kind, ExprKind::Literal(Json::Null));
    }

    #[test]
    fn test_parse_field_chain() {
        let expr = parse_expr(".a.b");
        match &expr.kind {
            ExprKind::StringSelector { target, key, .. } => {
                assert_eq!(key, "b");
                assert!(matches!(&target.kind, ExprKind::StringSelector { key, .. } if key == "a"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_brackets() {
        assert!(matches!(parse_expr(".[]").kind, ExprKind::Enumerate { optional: false, .. }));
        assert!(matches!(parse_expr(".[]?").kind, ExprKind::Enumerate { optional: true, .. }));
        assert!(matches!(parse_expr(".[0]").kind, ExprKind::Selector { .. }));
        assert!(matches!(parse_expr(".a[1:]").kind, ExprKind::SliceSelector { to: None, .. }));
        assert!(matches!(parse_expr(".[:2]").kind, ExprKind::SliceSelector { from: None, .. }));
        assert!(matches!(parse_expr(".[\"x\"]").kind, ExprKind::Selector { .. }));
        assert!(matches!(parse_expr(".\"x y\"").kind, ExprKind::StringSelector { .. }));
    }

    #[test]
    fn test_parse_precedence() {
        // 1 + 2 * 3 => _plus(1, _multiply(2, 3))
        let expr = parse_expr("1 + 2 * 3");
        assert_eq!(native_name(&expr), "_plus");
        if let ExprKind::FunctionCall { args, .. } = &expr.kind {
            assert_eq!(native_name(&args[1]), "_multiply");
        }

        // pipe binds loosest, comma next
        let expr = parse_expr(".a, .b | .c");
        match &expr.kind {
            ExprKind::Compose(lhs, _) => assert!(matches!(lhs.kind, ExprKind::Concat(..))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_alternative_binds_tighter_than_multiplication() {
        let expr = parse_expr("2 * .a // 3");
        assert_eq!(native_name(&expr), "_multiply");
        if let ExprKind::FunctionCall { args, .. } = &expr.kind {
            assert!(matches!(args[1].kind, ExprKind::Alternative(..)));
        }
    }

    #[test]
    fn test_parse_object_construction() {
        let expr = parse_expr("{a:1, b: {c: 2}, d: 3}");
        match &expr.kind {
            ExprKind::ConstructObject(entries) => {
                assert_eq!(entries.len(), 3);
                assert_eq!(entries[0].0.kind, ExprKind::Literal(Json::from("a")));
                assert!(matches!(&entries[1].1.kind, ExprKind::ConstructObject(inner) if inner.len() == 1));
                assert_eq!(entries[2].1.kind, ExprKind::Literal(Json::from(3i64)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_object_shorthands() {
        let expr = parse_expr("{a, $x, \"b c\", (.k): 1, if: 2}");
        match &expr.kind {
            ExprKind::ConstructObject(entries) => {
                assert_eq!(entries.len(), 5);
                assert!(matches!(entries[0].1.kind, ExprKind::StringSelector { .. }));
                assert!(matches!(&entries[1].1.kind, ExprKind::Variable(name) if name == "x"));
                assert!(matches!(entries[2].1.kind, ExprKind::Selector { .. }));
                assert!(matches!(entries[3].0.kind, ExprKind::StringSelector { .. }));
                assert_eq!(entries[4].0.kind, ExprKind::Literal(Json::from("if")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_if_elif_else() {
        let expr = parse_expr("if . then 1 elif .a then 2 end");
        match &expr.kind {
            ExprKind::IfThenElse { else_: Some(inner), .. } => {
                assert!(matches!(inner.kind, ExprKind::IfThenElse { else_: None, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_definitions() {
        let expr = parse_expr("def f(g; $x): g + $x; f(.; 1)");
        match &expr.kind {
            ExprKind::Compose(def, call) => {
                match &def.kind {
                    ExprKind::FunctionDefinition(def) => {
                        assert_eq!(def.name, "f");
                        assert_eq!(
                            def.params,
                            vec![Param::Filter("g".to_string()), Param::Value("x".to_string())]
                        );
                    }
                    other => panic!("unexpected {:?}", other),
                }
                assert!(matches!(&call.kind, ExprKind::FunctionCall { args, .. } if args.len() == 2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_reduce_and_foreach() {
        let expr = parse_expr("reduce .[] as $x (0; . + $x)");
        assert!(matches!(
            expr.kind,
            ExprKind::Reduce { mode: ReduceMode::Reduce, extract: None, .. }
        ));
        let expr = parse_expr("foreach .[] as [$a, $b] (0; . + $a; [., $b])");
        assert!(matches!(
            expr.kind,
            ExprKind::Reduce { mode: ReduceMode::Foreach, extract: Some(_), pattern: Pattern::Array(_), .. }
        ));
    }

    #[test]
    fn test_parse_binding_patterns() {
        let expr = parse_expr(". as {a: $x, $y} ?// [$x] | $x");
        match &expr.kind {
            ExprKind::Let { pattern, .. } => {
                assert!(matches!(pattern, Pattern::Alternative(..)));
                assert_eq!(pattern.variables(), vec!["x", "y"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_binding_takes_or_level_expression() {
        match &parse_expr(". + 1 as $x | $x * 10").kind {
            ExprKind::Let { value, body, .. } => {
                assert_eq!(native_name(value), "_plus");
                assert_eq!(native_name(body), "_multiply");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &parse_expr(". or false as $x | $x").kind {
            ExprKind::Let { value, .. } => assert_eq!(native_name(value), "_or"),
            other => panic!("unexpected {:?}", other),
        }
        // assignment sits below `as`
        match &parse_expr(".a = 1 as $x | $x").kind {
            ExprKind::Assignment { value, .. } => assert!(matches!(value.kind, ExprKind::Let { .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_assignment_operators() {
        assert!(matches!(
            parse_expr(".a |= . + 1").kind,
            ExprKind::Assignment { op: AssignOp::Update, .. }
        ));
        assert!(matches!(
            parse_expr(".a += 1").kind,
            ExprKind::Assignment { op: AssignOp::Arithmetic(ArithOp::Add), .. }
        ));
        assert!(matches!(
            parse_expr(".a //= 1").kind,
            ExprKind::Assignment { op: AssignOp::Alternative, .. }
        ));
    }

    #[test]
    fn test_parse_string_interpolation() {
        let expr = parse_expr(r#""x=\(.x)!""#);
        match &expr.kind {
            ExprKind::StringTemplate { parts, format: None } => assert_eq!(parts.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        let expr = parse_expr(r#"@base64 "v: \(.)""#);
        assert!(matches!(
            &expr.kind,
            ExprKind::StringTemplate { format: Some(f), .. } if f == "base64"
        ));
    }

    #[test]
    fn test_parse_label_break_and_optional() {
        let expr = parse_expr("label $out | 1, break $out");
        assert!(matches!(&expr.kind, ExprKind::Label { name, .. } if name == "out"));
        assert!(matches!(parse_expr("f?").kind, ExprKind::TryCatch { catch: None, .. }));
        assert!(matches!(parse_expr("..").kind, ExprKind::FunctionCall { .. }));
    }

    #[test]
    fn test_operator_span_covers_expression() {
        let (expr, source) = parse("1 + [1, 2]").unwrap();
        assert_eq!(source.span(expr.id), Some(Span::new(0, 10)));
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_err("(1");
        assert_eq!(err.to_string(), "Expected ')', but reached end of input.");

        let err = parse_err("[1 2]");
        assert_eq!(err.to_string(), "Expected ']', but got number 2.");
        assert_eq!(err.span, Span::new(3, 4));

        assert_eq!(parse_err("def f(): 1; f").kind, ParseErrorKind::EmptyParameterList);
        assert!(matches!(parse_err("| .").kind, ParseErrorKind::EmptyPipeTerm(_)));
        assert!(matches!(parse_err("1, | 2").kind, ParseErrorKind::EmptyPipeTerm(_)));
        assert!(matches!(parse_err("def f(1): 1; f").kind, ParseErrorKind::MalformedParameterList(_)));
        assert!(matches!(parse_err("{1: 2}").kind, ParseErrorKind::MalformedObject(_)));
        assert!(matches!(parse_err("{a: 1 b: 2}").kind, ParseErrorKind::MalformedObject(_)));
        assert!(matches!(parse_err(". as 1 | .").kind, ParseErrorKind::InvalidPattern(_)));
        assert!(matches!(parse_err("then").kind, ParseErrorKind::UnexpectedToken(_)));
    }

    #[test]
    fn test_lex_errors_surface_through_parse() {
        let err = parse_err("\"open");
        assert!(err.lex_error().is_some());
        assert_eq!(err.span, Span::new(0, 1));
    }
}
