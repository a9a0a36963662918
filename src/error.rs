// Error taxonomy and source-highlighted diagnostics
//
// Runtime failures travel as `EvalError` through the lazy streams; once they
// leave the engine they are rendered into a public `Error` against the
// source text of every frame they passed through.

use std::fmt;

use thiserror::Error;

use crate::ast::{NodeId, SourceInfo, Span};
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::value::Json;

pub type EvalResult<T> = Result<T, EvalError>;

/// What went wrong while a program was running.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalErrorKind {
    #[error("{message}")]
    Type { message: String, values: Vec<Json> },

    #[error("{message}")]
    Path { message: String, values: Vec<Json> },

    #[error("{0}")]
    Lookup(String),

    #[error("Failed to complete in {0} ticks.")]
    TickLimit(u64),

    #[error("Exceeded the maximum call depth of {0}.")]
    DepthLimit(usize),

    #[error("{}", user_message(.0))]
    User(Json),

    /// Control flow for `break $label`; only the label activation with the
    /// same id may stop it.
    #[error("Break to label ${label} escaped its label.")]
    Break { label: String, id: u64 },

    #[error("Nested labels named ${0} are not supported.")]
    NestedLabel(String),
}

fn user_message(value: &Json) -> String {
    match value {
        Json::String(s) => s.to_string(),
        Json::Null => "null (null) not a string".to_string(),
        other => format!("{} (not a string)", other),
    }
}

/// A runtime error together with where it happened: `node` is the innermost
/// expression that failed, `stack` the user function call sites it passed
/// through on the way out (innermost first).
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub node: Option<NodeId>,
    pub stack: Vec<NodeId>,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind) -> Self {
        EvalError {
            kind,
            node: None,
            stack: Vec::new(),
        }
    }

    pub fn type_error(message: String, values: Vec<Json>) -> Self {
        EvalError::new(EvalErrorKind::Type { message, values })
    }

    pub fn path(message: String, values: Vec<Json>) -> Self {
        EvalError::new(EvalErrorKind::Path { message, values })
    }

    pub fn lookup(message: String) -> Self {
        EvalError::new(EvalErrorKind::Lookup(message))
    }

    pub fn user(value: Json) -> Self {
        EvalError::new(EvalErrorKind::User(value))
    }

    /// Record the failing node unless a deeper one already claimed the error.
    pub fn at(mut self, node: NodeId) -> Self {
        if self.node.is_none() {
            self.node = Some(node);
        }
        self
    }

    /// Record a call site the error is leaving through.
    pub fn through(mut self, call_site: NodeId) -> Self {
        if self.node.is_none() {
            self.node = Some(call_site);
        } else if self.node != Some(call_site) && self.stack.last() != Some(&call_site) {
            self.stack.push(call_site);
        }
        self
    }

    /// Whether `try` may intercept this error. Break signals and the
    /// resource governors always propagate.
    pub fn is_catchable(&self) -> bool {
        !matches!(
            self.kind,
            EvalErrorKind::Break { .. } | EvalErrorKind::TickLimit(_) | EvalErrorKind::DepthLimit(_)
        )
    }

    /// The value handed to a `catch` body: the error message as a string.
    pub fn catch_value(&self) -> Json {
        Json::from(self.kind.to_string())
    }

    pub fn values(&self) -> Vec<Json> {
        match &self.kind {
            EvalErrorKind::Type { values, .. } | EvalErrorKind::Path { values, .. } => values.clone(),
            EvalErrorKind::User(value) => vec![value.clone()],
            _ => Vec::new(),
        }
    }
}

impl From<EvalErrorKind> for EvalError {
    fn from(kind: EvalErrorKind) -> Self {
        EvalError::new(kind)
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for EvalError {}

// ── Public diagnostics ───────────────────────────────────────────────────────

/// Broad error categories reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lex,
    Parse,
    Type,
    Path,
    Lookup,
    ResourceExhaustion,
    User,
    Break,
}

impl From<&EvalErrorKind> for ErrorKind {
    fn from(kind: &EvalErrorKind) -> Self {
        match kind {
            EvalErrorKind::Type { .. } => ErrorKind::Type,
            EvalErrorKind::Path { .. } => ErrorKind::Path,
            EvalErrorKind::Lookup(_) => ErrorKind::Lookup,
            EvalErrorKind::TickLimit(_) | EvalErrorKind::DepthLimit(_) => ErrorKind::ResourceExhaustion,
            EvalErrorKind::User(_) => ErrorKind::User,
            EvalErrorKind::Break { .. } | EvalErrorKind::NestedLabel(_) => ErrorKind::Break,
        }
    }
}

/// A fully rendered error: message, 1-based position of the innermost
/// failure (0 when unknown), a caret-highlighted excerpt for every source
/// position involved, and the operands involved.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} (line {line}, column {column})")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub rendering: String,
    pub values: Vec<Json>,
}

impl Error {
    pub fn from_lex(err: &LexError, source: &SourceInfo) -> Self {
        let span = Span::new(err.offset, err.offset + 1);
        let (line, column) = source.line_column(span.start);
        Error {
            kind: ErrorKind::Lex,
            message: err.to_string(),
            line,
            column,
            rendering: render_block(source, span),
            values: Vec::new(),
        }
    }

    pub fn from_parse(err: &ParseError, source: &SourceInfo) -> Self {
        if let Some(lex) = err.lex_error() {
            return Error::from_lex(lex, source);
        }
        let (line, column) = source.line_column(err.span.start);
        Error {
            kind: ErrorKind::Parse,
            message: err.to_string(),
            line,
            column,
            rendering: render_block(source, err.span),
            values: Vec::new(),
        }
    }

    /// Render a runtime error against the registered sources; `lookup`
    /// resolves a node id to its source and span.
    pub fn from_eval<'s, F>(err: &EvalError, lookup: F) -> Self
    where
        F: Fn(NodeId) -> Option<(&'s SourceInfo, Span)>,
    {
        let mut blocks = Vec::new();
        let mut position = None;
        for node in err.node.iter().chain(err.stack.iter()) {
            if let Some((source, span)) = lookup(*node) {
                if position.is_none() {
                    position = Some(source.line_column(span.start));
                }
                blocks.push(render_block(source, span));
            }
        }
        let (line, column) = position.unwrap_or((0, 0));
        Error {
            kind: ErrorKind::from(&err.kind),
            message: err.kind.to_string(),
            line,
            column,
            rendering: blocks.join("\n"),
            values: err.values(),
        }
    }
}

/// One excerpt: a `name:line:column` heading, the first source line of the
/// span, and carets under the highlighted characters.
fn render_block(source: &SourceInfo, span: Span) -> String {
    let (line, column) = source.line_column(span.start);
    let text = source.line_text(line);
    let line_len = text.chars().count();
    let start = column.saturating_sub(1).min(line_len);
    let width = span.end.saturating_sub(span.start).max(1).min(line_len.saturating_sub(start).max(1));
    format!(
        "{}:{}:{}\n    {}\n    {}{}",
        source.name,
        line,
        column,
        text,
        " ".repeat(start),
        "^".repeat(width)
    )
}
