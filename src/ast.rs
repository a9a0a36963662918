// Abstract Syntax Tree definitions
// Every node carries a stable id; spans live in a per-source side table.

use std::fmt;
use std::rc::Rc;

use crate::functions::Builtin;
use crate::value::Json;

/// Stable identity of a parsed node: which source it came from and its index
/// in that source's span table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub source: u32,
    pub index: u32,
}

impl NodeId {
    pub fn new(source: u32, index: u32) -> Self {
        NodeId { source, index }
    }
}

/// Half-open range of character offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// Program text plus the span of every node parsed from it.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub id: u32,
    pub name: String,
    pub text: Rc<str>,
    spans: Vec<Span>,
    line_starts: Vec<usize>,
}

impl SourceInfo {
    pub fn new(id: u32, name: &str, text: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, ch) in text.chars().enumerate() {
            if ch == '\n' {
                line_starts.push(i + 1);
            }
        }
        SourceInfo {
            id,
            name: name.to_string(),
            text: Rc::from(text),
            spans: Vec::new(),
            line_starts,
        }
    }

    /// Allocate the next node id for a node covering `span`.
    pub fn register(&mut self, span: Span) -> NodeId {
        self.spans.push(span);
        NodeId::new(self.id, (self.spans.len() - 1) as u32)
    }

    pub fn span(&self, node: NodeId) -> Option<Span> {
        if node.source != self.id {
            return None;
        }
        self.spans.get(node.index as usize).copied()
    }

    pub fn node_count(&self) -> usize {
        self.spans.len()
    }

    /// 1-based line and column of a character offset.
    pub fn line_column(&self, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        (line + 1, offset - self.line_starts[line] + 1)
    }

    /// Text of a 1-based line, without its terminator.
    pub fn line_text(&self, line: usize) -> String {
        let start = match self.line_starts.get(line.saturating_sub(1)) {
            Some(start) => *start,
            None => return String::new(),
        };
        self.text
            .chars()
            .skip(start)
            .take_while(|c| *c != '\n')
            .collect()
    }
}

pub type ExprRef = Rc<Expr>;

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(id: NodeId, kind: ExprKind) -> ExprRef {
        Rc::new(Expr { id, kind })
    }
}

/// Arithmetic operators usable in `op=` updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithOp::Add => "+",
            ArithOp::Subtract => "-",
            ArithOp::Multiply => "*",
            ArithOp::Divide => "/",
            ArithOp::Modulo => "%",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `path = value`
    Set,
    /// `path |= f`
    Update,
    /// `path op= value`
    Arithmetic(ArithOp),
    /// `path //= value`
    Alternative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceMode {
    Reduce,
    Foreach,
}

/// Formal parameter of a user function.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// `f`: the argument is bound as an unevaluated filter.
    Filter(String),
    /// `$v`: the argument is evaluated and each value bound to `$v` (and `v`).
    Value(String),
}

impl Param {
    pub fn name(&self) -> &str {
        match self {
            Param::Filter(name) | Param::Value(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: ExprRef,
}

impl FunctionDef {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// How a call site resolves its callee.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// Looked up by name and arity at run time.
    Named(String),
    /// Bound directly to a native at parse time (operators).
    Native(&'static Builtin),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Literal(String),
    Interpolation(ExprRef),
}

/// Destructuring patterns used by `as`, `reduce` and `foreach`.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Variable(String),
    Array(Vec<Pattern>),
    Object(Vec<ObjectPatternEntry>),
    /// `p1 ?// p2`: try `p1`, fall back to `p2` when matching fails.
    Alternative(Box<Pattern>, Box<Pattern>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPatternEntry {
    pub key: PatternKey,
    pub value: Option<Pattern>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternKey {
    /// `{$name}` or `{$name: p}`: binds `$name` to `.name`.
    Variable(String),
    /// `{key: p}`, `{"key": p}`, `{(expr): p}`
    Expr(ExprRef),
}

impl Pattern {
    /// Every variable name the pattern binds, in first-seen order.
    pub fn variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut Vec<String>) {
        let push = |name: &String, names: &mut Vec<String>| {
            if !names.contains(name) {
                names.push(name.clone());
            }
        };
        match self {
            Pattern::Variable(name) => push(name, names),
            Pattern::Array(items) => {
                for item in items {
                    item.collect_variables(names);
                }
            }
            Pattern::Object(entries) => {
                for entry in entries {
                    if let PatternKey::Variable(name) = &entry.key {
                        push(name, names);
                    }
                    if let Some(value) = &entry.value {
                        value.collect_variables(names);
                    }
                }
            }
            Pattern::Alternative(first, second) => {
                first.collect_variables(names);
                second.collect_variables(names);
            }
        }
    }
}

/// AST node types
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// `.`
    Identity,

    /// Number, string, `true`, `false` or `null`
    Literal(Json),

    /// `.key`, `."key"`, `.key?`
    StringSelector {
        target: ExprRef,
        key: String,
        optional: bool,
    },

    /// `.[expr]`; the index is evaluated against the term's own input.
    Selector {
        target: ExprRef,
        index: ExprRef,
        optional: bool,
    },

    /// `.[from:to]`
    SliceSelector {
        target: ExprRef,
        from: Option<ExprRef>,
        to: Option<ExprRef>,
        optional: bool,
    },

    /// `.[]`
    Enumerate { target: ExprRef, optional: bool },

    /// `a | b`
    Compose(ExprRef, ExprRef),

    /// `a, b`
    Concat(ExprRef, ExprRef),

    /// `[expr]` or `[]`
    ConstructArray(Option<ExprRef>),

    /// `{k: v, ...}`
    ConstructObject(Vec<(ExprRef, ExprRef)>),

    /// `if c then a elif ... else b end`; a missing else acts as `.`
    IfThenElse {
        cond: ExprRef,
        then: ExprRef,
        else_: Option<ExprRef>,
    },

    /// `a // b`
    Alternative(ExprRef, ExprRef),

    /// `try body catch handler`, and postfix `?`
    TryCatch {
        body: ExprRef,
        catch: Option<ExprRef>,
    },

    /// `value as pattern | body`
    Let {
        value: ExprRef,
        pattern: Pattern,
        body: ExprRef,
    },

    /// `reduce` and `foreach`
    Reduce {
        mode: ReduceMode,
        source: ExprRef,
        pattern: Pattern,
        init: ExprRef,
        update: ExprRef,
        extract: Option<ExprRef>,
    },

    /// `label $name | body`
    Label { name: String, body: ExprRef },

    /// `break $name`
    Break(String),

    /// `def name(params): body;` standing alone; it scopes over whatever
    /// it is composed with and otherwise passes its input through.
    FunctionDefinition(Rc<FunctionDef>),

    FunctionCall {
        target: CallTarget,
        args: Vec<ExprRef>,
    },

    /// `$name`
    Variable(String),

    Assignment {
        op: AssignOp,
        path: ExprRef,
        value: ExprRef,
    },

    /// `@name` applied to `.`
    Format(String),

    /// `"text \(expr) text"`, optionally under a format (`@csv "..."`)
    StringTemplate {
        parts: Vec<TemplatePart>,
        format: Option<String>,
    },
}
