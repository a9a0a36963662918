// jqcore - A jq-like JSON query language engine
// Copyright (c) 2025 jqcore contributors
// Licensed under the MIT License

//! # jqcore
//!
//! A small, pure, expression-oriented query language for filtering and
//! transforming JSON, in the style of jq.
//!
//! Programs are compiled once into an expression tree and then interpreted
//! lazily against a sequence of input documents. Every failure is reported
//! with the line, column and a caret-highlighted excerpt of the source that
//! produced it.
//!
//! ## Architecture
//!
//! - `lexer` - Program text to spanned tokens
//! - `parser` - Recursive-descent parser producing the expression tree
//! - `ast` - Expression tree, node ids and source span tables
//! - `value` - Immutable, cheaply cloned JSON values
//! - `path` - Symbolic paths and structural edits by path
//! - `evaluator` - Lazy value and path production for every node kind
//! - `context` - Lexical environments and the per-run governors
//! - `functions` - Native builtins and operators
//! - `stdlib` - Filters written in the language itself
//! - `error` - Runtime error taxonomy and rendered diagnostics
//!
//! ## Example
//!
//! ```
//! use jqcore::{compile, Json, Options};
//!
//! let program = compile("[.[] | . * 2]").unwrap();
//! let input = Json::from_json_str("[1, 2, 3]").unwrap();
//! let result = program.evaluate(input, &Options::default()).unwrap();
//! assert_eq!(result.outputs, vec![Json::from_json_str("[2, 4, 6]").unwrap()]);
//! ```

use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub mod ast;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod path;
pub mod stdlib;
pub mod value;
mod datetime;
mod format;
mod regexp;
mod utils;

pub use error::{Error, ErrorKind};
pub use path::{JsonPath, PathPart};
pub use value::{Json, JsonType};

use ast::{ExprRef, SourceInfo};
use context::{Context, Runtime};
use error::EvalError;
use evaluator::{eval, ValueStream};

/// Default limit on nested user function calls. Nested calls continue on
/// heap-allocated stack segments, so this bounds memory rather than the
/// native stack.
pub const DEFAULT_MAX_DEPTH: usize = 4096;

/// Per-evaluation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Evaluation steps allowed before giving up; 0 means unlimited.
    pub tick_limit: u64,
    /// Maximum nesting of user function calls; 0 means unlimited.
    pub max_depth: usize,
    /// Values bound as `$name` for the whole program.
    pub variables: IndexMap<String, Json>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            tick_limit: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            variables: IndexMap::new(),
        }
    }
}

/// A compiled program that can be evaluated against many inputs.
///
/// Compile once, evaluate many times:
///
/// ```
/// let program = jqcore::compile(".a").unwrap();
/// for text in [r#"{"a": 1}"#, r#"{"a": 2}"#] {
///     let input = jqcore::Json::from_json_str(text).unwrap();
///     assert_eq!(program.evaluate(input, &Default::default()).unwrap().outputs.len(), 1);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Program {
    root: ExprRef,
    source: Rc<SourceInfo>,
}

/// Everything a finished evaluation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub outputs: Vec<Json>,
    /// Values emitted by `debug` and `stderr`, in order.
    pub log: Vec<Json>,
}

/// Compile program text.
pub fn compile(text: &str) -> Result<Program, Error> {
    let (root, source) = parser::parse(text)
        .map_err(|e| Error::from_parse(&e, &SourceInfo::new(0, "<program>", text)))?;
    log::debug!("compiled program of {} nodes", source.node_count());
    Ok(Program {
        root,
        source: Rc::new(source),
    })
}

impl Program {
    pub fn root(&self) -> &ExprRef {
        &self.root
    }

    pub fn source(&self) -> &SourceInfo {
        &self.source
    }

    /// Evaluate against a single input document.
    pub fn evaluate(&self, input: Json, options: &Options) -> Result<Evaluation, Error> {
        evaluate(self, vec![input], options)
    }
}

/// Lazy results of a program run over a sequence of inputs.
///
/// Documents are taken one at a time; `input` and `inputs` inside the program
/// consume from the same sequence. The first error ends the iteration.
pub struct Outputs {
    root: ExprRef,
    ctx: Context,
    current: Option<ValueStream>,
    sources: Vec<Rc<SourceInfo>>,
    finished: bool,
}

impl Outputs {
    /// Drain the diagnostics log collected so far.
    pub fn take_log(&self) -> Vec<Json> {
        self.ctx.runtime.take_log()
    }

    /// Evaluation steps spent so far.
    pub fn ticks(&self) -> u64 {
        self.ctx.runtime.ticks()
    }

    fn render(&self, err: &EvalError) -> Error {
        Error::from_eval(err, |node| {
            self.sources
                .iter()
                .find_map(|source| source.span(node).map(|span| (&**source, span)))
        })
    }
}

impl Iterator for Outputs {
    type Item = Result<Json, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            if let Some(stream) = self.current.as_mut() {
                match stream.next() {
                    Some(Ok(value)) => return Some(Ok(value)),
                    Some(Err(err)) => {
                        self.finished = true;
                        self.current = None;
                        log::debug!("evaluation failed after {} ticks: {}", self.ticks(), err);
                        return Some(Err(self.render(&err)));
                    }
                    None => self.current = None,
                }
            }
            match self.ctx.runtime.next_input() {
                Some(input) => self.current = Some(eval(&self.root, &self.ctx, input)),
                None => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

/// Start a lazy run of `program` over `inputs`.
pub fn outputs<I>(program: &Program, inputs: I, options: &Options) -> Result<Outputs, Error>
where
    I: IntoIterator<Item = Json>,
    I::IntoIter: 'static,
{
    let library = stdlib::library()?;
    let mut env = library.env.clone();
    for (name, value) in &options.variables {
        env = env.bind_variable(name, value.clone());
    }
    let runtime = Runtime::new(options.tick_limit, options.max_depth, Box::new(inputs.into_iter()));
    Ok(Outputs {
        root: program.root.clone(),
        ctx: Context::new(Rc::new(runtime), env),
        current: None,
        sources: vec![program.source.clone(), library.source.clone()],
        finished: false,
    })
}

/// Run `program` over `inputs` to completion.
pub fn evaluate<I>(program: &Program, inputs: I, options: &Options) -> Result<Evaluation, Error>
where
    I: IntoIterator<Item = Json>,
    I::IntoIter: 'static,
{
    let mut run = outputs(program, inputs, options)?;
    let outputs = run.by_ref().collect::<Result<Vec<_>, _>>()?;
    Ok(Evaluation {
        outputs,
        log: run.take_log(),
    })
}

/// Compile and run `text` against one input, returning only the outputs.
pub fn run(text: &str, input: Json) -> Result<Vec<Json>, Error> {
    let program = compile(text)?;
    Ok(program.evaluate(input, &Options::default())?.outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(text: &str) -> Json {
        Json::from_json_str(text).unwrap()
    }

    #[test]
    fn test_compile_and_evaluate() {
        let program = compile(". + 1").unwrap();
        let result = program.evaluate(json("1"), &Options::default()).unwrap();
        assert_eq!(result.outputs, vec![json("2")]);
        assert!(result.log.is_empty());
    }

    #[test]
    fn test_compile_error_position() {
        let err = compile(".a | | .b").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!((err.line, err.column), (1, 6));
    }

    #[test]
    fn test_runtime_error_rendering() {
        let err = run("1 + [1, 2]", Json::Null).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert_eq!(err.message, "Can't add Number and Array.");
        assert_eq!((err.line, err.column), (1, 1));
        assert_eq!(err.rendering, "<program>:1:1\n    1 + [1, 2]\n    ^^^^^^^^^^");
    }

    #[test]
    fn test_error_in_function_argument_points_at_program() {
        let err = run("map(. + 1)", json(r#"["a"]"#)).unwrap_err();
        assert_eq!(err.message, "Can't add String and Number.");
        assert!(err.rendering.contains("<program>"));
        assert_eq!((err.line, err.column), (1, 5));
    }

    #[test]
    fn test_variables_and_log() {
        let mut options = Options::default();
        options.variables.insert("name".to_string(), json(r#""x""#));
        let program = compile("$name | debug").unwrap();
        let result = program.evaluate(Json::Null, &options).unwrap();
        assert_eq!(result.outputs, vec![json(r#""x""#)]);
        assert_eq!(result.log, vec![json(r#""x""#)]);
    }

    #[test]
    fn test_multiple_inputs_share_input_builtin() {
        let program = compile("[., input]").unwrap();
        let result = evaluate(&program, vec![json("1"), json("2"), json("3"), json("4")], &Options::default()).unwrap();
        assert_eq!(result.outputs, vec![json("[1,2]"), json("[3,4]")]);
    }

    #[test]
    fn test_outputs_are_lazy() {
        let program = compile("range(infinite)").unwrap();
        let run = outputs(&program, vec![Json::Null], &Options::default()).unwrap();
        let first: Vec<Json> = run.take(3).map(|r| r.unwrap()).collect();
        assert_eq!(first, vec![json("0"), json("1"), json("2")]);
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: Options = serde_json::from_str(r#"{"tick_limit": 10}"#).unwrap();
        assert_eq!(options.tick_limit, 10);
        assert_eq!(options.max_depth, DEFAULT_MAX_DEPTH);
        assert!(options.variables.is_empty());
    }

    #[test]
    fn test_run_stops_at_first_error() {
        let program = compile(".[] | if . > 1 then error(\"big\") else . end").unwrap();
        let mut run = outputs(&program, vec![json("[1, 2, 3]")], &Options::default()).unwrap();
        assert_eq!(run.next().unwrap().unwrap(), json("1"));
        let err = run.next().unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::User);
        assert_eq!(err.message, "big");
        assert!(run.next().is_none());
    }
}
