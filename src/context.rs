// Execution context: the per-run governor state and lexical environments
//
// `Runtime` is shared by every stream of one evaluation. `Env` is a persistent
// linked list of frames; streams keep the frames they read alive, so no frame
// is ever observed after it goes out of scope.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::ast::{ExprRef, FunctionDef};
use crate::error::{EvalError, EvalErrorKind, EvalResult};
use crate::functions::{self, Builtin};
use crate::value::Json;

/// Anything that can stand behind a `name/arity` reference.
#[derive(Clone)]
pub enum Callable {
    /// An argument expression captured unevaluated together with the
    /// environment of the call site.
    Thunk { expr: ExprRef, env: Env },
    /// A `def` together with the environment it was defined in.
    User { def: Rc<FunctionDef>, env: Env },
    Native(&'static Builtin),
}

#[derive(Clone)]
pub enum Binding {
    Variable(String, Json),
    Function(String, usize, Callable),
    Label(String, u64),
}

struct Frame {
    binding: Binding,
    parent: Env,
}

/// Lexical environment. Cloning is cheap and binding never disturbs
/// environments captured earlier.
#[derive(Clone, Default)]
pub struct Env {
    head: Option<Rc<Frame>>,
}

impl Env {
    pub fn new() -> Self {
        Env { head: None }
    }

    pub fn bind(&self, binding: Binding) -> Env {
        Env {
            head: Some(Rc::new(Frame {
                binding,
                parent: self.clone(),
            })),
        }
    }

    pub fn bind_variable(&self, name: &str, value: Json) -> Env {
        self.bind(Binding::Variable(name.to_string(), value))
    }

    pub fn bind_function(&self, def: Rc<FunctionDef>) -> Env {
        let name = def.name.clone();
        let arity = def.arity();
        let callable = Callable::User {
            def,
            env: self.clone(),
        };
        self.bind(Binding::Function(name, arity, callable))
    }

    fn frames(&self) -> impl Iterator<Item = &Binding> {
        let mut cursor = self.head.as_deref();
        std::iter::from_fn(move || {
            let frame = cursor?;
            cursor = frame.parent.head.as_deref();
            Some(&frame.binding)
        })
    }

    pub fn variable(&self, name: &str) -> Option<Json> {
        self.frames().find_map(|b| match b {
            Binding::Variable(n, value) if n == name => Some(value.clone()),
            _ => None,
        })
    }

    pub fn function(&self, name: &str, arity: usize) -> Option<Callable> {
        self.frames().find_map(|b| match b {
            Binding::Function(n, a, callable) if n == name && *a == arity => Some(callable.clone()),
            _ => None,
        })
    }

    pub fn label(&self, name: &str) -> Option<u64> {
        self.frames().find_map(|b| match b {
            Binding::Label(n, id) if n == name => Some(*id),
            _ => None,
        })
    }

    /// Every `(name, arity)` pair defined in this environment, innermost first.
    pub fn function_signatures(&self) -> Vec<(String, usize)> {
        self.frames()
            .filter_map(|b| match b {
                Binding::Function(n, a, _) => Some((n.clone(), *a)),
                _ => None,
            })
            .collect()
    }
}

/// Shared per-evaluation state: the tick governor, the depth guard, the debug
/// log, label activation ids, and the documents not yet consumed.
pub struct Runtime {
    tick_limit: u64,
    ticks: Cell<u64>,
    max_depth: usize,
    depth: Cell<usize>,
    log: RefCell<Vec<Json>>,
    labels: Cell<u64>,
    inputs: RefCell<Box<dyn Iterator<Item = Json>>>,
}

impl Runtime {
    pub fn new(tick_limit: u64, max_depth: usize, inputs: Box<dyn Iterator<Item = Json>>) -> Self {
        Runtime {
            tick_limit,
            ticks: Cell::new(0),
            max_depth,
            depth: Cell::new(0),
            log: RefCell::new(Vec::new()),
            labels: Cell::new(0),
            inputs: RefCell::new(inputs),
        }
    }

    /// Count one step; fails once the configured budget is spent.
    pub fn tick(&self) -> EvalResult<()> {
        let ticks = self.ticks.get() + 1;
        self.ticks.set(ticks);
        if self.tick_limit > 0 && ticks > self.tick_limit {
            if ticks == self.tick_limit + 1 {
                log::warn!("tick limit of {} reached", self.tick_limit);
            }
            return Err(EvalError::new(EvalErrorKind::TickLimit(self.tick_limit)));
        }
        Ok(())
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.get()
    }

    /// Enter one level of function-call nesting.
    pub fn enter(&self) -> EvalResult<DepthGuard<'_>> {
        let depth = self.depth.get() + 1;
        if self.max_depth > 0 && depth > self.max_depth {
            log::warn!("call depth limit of {} reached", self.max_depth);
            return Err(EvalError::new(EvalErrorKind::DepthLimit(self.max_depth)));
        }
        self.depth.set(depth);
        Ok(DepthGuard { runtime: self })
    }

    pub fn emit(&self, value: Json) {
        log::trace!("debug: {}", value);
        self.log.borrow_mut().push(value);
    }

    pub fn take_log(&self) -> Vec<Json> {
        std::mem::take(&mut *self.log.borrow_mut())
    }

    pub fn next_label_id(&self) -> u64 {
        let id = self.labels.get() + 1;
        self.labels.set(id);
        id
    }

    /// The next document of the input sequence, shared with `input`/`inputs`.
    pub fn next_input(&self) -> Option<Json> {
        self.inputs.borrow_mut().next()
    }
}

pub struct DepthGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        let depth = self.runtime.depth.get();
        self.runtime.depth.set(depth.saturating_sub(1));
    }
}

/// What a node is evaluated in: the shared runtime plus the lexical scope.
#[derive(Clone)]
pub struct Context {
    pub runtime: Rc<Runtime>,
    pub env: Env,
}

impl Context {
    pub fn new(runtime: Rc<Runtime>, env: Env) -> Self {
        Context { runtime, env }
    }

    pub fn with_env(&self, env: Env) -> Context {
        Context {
            runtime: self.runtime.clone(),
            env,
        }
    }

    pub fn bind(&self, binding: Binding) -> Context {
        self.with_env(self.env.bind(binding))
    }

    pub fn bind_variable(&self, name: &str, value: Json) -> Context {
        self.with_env(self.env.bind_variable(name, value))
    }

    /// Resolve `name/arity`: lexical scope first, then the native table.
    pub fn resolve(&self, name: &str, arity: usize) -> Option<Callable> {
        self.env
            .function(name, arity)
            .or_else(|| functions::lookup(name, arity).map(Callable::Native))
    }

    pub fn tick(&self) -> EvalResult<()> {
        self.runtime.tick()
    }
}
