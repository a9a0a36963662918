// Evaluation engine
//
// Every node produces a lazy stream of values; the path-capable subset also
// produces a stream of (path, value) pairs, which drives assignment and the
// path builtins. Streams own everything they touch (Rc-shared trees, cloned
// contexts), so they can outlive the call that built them.

use std::iter;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{
    AssignOp, CallTarget, Expr, ExprKind, ExprRef, FunctionDef, NodeId, Param, Pattern, PatternKey,
    ReduceMode, TemplatePart,
};
use crate::context::{Binding, Callable, Context, Env, Runtime};
use crate::error::{EvalError, EvalErrorKind, EvalResult};
use crate::format;
use crate::functions::{self, arithmetic};
use crate::path::{delete_paths, get_part, get_path, set_path, JsonPath, PathPart};
use crate::utils;
use crate::value::Json;

pub type Stream<T> = Box<dyn Iterator<Item = EvalResult<T>>>;
pub type ValueStream = Stream<Json>;
pub type PathStream = Stream<(JsonPath, Json)>;

// ── Stream helpers ───────────────────────────────────────────────────────────

pub fn single<T: 'static>(value: T) -> Stream<T> {
    Box::new(iter::once(Ok(value)))
}

pub fn failure<T: 'static>(err: EvalError) -> Stream<T> {
    Box::new(iter::once(Err(err)))
}

pub fn nothing<T: 'static>() -> Stream<T> {
    Box::new(iter::empty())
}

pub fn from_result<T: 'static>(result: EvalResult<T>) -> Stream<T> {
    Box::new(iter::once(result))
}

/// Feed every value of `stream` through `f`, concatenating the results.
/// Errors pass through untouched.
pub fn bind<T, U, F>(stream: Stream<T>, mut f: F) -> Stream<U>
where
    T: 'static,
    U: 'static,
    F: FnMut(T) -> Stream<U> + 'static,
{
    Box::new(stream.flat_map(move |item| match item {
        Ok(value) => f(value),
        Err(e) => failure(e),
    }))
}

/// Attach `node` to errors that do not know where they happened yet.
pub fn located<T: 'static>(stream: Stream<T>, node: NodeId) -> Stream<T> {
    Box::new(stream.map(move |item| item.map_err(|e| e.at(node))))
}

/// Evaluate every argument against `input` and yield each combination, first
/// argument outermost.
pub fn cartesian(ctx: &Context, args: &[ExprRef], input: &Json) -> Stream<Vec<Json>> {
    match args.split_first() {
        None => single(Vec::new()),
        Some((first, rest)) => {
            let ctx = ctx.clone();
            let rest: Vec<ExprRef> = rest.to_vec();
            let input_inner = input.clone();
            bind(eval(first, &ctx, input.clone()), move |head| {
                Box::new(cartesian(&ctx, &rest, &input_inner).map(move |tail| {
                    tail.map(|tail| {
                        let mut values = Vec::with_capacity(tail.len() + 1);
                        values.push(head.clone());
                        values.extend(tail);
                        values
                    })
                }))
            })
        }
    }
}

/// The last value of a stream, or the first error.
pub fn last_value(stream: ValueStream) -> EvalResult<Option<Json>> {
    let mut last = None;
    for item in stream {
        last = Some(item?);
    }
    Ok(last)
}

/// Yields the body's outputs; on a catchable error switches to the handler
/// (if any) and stops the body. A settling stream runs the body to the end
/// before yielding anything, so a caught error discards the body's outputs.
struct TryStream<T> {
    body: Option<Stream<T>>,
    handler: Option<Box<dyn FnOnce(EvalError) -> Stream<T>>>,
    caught: Option<Stream<T>>,
    settle: bool,
}

impl<T: 'static> TryStream<T> {
    fn settled(&mut self, body: Stream<T>) -> Stream<T> {
        let mut outputs = Vec::new();
        for item in body {
            match item {
                Ok(value) => outputs.push(value),
                Err(e) if e.is_catchable() => {
                    return match self.handler.take() {
                        Some(handler) => handler(e),
                        None => nothing(),
                    };
                }
                // a break or exhausted governor still follows what came before it
                Err(e) => return Box::new(outputs.into_iter().map(Ok).chain(iter::once(Err(e)))),
            }
        }
        Box::new(outputs.into_iter().map(Ok))
    }
}

impl<T: 'static> Iterator for TryStream<T> {
    type Item = EvalResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.settle {
            if let Some(body) = self.body.take() {
                let outputs = self.settled(body);
                self.handler = None;
                self.caught = Some(outputs);
            }
            return self.caught.as_mut()?.next();
        }
        if let Some(body) = &mut self.body {
            match body.next() {
                Some(Ok(value)) => return Some(Ok(value)),
                Some(Err(e)) if e.is_catchable() => {
                    self.body = None;
                    if let Some(handler) = self.handler.take() {
                        self.caught = Some(handler(e));
                    }
                }
                Some(Err(e)) => {
                    self.body = None;
                    self.handler = None;
                    return Some(Err(e));
                }
                None => {
                    self.body = None;
                    self.handler = None;
                }
            }
        }
        self.caught.as_mut()?.next()
    }
}

/// Drop catchable errors, ending the stream at the first one.
pub fn suppress<T: 'static>(stream: Stream<T>) -> Stream<T> {
    Box::new(TryStream {
        body: Some(stream),
        handler: None,
        caught: None,
        settle: false,
    })
}

/// `a // b`: truthy results of the left side; the right side only when the
/// left side produced none. Catchable errors on the left end it quietly.
struct AlternativeStream<T> {
    left: Option<Stream<T>>,
    fallback: Option<Box<dyn FnOnce() -> Stream<T>>>,
    right: Option<Stream<T>>,
    produced: bool,
    truthy: fn(&T) -> bool,
}

impl<T> Iterator for AlternativeStream<T> {
    type Item = EvalResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(left) = &mut self.left {
            loop {
                match left.next() {
                    Some(Ok(value)) => {
                        if (self.truthy)(&value) {
                            self.produced = true;
                            return Some(Ok(value));
                        }
                    }
                    Some(Err(e)) if !e.is_catchable() => {
                        self.left = None;
                        self.fallback = None;
                        return Some(Err(e));
                    }
                    Some(Err(_)) | None => break,
                }
            }
            self.left = None;
            if let Some(fallback) = self.fallback.take() {
                if !self.produced {
                    self.right = Some(fallback());
                }
            }
        }
        self.right.as_mut()?.next()
    }
}

/// Ends quietly when the break signal for this label activation arrives.
struct LabelStream<T> {
    inner: Option<Stream<T>>,
    id: u64,
}

impl<T> Iterator for LabelStream<T> {
    type Item = EvalResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.as_mut()?.next();
        match item {
            Some(Err(EvalError {
                kind: EvalErrorKind::Break { id, .. },
                ..
            })) if id == self.id => {
                self.inner = None;
                None
            }
            None => {
                self.inner = None;
                None
            }
            other => other,
        }
    }
}

// Pulling from a user call nests native frames; below the red zone the pull
// continues on a freshly allocated stack segment.
const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// A user function's output stream: every pull counts as one level of call
/// nesting and errors record the call site they leave through.
struct Guarded<T> {
    inner: Stream<T>,
    runtime: Rc<Runtime>,
    call_site: NodeId,
    done: bool,
}

impl<T> Iterator for Guarded<T> {
    type Item = EvalResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let _guard = match self.runtime.enter() {
            Ok(guard) => guard,
            Err(e) => {
                self.done = true;
                return Some(Err(e.at(self.call_site)));
            }
        };
        let item = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.inner.next());
        match item {
            Some(item) => Some(item.map_err(|e| e.through(self.call_site))),
            None => {
                self.done = true;
                None
            }
        }
    }
}

// ── Value production ─────────────────────────────────────────────────────────

/// Evaluate `expr` against `input`, producing its output values lazily.
pub fn eval(expr: &ExprRef, ctx: &Context, input: Json) -> ValueStream {
    if let Err(e) = ctx.tick() {
        return failure(e.at(expr.id));
    }

    match &expr.kind {
        ExprKind::Identity | ExprKind::FunctionDefinition(_) => single(input),

        ExprKind::Literal(value) => single(value.clone()),

        ExprKind::StringSelector { target, key, optional } => {
            let part = PathPart::Key(Rc::from(key.as_str()));
            let stream = bind(eval(target, ctx, input), move |value| from_result(get_part(&value, &part)));
            selector_result(stream, expr.id, *optional)
        }

        ExprKind::Selector { target, index, optional } => {
            let target = target.clone();
            let ctx_inner = ctx.clone();
            let input_inner = input.clone();
            let stream = bind(eval(index, ctx, input), move |index| {
                bind(eval(&target, &ctx_inner, input_inner.clone()), move |value| {
                    from_result(index_value(&value, &index))
                })
            });
            selector_result(stream, expr.id, *optional)
        }

        ExprKind::SliceSelector { target, from, to, optional } => {
            let node = expr.clone();
            let (target, to) = (target.clone(), to.clone());
            let ctx_inner = ctx.clone();
            let input_inner = input.clone();
            let stream = bind(optional_bound(from, ctx, input), move |start| {
                let target = target.clone();
                let ctx_target = ctx_inner.clone();
                let input_target = input_inner.clone();
                bind(optional_bound(&to, &ctx_inner, input_inner.clone()), move |end| {
                    let part = slice_part(&start, &end);
                    bind(eval(&target, &ctx_target, input_target.clone()), move |value| {
                        from_result(part.clone().and_then(|part| get_part(&value, &part)))
                    })
                })
            });
            selector_result(stream, node.id, *optional)
        }

        ExprKind::Enumerate { target, optional } => {
            let stream = bind(eval(target, ctx, input), enumerate);
            selector_result(stream, expr.id, *optional)
        }

        ExprKind::Compose(lhs, rhs) => {
            if let ExprKind::FunctionDefinition(def) = &lhs.kind {
                let scope = ctx.with_env(ctx.env.bind_function(def.clone()));
                return eval(rhs, &scope, input);
            }
            let rhs = rhs.clone();
            let ctx = ctx.clone();
            bind(eval(lhs, &ctx, input), move |value| eval(&rhs, &ctx, value))
        }

        ExprKind::Concat(lhs, rhs) => {
            let rhs = rhs.clone();
            let ctx_rhs = ctx.clone();
            let input_rhs = input.clone();
            let deferred = iter::once(()).flat_map(move |_| eval(&rhs, &ctx_rhs, input_rhs.clone()));
            Box::new(eval(lhs, ctx, input).chain(deferred))
        }

        ExprKind::ConstructArray(None) => single(Json::array(Vec::new())),

        ExprKind::ConstructArray(Some(inner)) => {
            let inner = inner.clone();
            let ctx = ctx.clone();
            Box::new(iter::once_with(move || {
                eval(&inner, &ctx, input)
                    .collect::<EvalResult<Vec<Json>>>()
                    .map(Json::array)
            }))
        }

        ExprKind::ConstructObject(_) => {
            located(construct_object(expr.clone(), 0, ctx.clone(), input, IndexMap::new()), expr.id)
        }

        ExprKind::IfThenElse { cond, then, else_ } => {
            let (cond_id, then, else_) = (cond.id, then.clone(), else_.clone());
            let ctx_branch = ctx.clone();
            bind(eval(cond, ctx, input.clone()), move |c| match c {
                Json::Bool(true) => eval(&then, &ctx_branch, input.clone()),
                Json::Bool(false) => match &else_ {
                    Some(else_) => eval(else_, &ctx_branch, input.clone()),
                    None => single(input.clone()),
                },
                other => failure(condition_error(other).at(cond_id)),
            })
        }

        ExprKind::Alternative(lhs, rhs) => {
            let rhs = rhs.clone();
            let ctx_rhs = ctx.clone();
            let input_rhs = input.clone();
            Box::new(AlternativeStream {
                left: Some(eval(lhs, ctx, input)),
                fallback: Some(Box::new(move || eval(&rhs, &ctx_rhs, input_rhs))),
                right: None,
                produced: false,
                truthy: Json::is_truthy,
            })
        }

        ExprKind::TryCatch { body, catch } => {
            let handler: Option<Box<dyn FnOnce(EvalError) -> ValueStream>> = catch.clone().map(|catch| {
                let ctx = ctx.clone();
                Box::new(move |err: EvalError| eval(&catch, &ctx, err.catch_value()))
                    as Box<dyn FnOnce(EvalError) -> ValueStream>
            });
            Box::new(TryStream {
                body: Some(eval(body, ctx, input)),
                handler,
                caught: None,
                settle: true,
            })
        }

        ExprKind::Let { value, pattern, body } => {
            let (pattern, body) = (pattern.clone(), body.clone());
            let ctx_body = ctx.clone();
            let input_body = input.clone();
            bind(eval(value, ctx, input), move |value| {
                match match_pattern(&pattern, &value, &ctx_body, &input_body) {
                    Ok(sets) => {
                        let body = body.clone();
                        let ctx = ctx_body.clone();
                        let input = input_body.clone();
                        Box::new(
                            sets.into_iter()
                                .flat_map(move |set| eval(&body, &with_bindings(&ctx, set), input.clone())),
                        )
                    }
                    Err(e) => failure(e),
                }
            })
        }

        ExprKind::Reduce { mode: ReduceMode::Reduce, .. } => {
            let node = expr.clone();
            let ctx = ctx.clone();
            Box::new(iter::once_with(move || run_reduce(&node, &ctx, input)))
        }

        ExprKind::Reduce { mode: ReduceMode::Foreach, source, init, .. } => {
            let acc = match last_value(eval(init, ctx, input.clone())) {
                Ok(acc) => acc.unwrap_or(Json::Null),
                Err(e) => return failure(e),
            };
            Box::new(ForeachStream {
                node: expr.clone(),
                source: eval(source, ctx, input.clone()),
                ctx: ctx.clone(),
                input,
                acc,
                pending: nothing(),
                done: false,
            })
        }

        ExprKind::Label { name, body } => match enter_label(expr, name, ctx) {
            Ok((scope, id)) => Box::new(LabelStream {
                inner: Some(eval(body, &scope, input)),
                id,
            }),
            Err(e) => failure(e),
        },

        ExprKind::Break(name) => failure(break_signal(expr, name, ctx)),

        ExprKind::FunctionCall { target, args } => call_values(expr, target, args, ctx, input),

        ExprKind::Variable(name) => match ctx.env.variable(name) {
            Some(value) => single(value),
            None if name == "ENV" => single(functions::environment()),
            None => failure(EvalError::lookup(format!("${} is not defined.", name)).at(expr.id)),
        },

        ExprKind::Assignment { op, path, value } => {
            let (op, path, value) = (*op, path.clone(), value.clone());
            located(assign(op, path, value, ctx, input), expr.id)
        }

        ExprKind::Format(name) => located(from_result(format::apply(name, &input).map(Json::from)), expr.id),

        ExprKind::StringTemplate { parts, .. } => {
            located(template(expr.clone(), parts.len(), ctx.clone(), input, String::new()), expr.id)
        }
    }
}

fn selector_result(stream: ValueStream, node: NodeId, optional: bool) -> ValueStream {
    if optional {
        suppress(stream)
    } else {
        located(stream, node)
    }
}

fn optional_bound(bound: &Option<ExprRef>, ctx: &Context, input: Json) -> ValueStream {
    match bound {
        Some(expr) => eval(expr, ctx, input),
        None => single(Json::Null),
    }
}

fn slice_part(start: &Json, end: &Json) -> EvalResult<PathPart> {
    let bound = |v: &Json| -> EvalResult<Option<f64>> {
        match v {
            Json::Null => Ok(None),
            Json::Number(n) => Ok(Some(*n)),
            other => Err(EvalError::type_error(
                format!("Slice bounds must be numbers, not {}.", other.json_type()),
                vec![other.clone()],
            )),
        }
    };
    Ok(PathPart::Slice {
        start: bound(start)?,
        end: bound(end)?,
    })
}

/// The path step an index value selects within `value`.
fn index_part(value: &Json, index: &Json) -> EvalResult<PathPart> {
    match index {
        Json::Number(_) | Json::String(_) => PathPart::from_json(index),
        Json::Object(_) if value.is_array() || value.is_null() || value.is_string() => PathPart::from_json(index),
        other => Err(EvalError::type_error(
            format!("Can't index {} with {}.", value.json_type(), other.json_type()),
            vec![value.clone(), other.clone()],
        )),
    }
}

fn index_value(value: &Json, index: &Json) -> EvalResult<Json> {
    if let (Json::Array(items), Json::Array(needle)) = (value, index) {
        return Ok(utils::subarray_indices(items, needle));
    }
    let part = index_part(value, index)?;
    get_part(value, &part)
}

fn enumerate(value: Json) -> ValueStream {
    match value {
        Json::Array(items) => Box::new((0..items.len()).map(move |i| Ok(items[i].clone()))),
        Json::Object(map) => Box::new(map.values().cloned().collect::<Vec<_>>().into_iter().map(Ok)),
        other => failure(enumerate_error(&other)),
    }
}

fn enumerate_error(value: &Json) -> EvalError {
    EvalError::type_error(format!("Can't enumerate {}.", value.json_type()), vec![value.clone()])
}

fn condition_error(value: Json) -> EvalError {
    EvalError::type_error(
        format!("If condition must be a boolean, not {}.", value.json_type()),
        vec![value],
    )
}

/// Object construction as a nested loop over the descriptors, first one
/// outermost, key before value.
fn construct_object(
    node: ExprRef,
    index: usize,
    ctx: Context,
    input: Json,
    acc: IndexMap<String, Json>,
) -> ValueStream {
    let (key_expr, value_expr) = match &node.kind {
        ExprKind::ConstructObject(entries) => match entries.get(index) {
            Some((k, v)) => (k.clone(), v.clone()),
            None => return single(Json::object(acc)),
        },
        _ => return single(Json::object(acc)),
    };

    let input_value = input.clone();
    bind(eval(&key_expr, &ctx, input.clone()), move |key| {
        let key = match key {
            Json::String(s) => s,
            other => {
                return failure(EvalError::type_error(
                    format!("Object keys must be strings, not {}.", other.json_type()),
                    vec![other],
                ))
            }
        };
        let node = node.clone();
        let ctx_next = ctx.clone();
        let input_next = input_value.clone();
        let acc = acc.clone();
        bind(eval(&value_expr, &ctx, input_value.clone()), move |value| {
            let mut next = acc.clone();
            next.insert(key.to_string(), value);
            construct_object(node.clone(), index + 1, ctx_next.clone(), input_next.clone(), next)
        })
    })
}

/// Render a string template right to left, so the last interpolation is the
/// outermost loop.
fn template(node: ExprRef, remaining: usize, ctx: Context, input: Json, suffix: String) -> ValueStream {
    let (part, format) = match &node.kind {
        ExprKind::StringTemplate { parts, format } => match remaining.checked_sub(1).and_then(|i| parts.get(i)) {
            Some(part) => (part.clone(), format.clone()),
            None => return single(Json::from(suffix)),
        },
        _ => return single(Json::from(suffix)),
    };

    match part {
        TemplatePart::Literal(text) => template(node, remaining - 1, ctx, input, text + &suffix),
        TemplatePart::Interpolation(expr) => {
            let input_next = input.clone();
            let ctx_next = ctx.clone();
            bind(eval(&expr, &ctx, input), move |value| {
                let rendered = match &format {
                    Some(name) => format::apply(name, &value),
                    None => Ok(format::text(&value)),
                };
                match rendered {
                    Ok(text) => template(node.clone(), remaining - 1, ctx_next.clone(), input_next.clone(), text + &suffix),
                    Err(e) => failure(e),
                }
            })
        }
    }
}

// ── Destructuring ────────────────────────────────────────────────────────────

type BindingSet = Vec<(String, Json)>;

fn with_bindings(ctx: &Context, set: BindingSet) -> Context {
    let env = set
        .into_iter()
        .fold(ctx.env.clone(), |env, (name, value)| env.bind_variable(&name, value));
    ctx.with_env(env)
}

/// Match `value` against a pattern, trying `?//` alternatives in order. Every
/// name any alternative binds is bound in the result, null when unmatched.
fn match_pattern(pattern: &Pattern, value: &Json, ctx: &Context, input: &Json) -> EvalResult<Vec<BindingSet>> {
    let names = pattern.variables();
    let mut alternatives = Vec::new();
    let mut cursor = pattern;
    while let Pattern::Alternative(first, rest) = cursor {
        alternatives.push(&**first);
        cursor = &**rest;
    }
    alternatives.push(cursor);

    let last = alternatives.len() - 1;
    for (i, alternative) in alternatives.into_iter().enumerate() {
        match destructure(alternative, value, ctx, input) {
            Ok(sets) => {
                return Ok(sets
                    .into_iter()
                    .map(|set| {
                        let mut padded: BindingSet = names
                            .iter()
                            .filter(|n| !set.iter().any(|(bound, _)| bound == *n))
                            .map(|n| (n.clone(), Json::Null))
                            .collect();
                        padded.extend(set);
                        padded
                    })
                    .collect())
            }
            Err(e) if i == last || !e.is_catchable() => return Err(e),
            Err(_) => continue,
        }
    }
    Ok(Vec::new())
}

fn product(prefixes: Vec<BindingSet>, suffixes: Vec<BindingSet>) -> Vec<BindingSet> {
    let mut out = Vec::with_capacity(prefixes.len() * suffixes.len());
    for prefix in &prefixes {
        for suffix in &suffixes {
            let mut set = prefix.clone();
            set.extend(suffix.iter().cloned());
            out.push(set);
        }
    }
    out
}

fn destructure(pattern: &Pattern, value: &Json, ctx: &Context, input: &Json) -> EvalResult<Vec<BindingSet>> {
    match pattern {
        Pattern::Variable(name) => Ok(vec![vec![(name.clone(), value.clone())]]),
        Pattern::Array(items) => {
            if !value.is_array() && !value.is_null() {
                return Err(EvalError::type_error(
                    format!("Can't index {} with Number.", value.json_type()),
                    vec![value.clone()],
                ));
            }
            let mut sets = vec![Vec::new()];
            for (i, item) in items.iter().enumerate() {
                let element = get_part(value, &PathPart::Index(i as i64))?;
                sets = product(sets, destructure(item, &element, ctx, input)?);
            }
            Ok(sets)
        }
        Pattern::Object(entries) => {
            let mut sets = vec![Vec::new()];
            for entry in entries {
                let keys: Vec<(Option<String>, Json)> = match &entry.key {
                    PatternKey::Variable(name) => vec![(Some(name.clone()), Json::from(name.as_str()))],
                    PatternKey::Expr(expr) => eval(expr, ctx, input.clone())
                        .map(|key| key.map(|k| (None, k)))
                        .collect::<EvalResult<_>>()?,
                };
                let mut next = Vec::new();
                for (variable, key) in keys {
                    let key = match key {
                        Json::String(s) => s,
                        other => {
                            return Err(EvalError::type_error(
                                format!("Can't index {} with {}.", value.json_type(), other.json_type()),
                                vec![value.clone(), other],
                            ))
                        }
                    };
                    let field = get_part(value, &PathPart::Key(key))?;
                    let mut entry_sets = vec![match variable {
                        Some(name) => vec![(name, field.clone())],
                        None => Vec::new(),
                    }];
                    if let Some(sub) = &entry.value {
                        entry_sets = product(entry_sets, destructure(sub, &field, ctx, input)?);
                    }
                    next.extend(product(sets.clone(), entry_sets));
                }
                sets = next;
            }
            Ok(sets)
        }
        Pattern::Alternative(..) => match_pattern(pattern, value, ctx, input),
    }
}

// ── Reduce / foreach ─────────────────────────────────────────────────────────

fn run_reduce(node: &ExprRef, ctx: &Context, input: Json) -> EvalResult<Json> {
    let (source, pattern, init, update) = match &node.kind {
        ExprKind::Reduce { source, pattern, init, update, .. } => (source, pattern, init, update),
        _ => return Ok(Json::Null),
    };
    let mut acc = last_value(eval(init, ctx, input.clone()))?.unwrap_or(Json::Null);
    for item in eval(source, ctx, input.clone()) {
        let item = item?;
        for set in match_pattern(pattern, &item, ctx, &input)? {
            let scope = with_bindings(ctx, set);
            acc = last_value(eval(update, &scope, acc))?.unwrap_or(Json::Null);
        }
    }
    Ok(acc)
}

struct ForeachStream {
    node: ExprRef,
    ctx: Context,
    input: Json,
    source: ValueStream,
    acc: Json,
    pending: ValueStream,
    done: bool,
}

impl ForeachStream {
    fn step(&mut self, item: Json) -> EvalResult<ValueStream> {
        let node = self.node.clone();
        let (pattern, update, extract) = match &node.kind {
            ExprKind::Reduce { pattern, update, extract, .. } => (pattern, update, extract),
            _ => return Ok(nothing()),
        };
        let mut outputs: Vec<ValueStream> = Vec::new();
        for set in match_pattern(pattern, &item, &self.ctx, &self.input)? {
            let scope = with_bindings(&self.ctx, set);
            let updates = eval(update, &scope, self.acc.clone()).collect::<EvalResult<Vec<Json>>>()?;
            self.acc = updates.last().cloned().unwrap_or(Json::Null);
            for state in updates {
                outputs.push(match extract {
                    Some(extract) => eval(extract, &scope, state),
                    None => single(state),
                });
            }
        }
        Ok(Box::new(outputs.into_iter().flatten()))
    }
}

impl Iterator for ForeachStream {
    type Item = EvalResult<Json>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.next() {
                if item.is_err() {
                    self.done = true;
                    self.pending = nothing();
                }
                return Some(item);
            }
            if self.done {
                return None;
            }
            let item = match self.source.next()? {
                Ok(item) => item,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            match self.step(item) {
                Ok(pending) => self.pending = pending,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

// ── Labels ───────────────────────────────────────────────────────────────────

fn enter_label(node: &ExprRef, name: &str, ctx: &Context) -> EvalResult<(Context, u64)> {
    if ctx.env.label(name).is_some() {
        return Err(EvalError::new(EvalErrorKind::NestedLabel(name.to_string())).at(node.id));
    }
    let id = ctx.runtime.next_label_id();
    Ok((ctx.bind(Binding::Label(name.to_string(), id)), id))
}

fn break_signal(node: &ExprRef, name: &str, ctx: &Context) -> EvalError {
    match ctx.env.label(name) {
        Some(id) => EvalError::new(EvalErrorKind::Break {
            label: name.to_string(),
            id,
        })
        .at(node.id),
        None => EvalError::lookup(format!("${} is not defined.", name)).at(node.id),
    }
}

// ── Function calls ───────────────────────────────────────────────────────────

fn call_values(node: &ExprRef, target: &CallTarget, args: &[ExprRef], ctx: &Context, input: Json) -> ValueStream {
    let callable = match target {
        CallTarget::Native(builtin) => Callable::Native(*builtin),
        CallTarget::Named(name) => match ctx.resolve(name, args.len()) {
            Some(callable) => callable,
            None => return failure(undefined_function(name, args.len()).at(node.id)),
        },
    };

    match callable {
        Callable::Thunk { expr, env } => eval(&expr, &ctx.with_env(env), input),
        Callable::Native(builtin) => located(builtin.call(ctx, args, input), node.id),
        Callable::User { def, env } => {
            let _guard = match ctx.runtime.enter() {
                Ok(guard) => guard,
                Err(e) => return failure(e.at(node.id)),
            };
            let body = def.body.clone();
            let ctx_body = ctx.clone();
            let scopes = bind_parameters(&def, 0, env.bind_function(def.clone()), ctx, &Rc::new(args.to_vec()), &input);
            let stream = bind(scopes, move |scope| eval(&body, &ctx_body.with_env(scope), input.clone()));
            Box::new(Guarded {
                inner: stream,
                runtime: ctx.runtime.clone(),
                call_site: node.id,
                done: false,
            })
        }
    }
}

fn call_paths(
    node: &ExprRef,
    target: &CallTarget,
    args: &[ExprRef],
    ctx: &Context,
    path: JsonPath,
    input: Json,
) -> PathStream {
    let callable = match target {
        CallTarget::Native(builtin) => Callable::Native(*builtin),
        CallTarget::Named(name) => match ctx.resolve(name, args.len()) {
            Some(callable) => callable,
            None => return failure(undefined_function(name, args.len()).at(node.id)),
        },
    };

    match callable {
        Callable::Thunk { expr, env } => eval_paths(&expr, &ctx.with_env(env), path, input),
        Callable::Native(builtin) => match builtin.call_paths(ctx, args, path, input.clone()) {
            Some(stream) => located(stream, node.id),
            None => failure(not_a_path(&input).at(node.id)),
        },
        Callable::User { def, env } => {
            let _guard = match ctx.runtime.enter() {
                Ok(guard) => guard,
                Err(e) => return failure(e.at(node.id)),
            };
            let body = def.body.clone();
            let ctx_body = ctx.clone();
            let scopes = bind_parameters(&def, 0, env.bind_function(def.clone()), ctx, &Rc::new(args.to_vec()), &input);
            let stream = bind(scopes, move |scope| {
                eval_paths(&body, &ctx_body.with_env(scope), path.clone(), input.clone())
            });
            Box::new(Guarded {
                inner: stream,
                runtime: ctx.runtime.clone(),
                call_site: node.id,
                done: false,
            })
        }
    }
}

fn undefined_function(name: &str, arity: usize) -> EvalError {
    EvalError::lookup(format!("{}/{} is not defined.", name, arity))
}

/// Bind the parameters of a call, starting at `index`. Filter parameters
/// become thunks over the caller's scope; `$value` parameters are evaluated
/// against the caller's input, one scope per combination of values.
fn bind_parameters(
    def: &Rc<FunctionDef>,
    mut index: usize,
    mut env: Env,
    caller: &Context,
    args: &Rc<Vec<ExprRef>>,
    input: &Json,
) -> Stream<Env> {
    while let (Some(param), Some(arg)) = (def.params.get(index), args.get(index)) {
        match param {
            Param::Filter(name) => {
                env = env.bind(Binding::Function(
                    name.clone(),
                    0,
                    Callable::Thunk {
                        expr: arg.clone(),
                        env: caller.env.clone(),
                    },
                ));
            }
            Param::Value(name) => {
                let (def, caller_next, args, input_next) = (def.clone(), caller.clone(), args.clone(), input.clone());
                let (name, arg_id) = (name.clone(), arg.id);
                return bind(eval(arg, caller, input.clone()), move |value| {
                    let with_value = env.bind_variable(&name, value);
                    let as_filter = Callable::Thunk {
                        expr: Expr::new(arg_id, ExprKind::Variable(name.clone())),
                        env: with_value.clone(),
                    };
                    let scope = with_value.bind(Binding::Function(name.clone(), 0, as_filter));
                    bind_parameters(&def, index + 1, scope, &caller_next, &args, &input_next)
                });
            }
        }
        index += 1;
    }
    single(env)
}

// ── Path production ──────────────────────────────────────────────────────────

pub fn not_a_path(value: &Json) -> EvalError {
    EvalError::path("Not a path expression.".to_string(), vec![value.clone()])
}

/// Enumerate the locations `expr` selects inside `input`, which itself sits
/// at `path`, each paired with the value stored there.
pub fn eval_paths(expr: &ExprRef, ctx: &Context, path: JsonPath, input: Json) -> PathStream {
    if let Err(e) = ctx.tick() {
        return failure(e.at(expr.id));
    }

    match &expr.kind {
        ExprKind::Identity | ExprKind::FunctionDefinition(_) => single((path, input)),

        ExprKind::StringSelector { target, key, optional } => {
            let part = PathPart::Key(Rc::from(key.as_str()));
            let stream = bind(eval_paths(target, ctx, path, input), move |(p, value)| {
                from_result(get_part(&value, &part).map(|child| (p.with(part.clone()), child)))
            });
            path_selector_result(stream, expr.id, *optional)
        }

        ExprKind::Selector { target, index, optional } => {
            let target = target.clone();
            let ctx_inner = ctx.clone();
            let (path_inner, input_inner) = (path, input.clone());
            let stream = bind(eval(index, ctx, input), move |index| {
                bind(
                    eval_paths(&target, &ctx_inner, path_inner.clone(), input_inner.clone()),
                    move |(p, value)| {
                        from_result(
                            index_part(&value, &index)
                                .and_then(|part| get_part(&value, &part).map(|child| (p.with(part), child))),
                        )
                    },
                )
            });
            path_selector_result(stream, expr.id, *optional)
        }

        ExprKind::SliceSelector { target, from, to, optional } => {
            let (target, to) = (target.clone(), to.clone());
            let ctx_inner = ctx.clone();
            let input_inner = input.clone();
            let stream = bind(optional_bound(from, ctx, input), move |start| {
                let target = target.clone();
                let ctx_target = ctx_inner.clone();
                let (path_target, input_target) = (path.clone(), input_inner.clone());
                bind(optional_bound(&to, &ctx_inner, input_inner.clone()), move |end| {
                    let part = slice_part(&start, &end);
                    bind(
                        eval_paths(&target, &ctx_target, path_target.clone(), input_target.clone()),
                        move |(p, value)| {
                            from_result(part.clone().and_then(|part| {
                                get_part(&value, &part).map(|child| (p.with(part), child))
                            }))
                        },
                    )
                })
            });
            path_selector_result(stream, expr.id, *optional)
        }

        ExprKind::Enumerate { target, optional } => {
            let stream = bind(eval_paths(target, ctx, path, input), |(p, value)| enumerate_paths(p, value));
            path_selector_result(stream, expr.id, *optional)
        }

        ExprKind::Compose(lhs, rhs) => {
            if let ExprKind::FunctionDefinition(def) = &lhs.kind {
                let scope = ctx.with_env(ctx.env.bind_function(def.clone()));
                return eval_paths(rhs, &scope, path, input);
            }
            let rhs = rhs.clone();
            let ctx = ctx.clone();
            bind(eval_paths(lhs, &ctx, path, input), move |(p, value)| eval_paths(&rhs, &ctx, p, value))
        }

        ExprKind::Concat(lhs, rhs) => {
            let rhs = rhs.clone();
            let ctx_rhs = ctx.clone();
            let (path_rhs, input_rhs) = (path.clone(), input.clone());
            let deferred =
                iter::once(()).flat_map(move |_| eval_paths(&rhs, &ctx_rhs, path_rhs.clone(), input_rhs.clone()));
            Box::new(eval_paths(lhs, ctx, path, input).chain(deferred))
        }

        ExprKind::IfThenElse { cond, then, else_ } => {
            let (cond_id, then, else_) = (cond.id, then.clone(), else_.clone());
            let ctx_branch = ctx.clone();
            let input_branch = input.clone();
            bind(eval(cond, ctx, input), move |c| match c {
                Json::Bool(true) => eval_paths(&then, &ctx_branch, path.clone(), input_branch.clone()),
                Json::Bool(false) => match &else_ {
                    Some(else_) => eval_paths(else_, &ctx_branch, path.clone(), input_branch.clone()),
                    None => single((path.clone(), input_branch.clone())),
                },
                other => failure(condition_error(other).at(cond_id)),
            })
        }

        ExprKind::Alternative(lhs, rhs) => {
            let rhs = rhs.clone();
            let ctx_rhs = ctx.clone();
            let (path_rhs, input_rhs) = (path.clone(), input.clone());
            Box::new(AlternativeStream {
                left: Some(eval_paths(lhs, ctx, path, input)),
                fallback: Some(Box::new(move || eval_paths(&rhs, &ctx_rhs, path_rhs, input_rhs))),
                right: None,
                produced: false,
                truthy: |(_, value): &(JsonPath, Json)| value.is_truthy(),
            })
        }

        ExprKind::TryCatch { body, catch } => {
            let handler: Option<Box<dyn FnOnce(EvalError) -> PathStream>> = catch.clone().map(|catch| {
                let ctx = ctx.clone();
                let path = path.clone();
                Box::new(move |err: EvalError| eval_paths(&catch, &ctx, path, err.catch_value()))
                    as Box<dyn FnOnce(EvalError) -> PathStream>
            });
            Box::new(TryStream {
                body: Some(eval_paths(body, ctx, path, input)),
                handler,
                caught: None,
                settle: true,
            })
        }

        ExprKind::Let { value, pattern, body } => {
            let (pattern, body) = (pattern.clone(), body.clone());
            let ctx_body = ctx.clone();
            let input_body = input.clone();
            bind(eval(value, ctx, input), move |value| {
                match match_pattern(&pattern, &value, &ctx_body, &input_body) {
                    Ok(sets) => {
                        let body = body.clone();
                        let ctx = ctx_body.clone();
                        let (path, input) = (path.clone(), input_body.clone());
                        Box::new(sets.into_iter().flat_map(move |set| {
                            eval_paths(&body, &with_bindings(&ctx, set), path.clone(), input.clone())
                        }))
                    }
                    Err(e) => failure(e),
                }
            })
        }

        ExprKind::Reduce { .. } => {
            let node = expr.clone();
            let ctx = ctx.clone();
            let results = iter::once_with(move || reduce_paths(&node, &ctx, path, input)).flat_map(|r| match r {
                Ok(pairs) => pairs.into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(e)],
            });
            Box::new(results)
        }

        ExprKind::Label { name, body } => match enter_label(expr, name, ctx) {
            Ok((scope, id)) => Box::new(LabelStream {
                inner: Some(eval_paths(body, &scope, path, input)),
                id,
            }),
            Err(e) => failure(e),
        },

        ExprKind::Break(name) => failure(break_signal(expr, name, ctx)),

        ExprKind::FunctionCall { target, args } => call_paths(expr, target, args, ctx, path, input),

        ExprKind::Literal(Json::Null) => single((path, Json::Null)),

        _ => failure(not_a_path(&input).at(expr.id)),
    }
}

fn path_selector_result(stream: PathStream, node: NodeId, optional: bool) -> PathStream {
    if optional {
        suppress(stream)
    } else {
        located(stream, node)
    }
}

fn enumerate_paths(path: JsonPath, value: Json) -> PathStream {
    match value {
        Json::Array(items) => Box::new(
            (0..items.len()).map(move |i| Ok((path.with(PathPart::Index(i as i64)), items[i].clone()))),
        ),
        Json::Object(map) => Box::new(
            map.iter()
                .map(|(k, v)| Ok((path.with(PathPart::Key(Rc::from(k.as_str()))), v.clone())))
                .collect::<Vec<_>>()
                .into_iter(),
        ),
        Json::Null => nothing(),
        other => failure(enumerate_error(&other)),
    }
}

/// Reduce and foreach in path mode: the accumulator is a location, threaded
/// through `update` in path mode.
fn reduce_paths(node: &ExprRef, ctx: &Context, path: JsonPath, input: Json) -> EvalResult<Vec<(JsonPath, Json)>> {
    let (mode, source, pattern, init, update, extract) = match &node.kind {
        ExprKind::Reduce { mode, source, pattern, init, update, extract } => {
            (*mode, source, pattern, init, update, extract)
        }
        _ => return Ok(Vec::new()),
    };

    let mut acc = (path.clone(), Json::Null);
    for pair in eval_paths(init, ctx, path.clone(), input.clone()) {
        acc = pair?;
    }

    let mut emitted = Vec::new();
    for item in eval(source, ctx, input.clone()) {
        let item = item?;
        for set in match_pattern(pattern, &item, ctx, &input)? {
            let scope = with_bindings(ctx, set);
            let updates = eval_paths(update, &scope, acc.0.clone(), acc.1.clone())
                .collect::<EvalResult<Vec<(JsonPath, Json)>>>()?;
            acc = updates.last().cloned().unwrap_or((path.clone(), Json::Null));
            if mode == ReduceMode::Foreach {
                for (p, v) in updates {
                    match extract {
                        Some(extract) => {
                            for pair in eval_paths(extract, &scope, p, v) {
                                emitted.push(pair?);
                            }
                        }
                        None => emitted.push((p, v)),
                    }
                }
            }
        }
    }

    if mode == ReduceMode::Reduce {
        emitted.push(acc);
    }
    Ok(emitted)
}

/// Collect every path `expr` selects inside `input`.
pub fn collect_paths(expr: &ExprRef, ctx: &Context, input: &Json) -> EvalResult<Vec<JsonPath>> {
    eval_paths(expr, ctx, JsonPath::new(), input.clone())
        .map(|pair| pair.map(|(p, _)| p))
        .collect()
}

// ── Assignment ───────────────────────────────────────────────────────────────

fn assign(op: AssignOp, path: ExprRef, value: ExprRef, ctx: &Context, input: Json) -> ValueStream {
    match op {
        AssignOp::Update => {
            let ctx = ctx.clone();
            Box::new(iter::once_with(move || update_assign(&path, &value, &ctx, input)))
        }
        AssignOp::Set | AssignOp::Arithmetic(_) | AssignOp::Alternative => {
            let ctx_paths = ctx.clone();
            let original = input.clone();
            bind(eval(&value, ctx, input), move |rhs| {
                let apply = |current: Json| -> EvalResult<Json> {
                    match op {
                        AssignOp::Arithmetic(op) => arithmetic(op, &current, &rhs),
                        AssignOp::Alternative if current.is_truthy() => Ok(current),
                        _ => Ok(rhs.clone()),
                    }
                };
                let result = collect_paths(&path, &ctx_paths, &original).and_then(|paths| {
                    paths.iter().try_fold(original.clone(), |acc, p| {
                        let current = get_path(&acc, p.parts())?;
                        set_path(acc, p.parts(), apply(current)?)
                    })
                });
                from_result(result)
            })
        }
    }
}

/// `path |= f`: each location takes the first output of `f` applied to its
/// current value; locations where `f` is empty are deleted afterwards.
fn update_assign(path: &ExprRef, f: &ExprRef, ctx: &Context, input: Json) -> EvalResult<Json> {
    let paths = collect_paths(path, ctx, &input)?;
    let mut acc = input;
    let mut deletions = Vec::new();
    for p in paths {
        let current = get_path(&acc, p.parts())?;
        match eval(f, ctx, current).next() {
            Some(value) => acc = set_path(acc, p.parts(), value?)?,
            None => deletions.push(p),
        }
    }
    delete_paths(acc, &deletions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_value;
    use crate::parser::parse;

    fn run(program: &str, input: Json) -> EvalResult<Vec<Json>> {
        let (expr, _) = parse(program).unwrap();
        let runtime = Rc::new(Runtime::new(0, 64, Box::new(iter::empty())));
        let ctx = Context::new(runtime, Env::new());
        eval(&expr, &ctx, input).collect()
    }

    fn values(program: &str, input: Json) -> Vec<Json> {
        run(program, input).unwrap()
    }

    fn message(program: &str, input: Json) -> String {
        run(program, input).unwrap_err().to_string()
    }

    #[test]
    fn test_selectors() {
        let input = json_value!({"a": {"b": [10, 20, 30]}});
        assert_eq!(values(".a.b[1]", input.clone()), vec![json_value!(20)]);
        assert_eq!(values(".a.b[-1]", input.clone()), vec![json_value!(30)]);
        assert_eq!(values(".a.b[5]", input.clone()), vec![Json::Null]);
        assert_eq!(values(".missing", input.clone()), vec![Json::Null]);
        assert_eq!(values(".a.b[1:]", input.clone()), vec![json_value!([20, 30])]);
        assert_eq!(values(".a.b[:-1]", input), vec![json_value!([10, 20])]);
        assert_eq!(values(".[1:3]", json_value!("hello")), vec![json_value!("el")]);
    }

    #[test]
    fn test_selector_type_errors() {
        assert_eq!(message(".[0]", json_value!({"a": 1})), "Can't index Object with Number.");
        assert_eq!(message(".a", json_value!([1])), "Can't index Array with String.");
        assert!(values(".a?", json_value!([1])).is_empty());
        assert!(values(".[]?", json_value!(3)).is_empty());
        assert_eq!(message(".[]", json_value!(3)), "Can't enumerate Number.");
    }

    #[test]
    fn test_enumerate_and_compose() {
        assert_eq!(
            values(".[] | . * 2", json_value!([1, 2, 3])),
            vec![json_value!(2), json_value!(4), json_value!(6)]
        );
        assert_eq!(
            values(".[]", json_value!({"x": 1, "y": 2})),
            vec![json_value!(1), json_value!(2)]
        );
    }

    #[test]
    fn test_concat_and_construction() {
        assert_eq!(values("[.[] , 9]", json_value!([1, 2])), vec![json_value!([1, 2, 9])]);
        assert_eq!(
            values("{a: (1, 2), b: (3, 4)}", Json::Null),
            vec![
                json_value!({"a": 1, "b": 3}),
                json_value!({"a": 1, "b": 4}),
                json_value!({"a": 2, "b": 3}),
                json_value!({"a": 2, "b": 4}),
            ]
        );
        assert_eq!(message("{(1): 2}", Json::Null), "Object keys must be strings, not Number.");
    }

    #[test]
    fn test_if_requires_boolean() {
        assert_eq!(values("if . then 1 else 2 end", json_value!(false)), vec![json_value!(2)]);
        assert_eq!(values("if . then 1 end", json_value!(true)), vec![json_value!(1)]);
        assert_eq!(values("if false then 1 end", json_value!(7)), vec![json_value!(7)]);
        assert_eq!(
            message("if . then 1 else 2 end", Json::Null),
            "If condition must be a boolean, not Null."
        );
    }

    #[test]
    fn test_alternative() {
        assert_eq!(values(".a // 5", json_value!({})), vec![json_value!(5)]);
        assert_eq!(values("(null, 1, false, 2) // 5", Json::Null), vec![json_value!(1), json_value!(2)]);
        assert_eq!(values(".a.b // 5", json_value!([1])), vec![json_value!(5)]);
    }

    #[test]
    fn test_try_catch() {
        assert_eq!(values("try .a catch .", json_value!([1])), vec![json_value!("Can't index Array with String.")]);
        assert_eq!(values("[.[] | try (if . then 1 else 2 end)]", json_value!([true, 3, false])), vec![json_value!([1, 2])]);
        assert!(values("try .a", json_value!(1)).is_empty());
    }

    #[test]
    fn test_try_settles_body_before_yielding() {
        assert_eq!(values(r#"[try (1, error("x")) catch .]"#, Json::Null), vec![json_value!(["x"])]);
        assert_eq!(values(r#"[(1, error("x"))?]"#, Json::Null), vec![json_value!([])]);
        assert_eq!(values("[try (1, 2) catch 0]", Json::Null), vec![json_value!([1, 2])]);
        // a break passes through, after the outputs that preceded it
        assert_eq!(
            values(r#"[label $f | try (1, break $f) catch "caught"]"#, Json::Null),
            vec![json_value!([1])]
        );
    }

    #[test]
    fn test_let_and_patterns() {
        assert_eq!(values(". as $x | $x + 1", json_value!(1)), vec![json_value!(2)]);
        assert_eq!(
            values(". as [$a, {b: $c}] | [$a, $c]", json_value!([1, {"b": 2}])),
            vec![json_value!([1, 2])]
        );
        assert_eq!(values(". as {$a} | $a", json_value!({"a": 3})), vec![json_value!(3)]);
        assert_eq!(
            values(". as [$a] ?// $a | [$a]", json_value!({"k": 1})),
            vec![json_value!([{"k": 1}])]
        );
        assert_eq!(
            values(". as [$a] ?// {$b} | [$a, $b]", json_value!({"b": 4})),
            vec![json_value!([null, 4])]
        );
    }

    #[test]
    fn test_reduce_and_foreach() {
        assert_eq!(values("reduce .[] as $x (0; . + $x)", json_value!([1, 2, 3])), vec![json_value!(6)]);
        assert_eq!(values("reduce empty as $x (0; . + 1)", Json::Null), vec![json_value!(0)]);
        assert_eq!(
            values("[foreach .[] as $x (0; . + $x)]", json_value!([1, 2, 3])),
            vec![json_value!([1, 3, 6])]
        );
        assert_eq!(
            values("[foreach .[] as $x (0; . + $x; [$x, .])]", json_value!([1, 2])),
            vec![json_value!([[1, 1], [2, 3]])]
        );
    }

    #[test]
    fn test_functions_are_call_by_name() {
        assert_eq!(values("def f(g): [g, g]; f(.[])", json_value!([1, 2])), vec![json_value!([1, 2, 1, 2])]);
        assert_eq!(values("def f($a; $b): $a + $b; f(1, 2; 10)", Json::Null), vec![json_value!(11), json_value!(12)]);
        assert_eq!(values("def f(x): x * 2; f(.)", json_value!(4)), vec![json_value!(8)]);
        assert_eq!(
            values("def fac: if . <= 1 then 1 else . * (. - 1 | fac) end; fac", json_value!(5)),
            vec![json_value!(120)]
        );
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(message("nope(1)", Json::Null), "nope/1 is not defined.");
        assert_eq!(message("$x", Json::Null), "$x is not defined.");
    }

    #[test]
    fn test_recursion_depth_is_bounded() {
        let err = run("def f: f; f", Json::Null).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::DepthLimit(64));
    }

    #[test]
    fn test_label_and_break() {
        assert_eq!(values("[label $out | 1, 2, break $out, 3]", Json::Null), vec![json_value!([1, 2])]);
        assert_eq!(
            values("[label $a | label $b | 1, break $a, 2]", Json::Null),
            vec![json_value!([1])]
        );
        let err = run("label $a | label $a | 1", Json::Null).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::NestedLabel("a".to_string()));
        assert_eq!(message("break $nope", Json::Null), "$nope is not defined.");
    }

    #[test]
    fn test_assignment() {
        assert_eq!(
            values(".[][] |= . + 2", json_value!([[1, 2], [3, 4]])),
            vec![json_value!([[3, 4], [5, 6]])]
        );
        assert_eq!(values(".a = (1, 2)", json_value!({})), vec![json_value!({"a": 1}), json_value!({"a": 2})]);
        assert_eq!(values(".a = .b", json_value!({"b": 3})), vec![json_value!({"b": 3, "a": 3})]);
        assert_eq!(values(".[] += 10", json_value!([1, 2])), vec![json_value!([11, 12])]);
        assert_eq!(values(".a //= 5", json_value!({"a": null})), vec![json_value!({"a": 5})]);
        assert_eq!(values(".[] |= empty", json_value!([1, 2, 3])), vec![json_value!([])]);
        assert_eq!(values(".a.b |= 1", Json::Null), vec![json_value!({"a": {"b": 1}})]);
    }

    #[test]
    fn test_assignment_requires_paths() {
        let err = run("1 |= 2", Json::Null).unwrap_err();
        assert_eq!(err.to_string(), "Not a path expression.");
        assert!(err.node.is_some());
    }

    #[test]
    fn test_path_production() {
        let (expr, _) = parse(".a[0], (.b | .c), (.x // .y)").unwrap();
        let runtime = Rc::new(Runtime::new(0, 0, Box::new(iter::empty())));
        let ctx = Context::new(runtime, Env::new());
        let paths: Vec<Json> = collect_paths(&expr, &ctx, &json_value!({"y": 1}))
            .unwrap()
            .iter()
            .map(JsonPath::to_json)
            .collect();
        assert_eq!(
            paths,
            vec![json_value!(["a", 0]), json_value!(["b", "c"]), json_value!(["y"])]
        );
    }

    #[test]
    fn test_string_templates() {
        assert_eq!(values(r#""a\(.)b""#, json_value!(1)), vec![json_value!("a1b")]);
        assert_eq!(values(r#""\(.x)""#, json_value!({"x": "s"})), vec![json_value!("s")]);
        assert_eq!(
            values(r#""\(1,2)-\(3,4)""#, Json::Null),
            vec![json_value!("1-3"), json_value!("2-3"), json_value!("1-4"), json_value!("2-4")]
        );
    }

    #[test]
    fn test_ticks_bound_evaluation() {
        let (expr, _) = parse("[.[] | . + 1]").unwrap();
        let runtime = Rc::new(Runtime::new(5, 0, Box::new(iter::empty())));
        let ctx = Context::new(runtime, Env::new());
        let err = eval(&expr, &ctx, json_value!([1, 2, 3, 4, 5]))
            .collect::<EvalResult<Vec<_>>>()
            .unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::TickLimit(5));
    }
}
