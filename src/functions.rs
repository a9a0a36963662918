// Native builtins
// Operators and the primitive half of the standard library
//
// A native is either a filter, which receives its argument expressions
// unevaluated, or a value function, whose arguments are evaluated against the
// input and combined as a cartesian product with the first argument outermost.

use std::fmt;
use std::iter;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{ArithOp, ExprRef};
use crate::context::{Context, Runtime};
use crate::datetime;
use crate::error::{EvalError, EvalResult};
use crate::evaluator::{
    bind, cartesian, eval, eval_paths, failure, from_result, nothing, single, PathStream, Stream, ValueStream,
};
use crate::format;
use crate::path::{delete_paths, get_path, set_path, JsonPath, PathPart};
use crate::regexp;
use crate::utils;
use crate::value::{format_number, Json};

pub type FilterFn = fn(&Context, &[ExprRef], Json) -> ValueStream;
pub type PathFn = fn(&Context, &[ExprRef], JsonPath, Json) -> PathStream;

#[derive(Clone, Copy)]
pub enum Native {
    Filter(FilterFn),
    Value0(fn(Json) -> EvalResult<Json>),
    Value1(fn(Json, Json) -> EvalResult<Json>),
    Value2(fn(Json, Json, Json) -> EvalResult<Json>),
}

/// A native callable, addressed by `name/arity`. Natives with a path
/// implementation may appear where a path expression is required.
pub struct Builtin {
    pub name: &'static str,
    pub arity: usize,
    pub implementation: Native,
    pub paths: Option<PathFn>,
}

impl Builtin {
    const fn new(name: &'static str, arity: usize, implementation: Native) -> Self {
        Builtin {
            name,
            arity,
            implementation,
            paths: None,
        }
    }

    const fn with_paths(mut self, paths: PathFn) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn call(&self, ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
        match self.implementation {
            Native::Filter(f) => f(ctx, args, input),
            Native::Value0(f) => from_result(f(input)),
            Native::Value1(f) => bind(cartesian(ctx, args, &input), move |values| {
                from_result(f(input.clone(), arg(&values, 0)))
            }),
            Native::Value2(f) => bind(cartesian(ctx, args, &input), move |values| {
                from_result(f(input.clone(), arg(&values, 0), arg(&values, 1)))
            }),
        }
    }

    /// Path production, for natives that support it.
    pub fn call_paths(&self, ctx: &Context, args: &[ExprRef], path: JsonPath, input: Json) -> Option<PathStream> {
        self.paths.map(|f| f(ctx, args, path, input))
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({}/{})", self.name, self.arity)
    }
}

impl PartialEq for Builtin {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.arity == other.arity
    }
}

fn arg(values: &[Json], index: usize) -> Json {
    values.get(index).cloned().unwrap_or(Json::Null)
}

fn arg_stream(ctx: &Context, args: &[ExprRef], index: usize, input: Json) -> ValueStream {
    match args.get(index) {
        Some(expr) => eval(expr, ctx, input),
        None => nothing(),
    }
}

fn type_error(message: String, values: Vec<Json>) -> EvalError {
    EvalError::type_error(message, values)
}

// ── Operators ────────────────────────────────────────────────────────────────

pub static PLUS: Builtin = Builtin::new("_plus", 2, Native::Filter(plus));
pub static MINUS: Builtin = Builtin::new("_minus", 2, Native::Filter(minus));
pub static MULTIPLY: Builtin = Builtin::new("_multiply", 2, Native::Filter(multiply));
pub static DIVIDE: Builtin = Builtin::new("_divide", 2, Native::Filter(divide));
pub static MODULO: Builtin = Builtin::new("_modulo", 2, Native::Filter(modulo));
pub static EQUAL: Builtin = Builtin::new("_equal", 2, Native::Filter(equal));
pub static NOT_EQUAL: Builtin = Builtin::new("_notequal", 2, Native::Filter(not_equal));
pub static LESS: Builtin = Builtin::new("_less", 2, Native::Filter(less));
pub static LESS_EQUAL: Builtin = Builtin::new("_lesseq", 2, Native::Filter(less_equal));
pub static GREATER: Builtin = Builtin::new("_greater", 2, Native::Filter(greater));
pub static GREATER_EQUAL: Builtin = Builtin::new("_greatereq", 2, Native::Filter(greater_equal));
pub static AND: Builtin = Builtin::new("_and", 2, Native::Filter(and));
pub static OR: Builtin = Builtin::new("_or", 2, Native::Filter(or));
pub static NEGATE: Builtin = Builtin::new("_negate", 1, Native::Value1(negate));

/// Apply a binary operator: right operand outermost, left operand inner.
fn binary(ctx: &Context, args: &[ExprRef], input: Json, op: fn(&Json, &Json) -> EvalResult<Json>) -> ValueStream {
    let (lhs, rhs) = match args {
        [lhs, rhs] => (lhs.clone(), rhs.clone()),
        _ => return nothing(),
    };
    let ctx_lhs = ctx.clone();
    let input_lhs = input.clone();
    bind(eval(&rhs, ctx, input), move |r| {
        bind(eval(&lhs, &ctx_lhs, input_lhs.clone()), move |l| from_result(op(&l, &r)))
    })
}

fn plus(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    binary(ctx, args, input, |l, r| arithmetic(ArithOp::Add, l, r))
}

fn minus(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    binary(ctx, args, input, |l, r| arithmetic(ArithOp::Subtract, l, r))
}

fn multiply(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    binary(ctx, args, input, |l, r| arithmetic(ArithOp::Multiply, l, r))
}

fn divide(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    binary(ctx, args, input, |l, r| arithmetic(ArithOp::Divide, l, r))
}

fn modulo(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    binary(ctx, args, input, |l, r| arithmetic(ArithOp::Modulo, l, r))
}

fn equal(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    binary(ctx, args, input, |l, r| Ok(Json::Bool(l.equals(r))))
}

fn not_equal(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    binary(ctx, args, input, |l, r| Ok(Json::Bool(!l.equals(r))))
}

fn less(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    binary(ctx, args, input, |l, r| Ok(Json::Bool(l < r)))
}

fn less_equal(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    binary(ctx, args, input, |l, r| Ok(Json::Bool(l <= r)))
}

fn greater(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    binary(ctx, args, input, |l, r| Ok(Json::Bool(l > r)))
}

fn greater_equal(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    binary(ctx, args, input, |l, r| Ok(Json::Bool(l >= r)))
}

/// `and`/`or`: the left operand is the outer loop and decides alone when its
/// truthiness equals `decisive`.
fn logical(ctx: &Context, args: &[ExprRef], input: Json, decisive: bool) -> ValueStream {
    let (lhs, rhs) = match args {
        [lhs, rhs] => (lhs.clone(), rhs.clone()),
        _ => return nothing(),
    };
    let ctx_rhs = ctx.clone();
    let input_rhs = input.clone();
    bind(eval(&lhs, ctx, input), move |l| {
        if l.is_truthy() == decisive {
            return single(Json::Bool(decisive));
        }
        Box::new(eval(&rhs, &ctx_rhs, input_rhs.clone()).map(|r| r.map(|r| Json::Bool(r.is_truthy()))))
    })
}

fn and(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    logical(ctx, args, input, false)
}

fn or(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    logical(ctx, args, input, true)
}

fn negate(_input: Json, operand: Json) -> EvalResult<Json> {
    match operand {
        Json::Number(n) => Ok(Json::Number(-n)),
        other => Err(type_error(format!("Can't negate {}.", other.json_type()), vec![other])),
    }
}

// ── Arithmetic ───────────────────────────────────────────────────────────────

/// The arithmetic operators, shared with the `op=` update forms.
pub fn arithmetic(op: ArithOp, lhs: &Json, rhs: &Json) -> EvalResult<Json> {
    match op {
        ArithOp::Add => sum(lhs, rhs),
        ArithOp::Subtract => difference(lhs, rhs),
        ArithOp::Multiply => product(lhs, rhs),
        ArithOp::Divide => quotient(lhs, rhs),
        ArithOp::Modulo => remainder(lhs, rhs),
    }
}

fn sum(lhs: &Json, rhs: &Json) -> EvalResult<Json> {
    match (lhs, rhs) {
        (Json::Null, other) | (other, Json::Null) => Ok(other.clone()),
        (Json::Number(a), Json::Number(b)) => Ok(Json::Number(a + b)),
        (Json::String(a), Json::String(b)) => Ok(Json::from(format!("{}{}", a, b))),
        (Json::Array(a), Json::Array(b)) => {
            let mut items = Vec::with_capacity(a.len() + b.len());
            items.extend(a.iter().cloned());
            items.extend(b.iter().cloned());
            Ok(Json::array(items))
        }
        (Json::Object(a), Json::Object(b)) => {
            let mut merged = (**a).clone();
            for (k, v) in b.iter() {
                merged.insert(k.clone(), v.clone());
            }
            Ok(Json::object(merged))
        }
        _ => Err(type_error(
            format!("Can't add {} and {}.", lhs.json_type(), rhs.json_type()),
            vec![lhs.clone(), rhs.clone()],
        )),
    }
}

fn difference(lhs: &Json, rhs: &Json) -> EvalResult<Json> {
    match (lhs, rhs) {
        (Json::Number(a), Json::Number(b)) => Ok(Json::Number(a - b)),
        (Json::Array(a), Json::Array(b)) => Ok(Json::array(
            a.iter().filter(|item| !b.contains(item)).cloned().collect(),
        )),
        _ => Err(type_error(
            format!("Can't subtract {} from {}.", rhs.json_type(), lhs.json_type()),
            vec![lhs.clone(), rhs.clone()],
        )),
    }
}

fn deep_merge(a: &IndexMap<String, Json>, b: &IndexMap<String, Json>) -> IndexMap<String, Json> {
    let mut merged = a.clone();
    for (k, v) in b {
        let next = match (merged.get(k), v) {
            (Some(Json::Object(x)), Json::Object(y)) => Json::object(deep_merge(x, y)),
            _ => v.clone(),
        };
        merged.insert(k.clone(), next);
    }
    merged
}

/// Largest string `"s" * n` may build.
const MAX_REPEAT_BYTES: usize = 1 << 28;

fn product(lhs: &Json, rhs: &Json) -> EvalResult<Json> {
    match (lhs, rhs) {
        (Json::Number(a), Json::Number(b)) => Ok(Json::Number(a * b)),
        (Json::String(s), Json::Number(n)) | (Json::Number(n), Json::String(s)) => {
            if *n <= 0.0 {
                return Ok(Json::Null);
            }
            let count = (*n as usize).max(1);
            match s.len().checked_mul(count) {
                Some(total) if total <= MAX_REPEAT_BYTES => Ok(Json::from(s.repeat(count))),
                _ => Err(type_error(
                    "Repeat string result too long.".to_string(),
                    vec![lhs.clone(), rhs.clone()],
                )),
            }
        }
        (Json::Object(a), Json::Object(b)) => Ok(Json::object(deep_merge(a, b))),
        _ => Err(type_error(
            format!("Can't multiply {} and {}.", lhs.json_type(), rhs.json_type()),
            vec![lhs.clone(), rhs.clone()],
        )),
    }
}

fn zero_divisor(lhs: f64, rhs: f64) -> EvalError {
    type_error(
        format!(
            "{} and {} cannot be divided because the divisor is zero.",
            format_number(lhs),
            format_number(rhs)
        ),
        vec![Json::Number(lhs), Json::Number(rhs)],
    )
}

fn quotient(lhs: &Json, rhs: &Json) -> EvalResult<Json> {
    match (lhs, rhs) {
        (Json::Number(a), Json::Number(b)) => {
            if *b == 0.0 {
                return Err(zero_divisor(*a, *b));
            }
            Ok(Json::Number(a / b))
        }
        (Json::String(_), Json::String(_)) => split_string(lhs.clone(), rhs.clone()),
        _ => Err(type_error(
            format!("Can't divide {} by {}.", lhs.json_type(), rhs.json_type()),
            vec![lhs.clone(), rhs.clone()],
        )),
    }
}

fn remainder(lhs: &Json, rhs: &Json) -> EvalResult<Json> {
    match (lhs, rhs) {
        (Json::Number(a), Json::Number(b)) => {
            let (x, y) = (*a as i64, *b as i64);
            if y == 0 {
                return Err(zero_divisor(*a, *b));
            }
            Ok(Json::from(x.checked_rem(y).unwrap_or(0)))
        }
        _ => Err(type_error(
            format!("Can't take {} modulo {}.", lhs.json_type(), rhs.json_type()),
            vec![lhs.clone(), rhs.clone()],
        )),
    }
}

// ── Native table ─────────────────────────────────────────────────────────────

static BUILTINS: &[Builtin] = &[
    Builtin::new("empty", 0, Native::Filter(empty)).with_paths(empty_paths),
    Builtin::new("error", 0, Native::Filter(error0)).with_paths(error0_paths),
    Builtin::new("error", 1, Native::Filter(error1)).with_paths(error1_paths),
    Builtin::new("not", 0, Native::Value0(not)),
    Builtin::new("length", 0, Native::Value0(length)),
    Builtin::new("utf8bytelength", 0, Native::Value0(utf8bytelength)),
    Builtin::new("keys", 0, Native::Value0(keys)),
    Builtin::new("keys_unsorted", 0, Native::Value0(keys_unsorted)),
    Builtin::new("has", 1, Native::Value1(has)),
    Builtin::new("contains", 1, Native::Value1(contains)),
    Builtin::new("add", 0, Native::Value0(add)),
    Builtin::new("range", 1, Native::Filter(range)),
    Builtin::new("range", 2, Native::Filter(range)),
    Builtin::new("range", 3, Native::Filter(range)),
    Builtin::new("floor", 0, Native::Value0(floor)),
    Builtin::new("ceil", 0, Native::Value0(ceil)),
    Builtin::new("round", 0, Native::Value0(round)),
    Builtin::new("sqrt", 0, Native::Value0(sqrt)),
    Builtin::new("fabs", 0, Native::Value0(fabs)),
    Builtin::new("abs", 0, Native::Value0(abs)),
    Builtin::new("trunc", 0, Native::Value0(trunc)),
    Builtin::new("exp", 0, Native::Value0(exp)),
    Builtin::new("exp2", 0, Native::Value0(exp2)),
    Builtin::new("exp10", 0, Native::Value0(exp10)),
    Builtin::new("log", 0, Native::Value0(log)),
    Builtin::new("log2", 0, Native::Value0(log2)),
    Builtin::new("log10", 0, Native::Value0(log10)),
    Builtin::new("sin", 0, Native::Value0(sin)),
    Builtin::new("cos", 0, Native::Value0(cos)),
    Builtin::new("tan", 0, Native::Value0(tan)),
    Builtin::new("asin", 0, Native::Value0(asin)),
    Builtin::new("acos", 0, Native::Value0(acos)),
    Builtin::new("atan", 0, Native::Value0(atan)),
    Builtin::new("sinh", 0, Native::Value0(sinh)),
    Builtin::new("cosh", 0, Native::Value0(cosh)),
    Builtin::new("tanh", 0, Native::Value0(tanh)),
    Builtin::new("cbrt", 0, Native::Value0(cbrt)),
    Builtin::new("pow", 2, Native::Value2(pow)),
    Builtin::new("atan2", 2, Native::Value2(atan2)),
    Builtin::new("infinite", 0, Native::Value0(infinite)),
    Builtin::new("nan", 0, Native::Value0(nan)),
    Builtin::new("isinfinite", 0, Native::Value0(isinfinite)),
    Builtin::new("isnan", 0, Native::Value0(isnan)),
    Builtin::new("isnormal", 0, Native::Value0(isnormal)),
    Builtin::new("tostring", 0, Native::Value0(tostring)),
    Builtin::new("tonumber", 0, Native::Value0(tonumber)),
    Builtin::new("type", 0, Native::Value0(type_of)),
    Builtin::new("tojson", 0, Native::Value0(tojson)),
    Builtin::new("fromjson", 0, Native::Value0(fromjson)),
    Builtin::new("sort", 0, Native::Value0(sort)),
    Builtin::new("sort_by", 1, Native::Filter(sort_by)),
    Builtin::new("group_by", 1, Native::Filter(group_by)),
    Builtin::new("unique_by", 1, Native::Filter(unique_by)),
    Builtin::new("min", 0, Native::Value0(min)),
    Builtin::new("max", 0, Native::Value0(max)),
    Builtin::new("min_by", 1, Native::Filter(min_by)),
    Builtin::new("max_by", 1, Native::Filter(max_by)),
    Builtin::new("explode", 0, Native::Value0(explode)),
    Builtin::new("implode", 0, Native::Value0(implode)),
    Builtin::new("split", 1, Native::Value1(split_string)),
    Builtin::new("ltrimstr", 1, Native::Value1(ltrimstr)),
    Builtin::new("rtrimstr", 1, Native::Value1(rtrimstr)),
    Builtin::new("startswith", 1, Native::Value1(startswith)),
    Builtin::new("endswith", 1, Native::Value1(endswith)),
    Builtin::new("trim", 0, Native::Value0(trim)),
    Builtin::new("ltrim", 0, Native::Value0(ltrim)),
    Builtin::new("rtrim", 0, Native::Value0(rtrim)),
    Builtin::new("ascii_downcase", 0, Native::Value0(ascii_downcase)),
    Builtin::new("ascii_upcase", 0, Native::Value0(ascii_upcase)),
    Builtin::new("indices", 1, Native::Value1(indices)),
    Builtin::new("flatten", 1, Native::Value1(flatten)),
    Builtin::new("format", 1, Native::Value1(format_as)),
    Builtin::new("path", 1, Native::Filter(path_of)),
    Builtin::new("getpath", 1, Native::Filter(getpath)).with_paths(getpath_paths),
    Builtin::new("setpath", 2, Native::Value2(setpath)),
    Builtin::new("delpaths", 1, Native::Value1(delpaths)),
    Builtin::new("recurse", 0, Native::Filter(recurse)).with_paths(recurse_paths),
    Builtin::new("recurse", 1, Native::Filter(recurse_with)).with_paths(recurse_with_paths),
    Builtin::new("recurse", 2, Native::Filter(recurse_while)).with_paths(recurse_while_paths),
    Builtin::new("repeat", 1, Native::Filter(recurse_with)),
    Builtin::new("while", 2, Native::Filter(while_loop)),
    Builtin::new("until", 2, Native::Filter(until_loop)),
    Builtin::new("input", 0, Native::Filter(input)),
    Builtin::new("inputs", 0, Native::Filter(inputs)),
    Builtin::new("debug", 0, Native::Filter(debug0)),
    Builtin::new("debug", 1, Native::Filter(debug1)),
    Builtin::new("stderr", 0, Native::Filter(debug0)),
    Builtin::new("builtins", 0, Native::Filter(builtins)),
    Builtin::new("test", 2, Native::Value2(regexp::test)),
    Builtin::new("match", 2, Native::Filter(regexp::matches)),
    Builtin::new("split", 2, Native::Value2(regexp::split)),
    Builtin::new("sub", 3, Native::Filter(regexp::sub)),
    Builtin::new("now", 0, Native::Value0(datetime::now)),
    Builtin::new("mktime", 0, Native::Value0(datetime::mktime)),
    Builtin::new("gmtime", 0, Native::Value0(datetime::gmtime)),
    Builtin::new("strftime", 1, Native::Value1(datetime::strftime)),
    Builtin::new("strptime", 1, Native::Value1(datetime::strptime)),
    Builtin::new("todateiso8601", 0, Native::Value0(datetime::todateiso8601)),
    Builtin::new("fromdateiso8601", 0, Native::Value0(datetime::fromdateiso8601)),
];

/// Find the native registered under `name/arity`.
pub fn lookup(name: &str, arity: usize) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name && b.arity == arity)
}

/// Every native's `name/arity` pair.
pub fn signatures() -> impl Iterator<Item = (&'static str, usize)> {
    BUILTINS.iter().map(|b| (b.name, b.arity))
}

/// The process environment as an object, for `$ENV` and `env`.
pub fn environment() -> Json {
    Json::object(std::env::vars().map(|(k, v)| (k, Json::from(v))).collect())
}

// ── Control ──────────────────────────────────────────────────────────────────

fn empty(_ctx: &Context, _args: &[ExprRef], _input: Json) -> ValueStream {
    nothing()
}

fn empty_paths(_ctx: &Context, _args: &[ExprRef], _path: JsonPath, _input: Json) -> PathStream {
    nothing()
}

fn error0(_ctx: &Context, _args: &[ExprRef], input: Json) -> ValueStream {
    failure(EvalError::user(input))
}

fn error0_paths(_ctx: &Context, _args: &[ExprRef], _path: JsonPath, input: Json) -> PathStream {
    failure(EvalError::user(input))
}

fn error1(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    bind(arg_stream(ctx, args, 0, input), |message| failure(EvalError::user(message)))
}

fn error1_paths(ctx: &Context, args: &[ExprRef], _path: JsonPath, input: Json) -> PathStream {
    bind(arg_stream(ctx, args, 0, input), |message| failure(EvalError::user(message)))
}

fn not(input: Json) -> EvalResult<Json> {
    Ok(Json::Bool(!input.is_truthy()))
}

// ── Introspection ────────────────────────────────────────────────────────────

fn length(input: Json) -> EvalResult<Json> {
    match &input {
        Json::Null | Json::Undefined => Ok(Json::from(0i64)),
        Json::Number(n) => Ok(Json::Number(n.abs())),
        Json::String(s) => Ok(Json::from(s.chars().count())),
        Json::Array(items) => Ok(Json::from(items.len())),
        Json::Object(map) => Ok(Json::from(map.len())),
        Json::Bool(_) => Err(type_error(format!("{} has no length.", input.json_type()), vec![input.clone()])),
    }
}

fn utf8bytelength(input: Json) -> EvalResult<Json> {
    match &input {
        Json::String(s) => Ok(Json::from(s.len())),
        other => Err(type_error(
            format!("{} only strings have UTF-8 byte length.", other.json_type()),
            vec![other.clone()],
        )),
    }
}

fn keys_of(input: &Json, sorted: bool) -> EvalResult<Json> {
    match input {
        Json::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            if sorted {
                keys.sort();
            }
            Ok(Json::array(keys.into_iter().map(|k| Json::from(k.as_str())).collect()))
        }
        Json::Array(items) => Ok(Json::array((0..items.len()).map(Json::from).collect())),
        other => Err(type_error(format!("{} has no keys.", other.json_type()), vec![other.clone()])),
    }
}

fn keys(input: Json) -> EvalResult<Json> {
    keys_of(&input, true)
}

fn keys_unsorted(input: Json) -> EvalResult<Json> {
    keys_of(&input, false)
}

fn has(input: Json, key: Json) -> EvalResult<Json> {
    match (&input, &key) {
        (Json::Object(map), Json::String(k)) => Ok(Json::Bool(map.contains_key(&**k))),
        (Json::Array(items), Json::Number(n)) => Ok(Json::Bool(*n >= 0.0 && (*n as usize) < items.len())),
        _ => Err(type_error(
            format!("Can't check whether {} has a {} key.", input.json_type(), key.json_type()),
            vec![input.clone(), key.clone()],
        )),
    }
}

fn contains_value(a: &Json, b: &Json) -> EvalResult<bool> {
    match (a, b) {
        (Json::Object(x), Json::Object(y)) => {
            for (k, bv) in y.iter() {
                let held = match x.get(k) {
                    Some(av) => contains_value(av, bv)?,
                    None => false,
                };
                if !held {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Json::Array(x), Json::Array(y)) => {
            for bv in y.iter() {
                let mut found = false;
                for av in x.iter() {
                    if contains_value(av, bv)? {
                        found = true;
                        break;
                    }
                }
                if !found {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Json::String(x), Json::String(y)) => Ok(x.contains(&**y)),
        _ if a.type_name() == b.type_name() => Ok(a == b),
        _ => Err(type_error(
            format!("Can't check whether {} contains {}.", a.json_type(), b.json_type()),
            vec![a.clone(), b.clone()],
        )),
    }
}

fn contains(input: Json, other: Json) -> EvalResult<Json> {
    contains_value(&input, &other).map(Json::Bool)
}

fn add(input: Json) -> EvalResult<Json> {
    let items: Vec<Json> = match &input {
        Json::Null => return Ok(Json::Null),
        Json::Array(items) => items.to_vec(),
        Json::Object(map) => map.values().cloned().collect(),
        other => {
            return Err(type_error(
                format!("Can't add the elements of {}.", other.json_type()),
                vec![other.clone()],
            ))
        }
    };
    items.iter().try_fold(Json::Null, |acc, item| sum(&acc, item))
}

fn type_of(input: Json) -> EvalResult<Json> {
    Ok(Json::from(input.type_name()))
}

// ── Math ─────────────────────────────────────────────────────────────────────

macro_rules! math_functions {
    ($($name:ident => $f:expr),* $(,)?) => {
        $(
            fn $name(input: Json) -> EvalResult<Json> {
                match input {
                    Json::Number(n) => Ok(Json::Number($f(n))),
                    other => Err(type_error(
                        format!("{} requires a number, not {}.", stringify!($name), other.json_type()),
                        vec![other],
                    )),
                }
            }
        )*
    };
}

math_functions! {
    floor => f64::floor,
    ceil => f64::ceil,
    round => f64::round,
    sqrt => f64::sqrt,
    fabs => f64::abs,
    abs => f64::abs,
    trunc => f64::trunc,
    exp => f64::exp,
    exp2 => f64::exp2,
    exp10 => |n: f64| 10f64.powf(n),
    log => f64::ln,
    log2 => f64::log2,
    log10 => f64::log10,
    sin => f64::sin,
    cos => f64::cos,
    tan => f64::tan,
    asin => f64::asin,
    acos => f64::acos,
    atan => f64::atan,
    sinh => f64::sinh,
    cosh => f64::cosh,
    tanh => f64::tanh,
    cbrt => f64::cbrt,
}

fn numbers2(name: &str, a: &Json, b: &Json) -> EvalResult<(f64, f64)> {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => Ok((*x, *y)),
        _ => Err(type_error(
            format!("{} requires numbers, not {} and {}.", name, a.json_type(), b.json_type()),
            vec![a.clone(), b.clone()],
        )),
    }
}

fn pow(_input: Json, base: Json, exponent: Json) -> EvalResult<Json> {
    let (b, e) = numbers2("pow", &base, &exponent)?;
    Ok(Json::Number(b.powf(e)))
}

fn atan2(_input: Json, y: Json, x: Json) -> EvalResult<Json> {
    let (y, x) = numbers2("atan2", &y, &x)?;
    Ok(Json::Number(y.atan2(x)))
}

fn infinite(_input: Json) -> EvalResult<Json> {
    Ok(Json::Number(f64::INFINITY))
}

fn nan(_input: Json) -> EvalResult<Json> {
    Ok(Json::Number(f64::NAN))
}

fn number_test(name: &str, input: Json, test: fn(f64) -> bool) -> EvalResult<Json> {
    match input {
        Json::Number(n) => Ok(Json::Bool(test(n))),
        other => Err(type_error(
            format!("{} requires a number, not {}.", name, other.json_type()),
            vec![other],
        )),
    }
}

fn isinfinite(input: Json) -> EvalResult<Json> {
    number_test("isinfinite", input, f64::is_infinite)
}

fn isnan(input: Json) -> EvalResult<Json> {
    number_test("isnan", input, f64::is_nan)
}

fn isnormal(input: Json) -> EvalResult<Json> {
    number_test("isnormal", input, f64::is_normal)
}

// ── Conversion ───────────────────────────────────────────────────────────────

fn tostring(input: Json) -> EvalResult<Json> {
    match input {
        Json::String(_) => Ok(input),
        other => Ok(Json::from(other.to_string())),
    }
}

fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    let numeric = |c: char| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-');
    if text.is_empty() || !text.chars().all(numeric) {
        return None;
    }
    text.parse::<f64>().ok()
}

fn tonumber(input: Json) -> EvalResult<Json> {
    match &input {
        Json::Number(_) => Ok(input),
        Json::String(s) => parse_number(s)
            .map(Json::Number)
            .ok_or_else(|| type_error(format!("Can't parse '{}' as a number.", s), vec![input.clone()])),
        other => Err(type_error(
            format!("{} can't be parsed as a number.", other.json_type()),
            vec![other.clone()],
        )),
    }
}

fn tojson(input: Json) -> EvalResult<Json> {
    Ok(Json::from(input.to_string()))
}

fn fromjson(input: Json) -> EvalResult<Json> {
    match &input {
        Json::String(s) => Json::from_json_str(s)
            .map_err(|e| type_error(format!("{} (while parsing '{}')", e, s), vec![input.clone()])),
        other => Err(type_error(
            format!("{} can't be parsed as JSON.", other.json_type()),
            vec![other.clone()],
        )),
    }
}

fn format_as(input: Json, name: Json) -> EvalResult<Json> {
    match &name {
        Json::String(name) => format::apply(name, &input).map(Json::from),
        other => Err(type_error(
            format!("{} is not a valid format.", other),
            vec![other.clone()],
        )),
    }
}

// ── Ordering ─────────────────────────────────────────────────────────────────

fn array_input<'a>(input: &'a Json, action: &str) -> EvalResult<&'a Rc<Vec<Json>>> {
    match input {
        Json::Array(items) => Ok(items),
        other => Err(type_error(
            format!("{} can't be {}, as it is not an array.", other.json_type(), action),
            vec![other.clone()],
        )),
    }
}

/// Pair every element with the array of outputs `f` produces for it.
fn keyed(ctx: &Context, args: &[ExprRef], input: &Json, action: &str) -> EvalResult<Vec<(Json, Json)>> {
    let items = array_input(input, action)?;
    let f = match args.first() {
        Some(f) => f,
        None => return Ok(Vec::new()),
    };
    items
        .iter()
        .map(|item| {
            let key = eval(f, ctx, item.clone()).collect::<EvalResult<Vec<Json>>>()?;
            Ok((Json::array(key), item.clone()))
        })
        .collect()
}

/// Stable sort by key, then split into runs of equal keys.
fn grouped(ctx: &Context, args: &[ExprRef], input: &Json, action: &str) -> EvalResult<Vec<Vec<Json>>> {
    let mut pairs = keyed(ctx, args, input, action)?;
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let mut groups: Vec<(Json, Vec<Json>)> = Vec::new();
    for (key, item) in pairs {
        match groups.last_mut() {
            Some((last, group)) if *last == key => group.push(item),
            _ => groups.push((key, vec![item])),
        }
    }
    Ok(groups.into_iter().map(|(_, group)| group).collect())
}

fn sort(input: Json) -> EvalResult<Json> {
    let mut items = array_input(&input, "sorted")?.to_vec();
    items.sort();
    Ok(Json::array(items))
}

fn sort_by(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    from_result(grouped(ctx, args, &input, "sorted").map(|groups| Json::array(groups.concat())))
}

fn group_by(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    from_result(
        grouped(ctx, args, &input, "grouped").map(|groups| Json::array(groups.into_iter().map(Json::array).collect())),
    )
}

fn unique_by(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    from_result(grouped(ctx, args, &input, "deduplicated").map(|groups| {
        Json::array(groups.into_iter().filter_map(|group| group.into_iter().next()).collect())
    }))
}

fn min(input: Json) -> EvalResult<Json> {
    Ok(array_input(&input, "searched")?.iter().min().cloned().unwrap_or(Json::Null))
}

fn max(input: Json) -> EvalResult<Json> {
    Ok(array_input(&input, "searched")?.iter().max().cloned().unwrap_or(Json::Null))
}

fn min_by(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    from_result(keyed(ctx, args, &input, "searched").map(|pairs| {
        pairs
            .into_iter()
            .min_by(|a, b| a.0.cmp(&b.0))
            .map_or(Json::Null, |(_, item)| item)
    }))
}

fn max_by(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    from_result(keyed(ctx, args, &input, "searched").map(|pairs| {
        pairs
            .into_iter()
            .max_by(|a, b| a.0.cmp(&b.0))
            .map_or(Json::Null, |(_, item)| item)
    }))
}

// ── Strings ──────────────────────────────────────────────────────────────────

fn explode(input: Json) -> EvalResult<Json> {
    match &input {
        Json::String(s) => Ok(Json::array(s.chars().map(|c| Json::from(c as u32 as i64)).collect())),
        other => Err(type_error(format!("Can't explode {}.", other.json_type()), vec![other.clone()])),
    }
}

fn implode(input: Json) -> EvalResult<Json> {
    let items = match &input {
        Json::Array(items) => items,
        other => return Err(type_error(format!("Can't implode {}.", other.json_type()), vec![other.clone()])),
    };
    items
        .iter()
        .map(|item| match item {
            Json::Number(n) if *n >= 0.0 => char::from_u32(*n as u32)
                .ok_or_else(|| type_error("Invalid codepoint literal.".to_string(), vec![item.clone()])),
            other => Err(type_error("Invalid codepoint literal.".to_string(), vec![other.clone()])),
        })
        .collect::<EvalResult<String>>()
        .map(Json::from)
}

fn split_string(input: Json, separator: Json) -> EvalResult<Json> {
    match (&input, &separator) {
        (Json::String(text), Json::String(sep)) => {
            if text.is_empty() {
                return Ok(Json::array(Vec::new()));
            }
            let parts: Vec<Json> = if sep.is_empty() {
                text.chars().map(|c| Json::from(c.to_string())).collect()
            } else {
                text.split(&**sep).map(Json::from).collect()
            };
            Ok(Json::array(parts))
        }
        _ => Err(type_error(
            format!("Can't split {} by {}.", input.json_type(), separator.json_type()),
            vec![input.clone(), separator.clone()],
        )),
    }
}

fn ltrimstr(input: Json, prefix: Json) -> EvalResult<Json> {
    if let (Json::String(s), Json::String(p)) = (&input, &prefix) {
        if let Some(rest) = s.strip_prefix(&**p) {
            return Ok(Json::from(rest));
        }
    }
    Ok(input)
}

fn rtrimstr(input: Json, suffix: Json) -> EvalResult<Json> {
    if let (Json::String(s), Json::String(p)) = (&input, &suffix) {
        if let Some(rest) = s.strip_suffix(&**p) {
            return Ok(Json::from(rest));
        }
    }
    Ok(input)
}

fn string_pair<'a>(name: &str, input: &'a Json, other: &'a Json) -> EvalResult<(&'a str, &'a str)> {
    match (input, other) {
        (Json::String(a), Json::String(b)) => Ok((&**a, &**b)),
        _ => Err(type_error(
            format!("{} requires strings, not {} and {}.", name, input.json_type(), other.json_type()),
            vec![input.clone(), other.clone()],
        )),
    }
}

fn startswith(input: Json, prefix: Json) -> EvalResult<Json> {
    let (s, p) = string_pair("startswith", &input, &prefix)?;
    Ok(Json::Bool(s.starts_with(p)))
}

fn endswith(input: Json, suffix: Json) -> EvalResult<Json> {
    let (s, p) = string_pair("endswith", &input, &suffix)?;
    Ok(Json::Bool(s.ends_with(p)))
}

fn map_string(name: &str, input: Json, f: fn(&str) -> String) -> EvalResult<Json> {
    match &input {
        Json::String(s) => Ok(Json::from(f(s))),
        other => Err(type_error(
            format!("{} requires a string, not {}.", name, other.json_type()),
            vec![other.clone()],
        )),
    }
}

fn trim(input: Json) -> EvalResult<Json> {
    map_string("trim", input, |s| s.trim().to_string())
}

fn ltrim(input: Json) -> EvalResult<Json> {
    map_string("ltrim", input, |s| s.trim_start().to_string())
}

fn rtrim(input: Json) -> EvalResult<Json> {
    map_string("rtrim", input, |s| s.trim_end().to_string())
}

fn ascii_downcase(input: Json) -> EvalResult<Json> {
    map_string("ascii_downcase", input, str::to_ascii_lowercase)
}

fn ascii_upcase(input: Json) -> EvalResult<Json> {
    map_string("ascii_upcase", input, str::to_ascii_uppercase)
}

fn indices(input: Json, needle: Json) -> EvalResult<Json> {
    utils::indices(&input, &needle)
}

fn flatten(input: Json, depth: Json) -> EvalResult<Json> {
    let depth = match depth {
        Json::Number(d) if d >= 0.0 => d,
        Json::Number(_) => {
            return Err(type_error("Flatten depth must not be negative.".to_string(), vec![depth]))
        }
        other => {
            return Err(type_error(
                format!("Flatten depth must be a number, not {}.", other.json_type()),
                vec![other],
            ))
        }
    };
    let items = array_input(&input, "flattened")?;
    Ok(Json::array(utils::flatten(items, depth)))
}

// ── Paths ────────────────────────────────────────────────────────────────────

fn path_of(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    match args.first() {
        Some(f) => Box::new(eval_paths(f, ctx, JsonPath::new(), input).map(|r| r.map(|(p, _)| p.to_json()))),
        None => nothing(),
    }
}

fn getpath(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    let document = input.clone();
    bind(arg_stream(ctx, args, 0, input), move |p| {
        from_result(JsonPath::from_json(&p).and_then(|path| get_path(&document, path.parts())))
    })
}

fn getpath_paths(ctx: &Context, args: &[ExprRef], path: JsonPath, input: Json) -> PathStream {
    let document = input.clone();
    bind(arg_stream(ctx, args, 0, input), move |p| {
        from_result(JsonPath::from_json(&p).and_then(|suffix| {
            let value = get_path(&document, suffix.parts())?;
            Ok((path.concat(&suffix), value))
        }))
    })
}

fn setpath(input: Json, path: Json, value: Json) -> EvalResult<Json> {
    let path = JsonPath::from_json(&path)?;
    set_path(input, path.parts(), value)
}

fn delpaths(input: Json, paths: Json) -> EvalResult<Json> {
    let paths = match &paths {
        Json::Array(items) => items.iter().map(JsonPath::from_json).collect::<EvalResult<Vec<_>>>()?,
        other => {
            return Err(EvalError::path(
                "Paths must be specified as an array.".to_string(),
                vec![other.clone()],
            ))
        }
    };
    delete_paths(input, &paths)
}

// ── Iterative generators ─────────────────────────────────────────────────────
//
// Recursive generators run on an explicit stack of pending streams so deep or
// unbounded recursion never consumes native stack.

enum Step<T> {
    Emit(T),
    Visit(T),
}

struct Unfold<T: 'static> {
    stack: Vec<Stream<Step<T>>>,
    visit: Box<dyn FnMut(T) -> Stream<Step<T>>>,
    runtime: Rc<Runtime>,
}

impl<T: 'static> Unfold<T> {
    fn start<F>(root: T, runtime: Rc<Runtime>, visit: F) -> Stream<T>
    where
        F: FnMut(T) -> Stream<Step<T>> + 'static,
    {
        Box::new(Unfold {
            stack: vec![single(Step::Visit(root))],
            visit: Box::new(visit),
            runtime,
        })
    }
}

impl<T: 'static> Iterator for Unfold<T> {
    type Item = EvalResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let step = match self.stack.last_mut()?.next() {
                Some(step) => step,
                None => {
                    self.stack.pop();
                    continue;
                }
            };
            match step {
                Ok(Step::Emit(item)) => {
                    if let Err(e) = self.runtime.tick() {
                        self.stack.clear();
                        return Some(Err(e));
                    }
                    return Some(Ok(item));
                }
                Ok(Step::Visit(item)) => {
                    let next = (self.visit)(item);
                    self.stack.push(next);
                }
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}

fn emit_then<T: 'static>(item: T, rest: Stream<Step<T>>) -> Stream<Step<T>> {
    Box::new(iter::once(Ok(Step::Emit(item))).chain(rest))
}

fn visit_all<T: 'static>(items: Vec<T>) -> Stream<Step<T>> {
    Box::new(items.into_iter().map(|item| Ok(Step::Visit(item))))
}

fn children(value: &Json) -> Vec<Json> {
    match value {
        Json::Array(items) => items.to_vec(),
        Json::Object(map) => map.values().cloned().collect(),
        _ => Vec::new(),
    }
}

fn child_paths(path: &JsonPath, value: &Json) -> Vec<(JsonPath, Json)> {
    match value {
        Json::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (path.with(PathPart::Index(i as i64)), item.clone()))
            .collect(),
        Json::Object(map) => map
            .iter()
            .map(|(k, v)| (path.with(PathPart::Key(Rc::from(k.as_str()))), v.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

/// `recurse` / `..`: every value in pre-order.
fn recurse(ctx: &Context, _args: &[ExprRef], input: Json) -> ValueStream {
    Unfold::start(input, ctx.runtime.clone(), |value: Json| {
        let next = visit_all(children(&value));
        emit_then(value, next)
    })
}

fn recurse_paths(ctx: &Context, _args: &[ExprRef], path: JsonPath, input: Json) -> PathStream {
    Unfold::start((path, input), ctx.runtime.clone(), |(path, value): (JsonPath, Json)| {
        let next = visit_all(child_paths(&path, &value));
        emit_then((path, value), next)
    })
}

/// `recurse(f)` and `repeat(f)`: emit the input, then recurse into each
/// output of `f`.
fn recurse_with(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    let f = match args.first() {
        Some(f) => f.clone(),
        None => return nothing(),
    };
    let scope = ctx.clone();
    Unfold::start(input, ctx.runtime.clone(), move |value: Json| {
        let next: Stream<Step<Json>> = Box::new(eval(&f, &scope, value.clone()).map(|r| r.map(Step::Visit)));
        emit_then(value, next)
    })
}

fn recurse_with_paths(ctx: &Context, args: &[ExprRef], path: JsonPath, input: Json) -> PathStream {
    let f = match args.first() {
        Some(f) => f.clone(),
        None => return nothing(),
    };
    let scope = ctx.clone();
    Unfold::start((path, input), ctx.runtime.clone(), move |(path, value): (JsonPath, Json)| {
        let next: Stream<Step<(JsonPath, Json)>> =
            Box::new(eval_paths(&f, &scope, path.clone(), value.clone()).map(|r| r.map(Step::Visit)));
        emit_then((path, value), next)
    })
}

/// Keep `child` as a visit for every truthy output of `cond` on it.
fn visit_if(cond: &ExprRef, scope: &Context, child: Json) -> Stream<Step<Json>> {
    let visit = child.clone();
    Box::new(eval(cond, scope, child).filter_map(move |c| match c {
        Ok(c) if c.is_truthy() => Some(Ok(Step::Visit(visit.clone()))),
        Ok(_) => None,
        Err(e) => Some(Err(e)),
    }))
}

/// `recurse(f; cond)`: like `recurse(f)`, descending only into the outputs
/// of `f` that satisfy `cond`.
fn recurse_while(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    let (f, cond) = match args {
        [f, cond] => (f.clone(), cond.clone()),
        _ => return nothing(),
    };
    let scope = ctx.clone();
    Unfold::start(input, ctx.runtime.clone(), move |value: Json| {
        let (cond, scope_cond) = (cond.clone(), scope.clone());
        let next = bind(eval(&f, &scope, value.clone()), move |child| visit_if(&cond, &scope_cond, child));
        emit_then(value, next)
    })
}

fn recurse_while_paths(ctx: &Context, args: &[ExprRef], path: JsonPath, input: Json) -> PathStream {
    let (f, cond) = match args {
        [f, cond] => (f.clone(), cond.clone()),
        _ => return nothing(),
    };
    let scope = ctx.clone();
    Unfold::start((path, input), ctx.runtime.clone(), move |(path, value): (JsonPath, Json)| {
        let (cond, scope_cond) = (cond.clone(), scope.clone());
        let next = bind(eval_paths(&f, &scope, path.clone(), value.clone()), move |(child_path, child)| {
            let held = child_path;
            let visits = visit_if(&cond, &scope_cond, child);
            Box::new(visits.map(move |step| {
                step.map(|step| match step {
                    Step::Visit(v) | Step::Emit(v) => Step::Visit((held.clone(), v)),
                })
            })) as Stream<Step<(JsonPath, Json)>>
        });
        emit_then((path, value), next)
    })
}

/// `while(cond; update)`: emit while `cond` holds, feeding each output of
/// `update` back in.
fn while_loop(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    let (cond, update) = match args {
        [cond, update] => (cond.clone(), update.clone()),
        _ => return nothing(),
    };
    let scope = ctx.clone();
    Unfold::start(input, ctx.runtime.clone(), move |value: Json| {
        let (update, scope_update) = (update.clone(), scope.clone());
        bind(eval(&cond, &scope, value.clone()), move |c| {
            if !c.is_truthy() {
                return nothing();
            }
            let next: Stream<Step<Json>> =
                Box::new(eval(&update, &scope_update, value.clone()).map(|r| r.map(Step::Visit)));
            emit_then(value.clone(), next)
        })
    })
}

/// `until(cond; update)`: apply `update` until `cond` holds, emitting only
/// the values that satisfy it.
fn until_loop(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    let (cond, update) = match args {
        [cond, update] => (cond.clone(), update.clone()),
        _ => return nothing(),
    };
    let scope = ctx.clone();
    Unfold::start(input, ctx.runtime.clone(), move |value: Json| {
        let (update, scope_update) = (update.clone(), scope.clone());
        bind(eval(&cond, &scope, value.clone()), move |c| {
            if c.is_truthy() {
                return single(Step::Emit(value.clone()));
            }
            let next: Stream<Step<Json>> =
                Box::new(eval(&update, &scope_update, value.clone()).map(|r| r.map(Step::Visit)));
            next
        })
    })
}

/// `range(upto)`, `range(from; upto)`, `range(from; upto; by)`.
fn range(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    let runtime = ctx.runtime.clone();
    bind(cartesian(ctx, args, &input), move |bounds| {
        let numbers = bounds
            .iter()
            .map(|b| {
                b.as_f64()
                    .ok_or_else(|| type_error(format!("Range bounds must be numbers, not {}.", b.json_type()), vec![b.clone()]))
            })
            .collect::<EvalResult<Vec<f64>>>();
        let (from, upto, by) = match numbers.as_deref() {
            Ok([upto]) => (0.0, *upto, 1.0),
            Ok([from, upto]) => (*from, *upto, 1.0),
            Ok([from, upto, by]) => (*from, *upto, *by),
            Ok(_) => return nothing(),
            Err(e) => return failure(e.clone()),
        };
        let runtime = runtime.clone();
        Box::new(
            iter::successors(Some(from), move |x| Some(x + by))
                .take_while(move |x| if by > 0.0 { *x < upto } else { by < 0.0 && *x > upto })
                .map(move |x| runtime.tick().map(|_| Json::Number(x))),
        )
    })
}

// ── Inputs and diagnostics ───────────────────────────────────────────────────

fn input(ctx: &Context, _args: &[ExprRef], _input: Json) -> ValueStream {
    match ctx.runtime.next_input() {
        Some(value) => single(value),
        None => failure(EvalError::user(Json::from("No more inputs"))),
    }
}

fn inputs(ctx: &Context, _args: &[ExprRef], _input: Json) -> ValueStream {
    let runtime = ctx.runtime.clone();
    Box::new(iter::from_fn(move || runtime.next_input().map(Ok)))
}

fn debug0(ctx: &Context, _args: &[ExprRef], input: Json) -> ValueStream {
    ctx.runtime.emit(input.clone());
    single(input)
}

fn debug1(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    let runtime = ctx.runtime.clone();
    let messages = arg_stream(ctx, args, 0, input.clone());
    Box::new(iter::once_with(move || {
        for message in messages {
            runtime.emit(message?);
        }
        Ok(input)
    }))
}

fn builtins(ctx: &Context, _args: &[ExprRef], _input: Json) -> ValueStream {
    let mut names: Vec<String> = ctx
        .env
        .function_signatures()
        .into_iter()
        .chain(signatures().map(|(n, a)| (n.to_string(), a)))
        .filter(|(name, _)| !name.starts_with('_'))
        .map(|(name, arity)| format!("{}/{}", name, arity))
        .collect();
    names.sort();
    names.dedup();
    single(Json::array(names.into_iter().map(Json::from).collect()))
}
