// Regular expression builtins
// Flag strings are interpreted with jq's semantics and
// compiled onto the regex crate; offsets reported to programs count chars.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use regex::{Captures, Regex, RegexBuilder};

use crate::ast::ExprRef;
use crate::context::Context;
use crate::error::{EvalError, EvalResult};
use crate::evaluator::{bind, cartesian, eval, failure, nothing, single, Stream, ValueStream};
use crate::utils::char_offset;
use crate::value::Json;

const CACHE_LIMIT: usize = 64;

thread_local! {
    static CACHE: RefCell<HashMap<(String, String), Regex>> = RefCell::new(HashMap::new());
}

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    global: bool,
    skip_empty: bool,
}

fn parse_flags(flags: &str, builder: &mut RegexBuilder) -> EvalResult<Flags> {
    let mut parsed = Flags::default();
    builder.multi_line(true);
    for flag in flags.chars() {
        match flag {
            'g' => parsed.global = true,
            'n' => parsed.skip_empty = true,
            'i' => {
                builder.case_insensitive(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            's' => {
                builder.multi_line(false);
            }
            'm' => {
                builder.dot_matches_new_line(true);
            }
            'p' => {
                builder.multi_line(false).dot_matches_new_line(true);
            }
            'l' => {}
            _ => {
                return Err(EvalError::type_error(
                    format!("{} is not a valid modifier string.", flags),
                    vec![Json::from(flags)],
                ))
            }
        }
    }
    Ok(parsed)
}

fn compile(pattern: &str, flags: &str) -> EvalResult<(Regex, Flags)> {
    let mut builder = RegexBuilder::new(pattern);
    let parsed = parse_flags(flags, &mut builder)?;
    let key = (pattern.to_string(), flags.to_string());
    if let Some(re) = CACHE.with(|cache| cache.borrow().get(&key).cloned()) {
        return Ok((re, parsed));
    }
    let re = builder.build().map_err(|e| {
        EvalError::type_error(
            format!("{} (at offset 0) is not a valid regex: {}", pattern, e),
            vec![Json::from(pattern)],
        )
    })?;
    CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(key, re.clone());
    });
    Ok((re, parsed))
}

/// Check the operand types and compile. A null flag string means no flags.
fn prepare(input: &Json, pattern: &Json, flags: &Json) -> EvalResult<(Rc<str>, Regex, Flags)> {
    let text = match input {
        Json::String(s) => s.clone(),
        other => {
            return Err(EvalError::type_error(
                format!("{} cannot be matched, as it is not a string.", other.json_type()),
                vec![other.clone()],
            ))
        }
    };
    let pattern = match pattern {
        Json::String(p) => p,
        other => {
            return Err(EvalError::type_error(
                format!("{} is not a string.", other),
                vec![other.clone()],
            ))
        }
    };
    let flags = match flags {
        Json::Null => "",
        Json::String(f) => f,
        other => {
            return Err(EvalError::type_error(
                format!("{} is not a string.", other),
                vec![other.clone()],
            ))
        }
    };
    let (re, parsed) = compile(pattern, flags)?;
    Ok((text, re, parsed))
}

fn capture_json(text: &str, group: Option<regex::Match<'_>>, name: Option<&str>) -> Json {
    let mut object = IndexMap::new();
    match group {
        Some(m) => {
            object.insert("offset".to_string(), Json::from(char_offset(text, m.start())));
            object.insert("length".to_string(), Json::from(m.as_str().chars().count()));
            object.insert("string".to_string(), Json::from(m.as_str()));
        }
        None => {
            object.insert("offset".to_string(), Json::from(-1i64));
            object.insert("length".to_string(), Json::from(0i64));
            object.insert("string".to_string(), Json::Null);
        }
    }
    object.insert("name".to_string(), name.map_or(Json::Null, Json::from));
    Json::object(object)
}

fn match_json(text: &str, caps: &Captures<'_>, names: &[Option<&str>]) -> Json {
    let mut object = IndexMap::new();
    if let Some(whole) = caps.get(0) {
        object.insert("offset".to_string(), Json::from(char_offset(text, whole.start())));
        object.insert("length".to_string(), Json::from(whole.as_str().chars().count()));
        object.insert("string".to_string(), Json::from(whole.as_str()));
    }
    let captures = (1..caps.len())
        .map(|i| capture_json(text, caps.get(i), names.get(i).copied().flatten()))
        .collect();
    object.insert("captures".to_string(), Json::array(captures));
    Json::object(object)
}

/// The object a replacement expression sees: named groups to their text.
fn named_captures(caps: &Captures<'_>, names: &[Option<&str>]) -> Json {
    let mut object = IndexMap::new();
    for (i, name) in names.iter().enumerate() {
        if let Some(name) = name {
            let value = caps.get(i).map_or(Json::Null, |m| Json::from(m.as_str()));
            object.insert(name.to_string(), value);
        }
    }
    Json::object(object)
}

/// Every match to report, honoring the global and skip-empty flags.
fn find<'t>(re: &Regex, flags: Flags, text: &'t str) -> Vec<Captures<'t>> {
    let found = re
        .captures_iter(text)
        .filter(|caps| !(flags.skip_empty && caps.get(0).map_or(true, |m| m.as_str().is_empty())));
    if flags.global {
        found.collect()
    } else {
        found.take(1).collect()
    }
}

fn value_at(values: &[Json], index: usize) -> Json {
    values.get(index).cloned().unwrap_or(Json::Null)
}

/// `test(re; flags)`
pub(crate) fn test(input: Json, pattern: Json, flags: Json) -> EvalResult<Json> {
    let (text, re, _) = prepare(&input, &pattern, &flags)?;
    Ok(Json::Bool(re.is_match(&text)))
}

/// `match(re; flags)`: one match object per match.
pub(crate) fn matches(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    bind(cartesian(ctx, args, &input), move |values| {
        match prepare(&input, &value_at(&values, 0), &value_at(&values, 1)) {
            Ok((text, re, flags)) => {
                let names: Vec<Option<&str>> = re.capture_names().collect();
                let found: Vec<Json> = find(&re, flags, &text)
                    .iter()
                    .map(|caps| match_json(&text, caps, &names))
                    .collect();
                Box::new(found.into_iter().map(Ok))
            }
            Err(e) => failure(e),
        }
    })
}

/// `split(re; flags)`: the pieces between every match.
pub(crate) fn split(input: Json, pattern: Json, flags: Json) -> EvalResult<Json> {
    let (text, re, flags) = prepare(&input, &pattern, &flags)?;
    let mut pieces = Vec::new();
    let mut last = 0;
    for m in re.find_iter(&text) {
        if flags.skip_empty && m.as_str().is_empty() {
            continue;
        }
        pieces.push(Json::from(&text[last..m.start()]));
        last = m.end();
    }
    pieces.push(Json::from(&text[last..]));
    Ok(Json::array(pieces))
}

struct Edit {
    start: usize,
    end: usize,
    captures: Json,
}

/// `sub(re; replacement; flags)`: the replacement is evaluated once per
/// match against that match's named captures; several outputs multiply the
/// results, earlier matches outermost.
pub(crate) fn sub(ctx: &Context, args: &[ExprRef], input: Json) -> ValueStream {
    let (pattern, replacement, flags) = match args {
        [pattern, replacement, flags] => (pattern.clone(), replacement.clone(), flags.clone()),
        _ => return nothing(),
    };
    let scope = ctx.clone();
    bind(cartesian(ctx, &[pattern, flags], &input), move |values| {
        match prepare(&input, &value_at(&values, 0), &value_at(&values, 1)) {
            Ok((text, re, flags)) => {
                let names: Vec<Option<&str>> = re.capture_names().collect();
                let edits = find(&re, flags, &text)
                    .iter()
                    .filter_map(|caps| {
                        caps.get(0).map(|whole| Edit {
                            start: whole.start(),
                            end: whole.end(),
                            captures: named_captures(caps, &names),
                        })
                    })
                    .collect();
                substitute(&scope, &replacement, text.clone(), edits)
            }
            Err(e) => failure(e),
        }
    })
}

fn substitute(ctx: &Context, replacement: &ExprRef, text: Rc<str>, edits: Vec<Edit>) -> ValueStream {
    let mut stream: Stream<String> = single(String::new());
    let mut last = 0;
    for edit in edits {
        let gap = text[last..edit.start].to_string();
        last = edit.end;
        let (ctx, replacement) = (ctx.clone(), replacement.clone());
        stream = bind(stream, move |prefix| {
            let prefix = format!("{}{}", prefix, gap);
            Box::new(eval(&replacement, &ctx, edit.captures.clone()).map(move |r| {
                r.and_then(|r| match r {
                    Json::String(s) => Ok(format!("{}{}", prefix, s)),
                    other => Err(EvalError::type_error(
                        format!("{} cannot be added to a string.", other.json_type()),
                        vec![other],
                    )),
                })
            }))
        });
    }
    let tail = text[last..].to_string();
    Box::new(stream.map(move |r| r.map(|s| Json::from(format!("{}{}", s, tail)))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Env, Runtime};
    use crate::json_value;
    use crate::parser::parse;

    fn values(program: &str, input: Json) -> EvalResult<Vec<Json>> {
        let (expr, _) = parse(program).unwrap();
        let runtime = Rc::new(Runtime::new(0, 64, Box::new(std::iter::empty())));
        let ctx = Context::new(runtime, Env::new());
        eval(&expr, &ctx, input).collect()
    }

    #[test]
    fn test_test_flags() {
        assert_eq!(values(r#"test("A"; null)"#, json_value!("abc")).unwrap(), vec![json_value!(false)]);
        assert_eq!(values(r#"test("A"; "i")"#, json_value!("abc")).unwrap(), vec![json_value!(true)]);
        assert_eq!(
            values(r#"test("a.c"; "m")"#, json_value!("a\nc")).unwrap(),
            vec![json_value!(true)]
        );
        let err = values(r#"test("a"; "q")"#, json_value!("a")).unwrap_err();
        assert_eq!(err.to_string(), "q is not a valid modifier string.");
    }

    #[test]
    fn test_match_objects() {
        let out = values(r#"match("(?<x>b)(c)?"; null)"#, json_value!("aéb")).unwrap();
        assert_eq!(
            out,
            vec![json_value!({
                "offset": 2,
                "length": 1,
                "string": "b",
                "captures": [
                    {"offset": 2, "length": 1, "string": "b", "name": "x"},
                    {"offset": (-1), "length": 0, "string": null, "name": null}
                ]
            })]
        );
    }

    #[test]
    fn test_global_match() {
        let out = values(r#"[match("a"; "g") | .offset]"#, json_value!("banana")).unwrap();
        assert_eq!(out, vec![json_value!([1, 3, 5])]);
        let out = values(r#"[match("x*"; "gn")]"#, json_value!("ab")).unwrap();
        assert_eq!(out, vec![json_value!([])]);
    }

    #[test]
    fn test_split_by_regex() {
        let out = values(r#"split(", *"; null)"#, json_value!("a, b,c")).unwrap();
        assert_eq!(out, vec![json_value!(["a", "b", "c"])]);
    }

    #[test]
    fn test_sub_with_captures() {
        let out = values(r#"sub("(?<l>[a-z]+)"; "<\(.l)>"; "g")"#, json_value!("ab 12 cd")).unwrap();
        assert_eq!(out, vec![json_value!("<ab> 12 <cd>")]);
        let out = values(r#"[sub("a"; "x", "y"; null)]"#, json_value!("aa")).unwrap();
        assert_eq!(out, vec![json_value!(["xa", "ya"])]);
        let out = values(r#"[sub("a"; "1", "2"; "g")]"#, json_value!("aa")).unwrap();
        assert_eq!(out, vec![json_value!(["11", "12", "21", "22"])]);
    }

    #[test]
    fn test_non_string_input() {
        let err = values(r#"test("a"; null)"#, json_value!(1)).unwrap_err();
        assert_eq!(err.to_string(), "Number cannot be matched, as it is not a string.");
    }
}
