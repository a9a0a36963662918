// Integration tests for the compile + evaluate pipeline
//
// These tests drive complete programs through the public API, the same way
// an embedding application would.

use jqcore::ast::ExprKind;
use jqcore::parser::parse;
use jqcore::{compile, evaluate, outputs, ErrorKind, Json, Options};
use serde_json::json;

fn data(value: serde_json::Value) -> Json {
    Json::from(value)
}

fn run(program: &str, input: serde_json::Value) -> Vec<Json> {
    jqcore::run(program, data(input)).unwrap()
}

fn run_one(program: &str, input: serde_json::Value) -> Json {
    let mut results = run(program, input);
    assert_eq!(results.len(), 1, "expected exactly one output from {}", program);
    results.remove(0)
}

fn fail(program: &str, input: serde_json::Value) -> jqcore::Error {
    jqcore::run(program, data(input)).unwrap_err()
}

// ── Basic scenarios ──────────────────────────────────────────────────────────

#[test]
fn test_increment() {
    assert_eq!(run(". + 1", json!(1)), vec![data(json!(2))]);
}

#[test]
fn test_nested_update() {
    assert_eq!(
        run(".[][] |= . + 2", json!([[1, 2], [3, 4]])),
        vec![data(json!([[3, 4], [5, 6]]))]
    );
}

#[test]
fn test_type_error_position() {
    let err = fail("1 + [1, 2]", json!(null));
    assert_eq!(err.kind, ErrorKind::Type);
    assert_eq!(err.message, "Can't add Number and Array.");
    assert_eq!(err.line, 1);
    assert_eq!(err.column, 1);
}

#[test]
fn test_object_construction_parse() {
    let (root, source) = parse("{a:1, b: {c: 2}, d: 3}").unwrap();
    match &root.kind {
        ExprKind::ConstructObject(entries) => {
            assert_eq!(entries.len(), 3);
            assert!(matches!(&entries[1].1.kind, ExprKind::ConstructObject(inner) if inner.len() == 1));
        }
        other => panic!("expected an object construction, got {:?}", other),
    }
    assert!(source.span(root.id).is_some());
    assert_eq!(
        run_one("{a:1, b: {c: 2}, d: 3}", json!(null)),
        data(json!({"a": 1, "b": {"c": 2}, "d": 3}))
    );
}

#[test]
fn test_precedence_across_levels() {
    assert_eq!(run(". + 1 as $x | $x * 10", json!(2)), vec![data(json!(30))]);
    assert_eq!(run(". or false as $x | $x", json!(false)), vec![data(json!(false))]);
    assert_eq!(run("1, 2 as $x | $x", json!(null)), vec![data(json!(1)), data(json!(2))]);
    assert_eq!(run_one("1 + 2 * 3", json!(null)), data(json!(7)));
    assert_eq!(run_one("1 // 2 * 3", json!(null)), data(json!(3)));
    assert_eq!(run_one("1 < 2 and 3 > 4 or true", json!(null)), data(json!(true)));
    assert_eq!(run_one(".a = 1 as $x | $x + 1", json!({})), data(json!({"a": 2})));
}

#[test]
fn test_keys_of_number() {
    let err = fail("keys", json!(100));
    assert_eq!(err.message, "Number has no keys.");
}

#[test]
fn test_empty_program_is_identity() {
    assert_eq!(run("", json!({"a": 1})), vec![data(json!({"a": 1}))]);
    assert_eq!(run("   ", json!(3)), vec![data(json!(3))]);
}

#[test]
fn test_lex_and_parse_errors() {
    let err = compile("\"abc").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Lex);
    assert!(err.rendering.contains('^'));

    let err = compile("[1, 2").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Parse);
    assert!(err.message.contains("reached end of input"));
}

// ── Resource limits ──────────────────────────────────────────────────────────

#[test]
fn test_tick_limit() {
    let program = compile("[range(1000)] | length").unwrap();
    let limited = Options {
        tick_limit: 100,
        ..Options::default()
    };
    let err = program.evaluate(Json::Null, &limited).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResourceExhaustion);
    assert_eq!(err.message, "Failed to complete in 100 ticks.");

    let result = program.evaluate(Json::Null, &Options::default()).unwrap();
    assert_eq!(result.outputs, vec![data(json!(1000))]);
}

#[test]
fn test_tick_limit_cannot_be_caught() {
    let program = compile("try ([range(1000)] | length) catch \"caught\"").unwrap();
    let limited = Options {
        tick_limit: 50,
        ..Options::default()
    };
    assert!(program.evaluate(Json::Null, &limited).is_err());
}

#[test]
fn test_depth_limit() {
    let program = compile("def f: 1 + f; f").unwrap();
    let options = Options {
        max_depth: 32,
        ..Options::default()
    };
    let err = program.evaluate(Json::Null, &options).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResourceExhaustion);
}

#[test]
fn test_deep_recursion_within_default_limit() {
    assert_eq!(
        run_one("def f: if . < 1000 then . + 1 | f else . end; f", json!(0)),
        data(json!(1000))
    );
    assert_eq!(
        run_one("def count: if . == 0 then 0 else 1 + (. - 1 | count) end; count", json!(300)),
        data(json!(300))
    );
    assert_eq!(run_one("[recurse(. + 1; . < 300)] | length", json!(0)), data(json!(300)));
}

#[test]
fn test_size_limits() {
    let err = fail(r#""abc" * 1e300"#, json!(null));
    assert_eq!(err.kind, ErrorKind::Type);
    assert_eq!(err.message, "Repeat string result too long.");

    let err = fail(".[1e18] = 1", json!([]));
    assert_eq!(err.kind, ErrorKind::Path);
    assert_eq!(err.message, "Array index too large.");

    assert_eq!(run_one(".[3] = 1", json!([])), data(json!([null, null, null, 1])));
}

// ── Paths and assignment ─────────────────────────────────────────────────────

#[test]
fn test_delpaths_deletes_in_descending_order() {
    assert_eq!(run_one("delpaths([[0], [2]])", json!([1, 2, 3, 4])), data(json!([2, 4])));
    assert_eq!(run_one("del(.[0, 2])", json!([1, 2, 3, 4])), data(json!([2, 4])));
    assert_eq!(run_one("del(.a)", json!({"a": 1, "b": 2})), data(json!({"b": 2})));
}

#[test]
fn test_setpath_getpath() {
    let set = run_one(r#"setpath(["a", "b"]; 5)"#, json!(null));
    assert_eq!(set, data(json!({"a": {"b": 5}})));
    assert_eq!(
        run_one(r#"setpath(["a", "b"]; 5) | getpath(["a", "b"])"#, json!(null)),
        data(json!(5))
    );
    assert_eq!(run_one(r#"getpath(["x", 0])"#, json!({})), data(json!(null)));
}

#[test]
fn test_assignment_operators() {
    assert_eq!(run_one(".a = .b", json!({"a": 1, "b": 2})), data(json!({"a": 2, "b": 2})));
    assert_eq!(run_one(".a += 10", json!({"a": 1})), data(json!({"a": 11})));
    assert_eq!(run_one(".[] |= . * 2", json!([1, 2, 3])), data(json!([2, 4, 6])));
    assert_eq!(run_one(".a // .b |= 7", json!({"b": 1})), data(json!({"b": 7})));
}

#[test]
fn test_path_expressions() {
    assert_eq!(
        run("path(..)", json!({"a": [1]})),
        vec![data(json!([])), data(json!(["a"])), data(json!(["a", 0]))]
    );
    assert_eq!(run_one("[paths]", json!({"a": [1]})), data(json!([["a"], ["a", 0]])));

    let err = fail("path(1 + 1)", json!(null));
    assert_eq!(err.kind, ErrorKind::Path);
    assert_eq!(err.message, "Not a path expression.");
}

// ── Composition and control flow ─────────────────────────────────────────────

#[test]
fn test_compose_is_associative() {
    let input = json!({"a": {"b": {"c": 42}}});
    assert_eq!(run("(.a | .b) | .c", input.clone()), run(".a | (.b | .c)", input));
}

#[test]
fn test_generators_and_limit() {
    assert_eq!(
        run_one("[limit(5; 1 | repeat(. * 2))]", json!(null)),
        data(json!([1, 2, 4, 8, 16]))
    );
    assert_eq!(run_one("first(range(10; 20))", json!(null)), data(json!(10)));
    assert_eq!(run_one("[.[] | select(. > 1)]", json!([1, 2, 3])), data(json!([2, 3])));
}

#[test]
fn test_reduce_and_foreach() {
    assert_eq!(run_one("reduce .[] as $x (0; . + $x)", json!([1, 2, 3])), data(json!(6)));
    assert_eq!(
        run_one("[foreach .[] as $x (0; . + $x)]", json!([1, 2, 3])),
        data(json!([1, 3, 6]))
    );
    assert_eq!(
        run_one("[foreach .[] as $x (0; . + $x; [$x, .])]", json!([1, 2])),
        data(json!([[1, 1], [2, 3]]))
    );
}

#[test]
fn test_label_and_break() {
    assert_eq!(
        run_one("[label $f | range(10) | ., (select(. == 2) | break $f)]", json!(null)),
        data(json!([0, 1, 2]))
    );
}

#[test]
fn test_try_catch_and_optional() {
    assert_eq!(run_one(r#"try error("x") catch ."#, json!(null)), data(json!("x")));
    assert_eq!(run_one(r#"[try (1, error("x")) catch .]"#, json!(null)), data(json!(["x"])));
    assert_eq!(
        run_one("[try error({a: 1}) catch .]", json!(null)),
        data(json!([r#"{"a":1} (not a string)"#]))
    );
    assert_eq!(run(".a?", json!(5)), Vec::<Json>::new());
    assert_eq!(run_one("[.[] | tonumber?]", json!(["1", "x", "3"])), data(json!([1, 3])));
    assert_eq!(run_one(".a // 5", json!({})), data(json!(5)));
}

#[test]
fn test_user_error() {
    let err = fail(r#"error("boom")"#, json!(null));
    assert_eq!(err.kind, ErrorKind::User);
    assert_eq!(err.message, "boom");
    assert_eq!(err.values, vec![data(json!("boom"))]);
}

#[test]
fn test_destructuring() {
    assert_eq!(
        run_one(". as [$a, {b: $c}] | $a + $c", json!([1, {"b": 2}])),
        data(json!(3))
    );
}

#[test]
fn test_function_definitions() {
    assert_eq!(run_one("def inc(f): f + 1; inc(.a)", json!({"a": 1})), data(json!(2)));
    assert_eq!(run_one("def add3($x): . + $x + 3; add3(1)", json!(1)), data(json!(5)));
    assert_eq!(
        run_one("def fac: if . <= 1 then 1 else . * (. - 1 | fac) end; fac", json!(5)),
        data(json!(120))
    );

    let err = fail("nosuch(1)", json!(null));
    assert_eq!(err.kind, ErrorKind::Lookup);
    assert_eq!(err.message, "nosuch/1 is not defined.");
}

// ── Values and ordering ──────────────────────────────────────────────────────

#[test]
fn test_mixed_sort() {
    assert_eq!(
        run_one("sort", json!([3, [], "4", {}, true, false, null])),
        data(json!([null, false, true, 3, "4", [], {}]))
    );
}

#[test]
fn test_strings_and_formats() {
    assert_eq!(run_one(r#""x\(1 + 2)y""#, json!(null)), data(json!("x3y")));
    assert_eq!(run_one("@csv", json!([1, "a"])), data(json!("1,\"a\"")));
    assert_eq!(run_one("@base64", json!("hello")), data(json!("aGVsbG8=")));
    assert_eq!(run_one(r#"join(",")"#, json!(["a", "b"])), data(json!("a,b")));
}

// ── Standard library ─────────────────────────────────────────────────────────

#[test]
fn test_stdlib_functions() {
    assert_eq!(run_one("map(. * 10)", json!([1, 2])), data(json!([10, 20])));
    assert_eq!(
        run_one("to_entries", json!({"a": 1})),
        data(json!([{"key": "a", "value": 1}]))
    );
    assert_eq!(
        run_one("with_entries(.value += 1)", json!({"a": 1, "b": 2})),
        data(json!({"a": 2, "b": 3}))
    );
    assert_eq!(run_one(r#"gsub("a"; "x")"#, json!("abab")), data(json!("xbxb")));
    assert_eq!(run_one("any(. > 1)", json!([1, 2])), data(json!(true)));
    assert_eq!(run_one("all(. > 1)", json!([1, 2])), data(json!(false)));
    assert_eq!(run_one("[.[] | numbers]", json!([1, "a", null, 2])), data(json!([1, 2])));
    assert_eq!(run_one("unique", json!([3, 1, 3, 2])), data(json!([1, 2, 3])));
    assert_eq!(run_one("reverse", json!([1, 2, 3])), data(json!([3, 2, 1])));
    assert_eq!(run_one("add", json!([1, 2, 3])), data(json!(6)));
}

#[test]
fn test_environment() {
    assert_eq!(run_one("$ENV | type", json!(null)), data(json!("object")));
    assert_eq!(run_one("env | type", json!(null)), data(json!("object")));
}

// ── Inputs, variables and the log ────────────────────────────────────────────

#[test]
fn test_named_variables() {
    let mut options = Options::default();
    options.variables.insert("limit".to_string(), data(json!(2)));
    let program = compile("[.[] | select(. > $limit)]").unwrap();
    let result = program.evaluate(data(json!([1, 2, 3, 4])), &options).unwrap();
    assert_eq!(result.outputs, vec![data(json!([3, 4]))]);

    let err = compile("$missing").unwrap().evaluate(Json::Null, &Options::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Lookup);
}

#[test]
fn test_inputs_consume_the_remaining_sequence() {
    let program = compile("[., inputs]").unwrap();
    let inputs = vec![data(json!(1)), data(json!(2)), data(json!(3))];
    let result = evaluate(&program, inputs, &Options::default()).unwrap();
    assert_eq!(result.outputs, vec![data(json!([1, 2, 3]))]);
}

#[test]
fn test_each_input_is_evaluated() {
    let program = compile(". * 2").unwrap();
    let inputs = vec![data(json!(1)), data(json!(2))];
    let results: Vec<Json> = outputs(&program, inputs, &Options::default())
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(results, vec![data(json!(2)), data(json!(4))]);
}

#[test]
fn test_debug_log() {
    let program = compile(r#"debug | . + 1 | debug("after")"#).unwrap();
    let result = program.evaluate(data(json!(1)), &Options::default()).unwrap();
    assert_eq!(result.outputs, vec![data(json!(2))]);
    assert_eq!(result.log.len(), 2);
    assert_eq!(result.log[0], data(json!(1)));
}
