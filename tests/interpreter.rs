use calla::{
    value::ValueKind, CallaError, Exception, LanguageConfig, Session, Value,
};

fn eval(source: &str) -> Value {
    eval_with(source, LanguageConfig::default())
}

fn eval_with(source: &str, config: LanguageConfig) -> Value {
    let mut session = Session::from_source(source, config).expect("program should load");
    session.run().expect("program should run")
}

fn eval_error(source: &str) -> CallaError {
    let mut session =
        Session::from_source(source, LanguageConfig::default()).expect("program should load");
    session.run().expect_err("program should fail")
}

fn eval_error_unchecked(source: &str) -> Exception {
    let config = LanguageConfig::from_toml("type-block-policy = false").expect("config");
    let mut session = Session::from_source(source, config).expect("program should load");
    match session.run().expect_err("program should fail") {
        CallaError::Uncaught(exc) => exc,
        other => panic!("expected an uncaught exception, got {other}"),
    }
}

fn expect_int(value: &Value) -> i64 {
    match &*value.0 {
        ValueKind::Int(n) => *n,
        other => panic!("expected int, got {other:?}", other = value_name(other)),
    }
}

fn expect_str(value: &Value) -> String {
    match &*value.0 {
        ValueKind::Str(s) => s.clone(),
        other => panic!("expected string, got {other:?}", other = value_name(other)),
    }
}

fn value_name(kind: &ValueKind) -> &'static str {
    match kind {
        ValueKind::Null => "null",
        ValueKind::Bool(_) => "bool",
        ValueKind::Int(_) => "int",
        ValueKind::Float(_) => "float",
        ValueKind::Str(_) => "string",
        _ => "other",
    }
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(expect_int(&eval("1 + 2 * 3")), 7);
    assert_eq!(expect_int(&eval("(1 + 2) * 3")), 9);
    assert_eq!(expect_int(&eval("10 % 4 + 7 / 2")), 5);
}

#[test]
fn extreme_integer_division_wraps() {
    // i64::MIN divided by -1 overflows; it wraps like the other int ops.
    let quotient = eval("var x = 0 - 9223372036854775807 - 1; x / (0 - 1)");
    assert_eq!(expect_int(&quotient), i64::MIN);
    let remainder = eval("var x = 0 - 9223372036854775807 - 1; x % (0 - 1)");
    assert_eq!(expect_int(&remainder), 0);
}

#[test]
fn variables_and_assignment() {
    let value = eval("var x = 2; x = x + 3; x");
    assert_eq!(expect_int(&value), 5);
}

#[test]
fn string_concat_and_methods() {
    let value = eval(r#""Hello World".lower().split(" ").join("-")"#);
    assert_eq!(expect_str(&value), "hello-world");
}

#[test]
fn functions_and_returns() {
    let value = eval(
        r#"
        intent add(a: int, b: int): int {
            return a + b
        }
        add(40, 2)
        "#,
    );
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn default_parameter_evaluates_in_caller_scope_at_call_time() {
    let value = eval(
        r#"
        var base: int = 10
        intent bump(x: int, y: int = base): int {
            return x + y
        }
        base = 32
        bump(5)
        "#,
    );
    assert_eq!(expect_int(&value), 37);
}

#[test]
fn omitted_default_equivalent_to_explicit() {
    let value = eval(
        r#"
        intent scale(x: int, factor: int = 10): int {
            return x * factor
        }
        scale(5) - scale(5, 10)
        "#,
    );
    assert_eq!(expect_int(&value), 0);
}

#[test]
fn closures_capture_environment() {
    let value = eval(
        r#"
        intent make_counter() {
            var count = 0
            return fn () {
                count = count + 1
                return count
            }
        }
        var tick = make_counter()
        tick()
        tick()
        tick()
        "#,
    );
    assert_eq!(expect_int(&value), 3);
}

#[test]
fn classes_with_inheritance_and_constructor() {
    let value = eval(
        r#"
        class Shape {
            var name: string = "shape"

            intent describe(): string {
                return this.name
            }
        }

        class Square extends Shape {
            var side: int = 1

            intent constructor(side: int) {
                this.side = side
                this.name = "square"
            }

            intent area(): int {
                return this.side * this.side
            }
        }

        var s: Square = new Square(4)
        s.describe() + ":" + "area"
        s.area()
        "#,
    );
    assert_eq!(expect_int(&value), 16);
}

#[test]
fn await_resumes_in_await_order_not_declaration_order() {
    let value = eval(
        r#"
        var log: List<string> = new List<string>()

        async intent first() {
            log.push("first")
        }

        async intent second() {
            log.push("second")
        }

        var ta = first()
        var tb = second()
        await tb
        await ta
        log.join(",")
        "#,
    );
    assert_eq!(expect_str(&value), "second,first");
}

#[test]
fn calling_async_function_does_not_start_it() {
    let value = eval(
        r#"
        var log: List<string> = new List<string>()

        async intent task() {
            log.push("ran")
        }

        task()
        log.len()
        "#,
    );
    assert_eq!(expect_int(&value), 0);
}

#[test]
fn awaited_task_result_is_memoized() {
    let value = eval(
        r#"
        async intent answer(): int {
            return 42
        }
        var t = answer()
        var a = await t
        var b = await t
        a + b
        "#,
    );
    assert_eq!(expect_int(&value), 84);
}

#[test]
fn uncaught_exception_carries_innermost_first_frames() {
    let error = eval_error(
        r#"
        intent inner() {
            throw "boom"
        }
        intent outer() {
            inner()
        }
        outer()
        "#,
    );
    let exc = match error {
        CallaError::Uncaught(exc) => exc,
        other => panic!("expected uncaught exception, got {other}"),
    };
    assert_eq!(exc.kind, "Exception");
    assert_eq!(exc.message, "boom");
    let names: Vec<&str> = exc.frames.iter().map(|f| f.function.as_str()).collect();
    assert_eq!(names, ["inner", "outer", "<top-level>"]);
}

#[test]
fn catch_filters_select_by_kind_and_finally_always_runs() {
    let value = eval(
        r#"
        var log: List<string> = new List<string>()
        try {
            log.push("try")
            throw "boom"
        } catch (TypeError e) {
            log.push("wrong")
        } catch (e) {
            log.push(exception_message(e))
        } finally {
            log.push("finally")
        }
        log.join(",")
        "#,
    );
    assert_eq!(expect_str(&value), "try,boom,finally");
}

#[test]
fn class_instances_throw_with_their_class_as_kind() {
    let value = eval(
        r#"
        class ParseError {
            var message: string = "bad digit"
        }

        intent parse(text: string): int {
            if text == "1" {
                return 1
            }
            throw new ParseError()
        }

        var kind = ""
        try {
            parse("x")
        } catch (ParseError e) {
            kind = exception_kind(e)
        }
        kind
        "#,
    );
    assert_eq!(expect_str(&value), "ParseError");
}

#[test]
fn runtime_type_error_on_generic_collection_mutation() {
    let exc = eval_error_unchecked(
        r#"
        var xs = new List<int>()
        xs.push(1)
        xs.push("x")
        "#,
    );
    assert_eq!(exc.kind, "TypeError");
}

#[test]
fn redeclaration_in_same_scope_raises() {
    let exc = eval_error_unchecked("var x = 1; var x = 2;");
    assert_eq!(exc.kind, "RedeclarationError");
}

#[test]
fn shadowing_in_inner_scope_is_allowed() {
    let value = eval(
        r#"
        var x = 1
        {
            var x = 2
            x = x + 1
        }
        x
        "#,
    );
    assert_eq!(expect_int(&value), 1);
}

#[test]
fn for_in_iterates_map_as_key_value_pairs() {
    let value = eval(
        r#"
        var m = new Map<string, int>()
        m.set("a", 1)
        m.set("b", 2)
        var keys = new List<string>()
        for pair in m {
            keys.push(pair[0])
        }
        keys.join("")
        "#,
    );
    assert_eq!(expect_str(&value), "ab");
}

#[test]
fn index_out_of_range_raises_index_error() {
    let exc = eval_error_unchecked("var xs = new List<int>(); xs[0]");
    assert_eq!(exc.kind, "IndexError");
}

#[test]
fn division_by_zero_raises() {
    let exc = eval_error_unchecked("1 / 0");
    assert_eq!(exc.kind, "ZeroDivisionError");
}

#[test]
fn json_module_round_trips_values() {
    let value = eval(
        r#"
        import json
        json.stringify([1, 2, 3])
        "#,
    );
    assert_eq!(expect_str(&value), "[1,2,3]");
}

#[test]
fn http_request_returns_mock_response() {
    let value = eval(
        r#"
        import http
        var resp = http.request({"url": "https://example.test/ping"})
        resp["status"]
        "#,
    );
    assert_eq!(expect_int(&value), 200);
}

#[test]
fn collections_range_is_half_open() {
    let value = eval(
        r#"
        import collections
        collections.range(1, 5).join(",")
        "#,
    );
    assert_eq!(expect_str(&value), "1,2,3,4");
}

#[test]
fn type_errors_block_execution_under_default_policy() {
    let error = eval_error(
        r#"
        var n: List<int> = new List()
        n.push(5)
        n.push("x")
        "#,
    );
    match error {
        CallaError::TypeCheckFailed { errors } => assert_eq!(errors, 1),
        other => panic!("expected blocked run, got {other}"),
    }
}

#[test]
fn policy_off_runs_despite_static_errors() {
    // The dead branch holds a static name error; with blocking disabled the
    // program still runs and never reaches it.
    let config = LanguageConfig::from_toml("type-block-policy = false").expect("config");
    let value = eval_with("if false { missing_name } 2", config);
    assert_eq!(expect_int(&value), 2);
}
