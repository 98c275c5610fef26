use calla::{
    checker::TypeChecker, parser::parse_program, Diagnostic, LanguageConfig, Registry,
};

fn check(source: &str) -> Vec<Diagnostic> {
    let config = LanguageConfig::default();
    let registry = Registry::load(&config).expect("registry should load");
    let program = parse_program(source, &config).expect("program should parse");
    TypeChecker::new(&config, &registry).check(&program)
}

fn errors(diagnostics: &[Diagnostic]) -> Vec<&Diagnostic> {
    diagnostics.iter().filter(|d| d.is_error()).collect()
}

fn warnings(diagnostics: &[Diagnostic]) -> Vec<&Diagnostic> {
    diagnostics.iter().filter(|d| !d.is_error()).collect()
}

#[test]
fn clean_program_has_no_diagnostics() {
    let diagnostics = check(
        r#"
        intent add(a: int, b: int): int {
            return a + b
        }
        var total: int = add(1, 2)
        "#,
    );
    assert!(diagnostics.is_empty(), "unexpected: {diagnostics:?}");
}

#[test]
fn generic_mismatch_reports_exactly_one_error_at_the_bad_call() {
    let diagnostics = check(
        r#"
        var n: List<int> = new List()
        n.push(5)
        n.push("x")
        "#,
    );
    let errors = errors(&diagnostics);
    assert_eq!(errors.len(), 1, "got: {diagnostics:?}");
    assert!(errors[0].message.contains("expected int, found string"));
    assert_eq!(errors[0].pos.map(|p| p.line), Some(4));
}

#[test]
fn checking_is_deterministic() {
    let source = r#"
        var n: List<int> = new List()
        n.push("x")
        n.push(true)
        missing()
    "#;
    let first: Vec<String> = check(source).iter().map(|d| d.to_string()).collect();
    let second: Vec<String> = check(source).iter().map(|d| d.to_string()).collect();
    assert_eq!(first, second);
}

#[test]
fn multiple_errors_accumulate_in_source_order() {
    let diagnostics = check(
        r#"
        var a: int = "text"
        var b: string = 5
        "#,
    );
    let errors = errors(&diagnostics);
    assert_eq!(errors.len(), 2);
    assert!(errors[0].message.contains("`a`"));
    assert!(errors[1].message.contains("`b`"));
}

#[test]
fn arity_mismatch_is_reported() {
    let diagnostics = check(
        r#"
        intent pair(a: int, b: int): int {
            return a + b
        }
        pair(1)
        "#,
    );
    let errors = errors(&diagnostics);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("expected 2 arguments"));
}

#[test]
fn defaulted_parameters_relax_the_required_arity() {
    let diagnostics = check(
        r#"
        intent greet(name: string, suffix: string = "!"): string {
            return name + suffix
        }
        greet("ada")
        greet("ada", "?")
        "#,
    );
    assert!(errors(&diagnostics).is_empty(), "got: {diagnostics:?}");
}

#[test]
fn unknown_collection_member_is_an_error() {
    let diagnostics = check("var xs = new List<int>(); xs.shuffle()");
    let errors = errors(&diagnostics);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("no method `shuffle`"));
}

#[test]
fn prototype_method_is_not_a_value() {
    let diagnostics = check("var xs = new List<int>(); var f = xs.push;");
    let errors = errors(&diagnostics);
    assert_eq!(errors.len(), 1, "got: {diagnostics:?}");
    assert!(errors[0].message.contains("call its methods directly"));
}

#[test]
fn undefined_variable_is_an_error() {
    let diagnostics = check("print(missing)");
    let errors = errors(&diagnostics);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("undefined variable `missing`"));
}

#[test]
fn redeclaration_in_same_scope_is_an_error() {
    let diagnostics = check("var x = 1; var x = 2;");
    let errors = errors(&diagnostics);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("already declared"));
}

#[test]
fn unreachable_statement_after_return_is_a_warning() {
    let diagnostics = check(
        r#"
        intent f(): int {
            return 1
            print("never")
        }
        f()
        "#,
    );
    assert!(errors(&diagnostics).is_empty());
    let warnings = warnings(&diagnostics);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("unreachable"));
}

#[test]
fn async_call_types_as_task_and_await_unwraps() {
    let diagnostics = check(
        r#"
        async intent compute(): int {
            return 7
        }
        var t: Task<int> = compute()
        var n: int = await t
        "#,
    );
    assert!(diagnostics.is_empty(), "got: {diagnostics:?}");
}

#[test]
fn awaiting_a_non_task_is_an_error() {
    let diagnostics = check("await 5");
    let errors = errors(&diagnostics);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("expects a Task"));
}

#[test]
fn module_exports_are_checked_against_signatures() {
    let diagnostics = check(
        r#"
        import vector
        vector.dot([1.0, 2.0], [3.0, 4.0])
        vector.dot("nope", [1.0])
        "#,
    );
    let errors = errors(&diagnostics);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("vector.dot"));
}

#[test]
fn unknown_module_is_an_error() {
    let diagnostics = check("import telemetry");
    let errors = errors(&diagnostics);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("unknown module `telemetry`"));
}

#[test]
fn return_type_mismatch_is_an_error() {
    let diagnostics = check(
        r#"
        intent label(): string {
            return 5
        }
        "#,
    );
    let errors = errors(&diagnostics);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("return type mismatch"));
}

#[test]
fn break_outside_loop_is_an_error() {
    let diagnostics = check("break");
    let errors = errors(&diagnostics);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("outside of a loop"));
}
