use calla::{CallaError, LanguageConfig, Registry, Session};

#[test]
fn summary_counts_and_sorts_module_names() {
    let registry = Registry::load(&LanguageConfig::default()).expect("registry should load");
    assert_eq!(
        registry.summary(),
        "6 modules loaded (collections, fs, http, json, math, vector)"
    );
}

#[test]
fn summary_tracks_the_configured_subset() {
    let config = LanguageConfig::from_toml(r#"builtin-modules = ["vector", "math"]"#)
        .expect("config should parse");
    let registry = Registry::load(&config).expect("registry should load");
    assert_eq!(registry.summary(), "2 modules loaded (math, vector)");
}

#[test]
fn unknown_configured_module_fails_to_load() {
    let config = LanguageConfig::from_toml(r#"builtin-modules = ["telemetry"]"#)
        .expect("config should parse");
    match Registry::load(&config) {
        Err(CallaError::ModuleLoad { module, .. }) => assert_eq!(module, "telemetry"),
        Ok(_) => panic!("expected ModuleLoad error, got a loaded registry"),
        Err(other) => panic!("expected ModuleLoad error, got {other}"),
    }
}

#[test]
fn missing_overlay_file_aborts_before_any_user_statement() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = LanguageConfig::from_toml(&format!(
        "builtin-modules = [\"fs\"]\nmodule-root = \"{}\"",
        dir.path().display()
    ))
    .expect("config should parse");

    // The user program would throw immediately, but loading fails first.
    match Session::from_source("throw \"never reached\"", config) {
        Err(CallaError::ModuleLoad { module, .. }) => assert_eq!(module, "fs"),
        Ok(_) => panic!("expected module load failure"),
        Err(other) => panic!("expected ModuleLoad error, got {other}"),
    }
}

#[test]
fn broken_overlay_reports_the_module() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("math.ca"), "intent broken( {").expect("write overlay");
    let config = LanguageConfig::from_toml(&format!(
        "builtin-modules = [\"math\"]\nmodule-root = \"{}\"",
        dir.path().display()
    ))
    .expect("config should parse");

    match Registry::load(&config) {
        Err(CallaError::ModuleLoad { module, .. }) => assert_eq!(module, "math"),
        Ok(_) => panic!("expected ModuleLoad error, got a loaded registry"),
        Err(other) => panic!("expected ModuleLoad error, got {other}"),
    }
}

#[test]
fn overlay_functions_become_module_exports() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("math.ca"),
        r#"
        intent double(x: int): int {
            return x * 2
        }
        "#,
    )
    .expect("write overlay");
    let config = LanguageConfig::from_toml(&format!(
        "builtin-modules = [\"math\"]\nmodule-root = \"{}\"",
        dir.path().display()
    ))
    .expect("config should parse");

    let mut session = Session::from_source(
        r#"
        import math
        math.double(21)
        "#,
        config,
    )
    .expect("program should load");
    let value = session.run().expect("program should run");
    assert_eq!(value.to_string(), "42");
}

#[test]
fn overlay_can_call_its_module_natives() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("fs.ca"),
        r#"
        intent read_or(path: string, fallback: string): string {
            if exists(path) {
                return read_text(path)
            }
            return fallback
        }
        "#,
    )
    .expect("write overlay");
    let config = LanguageConfig::from_toml(&format!(
        "builtin-modules = [\"fs\"]\nmodule-root = \"{}\"",
        dir.path().display()
    ))
    .expect("config should parse");

    let mut session = Session::from_source(
        r#"
        import fs
        fs.read_or("/no/such/file", "fallback")
        "#,
        config,
    )
    .expect("program should load");
    let value = session.run().expect("program should run");
    assert_eq!(value.to_string(), "fallback");
}

#[test]
fn session_walks_the_run_states() {
    use calla::RunState;

    let mut session = Session::from_source("1 + 1", LanguageConfig::default())
        .expect("program should load");
    assert_eq!(session.state(), RunState::Loaded);
    session.check();
    assert_eq!(session.state(), RunState::TypeChecked);
    session.run().expect("program should run");
    assert_eq!(session.state(), RunState::Completed);
}

#[test]
fn blocked_run_ends_failed() {
    use calla::RunState;

    let mut session = Session::from_source("var n: int = \"text\"", LanguageConfig::default())
        .expect("program should load");
    match session.run() {
        Err(CallaError::TypeCheckFailed { errors }) => assert_eq!(errors, 1),
        other => panic!("expected blocked run, got ok={}", other.is_ok()),
    }
    assert_eq!(session.state(), RunState::Failed);
}
