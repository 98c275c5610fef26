use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn calla() -> Command {
    Command::cargo_bin("calla").expect("binary should build")
}

fn script(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".ca")
        .tempfile()
        .expect("tempfile");
    file.write_all(contents.as_bytes()).expect("write script");
    file
}

#[test]
fn run_reports_loaded_modules_and_executes() {
    let script = script(
        r#"
        intent add(a: int, b: int): int {
            return a + b
        }
        print(add(40, 2))
        "#,
    );
    calla()
        .arg("run")
        .arg(script.path())
        .assert()
        .success()
        .stdout(
            predicate::str::contains(
                "6 modules loaded (collections, fs, http, json, math, vector)",
            )
            .and(predicate::str::contains("42")),
        );
}

#[test]
fn eval_prints_the_final_value() {
    calla()
        .arg("eval")
        .arg("1 + 2")
        .assert()
        .success()
        .stdout(predicate::str::contains("3"));
}

#[test]
fn check_fails_on_a_type_error_without_running() {
    let script = script(
        r#"
        var n: List<int> = new List()
        n.push("x")
        print("should not matter")
        "#,
    );
    calla()
        .arg("check")
        .arg(script.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("expected int, found string"))
        .stderr(predicate::str::contains("reported 1 error(s)"));
}

#[test]
fn check_passes_on_a_clean_script() {
    let script = script("var greeting: string = \"hi\"\nprint(greeting)\n");
    calla()
        .arg("check")
        .arg(script.path())
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn uncaught_exception_prints_a_traceback_and_fails() {
    let script = script(
        r#"
        intent explode() {
            throw "boom"
        }
        explode()
        "#,
    );
    calla()
        .arg("run")
        .arg(script.path())
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("Exception: boom")
                .and(predicate::str::contains("at explode"))
                .and(predicate::str::contains("at <top-level>")),
        );
}

#[test]
fn run_with_blocking_policy_refuses_a_bad_script() {
    let script = script("var n: List<int> = new List()\nn.push(\"x\")\n");
    calla()
        .arg("run")
        .arg(script.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected int, found string"));
}

#[test]
fn config_file_can_trim_the_module_set() {
    let mut config = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("tempfile");
    config
        .write_all(b"builtin-modules = [\"math\"]\n")
        .expect("write config");
    let script = script("print(1)\n");
    calla()
        .arg("run")
        .arg(script.path())
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("1 modules loaded (math)"));
}

#[test]
fn fmt_reprints_in_canonical_form() {
    let script = script("intent   f( a:int ,b : int = 2 ) { return a+b }\nprint( f(1 ) )\n");
    calla()
        .arg("fmt")
        .arg(script.path())
        .assert()
        .success()
        .stdout(
            predicate::str::contains("intent f(a: int, b: int = 2) {")
                .and(predicate::str::contains("return a + b;")),
        );
}
