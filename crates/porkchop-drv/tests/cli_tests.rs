//! CLI tests driving the `porkchop` binary.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn script(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(text.as_bytes()).expect("write script");
    file
}

#[test]
fn test_runs_a_script() {
    let file = script("println(\"hello\")");
    Command::cargo_bin("porkchop")
        .unwrap()
        .arg(file.path())
        .assert()
        .success()
        .stdout("hello\n");
}

#[test]
fn test_exit_status_propagates() {
    let file = script("exit(3)");
    Command::cargo_bin("porkchop")
        .unwrap()
        .arg(file.path())
        .assert()
        .code(3);
}

#[test]
fn test_compile_error_reported() {
    let file = script("let x = ");
    Command::cargo_bin("porkchop")
        .unwrap()
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_runtime_error_reported() {
    let file = script("let d = 0\nprintln(i2s(1 / d))");
    Command::cargo_bin("porkchop")
        .unwrap()
        .arg(file.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("divided by zero"));
}

#[test]
fn test_empty_input_rejected() {
    let file = script("# nothing here\n");
    Command::cargo_bin("porkchop")
        .unwrap()
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Empty input"));
}

#[test]
fn test_missing_input_file() {
    Command::cargo_bin("porkchop")
        .unwrap()
        .arg("no-such-file.pork")
        .assert()
        .code(20);
}

#[test]
fn test_getargs_sees_trailing_arguments() {
    let file = script("for a in getargs() { println(a) }");
    Command::cargo_bin("porkchop")
        .unwrap()
        .arg(file.path())
        .args(["alpha", "beta"])
        .assert()
        .success()
        .stdout("alpha\nbeta\n");
}

#[test]
fn test_text_asm_output() {
    let source = script("println(\"hi\")");
    let output = NamedTempFile::new().unwrap();
    Command::cargo_bin("porkchop")
        .unwrap()
        .arg(source.path())
        .arg("-t")
        .arg(output.path())
        .assert()
        .success();
    let text = std::fs::read_to_string(output.path()).unwrap();
    assert!(text.contains("call"));
    assert!(text.contains("func $s:v"));
}

#[test]
fn test_stdin_feeds_read_line() {
    let file = script("println(\"got \" + readLine())");
    Command::cargo_bin("porkchop")
        .unwrap()
        .arg(file.path())
        .write_stdin("data\n")
        .assert()
        .success()
        .stdout("got data\n");
}
