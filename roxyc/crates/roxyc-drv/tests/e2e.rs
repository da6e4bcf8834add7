//! End-to-end scenarios through the `roxy` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn roxy() -> Command {
    Command::cargo_bin("roxy").expect("roxy binary not built")
}

fn write_module(dir: &TempDir, name: &str, source: &str) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, source).unwrap();
    path
}

#[test]
fn s1_arithmetic_and_locals() {
    let dir = TempDir::new().unwrap();
    let file = write_module(&dir, "main.roxy", "var a: i32 = 2; var b: i32 = 3; print_i32(a + b * 4);\n");
    roxy().arg(&file).assert().success().stdout("14\n");
}

#[test]
fn s2_conditional_and_loop() {
    let dir = TempDir::new().unwrap();
    let file = write_module(
        &dir,
        "main.roxy",
        "var i: i32 = 0; var s: i32 = 0;\nwhile (i < 5) { s = s + i; i = i + 1; }\nprint_i32(s);\n",
    );
    roxy().arg(&file).assert().success().stdout("10\n");
}

#[test]
fn s3_string_concat() {
    let dir = TempDir::new().unwrap();
    let file = write_module(&dir, "main.roxy", "print(concat(\"foo\", \"bar\"));\n");
    roxy().arg(&file).assert().success().stdout("foobar\n");
}

#[test]
fn s4_function_call() {
    let dir = TempDir::new().unwrap();
    let file = write_module(
        &dir,
        "main.roxy",
        "fun sq(x: i32): i32 { return x * x; }\nprint_i32(sq(7));\n",
    );
    roxy().arg(&file).assert().success().stdout("49\n");
}

#[test]
fn s5_short_circuit_skips_side_effects() {
    let dir = TempDir::new().unwrap();
    let file = write_module(
        &dir,
        "main.roxy",
        "fun side(): bool { print(\"x\"); return true; }\nif (false && side()) { print(\"a\"); } else { print(\"b\"); }\n",
    );
    // `side` must not run: exactly "b", no "x".
    roxy().arg(&file).assert().success().stdout("b\n");
}

#[test]
fn s6_cross_module_import() {
    let dir = TempDir::new().unwrap();
    write_module(&dir, "lib.roxy", "pub fun add(a: i32, b: i32): i32 { return a + b; }\n");
    write_module(&dir, "main.roxy", "import lib.*;\nprint_i32(add(2, 3));\n");
    roxy().arg(dir.path()).arg("main").assert().success().stdout("5\n");
}

#[test]
fn nested_directories_become_dotted_module_names() {
    let dir = TempDir::new().unwrap();
    write_module(&dir, "util/math.roxy", "pub fun triple(x: i32): i32 { return x * 3; }\n");
    write_module(&dir, "main.roxy", "import util.math.*;\nprint_i32(triple(14));\n");
    roxy().arg(dir.path()).arg("main").assert().success().stdout("42\n");
}

#[test]
fn string_plus_lowers_to_concat() {
    let dir = TempDir::new().unwrap();
    let file = write_module(&dir, "main.roxy", "var s = \"ro\" + \"xy\";\nprint(s);\n");
    roxy().arg(&file).assert().success().stdout("roxy\n");
}

#[test]
fn wider_types_flow_through_the_stack() {
    let dir = TempDir::new().unwrap();
    let file = write_module(
        &dir,
        "main.roxy",
        "var big: i64 = 4000000000l;\nprint_i64(big + big);\nvar d: f64 = 1.5;\nprint_f64(d + 0.25);\n",
    );
    roxy().arg(&file).assert().success().stdout("8000000000\n1.75\n");
}

#[test]
fn compile_error_exits_nonzero_with_diagnostic() {
    let dir = TempDir::new().unwrap();
    let file = write_module(&dir, "main.roxy", "var a = missing;\n");
    roxy()
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("[line 1] Error at 'missing': Undefined variable."));
}

#[test]
fn parse_error_reports_line_and_lexeme() {
    let dir = TempDir::new().unwrap();
    let file = write_module(&dir, "main.roxy", "var a = 1;\nvar 2;\n");
    roxy()
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("[line 2] Error at '2'"));
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let dir = TempDir::new().unwrap();
    let file = write_module(&dir, "main.roxy", "var zero: i32 = 0;\nprint_i32(1 / zero);\n");
    roxy()
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Division by zero"));
}

#[test]
fn missing_import_reports_module() {
    let dir = TempDir::new().unwrap();
    let file = write_module(&dir, "main.roxy", "import nowhere.*;\n");
    roxy()
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot find module nowhere"));
}

#[test]
fn disasm_flag_prints_listing_before_running() {
    let dir = TempDir::new().unwrap();
    let file = write_module(&dir, "main.roxy", "print_i32(3 + 4);\n");
    roxy()
        .arg("--disasm")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("== main =="))
        .stdout(predicate::str::contains("callnative"))
        .stdout(predicate::str::contains("7\n"));
}

#[test]
fn usage_error_without_arguments() {
    roxy().assert().failure().stderr(predicate::str::contains("Usage: roxy"));
}
