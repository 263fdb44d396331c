//! End-to-end scenarios: literal programs through the whole pipeline,
//! checked against their expected output.

use porkchop_drv::{run_source, Compiler};
use porkchop_gen::decode;
use porkchop_vm::{Env, Value, Vm, VmError};

/// Compiles and runs `text`, returning captured stdout and the outcome.
fn run(text: &str, input: &str) -> (String, Result<Value, VmError>) {
    let (env, buffer) = Env::captured(input);
    let outcome = run_source(text, env).expect("program compiles");
    (buffer.contents(), outcome)
}

fn run_ok(text: &str) -> String {
    let (output, outcome) = run(text, "");
    outcome.expect("program runs");
    output
}

#[test]
fn scenario_hello() {
    assert_eq!(run_ok("println(\"hello\")"), "hello\n");
}

#[test]
fn scenario_arithmetic() {
    assert_eq!(run_ok("let x = 2 + 3 * 4; println(i2s(x))"), "14\n");
}

#[test]
fn scenario_for_over_list() {
    assert_eq!(
        run_ok("let xs = [1,2,3]; for x in xs { print(i2s(x)) }; println(\"\")"),
        "123\n"
    );
}

#[test]
fn scenario_factorial() {
    let program =
        "fn fact(n: int): int = if n <= 1 { 1 } else { n * fact(n-1) }; println(i2s(fact(6)))";
    assert_eq!(run_ok(program), "720\n");
}

#[test]
fn scenario_dict() {
    assert_eq!(
        run_ok("let d = @[1: \"a\", 2: \"b\"]; println(d[2])"),
        "b\n"
    );
}

#[test]
fn scenario_generator() {
    let program = "let gen = $(n: int): *int = { let i = 0; while i < n { yield i; i = i + 1 }; yield break }
for v in gen(3) { print(i2s(v)) }
println(\"\")";
    assert_eq!(run_ok(program), "012\n");
}

#[test]
fn scenario_cast_failure() {
    let (_, outcome) = run("let a: any = 1 as any; println(a as string)", "");
    let error = outcome.unwrap_err();
    assert!(error.to_string().contains("cannot cast int to string"));
}

#[test]
fn test_exit_propagates() {
    let (_, outcome) = run("exit(7)", "");
    assert!(matches!(outcome, Err(VmError::Exit(7))));
}

#[test]
fn test_read_line_echo() {
    let (output, outcome) = run("println(\"> \" + readLine())", "ping\n");
    outcome.unwrap();
    assert_eq!(output, "> ping\n");
}

#[test]
fn test_string_concat_stringifies() {
    assert_eq!(run_ok("println(\"x = \" + 1 + ',' + true)"), "x = 1,true\n");
}

#[test]
fn test_mutual_recursion_via_forward_declaration() {
    let program = "fn odd(n: int): bool
fn even(n: int): bool = if n == 0 { true } else { odd(n - 1) }
fn odd(n: int): bool = if n == 0 { false } else { even(n - 1) }
println(\"\" + even(10) + odd(10))";
    assert_eq!(run_ok(program), "truefalse\n");
}

#[test]
fn test_lambda_captures_value() {
    let program = "let base = 10
let add = $base(n: int): int = base + n
println(i2s(add(5)))";
    assert_eq!(run_ok(program), "15\n");
}

#[test]
fn test_partial_application() {
    let program = "let add = $(a: int, b: int): int = a + b
let inc = 1.add
println(i2s(inc(41)))";
    assert_eq!(run_ok(program), "42\n");
}

#[test]
fn test_while_break() {
    let program = "let i = 0
while true { if i == 4 { break } else { }; i = i + 1 }
println(i2s(i))";
    assert_eq!(run_ok(program), "4\n");
}

#[test]
fn test_dict_iteration_destructuring() {
    let program = "let d = @[1: 10]
let sum = 0
for (k, v) in d { sum = sum + k + v }
println(i2s(sum))";
    assert_eq!(run_ok(program), "11\n");
}

#[test]
fn test_set_membership() {
    let program = "let s = @[\"a\", \"b\"]
println(\"\" + (\"a\" in s) + (\"c\" in s))";
    assert_eq!(run_ok(program), "truefalse\n");
}

#[test]
fn test_collection_mutation() {
    let program = "let xs = [1, 2]
xs += 3
xs -= 1
println(i2s(sizeof xs) + i2s(xs[0]))";
    assert_eq!(run_ok(program), "22\n");
}

#[test]
fn test_list_index_fault() {
    let (_, outcome) = run("let xs = [1]; println(i2s(xs[3]))", "");
    let error = outcome.unwrap_err();
    assert!(error.to_string().contains("index out of bound"));
    assert!(error.to_string().contains("at func"));
}

#[test]
fn test_missing_key_fault() {
    let (_, outcome) = run("let d = @[1: \"a\"]; println(d[2])", "");
    assert!(outcome.unwrap_err().to_string().contains("missing such a key"));
}

#[test]
fn test_divide_by_zero_at_runtime() {
    let (_, outcome) = run("let d = 0; println(i2s(1 / d))", "");
    assert!(outcome.unwrap_err().to_string().contains("divided by zero"));
}

#[test]
fn test_typename() {
    assert_eq!(run_ok("println(typename(1 as any))"), "int\n");
    assert_eq!(run_ok("println(typename(\"s\" as any))"), "string\n");
}

#[test]
fn test_is_on_any() {
    let program = "let a: any = 1 as any
println(\"\" + (a is int) + (a is string))";
    assert_eq!(run_ok(program), "truefalse\n");
}

#[test]
fn test_tuple_destructuring_swap() {
    let program = "let (a, b) = (1, 2)
(a, b) = (b, a)
println(i2s(a) + i2s(b))";
    assert_eq!(run_ok(program), "21\n");
}

#[test]
fn test_increments() {
    let program = "let i = 5
let a = i++
let b = ++i
println(i2s(a) + \" \" + i2s(b))";
    assert_eq!(run_ok(program), "5 7\n");
}

#[test]
fn test_iterator_prefix_operators() {
    let program = "let it = &[7, 8]
while >>it { print(i2s(*it)) }
println(\"\")";
    assert_eq!(run_ok(program), "78\n");
}

#[test]
fn test_chars_and_bytes() {
    let program = "println(fromChars(toChars(\"abc\")) + i2s(sizeof toBytes(\"é\")))";
    assert_eq!(run_ok(program), "abc2\n");
}

#[test]
fn test_default_values() {
    let program = "let xs = default([int])
xs += 9
println(i2s(default(int)) + i2s(xs[0]))";
    assert_eq!(run_ok(program), "09\n");
}

#[test]
fn test_gc_survives_heavy_allocation() {
    let program = "let keep = [\"persistent\"]
let i = 0
while i < 5000 { let _ = \"transient \" + i2s(i); i = i + 1 }
gc()
println(keep[0])";
    assert_eq!(run_ok(program), "persistent\n");
}

#[test]
fn test_generator_over_collected_garbage() {
    // iterating a coroutine while other garbage churns
    let program = "let gen = $(n: int): *int = { let i = 0; while i < n { yield i * i; i = i + 1 }; yield break }
let total = 0
for v in gen(5) { let _ = \"junk\" + i2s(v); total = total + v }
println(i2s(total))";
    assert_eq!(run_ok(program), "30\n");
}

#[test]
fn test_binary_module_roundtrip() {
    let program = "fn twice(n: int): int = n * 2; println(i2s(twice(21)))";
    let compiler = Compiler::compile(program).unwrap();
    let mut bytes = Vec::new();
    compiler.write_binary(&mut bytes).unwrap();
    let assembly = decode(&bytes, compiler.continuum.external_count()).unwrap();
    let (env, buffer) = Env::captured("");
    Vm::new(assembly, env).run().unwrap();
    assert_eq!(buffer.contents(), "42\n");
}

#[test]
fn test_text_module_lists_mnemonics() {
    let compiler = Compiler::compile("println(\"hi\")").unwrap();
    let mut bytes = Vec::new();
    compiler.write_text(&mut bytes).unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("sconst 0"));
    assert!(text.contains("call"));
    assert!(text.lines().any(|line| line == "("));
    assert!(text.lines().any(|line| line == ")"));
}

#[test]
fn test_compile_error_reports_segment() {
    let error = Compiler::compile("let x = 1\nx + \"s\" * 2").unwrap_err();
    let rendered = error.render(&porkchop_util::Source::new("let x = 1\nx + \"s\" * 2"));
    assert!(rendered.contains("error:"));
    assert!(rendered.contains("   2  |"));
}
