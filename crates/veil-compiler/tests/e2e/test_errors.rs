use super::helpers::*;

#[test]
fn e2e_error_missing_then() {
    let msg = compile_str_err("if x end");
    assert!(msg.contains("expected 'then'"), "{msg}");
}

#[test]
fn e2e_error_unclosed_block_names_opener() {
    let msg = compile_str_err("while x do\n  y = 1\n");
    assert!(msg.contains("to close 'while' at line 1"), "{msg}");
}

#[test]
fn e2e_error_bad_assignment_target() {
    let msg = compile_str_err("f() = 1");
    assert!(msg.contains("cannot assign"), "{msg}");
}

#[test]
fn e2e_error_expression_statement() {
    let msg = compile_str_err("x");
    assert!(msg.contains("syntax error"), "{msg}");
}

#[test]
fn e2e_error_unfinished_string() {
    let msg = compile_str_err("local s = 'abc");
    assert!(msg.contains("unfinished string"), "{msg}");
}

#[test]
fn e2e_error_malformed_number() {
    let msg = compile_str_err("local n = 3x");
    assert!(msg.contains("malformed number"), "{msg}");
}

#[test]
fn e2e_error_return_not_last() {
    let msg = compile_str_err("return 1 x = 2");
    assert!(msg.contains("'return' must be the last statement") || msg.contains("expected '<eof>'"), "{msg}");
}

#[test]
fn e2e_error_vararg_outside_vararg_function() {
    let msg = compile_str_err("local f = function() return ... end");
    assert!(msg.contains("'...'"), "{msg}");
}

#[test]
fn e2e_error_break_outside_loop() {
    let msg = compile_str_err("if x then break end");
    assert!(msg.starts_with("compile error"), "{msg}");
    assert!(msg.contains("'break' outside loop"), "{msg}");
}

#[test]
fn e2e_error_too_many_locals() {
    let mut src = String::new();
    for i in 0..201 {
        src.push_str(&format!("local v{i} = {i}\n"));
    }
    let msg = compile_str_err(&src);
    assert!(msg.contains("too many local variables"), "{msg}");
}

#[test]
fn e2e_error_too_many_constants() {
    let src: String = (0..300).map(|i| format!("g{i} = 1\n")).collect();
    let msg = compile_str_err(&src);
    assert!(msg.contains("too many constants"), "{msg}");
}

#[test]
fn e2e_error_carries_line() {
    let msg = compile_str_err("local a = 1\nlocal b = 2\nlocal c = = 3");
    assert!(msg.contains("3:"), "{msg}");
}
