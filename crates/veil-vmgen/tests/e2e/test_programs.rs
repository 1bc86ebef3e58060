use super::helpers::*;
use proptest::prelude::*;
use veil_compiler::opcode::OpCode;
use veil_vmgen::interp::{RuntimeError, Value};

#[test]
fn test_arithmetic_precedence() {
    check_output("print(1 + 2 * 3, (2 + 3) * 4, 2 ^ 10)", &["7\t20\t1024"]);
}

#[test]
fn test_arithmetic_on_locals() {
    check_output(
        "local one, two, three = 1, 2, 3 print(one + two * three, (two + three) * 4, two ^ 10)",
        &["7\t20\t1024"],
    );
}

#[test]
fn test_local_sum_program() {
    let chunk = compile_str("local x = 1 + 2; print(x)");
    assert!(chunk.constants.len() <= 2);
    assert!(chunk.code.len() >= 3);
    check_output("local x = 1 + 2; print(x)", &["3"]);
}

#[test]
fn test_modulo_and_division() {
    check_output(
        "local a, b = -7, 3 print(a % b, 7 % -3, a / 2, 1 / 0, -1 / 0)",
        &["2\t-2\t-3.5\tinf\t-inf"],
    );
}

#[test]
fn test_numeric_for_runs_five_times() {
    let vm = run_lua("for i = 1, 5 do end");
    assert_eq!(vm.stats().loop_iterations, 5);
    assert_eq!(vm.stats().count(OpCode::ForLoop), 6);
}

#[test]
fn test_numeric_for_negative_step() {
    check_output(
        "local s = '' for i = 5, 1, -2 do s = s .. i end print(s)",
        &["531"],
    );
}

#[test]
fn test_numeric_for_zero_iterations() {
    let vm = run_lua("for i = 3, 1 do print(i) end");
    assert!(vm.output().is_empty());
    assert_eq!(vm.stats().loop_iterations, 0);
}

#[test]
fn test_break_exits_innermost_loop() {
    check_output(
        r#"
        local log = ''
        for i = 1, 3 do
            local j = 0
            while true do
                j = j + 1
                if j > i then break end
                log = log .. j
            end
            log = log .. '|'
        end
        print(log)
        "#,
        &["1|12|123|"],
    );
}

#[test]
fn test_repeat_runs_body_at_least_once() {
    check_output(
        "local n = 10 repeat n = n + 1 until true print(n)",
        &["11"],
    );
}

#[test]
fn test_repeat_condition_sees_body_locals() {
    check_output(
        "local i = 0 repeat local done = i >= 3 i = i + 1 until done print(i)",
        &["4"],
    );
}

#[test]
fn test_while_loop() {
    check_output(
        "local n, steps = 27, 0 while n ~= 1 do if n % 2 == 0 then n = n / 2 else n = 3 * n + 1 end steps = steps + 1 end print(steps)",
        &["111"],
    );
}

#[test]
fn test_ipairs_iteration() {
    check_output(
        "local t = {'a', 'b', 'c'} for i, v in ipairs(t) do print(i, v) end",
        &["1\ta", "2\tb", "3\tc"],
    );
}

#[test]
fn test_pairs_sum() {
    let vm = run_lua("local t = {x = 1, y = 2, 3} local s = 0 for _, v in pairs(t) do s = s + v end print(s)");
    assert_eq!(vm.output(), ["6"]);
    assert_eq!(vm.stats().loop_iterations, 3);
}

#[test]
fn test_method_call_passes_self() {
    check_output("local t = {kind = type} print(t:kind())", &["table"]);
}

#[test]
fn test_nested_field_method_call() {
    check_output(
        "local a = {b = {show = tostring}} print(a.b:show() == tostring(a.b))",
        &["true"],
    );
}

#[test]
fn test_large_table_constructor() {
    let items: Vec<String> = (1..=120).map(|i| i.to_string()).collect();
    let source = format!(
        "local t = {{{}}} print(#t, t[1], t[50], t[51], t[100], t[101], t[120])",
        items.join(", ")
    );
    check_output(&source, &["120\t1\t50\t51\t100\t101\t120"]);
}

#[test]
fn test_table_constructor_with_open_call() {
    check_output(
        "local t = {1, 2, next({})} print(#t)",
        &["2"],
    );
}

#[test]
fn test_multiple_assignment_swaps() {
    check_output("local a, b = 1, 2 a, b = b, a print(a, b)", &["2\t1"]);
}

#[test]
fn test_assignment_evaluates_before_storing() {
    check_output(
        "local t = {1, 2} local i = 1 i, t[i] = i + 1, 'x' print(i, t[1], t[2])",
        &["2\tx\t2"],
    );
}

#[test]
fn test_and_or_values() {
    check_output(
        "local a, b = nil, 0 print(a or 'd', b and 'y', a and 1, false or nil)",
        &["d\ty\tnil\tnil"],
    );
}

#[test]
fn test_comparisons_as_values() {
    check_output(
        "local a, b = 1, 2 print(a < b, a > b, a <= 1, b >= 3, a == 1, a ~= 1)",
        &["true\tfalse\ttrue\tfalse\ttrue\tfalse"],
    );
}

#[test]
fn test_not_and_length() {
    check_output(
        "local s, t = 'hello', {1, 2, 3} print(not s, not nil, #s, #t)",
        &["false\ttrue\t5\t3"],
    );
}

#[test]
fn test_string_numbers_coerce() {
    check_output("local a = '10' print(a + 5, a .. 5)", &["15\t105"]);
}

#[test]
fn test_elseif_chain() {
    let source = |x: i32| {
        format!(
            "local x = {x} if x < 0 then print('neg') elseif x == 0 then print('zero') else print('pos') end"
        )
    };
    check_output(&source(-4), &["neg"]);
    check_output(&source(0), &["zero"]);
    check_output(&source(9), &["pos"]);
}

#[test]
fn test_globals_round_trip() {
    let vm = run_lua("counter = 1 counter = counter + 41");
    assert_eq!(vm.global("counter"), Value::Number(42.0));
}

#[test]
fn test_varargs_return() {
    let chunk = compile_str("return ...");
    let results = veil_vmgen::interp::Interpreter::new()
        .run(&chunk, &[Value::Number(1.0), Value::Nil, Value::str("x")])
        .unwrap();
    assert_eq!(results, vec![Value::Number(1.0), Value::Nil, Value::str("x")]);
}

#[test]
fn test_return_values() {
    let results = run_results("local a = 5 return a, a * 2, 'done'");
    assert_eq!(results, vec![Value::Number(5.0), Value::Number(10.0), Value::str("done")]);
}

#[test]
fn test_tail_call_returns_callee_results() {
    let results = run_results("return tostring(12)");
    assert_eq!(results, vec![Value::str("12")]);
}

#[test]
fn test_rendered_closures_are_unsupported() {
    assert_eq!(
        run_lua_err("local function f() return 1 end print(f())"),
        RuntimeError::Unsupported
    );
}

#[test]
fn test_arithmetic_on_table_fails() {
    assert_eq!(
        run_lua_err("local t = {} print(t + 1)"),
        RuntimeError::Type {
            action: "perform arithmetic on",
            kind: "table",
        }
    );
}

proptest! {
    #[test]
    fn prop_greater_is_swapped_less(a in -1000i32..1000, b in -1000i32..1000) {
        let source = format!(
            "local a, b = {a}, {b} print(a > b, b < a, a >= b, b <= a)"
        );
        let vm = run_lua(&source);
        let line = &vm.output()[0];
        let fields: Vec<&str> = line.split('\t').collect();
        prop_assert_eq!(fields[0], fields[1]);
        prop_assert_eq!(fields[2], fields[3]);
        prop_assert_eq!(fields[0] == "true", a > b);
        prop_assert_eq!(fields[2] == "true", a >= b);
    }

    #[test]
    fn prop_float_comparison_conditions(a in -1.0e6f64..1.0e6, b in -1.0e6f64..1.0e6) {
        let source = format!(
            "local a, b = {a:?}, {b:?} if a > b then print('gt') elseif b < a then print('bad') else print('le') end"
        );
        let vm = run_lua(&source);
        prop_assert_eq!(vm.output()[0].as_str(), if a > b { "gt" } else { "le" });
    }
}
