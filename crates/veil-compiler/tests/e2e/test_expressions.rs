use super::helpers::*;
use veil_compiler::chunk::Constant;
use veil_compiler::opcode::{OpCode, RK_BIAS};

#[test]
fn e2e_constant_dedup() {
    let chunk = compile_str("local a = 'x' local b = 'x' t = {'x'}");
    let strings = chunk
        .constants
        .iter()
        .filter(|k| **k == Constant::Str(b"x".to_vec()))
        .count();
    assert_eq!(strings, 1);
}

#[test]
fn e2e_local_sum_constants() {
    let chunk = compile_str("local x = 1 + 2; print(x)");
    assert_eq!(chunk.constants.len(), 2);
    assert!(chunk.code.len() >= 3);
    assert!(string_index(&chunk, "print").is_some());
}

#[test]
fn e2e_number_text_is_round_trip() {
    let chunk = compile_str("local a, b, c = 0.1, 1e300, 2^2000");
    let texts: Vec<String> = chunk
        .constants
        .iter()
        .map(|k| match k {
            Constant::Number(t) => t.clone(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(texts[0], "0.1");
    assert_eq!(texts[1].parse::<f64>().unwrap(), 1e300);
    assert_eq!(texts[2], "1e9999");
}

#[test]
fn e2e_float_results_keep_float_text() {
    let chunk = compile_str("local a, b, c = 2 ^ 10, 1024, 2 ^ 62 * 4");
    let texts: Vec<&Constant> = chunk.constants.iter().collect();
    assert_eq!(
        texts,
        [
            &Constant::Number("1024.0".into()),
            &Constant::Number("1024".into()),
            &Constant::Number("1.8446744073709552e19".into()),
        ]
    );
}

#[test]
fn e2e_number_and_string_constants_distinct() {
    let chunk = compile_str("local a, b = 1, '1'");
    assert_eq!(chunk.constants.len(), 2);
}

#[test]
fn e2e_concat_chain_single_instruction() {
    let chunk = compile_str("local a, b = 'a', 'b' local s = a .. b .. 'c' .. 'd'");
    let concat = find_all(&chunk, OpCode::Concat);
    assert_eq!(concat.len(), 1);
    assert_eq!(concat[0].c() - concat[0].b(), 3);
}

#[test]
fn e2e_unary_ops() {
    let chunk = compile_str("local a = 1 local b, c, d = -a, not a, #a");
    assert!(has_opcode(&chunk, OpCode::Unm));
    assert!(has_opcode(&chunk, OpCode::Not));
    assert!(has_opcode(&chunk, OpCode::Len));
}

#[test]
fn e2e_negative_literal_folds() {
    let chunk = compile_str("local a = -5");
    assert!(!has_opcode(&chunk, OpCode::Unm));
    assert_eq!(chunk.constant(0), Some(&Constant::Number("-5".into())));
}

#[test]
fn e2e_index_and_field_reads() {
    let chunk = compile_str("local t = {} local a, b = t[1], t.name");
    let gets = find_all(&chunk, OpCode::GetTable);
    assert_eq!(gets.len(), 2);
    assert!(gets.iter().all(|g| g.c() >= RK_BIAS));
}

#[test]
fn e2e_comparison_as_value_materializes_bool() {
    let chunk = compile_str("local a, b = 1, 2 local c = a >= b");
    assert_eq!(count_opcode(&chunk, OpCode::LoadBool), 2);
    let le = find_all(&chunk, OpCode::Le)[0];
    assert_eq!((le.a(), le.b(), le.c()), (1, 1, 0));
}

#[test]
fn e2e_not_condition_flips_expectation() {
    let chunk = compile_str("local a, b = 1, 2 if not (a == b) then x = 1 end");
    let eq = find_all(&chunk, OpCode::Eq)[0];
    assert_eq!(eq.a(), 1);
}

#[test]
fn e2e_nested_table_constructor() {
    let chunk = compile_str("local t = {1, {2, 3}, x = {y = 4}}");
    assert_eq!(count_opcode(&chunk, OpCode::NewTable), 3);
    let setlists = find_all(&chunk, OpCode::SetList);
    assert_eq!(setlists.len(), 2);
}

#[test]
fn e2e_table_trailing_call_is_open() {
    let chunk = compile_str("local t = {1, 2, f()}");
    let setlist = find_all(&chunk, OpCode::SetList)[0];
    assert_eq!((setlist.b(), setlist.c()), (0, 1));
    assert_eq!(find_all(&chunk, OpCode::Call)[0].c(), 0);
}

#[test]
fn e2e_table_with_many_items() {
    let items: Vec<String> = (0..120).map(|i| format!("'v{i}'")).collect();
    let chunk = compile_str(&format!("local t = {{{}}}", items.join(", ")));
    let setlists: Vec<(u16, u16)> = find_all(&chunk, OpCode::SetList)
        .iter()
        .map(|i| (i.b(), i.c()))
        .collect();
    assert_eq!(setlists, vec![(50, 1), (50, 51), (20, 101)]);
}

#[test]
fn e2e_vararg_in_call() {
    let chunk = compile_str("print(...)");
    let va = find_all(&chunk, OpCode::VarArg)[0];
    assert_eq!(va.b(), 0);
    assert_eq!(find_all(&chunk, OpCode::Call)[0].b(), 0);
}

#[test]
fn e2e_anonymous_function_argument() {
    let chunk = compile_str("local n = 3 each(t, function(v) print(v, n) end)");
    let src = only_factory(&chunk);
    assert!(src.starts_with("function(R) local R0 = R[0] return function(v)"), "{src}");
    assert!(src.contains("print(v, R0[1])"), "{src}");
}
