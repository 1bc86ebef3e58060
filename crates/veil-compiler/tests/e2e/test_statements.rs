use super::helpers::*;
use veil_compiler::opcode::OpCode;

#[test]
fn e2e_local_declaration() {
    let chunk = compile_str("local x = 42");
    assert!(has_opcode(&chunk, OpCode::LoadK));
    assert_eq!(chunk.max_stack, 1);
}

#[test]
fn e2e_local_nil_default() {
    let chunk = compile_str("local x, y, z");
    let nils = find_all(&chunk, OpCode::LoadNil);
    assert_eq!(nils.len(), 1);
    assert_eq!((nils[0].a(), nils[0].b()), (0, 2));
}

#[test]
fn e2e_global_assign_and_read() {
    let chunk = compile_str("x = 42 return x");
    assert!(has_opcode(&chunk, OpCode::SetGlobal));
    assert!(has_opcode(&chunk, OpCode::GetGlobal));
    assert_eq!(string_index(&chunk, "x"), Some(0));
}

#[test]
fn e2e_do_block_scope() {
    let chunk = compile_str("do local a = 1 end return a");
    assert!(has_opcode(&chunk, OpCode::GetGlobal));
}

#[test]
fn e2e_deeply_nested_local_is_not_visible() {
    let chunk = compile_str(
        "if true then\n\
           if true then\n\
             if true then\n\
               local hidden = 1\n\
             end\n\
           end\n\
         end\n\
         print(hidden)",
    );
    let k = string_index(&chunk, "hidden").expect("global lookup of 'hidden'");
    assert!(find_all(&chunk, OpCode::GetGlobal)
        .iter()
        .any(|i| usize::from(i.b()) == k));
}

#[test]
fn e2e_shadowed_local_restored() {
    let chunk = compile_str("local a = 1 do local a = 2 end return a");
    let ret = chunk.code[chunk.code.len() - 2];
    assert_eq!((ret.opcode(), ret.a(), ret.b()), (OpCode::Return, 0, 2));
}

#[test]
fn e2e_if_elseif_else() {
    let chunk = compile_str(
        "local x = 5\n\
         if x > 10 then y = 1 elseif x > 3 then y = 2 else y = 3 end",
    );
    assert_eq!(count_opcode(&chunk, OpCode::Lt), 2);
    assert_eq!(count_opcode(&chunk, OpCode::SetGlobal), 3);
    // Two conditional skips plus two escape jumps.
    assert_eq!(count_opcode(&chunk, OpCode::Jmp), 4);
}

#[test]
fn e2e_while_loop_back_edge() {
    let chunk = compile_str("local i = 0 while i < 10 do i = i + 1 end");
    let jumps = find_all(&chunk, OpCode::Jmp);
    assert!(jumps.iter().any(|j| j.sbx() < 0));
}

#[test]
fn e2e_nested_loops_break_innermost() {
    let chunk = compile_str(
        "for i = 1, 3 do\n\
           while true do break end\n\
           x = i\n\
         end",
    );
    let jmp_pc = chunk
        .code
        .iter()
        .position(|i| i.opcode() == OpCode::Jmp)
        .unwrap();
    let target = (jmp_pc as i32 + 1 + chunk.code[jmp_pc].sbx()) as usize;
    // The break lands past the while's back jump but before the FORLOOP.
    let forloop = chunk
        .code
        .iter()
        .position(|i| i.opcode() == OpCode::ForLoop)
        .unwrap();
    assert!(target > jmp_pc + 1 && target < forloop);
    assert_eq!(chunk.code[target].opcode(), OpCode::SetGlobal);
}

#[test]
fn e2e_numeric_for_registers() {
    let chunk = compile_str("for i = 1, 10, 2 do print(i) end");
    let prep = find_all(&chunk, OpCode::ForPrep)[0];
    let lp = find_all(&chunk, OpCode::ForLoop)[0];
    assert_eq!(prep.a(), 0);
    assert_eq!(lp.a(), 0);
    // print(i) reads the user variable in base + 3.
    let mv = find_all(&chunk, OpCode::Move)[0];
    assert_eq!(mv.b(), 3);
}

#[test]
fn e2e_generic_for_three_values() {
    let chunk = compile_str("for k, v in next, t do end");
    // next and t, plus one nil to fill the control slot.
    let nil = find_all(&chunk, OpCode::LoadNil);
    assert_eq!(nil.len(), 1);
    assert_eq!(nil[0].a(), 2);
    assert_eq!(find_all(&chunk, OpCode::TForLoop)[0].c(), 2);
}

#[test]
fn e2e_repeat_sees_body_locals() {
    let chunk = compile_str("repeat local done = true until done");
    assert!(!has_opcode(&chunk, OpCode::GetGlobal));
}

#[test]
fn e2e_local_function_recursion() {
    let chunk = compile_str(
        "local function fact(n) if n <= 1 then return 1 end return n * fact(n - 1) end\n\
         print(fact(5))",
    );
    let src = only_factory(&chunk);
    assert!(src.contains("(n * R0[1]((n - 1)))"), "{src}");
    assert!(!src.contains("fact"), "{src}");
    assert_eq!(find_all(&chunk, OpCode::SetUpval).len(), 1);
}

#[test]
fn e2e_function_statement_global() {
    let chunk = compile_str("function greet(name) return 'hi ' .. name end");
    assert!(has_opcode(&chunk, OpCode::Closure));
    assert!(has_opcode(&chunk, OpCode::SetGlobal));
}

#[test]
fn e2e_closure_captures_register() {
    let chunk = compile_str("local count = 0\nlocal inc = function() count = count + 1 end");
    let src = only_factory(&chunk);
    assert!(src.contains("R0[1] = (R0[1] + 1);"), "{src}");
    assert_eq!(find_all(&chunk, OpCode::Close)[0].a(), 0);
}

#[test]
fn e2e_each_iteration_boxes_generic_loop_variables() {
    let chunk = compile_str("for k, v in pairs(t) do f = function() return k end end");
    let closes = find_all(&chunk, OpCode::Close);
    assert_eq!(closes.len(), 1);
    // k sits above the three hidden iterator locals.
    assert_eq!(closes[0].a(), 3);
    let back = chunk
        .code
        .iter()
        .rposition(|i| i.opcode() == OpCode::Jmp)
        .unwrap();
    let body_start = (back as i32 + 1 + chunk.code[back].sbx()) as usize;
    assert_eq!(chunk.code[body_start].opcode(), OpCode::Close);
}

#[test]
fn e2e_return_forms() {
    let chunk = compile_str("return");
    assert_eq!(chunk.code.len(), 2);
    assert_eq!(find_all(&chunk, OpCode::Return)[0].b(), 1);

    let chunk = compile_str("return 1, 2");
    assert_eq!(find_all(&chunk, OpCode::Return)[0].b(), 3);

    let chunk = compile_str("return (f())");
    assert!(!has_opcode(&chunk, OpCode::TailCall));
}

#[test]
fn e2e_method_call_statement() {
    let chunk = compile_str("local s = 'abc' s:upper()");
    let slf = find_all(&chunk, OpCode::Self_)[0];
    assert_eq!((slf.a(), slf.b()), (1, 0));
    let call = find_all(&chunk, OpCode::Call)[0];
    assert_eq!((call.a(), call.b(), call.c()), (1, 2, 1));
}
