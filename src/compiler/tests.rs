//! Compiler tests: diagnostics, resolution limits, and bytecode shape.

use std::collections::HashMap;

use crate::vm::disassembler::disassemble;
use crate::vm::heap::Heap;

use super::compile;

fn compile_source(source: &str) -> Result<(), Vec<String>> {
    let mut heap = Heap::new();
    let globals = HashMap::new();
    match compile(source, &mut heap, &globals) {
        Ok(_) => Ok(()),
        Err(err) => Err(err.diagnostics),
    }
}

fn assert_compiles(source: &str) {
    if let Err(diagnostics) = compile_source(source) {
        panic!("unexpected compile errors: {:#?}", diagnostics);
    }
}

fn first_error(source: &str) -> String {
    compile_source(source)
        .expect_err("expected a compile error")
        .remove(0)
}

#[test]
fn compiles_the_language_surface() {
    assert_compiles("var x = 1; print x + 2 * 3 - -4;");
    assert_compiles("fun f(a, b) { return a + b; } print f(1, 2);");
    assert_compiles("if (1 < 2 and 3 < 4 or true) { print \"ok\"; } else { print \"no\"; }");
    assert_compiles("for (var i = 0; i < 10; i = i + 1) { print i; }");
    assert_compiles("while (false) {}");
    assert_compiles("{ var local = 1; { var inner = local; } }");
    assert_compiles(
        "class A { init(n) { this.n = n; } get() { return this.n; } }\n\
         class B < A { get() { return super.get() + 1; } }\n\
         print B(1).get();",
    );
}

#[test]
fn error_format_matches_report_style() {
    assert_eq!(
        first_error("print ;"),
        "[line 1] Error at ';': Expect expression."
    );
    assert_eq!(
        first_error("var x = 1"),
        "[line 1] Error at end: Expect ';' after variable declaration."
    );
    assert_eq!(
        first_error("\n\nprint @;"),
        "[line 3] Error: Unexpected character."
    );
}

#[test]
fn panic_mode_recovers_at_statement_boundaries() {
    let diagnostics = compile_source("var 1 = 2; print ;").unwrap_err();
    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics[0].contains("Expect variable name."));
    assert!(diagnostics[1].contains("Expect expression."));
}

#[test]
fn cascaded_errors_are_suppressed_until_sync() {
    // Everything after the first error in this statement is garbage, but
    // only one diagnostic may surface for it.
    let diagnostics = compile_source("print ) ) );").unwrap_err();
    assert_eq!(diagnostics.len(), 1);
}

#[test]
fn invalid_assignment_targets() {
    assert!(first_error("a + b = c;").contains("Invalid assignment target."));
    assert!(first_error("1 = 2;").contains("Invalid assignment target."));
}

#[test]
fn duplicate_local_declaration_errors() {
    assert!(first_error("{ var a; var a; }")
        .contains("Already a variable with this name in this scope."));
    // Shadowing in an inner scope is fine.
    assert_compiles("{ var a; { var a; } }");
}

#[test]
fn reading_a_local_in_its_own_initializer_errors() {
    assert!(first_error("{ var a = a; }")
        .contains("Can't read local variable in its own initializer."));
}

#[test]
fn return_outside_a_function_errors() {
    assert!(first_error("return;").contains("Can't return from top-level code."));
}

#[test]
fn returning_a_value_from_init_errors() {
    assert!(first_error("class C { init() { return 1; } }")
        .contains("Can't return a value from an initializer."));
    assert_compiles("class C { init() { return; } }");
}

#[test]
fn this_and_super_require_a_class() {
    assert!(first_error("print this;").contains("Can't use 'this' outside of a class."));
    assert!(first_error("print super.x;").contains("Can't use 'super' outside of a class."));
    assert!(first_error("fun f() { return this; }")
        .contains("Can't use 'this' outside of a class."));
    assert!(
        first_error("class C { m() { return super.m(); } }")
            .contains("Can't use 'super' in a class with no superclass.")
    );
}

#[test]
fn a_class_cannot_inherit_from_itself() {
    assert!(first_error("class A < A {}").contains("A class can't inherit from itself."));
}

fn function_with_locals(count: usize) -> String {
    let mut source = String::from("fun f() { ");
    for i in 0..count {
        source.push_str(&format!("var v{}; ", i));
    }
    source.push('}');
    source
}

#[test]
fn local_slots_are_capped_at_256() {
    // Slot 0 is reserved for the callee, leaving 255 declarable slots.
    assert_compiles(&function_with_locals(255));
    assert!(first_error(&function_with_locals(256))
        .contains("Too many local variables in function."));
}

fn script_with_constants(count: usize) -> String {
    let mut source = String::new();
    for i in 0..count {
        source.push_str(&format!("print {};", i));
    }
    source
}

#[test]
fn constant_pool_is_capped_at_256() {
    assert_compiles(&script_with_constants(256));
    assert!(first_error(&script_with_constants(257))
        .contains("Too many constants in one chunk."));
}

fn nested_captures(outer_vars: usize) -> String {
    // The innermost function captures 254 locals of its parent plus
    // `outer_vars` of its grandparent (threaded through the parent).
    let mut source = String::from("fun a() { ");
    for i in 0..outer_vars {
        source.push_str(&format!("var g{}; ", i));
    }
    source.push_str("fun b() { ");
    for i in 0..254 {
        source.push_str(&format!("var p{}; ", i));
    }
    source.push_str("fun c() { ");
    for i in 0..254 {
        source.push_str(&format!("p{}; ", i));
    }
    for i in 0..outer_vars {
        source.push_str(&format!("g{}; ", i));
    }
    source.push_str("} } }");
    source
}

#[test]
fn upvalues_are_capped_at_256() {
    assert_compiles(&nested_captures(2)); // 256 captures
    assert!(first_error(&nested_captures(3)) // 257 captures
        .contains("Too many closure variables in function."));
}

fn call_with_args(count: usize) -> String {
    let mut source = String::from("f(");
    for i in 0..count {
        if i > 0 {
            source.push_str(", ");
        }
        source.push('a');
    }
    source.push_str(");");
    source
}

#[test]
fn call_arguments_are_capped_at_255() {
    assert_compiles(&call_with_args(255));
    assert!(first_error(&call_with_args(256)).contains("Can't have more than 255 arguments."));
}

fn params(count: usize) -> String {
    let mut source = String::from("fun f(");
    for i in 0..count {
        if i > 0 {
            source.push_str(", ");
        }
        source.push_str(&format!("p{}", i));
    }
    source.push_str(") {}");
    source
}

#[test]
fn parameters_are_capped_at_255() {
    assert_compiles(&params(255));
    assert!(first_error(&params(256)).contains("Can't have more than 255 parameters."));
}

#[test]
fn oversized_jumps_are_compile_errors() {
    let mut body = String::new();
    for _ in 0..33_000 {
        body.push_str("a; ");
    }
    assert!(first_error(&format!("if (true) {{ {} }}", body))
        .contains("Too much code to jump over."));
    assert!(first_error(&format!("while (true) {{ {} }}", body))
        .contains("Loop body too large."));
}

#[test]
fn disassembly_is_stable() {
    let mut heap = Heap::new();
    let globals = HashMap::new();
    let function = compile("print 1 + 2 * 3;", &mut heap, &globals).unwrap();
    let expected = "\
== <script> (arity=0, upvalues=0) ==
0000    1 CONSTANT         0 (1)
0001    | CONSTANT         1 (2)
0002    | CONSTANT         2 (3)
0003    | MULTIPLY
0004    | ADD
0005    | PRINT
0006    | NIL
0007    | RETURN
";
    assert_eq!(disassemble(&heap, function), expected);
}

#[test]
fn closures_disassemble_with_their_functions() {
    let mut heap = Heap::new();
    let globals = HashMap::new();
    let function = compile(
        "fun outer() { var x = 1; fun inner() { return x; } return inner; }",
        &mut heap,
        &globals,
    )
    .unwrap();
    let text = disassemble(&heap, function);
    assert!(text.contains("== <script>"));
    assert!(text.contains("== <fn outer>"));
    assert!(text.contains("== <fn inner> (arity=0, upvalues=1) =="));
    assert!(text.contains("GET_UPVALUE"));
    assert!(text.contains("CLOSURE"));
}
