//! End-to-end interpreter tests.
//!
//! Each case drives `Vm::interpret` with a captured output sink and checks
//! the program's stdout text or the class of error it fails with.

use std::io;
use std::sync::{Arc, Mutex};

use lute_runtime::{InterpretError, Vm, VmOptions};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn run_with(options: VmOptions, source: &str) -> (Result<(), InterpretError>, String) {
    let mut vm = Vm::with_options(options);
    let capture = Capture::default();
    vm.set_output(Box::new(capture.clone()));
    let result = vm.interpret(source);
    (result, capture.text())
}

fn run(source: &str) -> (Result<(), InterpretError>, String) {
    run_with(VmOptions::default(), source)
}

fn expect_output(source: &str, expected: &str) {
    let (result, output) = run(source);
    assert_eq!(result, Ok(()), "program failed: {source}");
    assert_eq!(output, expected);
}

#[test]
fn arithmetic() {
    expect_output("print 1 + 2;", "3\n");
    expect_output("print 10 / 4;", "2.5\n");
    expect_output("print -(3 * 4) + 2;", "-10\n");
    expect_output("print 1 + 2 * 3;", "7\n");
    expect_output("print (1 + 2) * 3;", "9\n");
}

#[test]
fn string_concatenation() {
    expect_output("var a = \"st\"; var b = \"ring\"; print a + b;", "string\n");
    expect_output("print \"\" + \"\";", "\n");
}

#[test]
fn interned_concatenation_compares_equal_to_literals() {
    expect_output("print \"st\" + \"ring\" == \"string\";", "true\n");
}

#[test]
fn recursion() {
    expect_output(
        "fun f(n) { if (n < 2) return n; return f(n - 1) + f(n - 2); } print f(10);",
        "55\n",
    );
}

#[test]
fn closures_share_captured_state() {
    expect_output(
        "fun make() { var x = 0; fun inc() { x = x + 1; return x; } return inc; }\n\
         var c = make(); print c(); print c(); print c();",
        "1\n2\n3\n",
    );
}

#[test]
fn two_closures_see_one_upvalue() {
    expect_output(
        "var get; var set;\n\
         fun make() {\n\
           var x = 10;\n\
           fun g() { return x; }\n\
           fun s(v) { x = v; }\n\
           get = g; set = s;\n\
         }\n\
         make();\n\
         set(42);\n\
         print get();",
        "42\n",
    );
}

#[test]
fn upvalues_close_when_scopes_exit() {
    expect_output(
        "var fns = nil;\n\
         {\n\
           var a = 1;\n\
           fun f() { return a; }\n\
           fns = f;\n\
         }\n\
         print fns();",
        "1\n",
    );
}

#[test]
fn classes_and_methods() {
    expect_output(
        "class Point { init(x, y) { this.x = x; this.y = y; } sum() { return this.x + this.y; } }\n\
         var p = Point(3, 4); print p.sum();",
        "7\n",
    );
}

#[test]
fn bound_methods_remember_their_receiver() {
    expect_output(
        "class Point { init(x, y) { this.x = x; this.y = y; } sum() { return this.x + this.y; } }\n\
         var p = Point(3, 4);\n\
         var m = p.sum;\n\
         print m();",
        "7\n",
    );
}

#[test]
fn fields_shadow_methods_on_invoke() {
    expect_output(
        "class A {}\n\
         fun g() { return 9; }\n\
         var a = A();\n\
         a.f = g;\n\
         print a.f();",
        "9\n",
    );
}

#[test]
fn initializers_return_the_instance() {
    expect_output(
        "class A { init() { this.x = 1; } }\n\
         var a = A();\n\
         print a.x;",
        "1\n",
    );
}

#[test]
fn for_loop() {
    expect_output("for (var i = 0; i < 3; i = i + 1) print i;", "0\n1\n2\n");
}

#[test]
fn while_loop() {
    expect_output(
        "var i = 0; while (i < 3) { print i; i = i + 1; }",
        "0\n1\n2\n",
    );
}

#[test]
fn control_flow_and_logic() {
    expect_output("if (1 < 2) print \"yes\"; else print \"no\";", "yes\n");
    expect_output("if (nil) print \"yes\"; else print \"no\";", "no\n");
    expect_output("print true and \"right\";", "right\n");
    expect_output("print false and \"right\";", "false\n");
    expect_output("print nil or \"fallback\";", "fallback\n");
    expect_output("print 1 or 2;", "1\n");
}

#[test]
fn equality_semantics() {
    expect_output("print nil == nil;", "true\n");
    expect_output("print 0 == false;", "false\n");
    expect_output("print \"a\" == \"a\";", "true\n");
    expect_output("print \"a\" == \"b\";", "false\n");
    expect_output("print 1 == 1.0;", "true\n");
    expect_output("print !nil;", "true\n");
    expect_output("print !0;", "false\n");
}

#[test]
fn numbers_print_with_six_significant_digits() {
    expect_output("print 1 / 3;", "0.333333\n");
    expect_output("print 0.1 + 0.2;", "0.3\n");
    expect_output("print 100000;", "100000\n");
    expect_output("print 1000000;", "1e+06\n");
    expect_output("print 100000000000000;", "1e+14\n");
    expect_output("print 123.456789;", "123.457\n");
    expect_output("print -1 / 0;", "-inf\n");
}

#[test]
fn print_formats() {
    expect_output("print nil;", "nil\n");
    expect_output("print true;", "true\n");
    expect_output("print 2.5;", "2.5\n");
    expect_output("print 3;", "3\n");
    expect_output("fun f() {} print f;", "<fn f>\n");
    expect_output("print clock;", "<native fn>\n");
    expect_output("class A {} print A;", "A\n");
    expect_output("class A {} print A();", "A instance\n");
    expect_output("class A { m() {} } var a = A(); print a.m;", "<fn m>\n");
}

#[test]
fn shadowing_and_scopes() {
    expect_output(
        "var a = \"global\";\n\
         {\n\
           var a = \"local\";\n\
           print a;\n\
         }\n\
         print a;",
        "local\nglobal\n",
    );
}

#[test]
fn add_type_errors() {
    let (result, _) = run("1 + \"a\";");
    assert_eq!(result, Err(InterpretError::Runtime));
    let (result, _) = run("print nil + nil;");
    assert_eq!(result, Err(InterpretError::Runtime));
}

#[test]
fn arithmetic_type_errors() {
    assert_eq!(run("print 1 - \"a\";").0, Err(InterpretError::Runtime));
    assert_eq!(run("print -\"a\";").0, Err(InterpretError::Runtime));
    assert_eq!(run("print \"a\" < \"b\";").0, Err(InterpretError::Runtime));
}

#[test]
fn undefined_variable_errors() {
    assert_eq!(run("print undef;").0, Err(InterpretError::Runtime));
    assert_eq!(run("undef = 1;").0, Err(InterpretError::Runtime));
}

#[test]
fn call_errors() {
    assert_eq!(run("\"x\"();").0, Err(InterpretError::Runtime));
    assert_eq!(run("fun f() {} f(1);").0, Err(InterpretError::Runtime));
    assert_eq!(run("class A {} A(1);").0, Err(InterpretError::Runtime));
    assert_eq!(
        run("class A { init(x) {} } A();").0,
        Err(InterpretError::Runtime)
    );
}

#[test]
fn property_errors() {
    assert_eq!(run("var n = 1; print n.x;").0, Err(InterpretError::Runtime));
    assert_eq!(run("var n = 1; n.x = 2;").0, Err(InterpretError::Runtime));
    assert_eq!(
        run("class A {} var a = A(); print a.missing;").0,
        Err(InterpretError::Runtime)
    );
    assert_eq!(
        run("class A {} var a = A(); a.missing();").0,
        Err(InterpretError::Runtime)
    );
}

#[test]
fn compile_error_classes() {
    assert_eq!(run("return 1;").0, Err(InterpretError::Compile));
    assert_eq!(
        run("class A { init() { return 1; } }").0,
        Err(InterpretError::Compile)
    );
    assert_eq!(run("{ var a = a; }").0, Err(InterpretError::Compile));
    assert_eq!(run("print this;").0, Err(InterpretError::Compile));
    assert_eq!(run("a + b = 3;").0, Err(InterpretError::Compile));
}

#[test]
fn global_self_reference_is_a_runtime_error_not_compile() {
    assert_eq!(run("var a = a;").0, Err(InterpretError::Runtime));
}

#[test]
fn stress_gc_output_matches_normal_output() {
    let programs = [
        "print 1 + 2;",
        "var a = \"st\"; var b = \"ring\"; print a + b;",
        "fun f(n) { if (n < 2) return n; return f(n - 1) + f(n - 2); } print f(10);",
        "fun make() { var x = 0; fun inc() { x = x + 1; return x; } return inc; }\n\
         var c = make(); print c(); print c(); print c();",
        "class Point { init(x, y) { this.x = x; this.y = y; } sum() { return this.x + this.y; } }\n\
         var p = Point(3, 4); print p.sum();",
        "for (var i = 0; i < 3; i = i + 1) print i;",
        "var s = \"\"; for (var i = 0; i < 20; i = i + 1) { s = s + \"ab\"; } print s == s + \"\";",
    ];
    for source in programs {
        let (normal_result, normal_output) = run(source);
        let (stress_result, stress_output) = run_with(
            VmOptions {
                stress_gc: true,
                ..VmOptions::default()
            },
            source,
        );
        assert_eq!(normal_result, stress_result, "result diverged: {source}");
        assert_eq!(normal_output, stress_output, "output diverged: {source}");
    }
}

#[test]
fn state_survives_across_interpret_calls() {
    // The REPL reuses one VM; globals persist between lines.
    let mut vm = Vm::new();
    let capture = Capture::default();
    vm.set_output(Box::new(capture.clone()));
    assert_eq!(vm.interpret("var a = 1;"), Ok(()));
    assert_eq!(vm.interpret("a = a + 1;"), Ok(()));
    assert_eq!(vm.interpret("print a;"), Ok(()));
    assert_eq!(capture.text(), "2\n");
}

#[test]
fn runtime_errors_do_not_poison_the_vm() {
    let mut vm = Vm::new();
    let capture = Capture::default();
    vm.set_output(Box::new(capture.clone()));
    assert_eq!(vm.interpret("print undef;"), Err(InterpretError::Runtime));
    assert_eq!(vm.interpret("print 7;"), Ok(()));
    assert_eq!(capture.text(), "7\n");
}

#[test]
fn heap_stays_bounded_across_collections() {
    // Unreachable garbage created in a loop must not accumulate once
    // collections run on every allocation.
    let (result, _) = run_with(
        VmOptions {
            stress_gc: true,
            ..VmOptions::default()
        },
        "var keep = \"\";\n\
         for (var i = 0; i < 100; i = i + 1) {\n\
           var garbage = \"tmp\" + \"tmp\";\n\
           keep = keep + \"k\";\n\
         }\n\
         print keep == keep;",
    );
    assert_eq!(result, Ok(()));
}
