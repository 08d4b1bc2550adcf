//! The bytecode virtual machine — stack-based execution engine.

use std::collections::HashMap;

use crate::error::{LoxError, RuntimeError};

use super::heap::Heap;
use super::object::{Obj, ObjClass, ObjClosure, ObjUpvalue};
use super::opcode::Op;
use super::value::{ObjRef, Value};

/// Maximum call depth.
pub const FRAMES_MAX: usize = 64;
/// Value stack capacity: one full window of 256 slots per frame.
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// A call frame on the VM call stack.
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    /// The closure being executed.
    pub closure: ObjRef,
    /// Instruction pointer (index into the function's chunk).
    pub ip: usize,
    /// Base index into the value stack; slot 0 is the callee (and `this`
    /// for methods).
    pub slots: usize,
}

/// The virtual machine.
pub struct Vm {
    /// Value stack.
    pub stack: Vec<Value>,
    /// Call frame stack.
    pub frames: Vec<CallFrame>,
    /// Global variables, keyed by interned name handle.
    pub globals: HashMap<ObjRef, Value>,
    /// Open upvalues, sorted by decreasing stack slot.
    pub open_upvalues: Vec<ObjRef>,
    /// The object heap and its collector.
    pub heap: Heap,
    /// Everything `print` wrote, one entry per line (also goes to stdout).
    pub output: Vec<String>,
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Self {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: HashMap::new(),
            open_upvalues: Vec::new(),
            heap: Heap::new(),
            output: Vec::new(),
        };
        super::vm_calls::init_process_clock();
        vm.define_native("clock", super::vm_calls::native_clock);
        vm
    }

    /// Compile and execute one source buffer. Globals persist across calls,
    /// so a REPL can feed lines to the same VM; after a runtime error the
    /// stack is reset and the VM remains usable.
    pub fn interpret(&mut self, source: &str) -> Result<(), LoxError> {
        let function = {
            let Vm { heap, globals, .. } = self;
            crate::compiler::compile(source, heap, globals)?
        };

        self.push(Value::obj(function));
        let closure = self.alloc(Obj::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.pop();
        self.push(Value::obj(closure));
        self.call(closure, 0)?;
        self.run()?;
        Ok(())
    }

    /// The dispatch loop.
    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            let frame_idx = self.frames.len() - 1;
            let ip = self.frames[frame_idx].ip;
            let op = self.frame_function(frame_idx).chunk.code[ip];

            #[cfg(feature = "trace-execution")]
            {
                let mut slots = String::from("          ");
                for &value in &self.stack {
                    slots.push_str(&format!("[ {} ]", self.heap.value_to_string(value)));
                }
                eprintln!("{}", slots);
                let function = self.frame_function(frame_idx);
                eprintln!(
                    "{}",
                    super::disassembler::instruction_at(&self.heap, &function.chunk, ip, op)
                );
            }

            self.frames[frame_idx].ip += 1;

            match op {
                Op::Constant(idx) => {
                    let value = self.read_constant(frame_idx, idx);
                    self.push(value);
                }
                Op::Nil => self.push(Value::NIL),
                Op::True => self.push(Value::boolean(true)),
                Op::False => self.push(Value::boolean(false)),

                Op::Pop => {
                    self.pop();
                }

                Op::GetLocal(slot) => {
                    let base = self.frames[frame_idx].slots;
                    let value = self.stack[base + slot as usize];
                    self.push(value);
                }
                Op::SetLocal(slot) => {
                    let base = self.frames[frame_idx].slots;
                    self.stack[base + slot as usize] = self.peek(0);
                }
                Op::GetGlobal(idx) => {
                    let name = self.read_string_constant(frame_idx, idx);
                    match self.globals.get(&name) {
                        Some(&value) => self.push(value),
                        None => {
                            let text = self.heap.string(name).chars.clone();
                            return Err(
                                self.runtime_error(format!("Undefined variable '{}'.", text))
                            );
                        }
                    }
                }
                Op::DefineGlobal(idx) => {
                    let name = self.read_string_constant(frame_idx, idx);
                    let value = self.peek(0);
                    self.globals.insert(name, value);
                    self.pop();
                }
                Op::SetGlobal(idx) => {
                    let name = self.read_string_constant(frame_idx, idx);
                    if !self.globals.contains_key(&name) {
                        let text = self.heap.string(name).chars.clone();
                        return Err(self.runtime_error(format!("Undefined variable '{}'.", text)));
                    }
                    // Assignment is an expression; the value stays on the stack.
                    let value = self.peek(0);
                    self.globals.insert(name, value);
                }

                Op::GetUpvalue(idx) => {
                    let closure = self.frames[frame_idx].closure;
                    let upvalue = self.heap.closure(closure).upvalues[idx as usize];
                    let value = match *self.heap.upvalue(upvalue) {
                        ObjUpvalue::Open(slot) => self.stack[slot],
                        ObjUpvalue::Closed(value) => value,
                    };
                    self.push(value);
                }
                Op::SetUpvalue(idx) => {
                    let closure = self.frames[frame_idx].closure;
                    let upvalue = self.heap.closure(closure).upvalues[idx as usize];
                    let value = self.peek(0);
                    match self.heap.upvalue_mut(upvalue) {
                        ObjUpvalue::Open(slot) => {
                            let slot = *slot;
                            self.stack[slot] = value;
                        }
                        ObjUpvalue::Closed(closed) => *closed = value,
                    }
                }
                Op::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }

                Op::GetProperty(idx) => {
                    let name = self.read_string_constant(frame_idx, idx);
                    self.get_property(name)?;
                }
                Op::SetProperty(idx) => {
                    let name = self.read_string_constant(frame_idx, idx);
                    self.set_property(name)?;
                }
                Op::GetSuper(idx) => {
                    let name = self.read_string_constant(frame_idx, idx);
                    let superclass = self.pop().as_obj();
                    self.bind_method(superclass, name)?;
                }

                Op::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::boolean(a == b));
                }
                Op::Greater => {
                    let (a, b) = self.pop_numbers()?;
                    self.push(Value::boolean(a > b));
                }
                Op::Less => {
                    let (a, b) = self.pop_numbers()?;
                    self.push(Value::boolean(a < b));
                }
                Op::Add => {
                    if self.peek(0).is_number() && self.peek(1).is_number() {
                        let b = self.pop().as_number();
                        let a = self.pop().as_number();
                        self.push(Value::number(a + b));
                    } else if self.is_string(self.peek(0)) && self.is_string(self.peek(1)) {
                        self.concatenate();
                    } else {
                        return Err(
                            self.runtime_error("Operands must be two numbers or two strings.")
                        );
                    }
                }
                Op::Subtract => {
                    let (a, b) = self.pop_numbers()?;
                    self.push(Value::number(a - b));
                }
                Op::Multiply => {
                    let (a, b) = self.pop_numbers()?;
                    self.push(Value::number(a * b));
                }
                Op::Divide => {
                    // IEEE semantics: division by zero yields inf/NaN.
                    let (a, b) = self.pop_numbers()?;
                    self.push(Value::number(a / b));
                }
                Op::Not => {
                    let value = self.pop();
                    self.push(Value::boolean(value.is_falsey()));
                }
                Op::Negate => {
                    if !self.peek(0).is_number() {
                        return Err(self.runtime_error("Operand must be a number."));
                    }
                    let n = self.pop().as_number();
                    self.push(Value::number(-n));
                }

                Op::Print => {
                    let value = self.pop();
                    let text = self.heap.value_to_string(value);
                    println!("{}", text);
                    self.output.push(text);
                }

                Op::Jump(offset) => {
                    self.frames[frame_idx].ip += offset as usize;
                }
                Op::JumpIfFalse(offset) => {
                    if self.peek(0).is_falsey() {
                        self.frames[frame_idx].ip += offset as usize;
                    }
                }
                Op::Loop(offset) => {
                    self.frames[frame_idx].ip -= offset as usize;
                }

                Op::Call(argc) => {
                    self.call_value(argc as usize)?;
                }
                Op::Invoke(idx, argc) => {
                    let name = self.read_string_constant(frame_idx, idx);
                    self.invoke(name, argc as usize)?;
                }
                Op::SuperInvoke(idx, argc) => {
                    let name = self.read_string_constant(frame_idx, idx);
                    let superclass = self.pop().as_obj();
                    self.invoke_from_class(superclass, name, argc as usize)?;
                }
                Op::Closure(idx) => {
                    let function = self.read_constant(frame_idx, idx).as_obj();
                    let descriptors = self.heap.function(function).upvalues.clone();
                    let closure = self.alloc(Obj::Closure(ObjClosure {
                        function,
                        upvalues: Vec::with_capacity(descriptors.len()),
                    }));
                    // The closure is rooted on the stack while its upvalues
                    // are captured, which may itself allocate.
                    self.push(Value::obj(closure));
                    for descriptor in descriptors {
                        let upvalue = if descriptor.is_local {
                            let slot =
                                self.frames[frame_idx].slots + descriptor.index as usize;
                            self.capture_upvalue(slot)
                        } else {
                            let enclosing = self.frames[frame_idx].closure;
                            self.heap.closure(enclosing).upvalues[descriptor.index as usize]
                        };
                        self.heap.closure_mut(closure).upvalues.push(upvalue);
                    }
                }
                Op::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("returning with no active frame");
                    self.close_upvalues(frame.slots);
                    if self.frames.is_empty() {
                        // The top-level script has finished.
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.slots);
                    self.push(result);
                }

                Op::Class(idx) => {
                    let name = self.read_string_constant(frame_idx, idx);
                    let class = self.alloc(Obj::Class(ObjClass::new(name)));
                    self.push(Value::obj(class));
                }
                Op::Inherit => {
                    let superclass = self.peek(1);
                    if !superclass.is_obj()
                        || !matches!(self.heap.get(superclass.as_obj()), Obj::Class(_))
                    {
                        return Err(self.runtime_error("Superclass must be a class."));
                    }
                    let subclass = self.peek(0).as_obj();
                    let methods = self.heap.class(superclass.as_obj()).methods.clone();
                    self.heap.class_mut(subclass).methods = methods;
                    self.pop();
                }
                Op::Method(idx) => {
                    let name = self.read_string_constant(frame_idx, idx);
                    self.define_method(name);
                }
            }
        }
    }

    // --- Stack operations ---

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    #[inline]
    pub fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    /// Pop a numeric operand pair, left below right.
    fn pop_numbers(&mut self) -> Result<(f64, f64), RuntimeError> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(self.runtime_error("Operands must be numbers."));
        }
        let b = self.pop().as_number();
        let a = self.pop().as_number();
        Ok((a, b))
    }

    // --- Helpers ---

    pub(crate) fn frame_function(&self, frame_idx: usize) -> &super::object::ObjFunction {
        let closure = self.frames[frame_idx].closure;
        self.heap.function(self.heap.closure(closure).function)
    }

    pub(crate) fn read_constant(&self, frame_idx: usize, idx: u8) -> Value {
        self.frame_function(frame_idx).chunk.constants[idx as usize]
    }

    pub(crate) fn read_string_constant(&self, frame_idx: usize, idx: u8) -> ObjRef {
        self.read_constant(frame_idx, idx).as_obj()
    }

    pub(crate) fn is_string(&self, value: Value) -> bool {
        value.is_obj() && matches!(self.heap.get(value.as_obj()), Obj::String(_))
    }

    pub(crate) fn is_instance(&self, value: Value) -> bool {
        value.is_obj() && matches!(self.heap.get(value.as_obj()), Obj::Instance(_))
    }

    /// Concatenate the two strings on top of the stack. Both stay on the
    /// stack (rooted) until the result exists.
    fn concatenate(&mut self) {
        let b = self.peek(0).as_obj();
        let a = self.peek(1).as_obj();
        let mut text = String::with_capacity(
            self.heap.string(a).chars.len() + self.heap.string(b).chars.len(),
        );
        text.push_str(&self.heap.string(a).chars);
        text.push_str(&self.heap.string(b).chars);
        let result = self.intern_owned(text);
        self.pop();
        self.pop();
        self.push(Value::obj(result));
    }

    // --- Upvalues ---

    /// Reuse the open upvalue for `slot` if one exists, otherwise create one,
    /// keeping the list sorted by decreasing slot.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut i = 0;
        while i < self.open_upvalues.len() {
            match *self.heap.upvalue(self.open_upvalues[i]) {
                ObjUpvalue::Open(s) if s > slot => i += 1,
                ObjUpvalue::Open(s) if s == slot => return self.open_upvalues[i],
                _ => break,
            }
        }
        let created = self.alloc(Obj::Upvalue(ObjUpvalue::Open(slot)));
        self.open_upvalues.insert(i, created);
        created
    }

    /// Close every open upvalue at or above `last`, moving the stack value
    /// into the upvalue itself.
    pub(crate) fn close_upvalues(&mut self, last: usize) {
        while let Some(&upvalue) = self.open_upvalues.first() {
            let slot = match *self.heap.upvalue(upvalue) {
                ObjUpvalue::Open(slot) => slot,
                ObjUpvalue::Closed(_) => unreachable!("closed upvalue on the open list"),
            };
            if slot < last {
                break;
            }
            let value = self.stack[slot];
            *self.heap.upvalue_mut(upvalue) = ObjUpvalue::Closed(value);
            self.open_upvalues.remove(0);
        }
    }

    // --- Allocation & collection ---

    /// Allocate through the VM so a pending collection runs first, while the
    /// caller's in-flight values are still rooted.
    pub(crate) fn alloc(&mut self, obj: Obj) -> ObjRef {
        self.maybe_collect();
        self.heap.allocate(obj)
    }

    pub(crate) fn intern(&mut self, text: &str) -> ObjRef {
        self.maybe_collect();
        self.heap.intern(text)
    }

    pub(crate) fn intern_owned(&mut self, text: String) -> ObjRef {
        self.maybe_collect();
        self.heap.intern_owned(text)
    }

    fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    /// Run a collection rooted in the VM: the value stack, every frame's
    /// closure, the globals table (keys and values), and the open upvalues.
    pub fn collect_garbage(&mut self) {
        let Vm {
            heap,
            stack,
            frames,
            globals,
            open_upvalues,
            ..
        } = self;
        heap.collect(|marker| {
            for &value in stack.iter() {
                marker.mark_value(value);
            }
            for frame in frames.iter() {
                marker.mark_object(frame.closure);
            }
            for (&name, &value) in globals.iter() {
                marker.mark_object(name);
                marker.mark_value(value);
            }
            for &upvalue in open_upvalues.iter() {
                marker.mark_object(upvalue);
            }
        });
    }

    // --- Errors ---

    /// Build a runtime error with the current stack trace, then reset the
    /// stack so the VM stays usable.
    pub(crate) fn runtime_error(&mut self, message: impl Into<String>) -> RuntimeError {
        let line = match self.frames.last() {
            Some(frame) => {
                let frames_top = self.frames.len() - 1;
                self.frame_function(frames_top)
                    .chunk
                    .line(frame.ip.saturating_sub(1))
            }
            None => 0,
        };
        let mut error = RuntimeError::new(message, line);
        for (i, frame) in self.frames.iter().enumerate().rev() {
            let function = self.frame_function(i);
            let line = function.chunk.line(frame.ip.saturating_sub(1));
            let name = match function.name {
                Some(name) => format!("{}()", self.heap.string(name).chars),
                None => "script".to_string(),
            };
            error.trace.push(format!("[line {}] in {}", line, name));
        }
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        error
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Result<Vec<String>, LoxError> {
        let mut vm = Vm::new();
        vm.interpret(source)?;
        Ok(vm.output)
    }

    fn run_ok(source: &str) -> Vec<String> {
        run(source).expect("program failed")
    }

    fn runtime_message(source: &str) -> String {
        match run(source) {
            Err(LoxError::Runtime(e)) => e.message,
            other => panic!("expected runtime error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(run_ok("print 1 + 2 * 3;"), vec!["7"]);
        assert_eq!(run_ok("print (1 + 2) * 3;"), vec!["9"]);
        assert_eq!(run_ok("print -4 + 2;"), vec!["-2"]);
        assert_eq!(run_ok("print 10 / 4;"), vec!["2.5"]);
    }

    #[test]
    fn division_by_zero_is_ieee() {
        assert_eq!(run_ok("print 1 / 0;"), vec!["inf"]);
        assert_eq!(run_ok("print -1 / 0;"), vec!["-inf"]);
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            run_ok("var a = \"foo\"; var b = \"bar\"; print a + b;"),
            vec!["foobar"]
        );
    }

    #[test]
    fn comparison_and_equality() {
        assert_eq!(run_ok("print 1 < 2;"), vec!["true"]);
        assert_eq!(run_ok("print 2 <= 1;"), vec!["false"]);
        assert_eq!(run_ok("print \"a\" == \"a\";"), vec!["true"]);
        assert_eq!(run_ok("print \"a\" == \"b\";"), vec!["false"]);
        assert_eq!(run_ok("print nil == false;"), vec!["false"]);
        assert_eq!(run_ok("print 1 != 2;"), vec!["true"]);
    }

    #[test]
    fn truthiness() {
        assert_eq!(run_ok("print !nil;"), vec!["true"]);
        assert_eq!(run_ok("print !false;"), vec!["true"]);
        assert_eq!(run_ok("print !0;"), vec!["false"]);
        assert_eq!(run_ok("print !\"\";"), vec!["false"]);
    }

    #[test]
    fn globals_and_locals() {
        assert_eq!(
            run_ok("var x = 10; { var y = x + 5; print y; } print x;"),
            vec!["15", "10"]
        );
    }

    #[test]
    fn shadowing_in_blocks() {
        assert_eq!(
            run_ok("var a = \"outer\"; { var a = \"inner\"; print a; } print a;"),
            vec!["inner", "outer"]
        );
    }

    #[test]
    fn if_else_and_logic() {
        assert_eq!(
            run_ok("if (1 < 2) { print \"yes\"; } else { print \"no\"; }"),
            vec!["yes"]
        );
        assert_eq!(run_ok("print true and \"right\";"), vec!["right"]);
        assert_eq!(run_ok("print false and \"right\";"), vec!["false"]);
        assert_eq!(run_ok("print false or \"right\";"), vec!["right"]);
        assert_eq!(run_ok("print \"left\" or \"right\";"), vec!["left"]);
    }

    #[test]
    fn while_loop() {
        assert_eq!(
            run_ok("var i = 0; var sum = 0; while (i < 10) { sum = sum + i; i = i + 1; } print sum;"),
            vec!["45"]
        );
    }

    #[test]
    fn for_loop_all_clauses() {
        assert_eq!(
            run_ok("var sum = 0; for (var i = 1; i <= 4; i = i + 1) { sum = sum + i; } print sum;"),
            vec!["10"]
        );
    }

    #[test]
    fn for_loop_optional_clauses() {
        // No initializer or increment: both live outside the header.
        assert_eq!(
            run_ok("var i = 0; for (; i < 3;) { i = i + 1; } print i;"),
            vec!["3"]
        );
        // No condition: the loop runs until returned out of.
        assert_eq!(
            run_ok("fun f() { for (var i = 0;; i = i + 1) { if (i == 4) { return i; } } } print f();"),
            vec!["4"]
        );
    }

    #[test]
    fn function_calls_and_returns() {
        assert_eq!(
            run_ok("fun add(a, b) { return a + b; } print add(3, 4);"),
            vec!["7"]
        );
        assert_eq!(
            run_ok("fun nothing() {} print nothing();"),
            vec!["nil"]
        );
    }

    #[test]
    fn recursion() {
        assert_eq!(
            run_ok("fun fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); } print fib(10);"),
            vec!["55"]
        );
    }

    #[test]
    fn closures_capture_by_reference() {
        assert_eq!(
            run_ok(
                "fun makeCounter() { var i = 0; fun count() { i = i + 1; print i; } return count; }\n\
                 var c = makeCounter(); c(); c(); c();"
            ),
            vec!["1", "2", "3"]
        );
    }

    #[test]
    fn upvalue_escapes_scope() {
        assert_eq!(
            run_ok(
                "var f;\n{ var x = \"captured\"; fun g() { print x; } f = g; }\nf();"
            ),
            vec!["captured"]
        );
    }

    #[test]
    fn sibling_closures_share_one_upvalue() {
        assert_eq!(
            run_ok(
                "fun pair() { var x = 0; fun set(v) { x = v; } fun get() { print x; } set(42); get(); }\npair();"
            ),
            vec!["42"]
        );
    }

    #[test]
    fn classes_fields_and_methods() {
        assert_eq!(
            run_ok(
                "class Point { init(x, y) { this.x = x; this.y = y; } sum() { return this.x + this.y; } }\n\
                 var p = Point(3, 4); print p.sum(); print p.x;"
            ),
            vec!["7", "3"]
        );
    }

    #[test]
    fn methods_bind_their_receiver() {
        assert_eq!(
            run_ok(
                "class Greeter { init(name) { this.name = name; } greet() { print this.name; } }\n\
                 var m = Greeter(\"bound\").greet; m();"
            ),
            vec!["bound"]
        );
    }

    #[test]
    fn inheritance_and_super() {
        assert_eq!(
            run_ok(
                "class A { greet() { print \"A\"; } }\n\
                 class B < A { greet() { super.greet(); print \"B\"; } }\n\
                 B().greet();"
            ),
            vec!["A", "B"]
        );
    }

    #[test]
    fn fields_shadow_methods_in_invoke() {
        assert_eq!(
            run_ok(
                "fun shout() { print \"field\"; }\n\
                 class C { speak() { print \"method\"; } }\n\
                 var c = C(); c.speak(); c.speak = shout; c.speak();"
            ),
            vec!["method", "field"]
        );
    }

    #[test]
    fn initializer_returns_the_instance() {
        assert_eq!(
            run_ok("class C { init() { this.v = 1; } } print C().v;"),
            vec!["1"]
        );
        assert_eq!(
            run_ok("class C { init() { if (true) { return; } this.v = 1; } } print C();"),
            vec!["C instance"]
        );
    }

    #[test]
    fn class_without_init_takes_no_arguments() {
        assert_eq!(
            runtime_message("class C {} C(1);"),
            "Expected 0 arguments but got 1."
        );
    }

    #[test]
    fn print_representations() {
        assert_eq!(run_ok("print nil;"), vec!["nil"]);
        assert_eq!(run_ok("fun f() {} print f;"), vec!["<fn f>"]);
        assert_eq!(run_ok("print clock;"), vec!["<native fn>"]);
        assert_eq!(run_ok("class C {} print C;"), vec!["C"]);
        assert_eq!(run_ok("class C {} print C();"), vec!["C instance"]);
    }

    #[test]
    fn clock_native_advances() {
        assert_eq!(run_ok("print clock() <= clock();"), vec!["true"]);
    }

    #[test]
    fn undefined_variable_errors() {
        assert_eq!(runtime_message("print missing;"), "Undefined variable 'missing'.");
        assert_eq!(runtime_message("missing = 1;"), "Undefined variable 'missing'.");
    }

    #[test]
    fn operand_type_errors() {
        assert_eq!(runtime_message("print -\"no\";"), "Operand must be a number.");
        assert_eq!(runtime_message("print 1 < \"no\";"), "Operands must be numbers.");
        assert_eq!(
            runtime_message("print 1 + \"no\";"),
            "Operands must be two numbers or two strings."
        );
    }

    #[test]
    fn calling_non_callables_errors() {
        assert_eq!(
            runtime_message("var x = 1; x();"),
            "Can only call functions and classes."
        );
        assert_eq!(
            runtime_message("\"text\"();"),
            "Can only call functions and classes."
        );
    }

    #[test]
    fn arity_is_checked() {
        assert_eq!(
            runtime_message("fun f(a, b) {} f(1);"),
            "Expected 2 arguments but got 1."
        );
    }

    #[test]
    fn property_errors() {
        assert_eq!(
            runtime_message("print 4.x;"),
            "Only instances have properties."
        );
        assert_eq!(
            runtime_message("4.x = 1;"),
            "Only instances have fields."
        );
        assert_eq!(
            runtime_message("class C {} C().missing;"),
            "Undefined property 'missing'."
        );
        assert_eq!(
            runtime_message("class C {} C().missing();"),
            "Undefined property 'missing'."
        );
        assert_eq!(runtime_message("4.m();"), "Only instances have methods.");
    }

    #[test]
    fn inheriting_from_non_class_errors() {
        assert_eq!(
            runtime_message("var NotClass = 1; class C < NotClass {}"),
            "Superclass must be a class."
        );
    }

    #[test]
    fn deep_recursion_overflows() {
        assert_eq!(
            runtime_message("fun f() { f(); } f();"),
            "Stack overflow."
        );
    }

    #[test]
    fn call_depth_63_is_fine() {
        // The script frame occupies one of the 64 slots.
        assert_eq!(
            run_ok("fun f(n) { if (n == 0) { return 0; } return f(n - 1); } print f(62);"),
            vec!["0"]
        );
    }

    #[test]
    fn runtime_errors_carry_a_stack_trace() {
        let mut vm = Vm::new();
        let err = vm
            .interpret("fun inner() { return missing; } fun outer() { return inner(); } outer();")
            .unwrap_err();
        let LoxError::Runtime(err) = err else {
            panic!("expected runtime error")
        };
        assert_eq!(err.trace.len(), 3);
        assert!(err.trace[0].contains("in inner()"));
        assert!(err.trace[1].contains("in outer()"));
        assert!(err.trace[2].contains("in script"));
    }

    #[test]
    fn vm_is_usable_after_runtime_error() {
        let mut vm = Vm::new();
        assert!(vm.interpret("print missing;").is_err());
        vm.interpret("print \"still alive\";").unwrap();
        assert_eq!(vm.output, vec!["still alive"]);
    }

    #[test]
    fn globals_persist_across_interpret_calls() {
        let mut vm = Vm::new();
        vm.interpret("var counter = 1;").unwrap();
        vm.interpret("counter = counter + 1; print counter;").unwrap();
        assert_eq!(vm.output, vec!["2"]);
    }

    #[test]
    fn string_interning_makes_equality_pointer_equality() {
        let mut vm = Vm::new();
        vm.interpret("var a = \"uni\" + \"que\"; var b = \"unique\"; print a == b;")
            .unwrap();
        assert_eq!(vm.output, vec!["true"]);
    }

    #[test]
    fn temporary_garbage_is_reclaimed() {
        let mut vm = Vm::new();
        vm.interpret("var i = 0;").unwrap();
        vm.collect_garbage();
        let baseline = vm.heap.bytes_allocated();

        // Each iteration builds a closure that dies immediately.
        vm.interpret("while (i < 1000) { fun tmp() { return i; } i = i + 1; }")
            .unwrap();
        vm.collect_garbage();
        let after = vm.heap.bytes_allocated();
        assert!(
            after <= baseline + 4096,
            "leaked {} bytes across the loop",
            after - baseline
        );
    }

    #[test]
    fn open_upvalue_list_stays_sorted() {
        let mut vm = Vm::new();
        vm.interpret(
            "fun outer() {\n\
               var a = 1; var b = 2; var c = 3;\n\
               fun capture() { return a + b + c; }\n\
               print capture();\n\
             }\n\
             outer();",
        )
        .unwrap();
        assert_eq!(vm.output, vec!["6"]);
        assert!(vm.open_upvalues.is_empty());
    }
}
