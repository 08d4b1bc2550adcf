//! Function call dispatch for the VM.

use std::time::Instant;

use lazy_static::lazy_static;

use crate::error::RuntimeError;

use super::object::{NativeFn, Obj, ObjInstance, ObjNative};
use super::value::{ObjRef, Value};
use super::vm::{CallFrame, Vm, FRAMES_MAX};

lazy_static! {
    static ref PROCESS_START: Instant = Instant::now();
}

/// Anchor the clock's epoch; called when the first VM is built.
pub(crate) fn init_process_clock() {
    lazy_static::initialize(&PROCESS_START);
}

/// `clock()`: seconds since process start.
pub(crate) fn native_clock(_args: &[Value]) -> Value {
    Value::number(PROCESS_START.elapsed().as_secs_f64())
}

impl Vm {
    /// Call the value sitting below `argc` arguments on the stack.
    pub(crate) fn call_value(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let callee = self.peek(argc);
        if callee.is_obj() {
            let callee = callee.as_obj();
            match self.heap.get(callee) {
                Obj::Closure(_) => return self.call(callee, argc),
                Obj::Native(native) => {
                    let function = native.function;
                    return self.call_native(function, argc);
                }
                Obj::Class(_) => return self.call_class(callee, argc),
                Obj::BoundMethod(bound) => {
                    let receiver = bound.receiver;
                    let method = bound.method;
                    // The receiver takes the callee slot, becoming `this`.
                    let slot = self.stack.len() - argc - 1;
                    self.stack[slot] = receiver;
                    return self.call(method, argc);
                }
                _ => {}
            }
        }
        Err(self.runtime_error("Can only call functions and classes."))
    }

    /// Push a frame for a closure call after checking arity and call depth.
    pub(crate) fn call(&mut self, closure: ObjRef, argc: usize) -> Result<(), RuntimeError> {
        let arity = self
            .heap
            .function(self.heap.closure(closure).function)
            .arity as usize;
        if argc != arity {
            return Err(
                self.runtime_error(format!("Expected {} arguments but got {}.", arity, argc))
            );
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots: self.stack.len() - argc - 1,
        });
        Ok(())
    }

    /// Natives run synchronously; their `argc + 1` stack entries are replaced
    /// by the single return value.
    fn call_native(&mut self, function: NativeFn, argc: usize) -> Result<(), RuntimeError> {
        let args_start = self.stack.len() - argc;
        let result = function(&self.stack[args_start..]);
        self.stack.truncate(args_start - 1);
        self.push(result);
        Ok(())
    }

    /// Calling a class builds an instance in the callee slot, then runs
    /// `init` if the class has one.
    fn call_class(&mut self, class: ObjRef, argc: usize) -> Result<(), RuntimeError> {
        // The class is rooted in the callee slot while the instance is
        // allocated.
        let instance = self.alloc(Obj::Instance(ObjInstance::new(class)));
        let slot = self.stack.len() - argc - 1;
        self.stack[slot] = Value::obj(instance);

        let init = self
            .heap
            .class(class)
            .methods
            .get(&self.heap.init_string())
            .copied();
        match init {
            Some(init) => self.call(init.as_obj(), argc),
            None if argc != 0 => {
                Err(self.runtime_error(format!("Expected 0 arguments but got {}.", argc)))
            }
            None => Ok(()),
        }
    }

    /// Register a host function under a global name. The name and the native
    /// sit on the stack while the other is allocated.
    pub fn define_native(&mut self, name: &str, function: NativeFn) {
        let name = self.intern(name);
        self.push(Value::obj(name));
        let native = self.alloc(Obj::Native(ObjNative { function }));
        self.push(Value::obj(native));
        self.globals.insert(name, Value::obj(native));
        self.pop();
        self.pop();
    }
}
