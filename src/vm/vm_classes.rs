//! Property access, method binding, and invocation for the VM.

use crate::error::RuntimeError;

use super::object::{Obj, ObjBoundMethod};
use super::value::{ObjRef, Value};
use super::vm::Vm;

impl Vm {
    /// `GET_PROPERTY`: fields win over methods; a method read produces a
    /// bound method.
    pub(crate) fn get_property(&mut self, name: ObjRef) -> Result<(), RuntimeError> {
        let receiver = self.peek(0);
        if !self.is_instance(receiver) {
            return Err(self.runtime_error("Only instances have properties."));
        }
        let instance = receiver.as_obj();
        if let Some(&value) = self.heap.instance(instance).fields.get(&name) {
            self.pop();
            self.push(value);
            return Ok(());
        }
        let class = self.heap.instance(instance).class;
        self.bind_method(class, name)
    }

    /// `SET_PROPERTY`: the instance sits at depth 1, the value on top; the
    /// value is left as the expression's result.
    pub(crate) fn set_property(&mut self, name: ObjRef) -> Result<(), RuntimeError> {
        let target = self.peek(1);
        if !self.is_instance(target) {
            return Err(self.runtime_error("Only instances have fields."));
        }
        let value = self.peek(0);
        self.heap
            .instance_mut(target.as_obj())
            .fields
            .insert(name, value);
        let value = self.pop();
        self.pop();
        self.push(value);
        Ok(())
    }

    /// Replace the receiver on top of the stack with a bound method for
    /// `name` looked up on `class`.
    pub(crate) fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> Result<(), RuntimeError> {
        let Some(&method) = self.heap.class(class).methods.get(&name) else {
            let text = self.heap.string(name).chars.clone();
            return Err(self.runtime_error(format!("Undefined property '{}'.", text)));
        };
        let receiver = self.peek(0);
        let bound = self.alloc(Obj::BoundMethod(ObjBoundMethod {
            receiver,
            method: method.as_obj(),
        }));
        self.pop();
        self.push(Value::obj(bound));
        Ok(())
    }

    /// `INVOKE`: fused property lookup + call. A field shadowing a method is
    /// honored by calling the field's value; otherwise the method is called
    /// directly, skipping the bound-method allocation.
    pub(crate) fn invoke(&mut self, name: ObjRef, argc: usize) -> Result<(), RuntimeError> {
        let receiver = self.peek(argc);
        if !self.is_instance(receiver) {
            return Err(self.runtime_error("Only instances have methods."));
        }
        let instance = receiver.as_obj();
        if let Some(&field) = self.heap.instance(instance).fields.get(&name) {
            let slot = self.stack.len() - argc - 1;
            self.stack[slot] = field;
            return self.call_value(argc);
        }
        let class = self.heap.instance(instance).class;
        self.invoke_from_class(class, name, argc)
    }

    pub(crate) fn invoke_from_class(
        &mut self,
        class: ObjRef,
        name: ObjRef,
        argc: usize,
    ) -> Result<(), RuntimeError> {
        let Some(&method) = self.heap.class(class).methods.get(&name) else {
            let text = self.heap.string(name).chars.clone();
            return Err(self.runtime_error(format!("Undefined property '{}'.", text)));
        };
        self.call(method.as_obj(), argc)
    }

    /// `METHOD`: bind the closure on top of the stack as a method on the
    /// class below it.
    pub(crate) fn define_method(&mut self, name: ObjRef) {
        let method = self.peek(0);
        let class = self.peek(1).as_obj();
        self.heap.class_mut(class).methods.insert(name, method);
        self.pop();
    }
}
