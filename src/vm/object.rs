//! Heap object variants and their payloads.

use std::mem;

use indexmap::IndexMap;

use super::chunk::Chunk;
use super::value::{ObjRef, Value};

/// A host-provided callable. The argument slice is valid only for the
/// duration of the call.
pub type NativeFn = fn(args: &[Value]) -> Value;

/// FNV-1a, 32-bit.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// An immutable, interned string with its precomputed hash.
#[derive(Debug)]
pub struct ObjString {
    pub chars: String,
    pub hash: u32,
}

/// Descriptor emitted by the compiler for each variable a closure captures.
///
/// `is_local` selects between a slot of the immediately enclosing function
/// (captured fresh) and an upvalue of the enclosing closure (shared).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDescriptor {
    pub index: u8,
    pub is_local: bool,
}

/// A compiled function (or the top-level script).
#[derive(Debug)]
pub struct ObjFunction {
    pub arity: u8,
    /// Interned name; `None` for the top-level script.
    pub name: Option<ObjRef>,
    pub chunk: Chunk,
    /// One descriptor per captured variable, consumed by the Closure op.
    pub upvalues: Vec<UpvalueDescriptor>,
}

impl ObjFunction {
    pub fn new(name: Option<ObjRef>) -> Self {
        Self {
            arity: 0,
            name,
            chunk: Chunk::new(),
            upvalues: Vec::new(),
        }
    }
}

/// A runtime closure: a function plus the upvalues it captured.
#[derive(Debug)]
pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// An upvalue is *open* while the captured variable is still on the stack and
/// *closed* once its owner returned, at which point it holds the value inline.
#[derive(Debug)]
pub enum ObjUpvalue {
    Open(usize),
    Closed(Value),
}

/// A host function exposed to scripts.
pub struct ObjNative {
    pub function: NativeFn,
}

impl std::fmt::Debug for ObjNative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<native fn>")
    }
}

/// A class: its interned name and method table (name handle to closure).
#[derive(Debug)]
pub struct ObjClass {
    pub name: ObjRef,
    pub methods: IndexMap<ObjRef, Value>,
}

impl ObjClass {
    pub fn new(name: ObjRef) -> Self {
        Self {
            name,
            methods: IndexMap::new(),
        }
    }
}

/// An instance: its class and field table (name handle to value).
#[derive(Debug)]
pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: IndexMap<ObjRef, Value>,
}

impl ObjInstance {
    pub fn new(class: ObjRef) -> Self {
        Self {
            class,
            fields: IndexMap::new(),
        }
    }
}

/// A method bound to the receiver it was read from.
#[derive(Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

/// The discriminated family of heap objects.
#[derive(Debug)]
pub enum Obj {
    String(ObjString),
    Function(ObjFunction),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Native(ObjNative),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

impl Obj {
    /// Approximate heap footprint, used for the collector's accounting.
    pub fn heap_size(&self) -> usize {
        let payload = match self {
            Obj::String(s) => s.chars.capacity(),
            Obj::Function(f) => {
                f.chunk.code.capacity() * mem::size_of::<super::opcode::Op>()
                    + f.chunk.lines.capacity() * mem::size_of::<usize>()
                    + f.chunk.constants.capacity() * mem::size_of::<Value>()
                    + f.upvalues.capacity() * mem::size_of::<UpvalueDescriptor>()
            }
            Obj::Closure(c) => c.upvalues.capacity() * mem::size_of::<ObjRef>(),
            Obj::Upvalue(_) | Obj::Native(_) | Obj::BoundMethod(_) => 0,
            Obj::Class(c) => c.methods.len() * mem::size_of::<(ObjRef, Value)>(),
            Obj::Instance(i) => i.fields.len() * mem::size_of::<(ObjRef, Value)>(),
        };
        mem::size_of::<Obj>() + payload
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::Function(_) => "function",
            Obj::Closure(_) => "closure",
            Obj::Upvalue(_) => "upvalue",
            Obj::Native(_) => "native",
            Obj::Class(_) => "class",
            Obj::Instance(_) => "instance",
            Obj::BoundMethod(_) => "bound method",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_reference_vectors() {
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a(b"foobar"), 0xbf9c_f968);
    }
}
