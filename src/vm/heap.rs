//! The object heap and its mark-sweep collector.
//!
//! Objects live in an arena of slots addressed by 32-bit handles; freed slots
//! go on a free list for reuse. A live object occupies exactly one slot from
//! allocation until the sweep that frees it.
//!
//! Collection is precise, non-moving, and stop-the-world. The heap does not
//! know the roots: `collect` takes a callback that marks them, which both the
//! VM (stack, frames, globals, open upvalues) and the compiler (the chain of
//! in-progress functions) provide. The intern table holds weak references, so
//! strings only the table knows about do not survive a collection.

use std::collections::HashMap;

use super::object::{fnv1a, Obj, ObjString, ObjUpvalue};
use super::value::{ObjRef, Value};

const GC_HEAP_GROW_FACTOR: usize = 2;
const FIRST_GC_THRESHOLD: usize = 1024 * 1024;

/// Marks roots into the collector's gray worklist.
pub struct Marker<'h> {
    marks: &'h mut [bool],
    gray: &'h mut Vec<ObjRef>,
}

impl Marker<'_> {
    pub fn mark_value(&mut self, value: Value) {
        if value.is_obj() {
            self.mark_object(value.as_obj());
        }
    }

    pub fn mark_object(&mut self, r: ObjRef) {
        mark(self.marks, self.gray, r);
    }
}

fn mark(marks: &mut [bool], gray: &mut Vec<ObjRef>, r: ObjRef) {
    if !marks[r.index()] {
        marks[r.index()] = true;
        gray.push(r);
    }
}

fn mark_value(marks: &mut [bool], gray: &mut Vec<ObjRef>, value: Value) {
    if value.is_obj() {
        mark(marks, gray, value.as_obj());
    }
}

/// The object heap.
pub struct Heap {
    objects: Vec<Option<Obj>>,
    /// Mark bits, parallel to `objects`.
    marks: Vec<bool>,
    /// Slot indices available for reuse.
    free: Vec<u32>,
    /// Intern table: FNV-1a hash to handles of strings with that hash.
    /// Weak: unmarked entries are dropped after the trace.
    strings: HashMap<u32, Vec<ObjRef>>,
    /// The interned string "init", always rooted.
    init_string: ObjRef,
    bytes_allocated: usize,
    next_gc: usize,
    /// Gray worklist, kept outside the arena.
    gray: Vec<ObjRef>,
}

impl Heap {
    pub fn new() -> Self {
        let mut heap = Self {
            objects: Vec::new(),
            marks: Vec::new(),
            free: Vec::new(),
            strings: HashMap::new(),
            init_string: ObjRef(0),
            bytes_allocated: 0,
            next_gc: FIRST_GC_THRESHOLD,
            gray: Vec::new(),
        };
        heap.init_string = heap.intern("init");
        heap
    }

    pub fn init_string(&self) -> ObjRef {
        self.init_string
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// True when the next allocation should be preceded by a collection.
    pub fn should_collect(&self) -> bool {
        cfg!(feature = "gc-stress") || self.bytes_allocated > self.next_gc
    }

    /// Place an object in the arena. Callers that may hold the only
    /// references to in-flight sub-values must root them (e.g. on the VM
    /// stack) and run any pending collection *before* calling this.
    pub fn allocate(&mut self, obj: Obj) -> ObjRef {
        self.bytes_allocated += obj.heap_size();
        #[cfg(feature = "gc-log")]
        eprintln!("-- allocate {} ({} bytes)", obj.type_name(), obj.heap_size());
        match self.free.pop() {
            Some(i) => {
                self.objects[i as usize] = Some(obj);
                self.marks[i as usize] = false;
                ObjRef(i)
            }
            None => {
                let i = self.objects.len() as u32;
                self.objects.push(Some(obj));
                self.marks.push(false);
                ObjRef(i)
            }
        }
    }

    /// Intern a borrowed string, copying it only when it is new.
    pub fn intern(&mut self, text: &str) -> ObjRef {
        let hash = fnv1a(text.as_bytes());
        if let Some(existing) = self.find_interned(hash, text) {
            return existing;
        }
        let r = self.allocate(Obj::String(ObjString {
            chars: text.to_owned(),
            hash,
        }));
        self.strings.entry(hash).or_default().push(r);
        r
    }

    /// Intern an owned string, adopting its buffer when it is new.
    pub fn intern_owned(&mut self, text: String) -> ObjRef {
        let hash = fnv1a(text.as_bytes());
        if let Some(existing) = self.find_interned(hash, &text) {
            return existing;
        }
        let r = self.allocate(Obj::String(ObjString { chars: text, hash }));
        self.strings.entry(hash).or_default().push(r);
        r
    }

    fn find_interned(&self, hash: u32, text: &str) -> Option<ObjRef> {
        let bucket = self.strings.get(&hash)?;
        bucket.iter().copied().find(|&r| self.string(r).chars == text)
    }

    /// Run a full collection: mark roots via the callback, trace, drop
    /// unmarked intern entries, sweep, and rescale the growth threshold.
    pub fn collect<F: FnOnce(&mut Marker)>(&mut self, mark_roots: F) {
        #[cfg(feature = "gc-log")]
        let before = self.bytes_allocated;
        #[cfg(feature = "gc-log")]
        eprintln!("-- gc begin");

        let init_string = self.init_string;
        {
            let mut marker = Marker {
                marks: &mut self.marks,
                gray: &mut self.gray,
            };
            marker.mark_object(init_string);
            mark_roots(&mut marker);
        }
        self.trace();
        self.remove_unmarked_strings();
        self.sweep();
        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;

        #[cfg(feature = "gc-log")]
        eprintln!(
            "-- gc end: collected {} bytes ({} -> {}), next at {}",
            before.saturating_sub(self.bytes_allocated),
            before,
            self.bytes_allocated,
            self.next_gc
        );
    }

    /// Blacken gray objects until the worklist drains.
    fn trace(&mut self) {
        let Heap {
            objects,
            marks,
            gray,
            ..
        } = self;
        while let Some(r) = gray.pop() {
            let obj = objects[r.index()].as_ref().expect("gray object was freed");
            match obj {
                Obj::String(_) | Obj::Native(_) => {}
                Obj::Function(f) => {
                    if let Some(name) = f.name {
                        mark(marks, gray, name);
                    }
                    for &constant in &f.chunk.constants {
                        mark_value(marks, gray, constant);
                    }
                }
                Obj::Closure(c) => {
                    mark(marks, gray, c.function);
                    for &upvalue in &c.upvalues {
                        mark(marks, gray, upvalue);
                    }
                }
                Obj::Upvalue(u) => {
                    if let ObjUpvalue::Closed(value) = u {
                        mark_value(marks, gray, *value);
                    }
                }
                Obj::Class(c) => {
                    mark(marks, gray, c.name);
                    for (&name, &method) in &c.methods {
                        mark(marks, gray, name);
                        mark_value(marks, gray, method);
                    }
                }
                Obj::Instance(i) => {
                    mark(marks, gray, i.class);
                    for (&name, &field) in &i.fields {
                        mark(marks, gray, name);
                        mark_value(marks, gray, field);
                    }
                }
                Obj::BoundMethod(b) => {
                    mark_value(marks, gray, b.receiver);
                    mark(marks, gray, b.method);
                }
            }
        }
    }

    /// The intern table's references are weak: drop entries whose string did
    /// not survive the trace.
    fn remove_unmarked_strings(&mut self) {
        let Heap { strings, marks, .. } = self;
        strings.retain(|_, bucket| {
            bucket.retain(|r| marks[r.index()]);
            !bucket.is_empty()
        });
    }

    /// Free unmarked slots, clear surviving marks, and recompute the exact
    /// number of live bytes.
    fn sweep(&mut self) {
        let Heap {
            objects,
            marks,
            free,
            ..
        } = self;
        let mut live_bytes = 0;
        for (i, slot) in objects.iter_mut().enumerate() {
            let Some(obj) = slot else { continue };
            if marks[i] {
                marks[i] = false;
                live_bytes += obj.heap_size();
            } else {
                #[cfg(feature = "gc-log")]
                eprintln!("-- free {}", obj.type_name());
                *slot = None;
                free.push(i as u32);
            }
        }
        self.bytes_allocated = live_bytes;
    }

    // --- Accessors ---

    pub fn get(&self, r: ObjRef) -> &Obj {
        self.objects[r.index()].as_ref().expect("stale object handle")
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        self.objects[r.index()].as_mut().expect("stale object handle")
    }

    pub fn string(&self, r: ObjRef) -> &super::object::ObjString {
        match self.get(r) {
            Obj::String(s) => s,
            obj => unreachable!("expected string, found {}", obj.type_name()),
        }
    }

    pub fn function(&self, r: ObjRef) -> &super::object::ObjFunction {
        match self.get(r) {
            Obj::Function(f) => f,
            obj => unreachable!("expected function, found {}", obj.type_name()),
        }
    }

    pub fn closure(&self, r: ObjRef) -> &super::object::ObjClosure {
        match self.get(r) {
            Obj::Closure(c) => c,
            obj => unreachable!("expected closure, found {}", obj.type_name()),
        }
    }

    pub fn closure_mut(&mut self, r: ObjRef) -> &mut super::object::ObjClosure {
        match self.get_mut(r) {
            Obj::Closure(c) => c,
            obj => unreachable!("expected closure, found {}", obj.type_name()),
        }
    }

    pub fn upvalue(&self, r: ObjRef) -> &ObjUpvalue {
        match self.get(r) {
            Obj::Upvalue(u) => u,
            obj => unreachable!("expected upvalue, found {}", obj.type_name()),
        }
    }

    pub fn upvalue_mut(&mut self, r: ObjRef) -> &mut ObjUpvalue {
        match self.get_mut(r) {
            Obj::Upvalue(u) => u,
            obj => unreachable!("expected upvalue, found {}", obj.type_name()),
        }
    }

    pub fn class(&self, r: ObjRef) -> &super::object::ObjClass {
        match self.get(r) {
            Obj::Class(c) => c,
            obj => unreachable!("expected class, found {}", obj.type_name()),
        }
    }

    pub fn class_mut(&mut self, r: ObjRef) -> &mut super::object::ObjClass {
        match self.get_mut(r) {
            Obj::Class(c) => c,
            obj => unreachable!("expected class, found {}", obj.type_name()),
        }
    }

    pub fn instance(&self, r: ObjRef) -> &super::object::ObjInstance {
        match self.get(r) {
            Obj::Instance(i) => i,
            obj => unreachable!("expected instance, found {}", obj.type_name()),
        }
    }

    pub fn instance_mut(&mut self, r: ObjRef) -> &mut super::object::ObjInstance {
        match self.get_mut(r) {
            Obj::Instance(i) => i,
            obj => unreachable!("expected instance, found {}", obj.type_name()),
        }
    }

    /// Render a value for `print` and the disassembler.
    pub fn value_to_string(&self, value: Value) -> String {
        if value.is_nil() {
            return "nil".to_string();
        }
        if value.is_bool() {
            return value.as_bool().to_string();
        }
        if value.is_number() {
            return format_number(value.as_number());
        }
        match self.get(value.as_obj()) {
            Obj::String(s) => s.chars.clone(),
            Obj::Function(f) => self.function_name(f.name),
            Obj::Closure(c) => self.function_name(self.function(c.function).name),
            Obj::Upvalue(_) => "upvalue".to_string(),
            Obj::Native(_) => "<native fn>".to_string(),
            Obj::Class(c) => self.string(c.name).chars.clone(),
            Obj::Instance(i) => {
                format!("{} instance", self.string(self.class(i.class).name).chars)
            }
            Obj::BoundMethod(b) => {
                self.function_name(self.function(self.closure(b.method).function).name)
            }
        }
    }

    fn function_name(&self, name: Option<ObjRef>) -> String {
        match name {
            Some(name) => format!("<fn {}>", self.string(name).chars),
            None => "<script>".to_string(),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

fn format_number(n: f64) -> String {
    if n == f64::INFINITY {
        "inf".to_string()
    } else if n == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::object::ObjClosure;

    #[test]
    fn interning_deduplicates() {
        let mut heap = Heap::new();
        let a = heap.intern("hello");
        let b = heap.intern("hello");
        let c = heap.intern_owned("hello".to_string());
        let d = heap.intern("world");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn collect_frees_unreachable_objects() {
        let mut heap = Heap::new();
        let keep = heap.intern("keep");
        let _drop = heap.intern("drop");
        heap.collect(|m| m.mark_object(keep));
        // The kept string is still interned; the dropped one is gone and its
        // slot is reusable.
        assert_eq!(heap.intern("keep"), keep);
        assert!(!heap.free.is_empty());
    }

    #[test]
    fn collect_traces_through_closures() {
        let mut heap = Heap::new();
        let name = heap.intern("f");
        let function = heap.allocate(Obj::Function(crate::vm::object::ObjFunction::new(Some(
            name,
        ))));
        let upvalue = heap.allocate(Obj::Upvalue(ObjUpvalue::Closed(Value::obj(name))));
        let closure = heap.allocate(Obj::Closure(ObjClosure {
            function,
            upvalues: vec![upvalue],
        }));
        heap.collect(|m| m.mark_object(closure));
        assert!(matches!(heap.get(function), Obj::Function(_)));
        assert!(matches!(heap.get(upvalue), Obj::Upvalue(_)));
        assert_eq!(heap.string(name).chars, "f");
    }

    #[test]
    fn second_collection_frees_nothing() {
        let mut heap = Heap::new();
        let keep = heap.intern("keep");
        for i in 0..100 {
            heap.intern_owned(format!("garbage-{}", i));
        }
        heap.collect(|m| m.mark_object(keep));
        let after_first = heap.bytes_allocated();
        let free_after_first = heap.free.len();
        heap.collect(|m| m.mark_object(keep));
        assert_eq!(heap.bytes_allocated(), after_first);
        assert_eq!(heap.free.len(), free_after_first);
    }

    #[test]
    fn intern_table_is_weak() {
        let mut heap = Heap::new();
        let doomed = heap.intern("doomed");
        heap.collect(|_| {});
        // A fresh intern of the same text must produce a fresh object rather
        // than resurrect the swept entry.
        let fresh = heap.intern("doomed");
        assert_eq!(heap.string(fresh).chars, "doomed");
        assert_eq!(fresh, doomed); // slot was reused, but via a new allocation
    }

    #[test]
    fn init_string_survives_collection() {
        let mut heap = Heap::new();
        let init = heap.init_string();
        heap.collect(|_| {});
        assert_eq!(heap.intern("init"), init);
    }
}
