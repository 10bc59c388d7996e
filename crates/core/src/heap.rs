//! The garbage-collected object heap.
//!
//! Every live object sits in a slot of one [`Heap`] and is addressed by an
//! [`ObjRef`] handle; cross-object edges are handles, so cyclic graphs are
//! fine. Collection is stop-the-world tri-color mark-sweep, triggered once
//! allocation crosses a byte threshold that retunes to twice the live size
//! after each cycle.
//!
//! Root discipline: the heap itself owns two root sets, the globals table
//! and a temp-root stack for values mid-construction. Everything else (the
//! VM's value stack and frames, the compiler's in-progress functions) lives
//! outside, so the owner checks [`Heap::needs_collect`] before any
//! allocating call, grays its roots with [`Heap::mark_value`] /
//! [`Heap::mark_object`], and then runs [`Heap::collect`].
//!
//! The intern table is weak: keys about to be swept are deleted from it
//! first, so interning alone never keeps a string alive.

use std::ops::{Index, IndexMut};

use tracing::debug;

use crate::Value;
use crate::object::{
    Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance, ObjNative, ObjString,
    ObjUpvalue,
};
use crate::table::Table;

/// Collection threshold before the first cycle.
const FIRST_GC: usize = 1024 * 1024;
const GC_HEAP_GROW_FACTOR: usize = 2;

/// Handle to a heap object. Stable for the object's lifetime; slots are
/// recycled only after a sweep frees them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjRef(u32);

impl ObjRef {
    pub(crate) fn from_bits(bits: u32) -> ObjRef {
        ObjRef(bits)
    }

    pub(crate) fn to_bits(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct Slot {
    obj: Obj,
    marked: bool,
    /// Accounted bytes, fixed at allocation (or the last retally) so the
    /// sweep subtracts exactly what was added.
    size: usize,
}

#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    /// Intern set: every live string exactly once, values always nil.
    strings: Table,
    /// Global variables, keyed by interned name. Lives here so collections
    /// triggered during compilation see it without help from the VM.
    globals: Table,
    gray: Vec<ObjRef>,
    temp_roots: Vec<Value>,
    bytes_allocated: usize,
    next_gc: usize,
    stress: bool,
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            strings: Table::new(),
            globals: Table::new(),
            gray: Vec::new(),
            temp_roots: Vec::new(),
            bytes_allocated: 0,
            next_gc: FIRST_GC,
            stress: false,
        }
    }

    /// Collect at every allocation point instead of waiting for the
    /// threshold. Output must be identical either way.
    pub fn set_gc_stress(&mut self, stress: bool) {
        self.stress = stress;
    }

    // ---------------------------------------------------------------------
    // Allocation
    // ---------------------------------------------------------------------

    /// Allocate an object. Callers run their `needs_collect`/`collect`
    /// check first; by the time the slot is written the object is fully
    /// tagged, so a later cycle can trace it.
    pub fn alloc(&mut self, obj: Obj) -> ObjRef {
        let size = object_size(&obj);
        self.bytes_allocated += size;
        let slot = Slot {
            obj,
            marked: false,
            size,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                ObjRef(index)
            }
            None => {
                self.slots.push(Some(slot));
                ObjRef((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Intern a string: return the existing handle when one with these
    /// bytes is live, else allocate and register it. Hash is FNV-1a over
    /// the bytes, stored on the object for every later table probe.
    pub fn intern(&mut self, chars: &str) -> ObjRef {
        let hash = fnv1a(chars);
        let slots = &self.slots;
        if let Some(existing) = self.strings.find_string(hash, chars, |r| {
            match &slots[r.index()] {
                Some(slot) => match &slot.obj {
                    Obj::Str(s) => &*s.chars,
                    _ => "",
                },
                None => "",
            }
        }) {
            return existing;
        }

        let r = self.alloc(Obj::Str(ObjString {
            chars: chars.into(),
            hash,
        }));
        self.strings.set(r, hash, Value::NIL);
        r
    }

    /// Recompute an object's accounted size after in-place growth (the
    /// compiler calls this once a function's chunk is final).
    pub fn retally(&mut self, r: ObjRef) {
        let Some(slot) = self.slots[r.index()].as_ref() else {
            return;
        };
        let size = object_size(&slot.obj);
        let old = slot.size;
        self.bytes_allocated = self.bytes_allocated + size - old;
        if let Some(slot) = self.slots[r.index()].as_mut() {
            slot.size = size;
        }
    }

    // ---------------------------------------------------------------------
    // Globals
    // ---------------------------------------------------------------------

    pub fn global_get(&self, name: ObjRef) -> Option<Value> {
        let hash = self.string(name).hash;
        self.globals.get(name, hash)
    }

    /// Returns true when `name` was not yet defined.
    pub fn global_set(&mut self, name: ObjRef, value: Value) -> bool {
        let hash = self.string(name).hash;
        self.globals.set(name, hash, value)
    }

    pub fn global_delete(&mut self, name: ObjRef) -> bool {
        let hash = self.string(name).hash;
        self.globals.delete(name, hash)
    }

    // ---------------------------------------------------------------------
    // Garbage collection
    // ---------------------------------------------------------------------

    pub fn needs_collect(&self) -> bool {
        self.stress || self.bytes_allocated > self.next_gc
    }

    /// Pin a value across allocation points while it is not yet reachable
    /// from any other root. Pair with [`Heap::pop_root`].
    pub fn push_root(&mut self, value: Value) {
        self.temp_roots.push(value);
    }

    pub fn pop_root(&mut self) {
        self.temp_roots.pop();
    }

    /// Gray a value's object, if it has one.
    pub fn mark_value(&mut self, value: Value) {
        if let Some(r) = value.as_obj() {
            self.mark_object(r);
        }
    }

    /// Gray an object. Idempotent, and tolerant of already-freed slots.
    pub fn mark_object(&mut self, r: ObjRef) {
        let Some(slot) = self.slots.get_mut(r.index()).and_then(|s| s.as_mut()) else {
            return;
        };
        if slot.marked {
            return;
        }
        slot.marked = true;
        self.gray.push(r);
    }

    /// Run a full cycle. External roots must already be gray; the heap
    /// grays its own roots (globals, temp stack), traces, drops dead keys
    /// from the intern table, sweeps, and retunes the threshold.
    pub fn collect(&mut self) {
        let before = self.bytes_allocated;

        let globals: Vec<(ObjRef, Value)> = self.globals.iter().collect();
        for (name, value) in globals {
            self.mark_object(name);
            self.mark_value(value);
        }
        let temps = self.temp_roots.clone();
        for value in temps {
            self.mark_value(value);
        }

        self.trace_references();
        self.remove_white_strings();
        self.sweep();

        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;
        debug!(
            freed = before - self.bytes_allocated,
            live = self.bytes_allocated,
            next_gc = self.next_gc,
            "gc cycle"
        );
    }

    fn trace_references(&mut self) {
        while let Some(r) = self.gray.pop() {
            self.blacken(r);
        }
    }

    /// Gray everything the object references.
    fn blacken(&mut self, r: ObjRef) {
        let mut refs: Vec<ObjRef> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        match &self[r] {
            Obj::Str(_) | Obj::Native(_) => {}
            Obj::Function(f) => {
                if let Some(name) = f.name {
                    refs.push(name);
                }
                values.extend(f.chunk.constants.iter().copied());
            }
            Obj::Closure(c) => {
                refs.push(c.function);
                refs.extend(c.upvalues.iter().copied());
            }
            Obj::Upvalue(u) => {
                if let ObjUpvalue::Closed(value) = u {
                    values.push(*value);
                }
            }
            Obj::Class(c) => {
                refs.push(c.name);
                for (name, method) in c.methods.iter() {
                    refs.push(name);
                    values.push(method);
                }
            }
            Obj::Instance(i) => {
                refs.push(i.class);
                for (name, value) in i.fields.iter() {
                    refs.push(name);
                    values.push(value);
                }
            }
            Obj::BoundMethod(b) => {
                values.push(b.receiver);
                refs.push(b.method);
            }
        }
        for r in refs {
            self.mark_object(r);
        }
        for value in values {
            self.mark_value(value);
        }
    }

    /// Delete intern entries whose strings are about to be swept.
    fn remove_white_strings(&mut self) {
        let slots = &self.slots;
        self.strings
            .retain_keys(|r| slots[r.index()].as_ref().is_some_and(|s| s.marked));
    }

    fn sweep(&mut self) {
        for index in 0..self.slots.len() {
            let freed = {
                let Some(slot) = self.slots[index].as_mut() else {
                    continue;
                };
                if slot.marked {
                    slot.marked = false;
                    continue;
                }
                slot.size
            };
            self.slots[index] = None;
            self.bytes_allocated -= freed;
            self.free.push(index as u32);
        }
    }

    // ---------------------------------------------------------------------
    // Typed access
    // ---------------------------------------------------------------------

    pub fn string(&self, r: ObjRef) -> &ObjString {
        match &self[r] {
            Obj::Str(s) => s,
            other => panic!("expected string, found {other:?}"),
        }
    }

    pub fn string_hash(&self, r: ObjRef) -> u32 {
        self.string(r).hash
    }

    pub fn function(&self, r: ObjRef) -> &ObjFunction {
        match &self[r] {
            Obj::Function(f) => f,
            other => panic!("expected function, found {other:?}"),
        }
    }

    pub fn function_mut(&mut self, r: ObjRef) -> &mut ObjFunction {
        match &mut self[r] {
            Obj::Function(f) => f,
            other => panic!("expected function, found {other:?}"),
        }
    }

    pub fn native(&self, r: ObjRef) -> &ObjNative {
        match &self[r] {
            Obj::Native(n) => n,
            other => panic!("expected native, found {other:?}"),
        }
    }

    pub fn closure(&self, r: ObjRef) -> &ObjClosure {
        match &self[r] {
            Obj::Closure(c) => c,
            other => panic!("expected closure, found {other:?}"),
        }
    }

    pub fn closure_mut(&mut self, r: ObjRef) -> &mut ObjClosure {
        match &mut self[r] {
            Obj::Closure(c) => c,
            other => panic!("expected closure, found {other:?}"),
        }
    }

    pub fn upvalue(&self, r: ObjRef) -> &ObjUpvalue {
        match &self[r] {
            Obj::Upvalue(u) => u,
            other => panic!("expected upvalue, found {other:?}"),
        }
    }

    pub fn upvalue_mut(&mut self, r: ObjRef) -> &mut ObjUpvalue {
        match &mut self[r] {
            Obj::Upvalue(u) => u,
            other => panic!("expected upvalue, found {other:?}"),
        }
    }

    pub fn class(&self, r: ObjRef) -> &ObjClass {
        match &self[r] {
            Obj::Class(c) => c,
            other => panic!("expected class, found {other:?}"),
        }
    }

    pub fn class_mut(&mut self, r: ObjRef) -> &mut ObjClass {
        match &mut self[r] {
            Obj::Class(c) => c,
            other => panic!("expected class, found {other:?}"),
        }
    }

    pub fn instance(&self, r: ObjRef) -> &ObjInstance {
        match &self[r] {
            Obj::Instance(i) => i,
            other => panic!("expected instance, found {other:?}"),
        }
    }

    pub fn instance_mut(&mut self, r: ObjRef) -> &mut ObjInstance {
        match &mut self[r] {
            Obj::Instance(i) => i,
            other => panic!("expected instance, found {other:?}"),
        }
    }

    pub fn bound_method(&self, r: ObjRef) -> &ObjBoundMethod {
        match &self[r] {
            Obj::BoundMethod(b) => b,
            other => panic!("expected bound method, found {other:?}"),
        }
    }

    // ---------------------------------------------------------------------
    // Rendering
    // ---------------------------------------------------------------------

    /// Render a value the way `print` shows it.
    pub fn format_value(&self, value: Value) -> String {
        if let Some(r) = value.as_obj() {
            self.format_object(r)
        } else if let Some(n) = value.as_number() {
            format_number(n)
        } else if let Some(b) = value.as_bool() {
            b.to_string()
        } else {
            "nil".to_string()
        }
    }

    fn format_object(&self, r: ObjRef) -> String {
        match &self[r] {
            Obj::Str(s) => s.chars.to_string(),
            Obj::Function(f) => self.format_function(f.name),
            Obj::Native(_) => "<native fn>".to_string(),
            Obj::Closure(c) => self.format_function(self.function(c.function).name),
            Obj::Upvalue(_) => "upvalue".to_string(),
            Obj::Class(c) => self.string(c.name).chars.to_string(),
            Obj::Instance(i) => {
                format!("{} instance", self.string(self.class(i.class).name).chars)
            }
            Obj::BoundMethod(b) => {
                let closure = self.closure(b.method);
                self.format_function(self.function(closure.function).name)
            }
        }
    }

    fn format_function(&self, name: Option<ObjRef>) -> String {
        match name {
            Some(name) => format!("<fn {}>", self.string(name).chars),
            None => "<script>".to_string(),
        }
    }

    // ---------------------------------------------------------------------
    // Introspection (tests, tracing)
    // ---------------------------------------------------------------------

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn is_live(&self, r: ObjRef) -> bool {
        self.slots.get(r.index()).is_some_and(|s| s.is_some())
    }

    pub fn live_objects(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for Heap {
    fn default() -> Heap {
        Heap::new()
    }
}

impl Index<ObjRef> for Heap {
    type Output = Obj;

    fn index(&self, r: ObjRef) -> &Obj {
        match &self.slots[r.index()] {
            Some(slot) => &slot.obj,
            None => panic!("use of freed object handle {r:?}"),
        }
    }
}

impl IndexMut<ObjRef> for Heap {
    fn index_mut(&mut self, r: ObjRef) -> &mut Obj {
        match &mut self.slots[r.index()] {
            Some(slot) => &mut slot.obj,
            None => panic!("use of freed object handle {r:?}"),
        }
    }
}

/// FNV-1a over the string's bytes, the hash every table probe uses.
pub fn fnv1a(chars: &str) -> u32 {
    let mut hash = 2166136261u32;
    for byte in chars.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

fn object_size(obj: &Obj) -> usize {
    size_of::<Obj>()
        + match obj {
            Obj::Str(s) => s.chars.len(),
            Obj::Function(f) => {
                f.chunk.code.len()
                    + f.chunk.lines.len() * size_of::<u32>()
                    + f.chunk.constants.len() * size_of::<Value>()
            }
            Obj::Closure(c) => c.upvalues.len() * size_of::<ObjRef>(),
            Obj::Class(c) => c.methods.byte_size(),
            Obj::Instance(i) => i.fields.byte_size(),
            Obj::Native(_) | Obj::Upvalue(_) | Obj::BoundMethod(_) => 0,
        }
}

/// printf's `%g` with the default precision: 6 significant digits,
/// trailing zeros and a trailing point trimmed, exponent form once the
/// rounded decimal exponent leaves [-4, 6).
fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n < 0.0 { "-inf" } else { "inf" }.to_string();
    }

    // Round to 6 significant digits first; the exponent of the rounded
    // value picks the presentation, so 999999.9 lands in exponent form.
    let sci = format!("{n:.5e}");
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= 6 {
        let mantissa = trim_number(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    } else {
        let decimals = (5 - exp) as usize;
        trim_number(&format!("{n:.decimals$}")).to_string()
    }
}

fn trim_number(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}
