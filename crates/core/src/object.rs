//! Heap object variants.
//!
//! Every Lute heap object is one [`Obj`] variant stored in a [`Heap`] slot
//! and addressed by [`ObjRef`] handles. Cross-object edges are handles, not
//! owned pointers, so arbitrary graphs (including the closure/upvalue and
//! class/method cycles) collect cleanly under mark-sweep.
//!
//! [`Heap`]: crate::heap::Heap

use crate::Value;
use crate::chunk::Chunk;
use crate::heap::ObjRef;
use crate::table::Table;

/// Native function shape: the VM passes the argument slice and takes the
/// returned value in place of the callee and arguments.
pub type NativeFn = fn(&[Value]) -> Value;

#[derive(Debug)]
pub enum Obj {
    Str(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

/// An interned immutable string with its FNV-1a hash precomputed at
/// interning time.
#[derive(Debug)]
pub struct ObjString {
    pub chars: Box<str>,
    pub hash: u32,
}

#[derive(Debug)]
pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    /// Interned name; `None` for the top-level script.
    pub name: Option<ObjRef>,
}

impl ObjFunction {
    pub fn new(name: Option<ObjRef>) -> ObjFunction {
        ObjFunction {
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}

#[derive(Debug)]
pub struct ObjNative {
    pub function: NativeFn,
}

/// A function together with the upvalues it captured. `upvalues` has
/// exactly `upvalue_count` entries once construction finishes.
#[derive(Debug)]
pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// A captured variable. While the variable's stack slot is live the upvalue
/// is `Open` and holds the absolute slot index; when the slot's scope exits
/// the value is hoisted in and the upvalue becomes `Closed`.
#[derive(Debug)]
pub enum ObjUpvalue {
    Open(usize),
    Closed(Value),
}

#[derive(Debug)]
pub struct ObjClass {
    pub name: ObjRef,
    pub methods: Table,
}

#[derive(Debug)]
pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: Table,
}

/// A method pulled off an instance as a first-class value; remembers the
/// receiver so a later call rebinds `this` correctly.
#[derive(Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}
