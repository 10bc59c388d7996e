//! Core runtime primitives for the Lute language.
//!
//! This crate holds everything the compiler and the virtual machine share:
//! the 64-bit [`Value`] encoding, the heap object model, the bytecode
//! [`Chunk`] and opcode set, the open-addressing [`Table`], and the
//! garbage-collected [`Heap`] that owns every object.
//!
//! Two `Value` encodings exist behind the same API. The default is a tagged
//! union; enabling the `nanbox` feature swaps in an 8-byte NaN-boxed word.
//! Nothing outside the value module can tell them apart.

pub mod chunk;
pub mod debug;
pub mod heap;
pub mod object;
pub mod table;

#[cfg(feature = "nanbox")]
mod nanbox;
#[cfg(not(feature = "nanbox"))]
mod value;

#[cfg(feature = "nanbox")]
pub use nanbox::Value;
#[cfg(not(feature = "nanbox"))]
pub use value::Value;

pub use chunk::{Chunk, OpCode};
pub use heap::{Heap, ObjRef};
pub use object::{
    NativeFn, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance, ObjNative,
    ObjString, ObjUpvalue,
};
pub use table::Table;
