//! Lute virtual machine runtime.
//!
//! The embedding surface is one type and one call:
//!
//! ```no_run
//! use lute_runtime::Vm;
//!
//! let mut vm = Vm::new();
//! vm.interpret("print 1 + 2;").unwrap();
//! ```
//!
//! A `Vm` owns its heap, stack, and globals; dropping it frees everything.
//! Program output goes to stdout (redirectable via [`Vm::set_output`]),
//! diagnostics to stderr. Native functions are registered with
//! [`Vm::define_native`]; `clock` is built in.

pub mod error;
pub mod natives;
pub mod vm;

pub use error::InterpretError;
pub use vm::{FRAMES_MAX, STACK_MAX, Vm, VmOptions};
