//! Lute compiler.
//!
//! Turns source text into bytecode in one pass: the [`scanner`] hands out
//! tokens on demand and the Pratt parser in [`compiler`] emits instructions
//! for each construct as it is recognized, with no AST in between. The
//! result of a successful compile is a script function allocated on the
//! caller's heap, ready for the VM to wrap in a closure and call.

pub mod compiler;
pub mod scanner;

pub use compiler::{CompileError, compile};
pub use scanner::{Scanner, Token, TokenKind};
