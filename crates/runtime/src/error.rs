//! Interpreter outcome classification.
//!
//! The embedding surface is deliberately narrow: a program either runs to
//! completion, fails to compile, or dies at runtime. The diagnostics
//! themselves go to stderr as they happen; the error value only says which
//! of the two failure classes occurred, which is exactly what the CLI needs
//! to pick an exit code.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InterpretError {
    /// One or more compile diagnostics were reported; nothing was run.
    #[error("compile error")]
    Compile,

    /// Execution aborted; the message and stack trace were reported.
    #[error("runtime error")]
    Runtime,
}
