//! Built-in native functions.
//!
//! Natives receive the argument slice and return one value; the VM replaces
//! the callee and arguments with the result. The single built-in is
//! `clock()`, seconds since process start as a number.

use std::sync::OnceLock;
use std::time::Instant;

use lute_core::Value;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Anchor the clock epoch. Called during VM construction so `clock()`
/// measures from startup rather than from its own first call.
pub(crate) fn init_epoch() {
    EPOCH.get_or_init(Instant::now);
}

/// `clock()` — seconds since process start.
pub fn clock(_args: &[Value]) -> Value {
    Value::number(EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64())
}
