//! Native compilation of typed expressions via Cranelift.
//!
//! This module turns a [`TypedNativeExpression`](crate::TypedNativeExpression)
//! into a machine-code entry point and caches it for the life of the process.
//!
//! # Calling Convention
//!
//! Every compiled entry uses the host's C calling convention:
//!
//! ```text
//! status = entry(receiver: *mut R, arg0: i64, ..., argN: i64, out: *mut i64)
//! ```
//!
//! `status` is `0` on success, in which case the result word was written to
//! `*out`. Any other value is the status word of an
//! [`ErrorKind`](fora_core::ErrorKind) and `*out` is untouched.
//!
//! # Zero-Fallback Policy
//!
//! Expressions are validated when they are constructed. If Cranelift fails
//! to compile a validated expression, that is a bug in a lowering and the
//! process panics; there is no interpreter fallback.


mod cache;
mod compiler;
mod entry;

pub use cache::{compile, CompileState, NativeCodeCompiler};
pub use compiler::{CodegenError, Lowering, RuntimeSymbol};
pub use entry::{Compiled, CompiledEntry};
