//! The seam between a host type and the native code compiler.

use std::any::type_name;
use std::fmt::Debug;
use std::hash::Hash;

use fora_core::{AbiError, ErrorKind, Result};

use crate::expr::NativeSignature;
use crate::jit::{CodegenError, Lowering, RuntimeSymbol};

/// A host type whose member operations can be compiled to native code.
///
/// Implementors describe each operation twice: once as host code
/// ([`invoke_direct`](Self::invoke_direct)) and once as Cranelift IR
/// ([`lower`](Self::lower)). The two must be observably identical, including
/// the errors they report and every pointer they release.
pub trait NativeReceiver: Sized + 'static {
    /// Operations this receiver exposes.
    type Op: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn receiver_name() -> &'static str {
        type_name::<Self>()
    }

    fn op_name(op: Self::Op) -> &'static str;

    /// Declared arguments and result of `op`.
    fn signature(op: Self::Op) -> NativeSignature;

    /// Runs `op` as host code on argument words.
    ///
    /// # Safety
    ///
    /// Pointer words must satisfy the ownership contract of `op`.
    unsafe fn invoke_direct(&mut self, op: Self::Op, args: &[i64]) -> Result<i64>;

    /// Rebuilds the error [`invoke_direct`](Self::invoke_direct) would have
    /// returned, given the kind reported by generated code.
    ///
    /// Called on the receiver as generated code left it; failing operations
    /// leave the receiver unchanged.
    fn error_for(&self, op: Self::Op, kind: ErrorKind, args: &[i64]) -> AbiError;

    /// Host functions generated code may call.
    fn runtime_symbols() -> Vec<RuntimeSymbol>;

    /// Emits the body of `op`.
    fn lower(op: Self::Op, lowering: &mut Lowering<'_, '_>) -> std::result::Result<(), CodegenError>;
}
