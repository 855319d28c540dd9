//! Native ABI layer for typed container operations.
//!
//! A host type implements [`NativeReceiver`] to describe its operations. A
//! [`TypedNativeExpression`] names one of those operations with a statically
//! checked signature, and the [`NativeCodeCompiler`] turns it into a cached,
//! machine-code entry point that behaves exactly like the host operation.
//!
//! [`PointerArray`] is the representative receiver: an owning, resizable array
//! of raw pointers whose ownership rules generated code reproduces.
//!
//! ```
//! use fora_abi::{compile, PointerArray};
//!
//! let mut table: PointerArray<i64> = PointerArray::new();
//! let resize = compile(&PointerArray::<i64>::resize_expr().unwrap());
//! resize.call(&mut table, (100,)).unwrap();
//! assert_eq!(table.count(), 100);
//! ```

pub mod conformance;
mod expr;
pub mod jit;
mod pointer_array;
mod receiver;
pub mod registry;

pub use expr::{
    ArgWords, ExprDescriptor, ExprKey, NativeArgs, NativeSignature, NativeType, NativeWord,
    SafeArgs, TypedNativeExpression, MAX_NATIVE_ARGS,
};
pub use jit::{
    compile, CodegenError, CompileState, Compiled, CompiledEntry, Lowering, NativeCodeCompiler,
    RuntimeSymbol,
};
pub use pointer_array::{ArrayOp, PointerArray, CAPACITY_OFFSET, COUNT_OFFSET, SLOTS_OFFSET};
pub use receiver::NativeReceiver;

pub use fora_config::{CompilerConfig, OptLevel};
pub use fora_core::{AbiError, ErrorKind, Result};
