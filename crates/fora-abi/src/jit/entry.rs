//! Compiled entries and their typed callables.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use cranelift_jit::JITModule;
use fora_core::{ErrorKind, Result, STATUS_OK};

use crate::expr::{ExprKey, NativeArgs, NativeWord, SafeArgs, TypedNativeExpression};
use crate::receiver::NativeReceiver;

type Entry0 = unsafe extern "C" fn(*mut u8, *mut i64) -> i64;
type Entry1 = unsafe extern "C" fn(*mut u8, i64, *mut i64) -> i64;
type Entry2 = unsafe extern "C" fn(*mut u8, i64, i64, *mut i64) -> i64;
type Entry3 = unsafe extern "C" fn(*mut u8, i64, i64, i64, *mut i64) -> i64;
type Entry4 = unsafe extern "C" fn(*mut u8, i64, i64, i64, i64, *mut i64) -> i64;

/// A machine-code artifact for one expression. Owns the Cranelift module
/// (code memory) and holds the raw entry address.
pub struct CompiledEntry {
    key: ExprKey,
    _module: JITModule,
    ptr: *const u8,
}

// SAFETY: JITModule owns the code memory, which is never written after
// finalization. ptr is valid for the module's lifetime.
unsafe impl Send for CompiledEntry {}
unsafe impl Sync for CompiledEntry {}

impl CompiledEntry {
    pub(crate) fn new(key: ExprKey, module: JITModule, ptr: *const u8) -> Self {
        Self {
            key,
            _module: module,
            ptr,
        }
    }

    pub fn key(&self) -> &ExprKey {
        &self.key
    }

    /// Entry address, callable from other generated code with the
    /// convention described in [`crate::jit`].
    pub fn code_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Number of declared arguments (excluding receiver and result slot).
    pub fn arity(&self) -> usize {
        self.key.signature().params.len()
    }

    /// Calls the entry, returning `(status, result word)`.
    ///
    /// # Safety
    ///
    /// `receiver` must point to a live value of the receiver type this entry
    /// was compiled for, and `args` must satisfy the operation's contract.
    pub(crate) unsafe fn invoke(&self, receiver: *mut u8, args: &[i64]) -> (i64, i64) {
        debug_assert_eq!(
            args.len(),
            self.arity(),
            "{}: expected {} args, got {}",
            self.key,
            self.arity(),
            args.len()
        );
        let mut out = 0i64;
        let out_ptr: *mut i64 = &mut out;
        let status = match *args {
            [] => {
                let f: Entry0 = std::mem::transmute(self.ptr);
                f(receiver, out_ptr)
            }
            [a] => {
                let f: Entry1 = std::mem::transmute(self.ptr);
                f(receiver, a, out_ptr)
            }
            [a, b] => {
                let f: Entry2 = std::mem::transmute(self.ptr);
                f(receiver, a, b, out_ptr)
            }
            [a, b, c] => {
                let f: Entry3 = std::mem::transmute(self.ptr);
                f(receiver, a, b, c, out_ptr)
            }
            [a, b, c, d] => {
                let f: Entry4 = std::mem::transmute(self.ptr);
                f(receiver, a, b, c, d, out_ptr)
            }
            _ => panic!("{}: {} arguments exceed the native limit", self.key, args.len()),
        };
        (status, out)
    }
}

impl fmt::Debug for CompiledEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledEntry")
            .field("key", &self.key)
            .field("ptr", &self.ptr)
            .finish()
    }
}

/// A typed, directly invocable view of a [`CompiledEntry`].
///
/// Cloning is cheap; every clone shares the same artifact.
pub struct Compiled<R: NativeReceiver, A, Ret> {
    op: R::Op,
    entry: Arc<CompiledEntry>,
    _signature: PhantomData<fn(&mut R, A) -> Ret>,
}

impl<R, A, Ret> Compiled<R, A, Ret>
where
    R: NativeReceiver,
    A: NativeArgs,
    Ret: NativeWord,
{
    pub(crate) fn new(expr: &TypedNativeExpression<R, A, Ret>, entry: Arc<CompiledEntry>) -> Self {
        Self {
            op: expr.op(),
            entry,
            _signature: PhantomData,
        }
    }

    /// Invokes the compiled operation on `receiver`.
    pub fn call(&self, receiver: &mut R, args: A) -> Result<Ret>
    where
        A: SafeArgs,
    {
        // SAFETY: SafeArgs carry no pointers, so no ownership is transferred.
        unsafe { self.call_unchecked(receiver, args) }
    }

    /// Invokes the compiled operation on `receiver`.
    ///
    /// # Safety
    ///
    /// Pointer arguments must satisfy the operation's ownership contract,
    /// exactly as for [`TypedNativeExpression::invoke_direct`].
    pub unsafe fn call_unchecked(&self, receiver: &mut R, args: A) -> Result<Ret> {
        let words = args.to_words();
        let (status, out) = self.entry.invoke((receiver as *mut R).cast(), &words);
        if status == STATUS_OK {
            return Ok(Ret::from_word(out));
        }
        match ErrorKind::from_status(status) {
            Some(kind) => Err(receiver.error_for(self.op, kind, &words)),
            None => panic!("{} returned unknown status {status}", self.entry.key()),
        }
    }

    pub fn entry(&self) -> &Arc<CompiledEntry> {
        &self.entry
    }

    /// Whether both callables are backed by the same compiled artifact.
    pub fn same_artifact<A2, Ret2>(&self, other: &Compiled<R, A2, Ret2>) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl<R: NativeReceiver, A, Ret> Clone for Compiled<R, A, Ret> {
    fn clone(&self) -> Self {
        Self {
            op: self.op,
            entry: Arc::clone(&self.entry),
            _signature: PhantomData,
        }
    }
}

impl<R: NativeReceiver, A, Ret> fmt::Debug for Compiled<R, A, Ret> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiled")
            .field("op", &self.op)
            .field("entry", &self.entry)
            .finish()
    }
}
