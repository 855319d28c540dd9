//! Typed native expressions.
//!
//! A [`TypedNativeExpression`] is a compile-time descriptor naming one
//! operation on one receiver type together with its signature. It holds no
//! receiver instance; it is the request handed to the native code compiler
//! and the key under which the compiled entry is cached.
//!
//! # Word Encoding
//!
//! Every native argument and result is a single 64-bit word. Integers travel
//! as themselves, pointers as their address, and `()` as zero. Anything that
//! does not fit a register (an [`NativeType::Aggregate`]) is rejected when the
//! expression is constructed.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;

use fora_core::{AbiError, Result};
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::receiver::NativeReceiver;

/// Maximum number of declared arguments (excluding the receiver).
pub const MAX_NATIVE_ARGS: usize = 4;

/// Argument words for one native call.
pub type ArgWords = SmallVec<[i64; MAX_NATIVE_ARGS]>;

/// Type of one argument or result in the native calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeType {
    I64,
    Ptr,
    /// No value. Only valid as a result.
    Unit,
    /// By-value aggregate of `size` bytes; never representable.
    Aggregate { size: usize },
}

impl NativeType {
    /// Whether a value of this type travels in a single integer register.
    pub fn is_register_passable(self) -> bool {
        matches!(self, NativeType::I64 | NativeType::Ptr)
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeType::I64 => f.write_str("i64"),
            NativeType::Ptr => f.write_str("ptr"),
            NativeType::Unit => f.write_str("()"),
            NativeType::Aggregate { size } => write!(f, "[u8; {size}]"),
        }
    }
}

/// Declared arguments and result of a member operation.
///
/// The receiver pointer is implicit and always comes first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeSignature {
    pub params: Vec<NativeType>,
    pub ret: NativeType,
}

impl NativeSignature {
    pub fn new(params: impl Into<Vec<NativeType>>, ret: NativeType) -> Self {
        Self {
            params: params.into(),
            ret,
        }
    }

    /// Checks that the signature fits the native calling convention.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedExpression` for too many arguments, a non-register
    /// argument, or an aggregate result.
    pub fn validate(&self) -> Result<()> {
        if self.params.len() > MAX_NATIVE_ARGS {
            return Err(AbiError::UnsupportedExpression(format!(
                "{} arguments exceed the native limit of {MAX_NATIVE_ARGS}",
                self.params.len()
            )));
        }
        if let Some((idx, ty)) = self
            .params
            .iter()
            .enumerate()
            .find(|(_, ty)| !ty.is_register_passable())
        {
            return Err(AbiError::UnsupportedExpression(format!(
                "argument {idx} of type {ty} cannot be passed natively"
            )));
        }
        if let NativeType::Aggregate { .. } = self.ret {
            return Err(AbiError::UnsupportedExpression(format!(
                "result of type {} cannot be returned natively",
                self.ret
            )));
        }
        Ok(())
    }
}

impl fmt::Display for NativeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(self")?;
        for param in &self.params {
            write!(f, ", {param}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// A host value that travels as one native word.
pub trait NativeWord: Copy + 'static {
    const TYPE: NativeType;

    fn to_word(self) -> i64;

    fn from_word(word: i64) -> Self;
}

impl NativeWord for i64 {
    const TYPE: NativeType = NativeType::I64;

    fn to_word(self) -> i64 {
        self
    }

    fn from_word(word: i64) -> Self {
        word
    }
}

impl NativeWord for () {
    const TYPE: NativeType = NativeType::Unit;

    fn to_word(self) -> i64 {
        0
    }

    fn from_word(_word: i64) -> Self {}
}

impl<T: 'static> NativeWord for *mut T {
    const TYPE: NativeType = NativeType::Ptr;

    fn to_word(self) -> i64 {
        self as usize as i64
    }

    fn from_word(word: i64) -> Self {
        word as usize as *mut T
    }
}

impl<T: 'static> NativeWord for *const T {
    const TYPE: NativeType = NativeType::Ptr;

    fn to_word(self) -> i64 {
        self as usize as i64
    }

    fn from_word(word: i64) -> Self {
        word as usize as *const T
    }
}

/// A tuple of native words passed after the receiver.
pub trait NativeArgs: Sized + 'static {
    fn types() -> Vec<NativeType>;

    fn to_words(self) -> ArgWords;
}

/// Argument tuples that carry no pointers, so no ownership moves with them.
pub trait SafeArgs: NativeArgs {}

macro_rules! native_args {
    ($($name:ident),*) => {
        impl<$($name: NativeWord),*> NativeArgs for ($($name,)*) {
            fn types() -> Vec<NativeType> {
                vec![$($name::TYPE),*]
            }

            #[allow(non_snake_case)]
            fn to_words(self) -> ArgWords {
                let ($($name,)*) = self;
                smallvec![$($name.to_word()),*]
            }
        }
    };
}

native_args!();
native_args!(A);
native_args!(A, B);
native_args!(A, B, C);
native_args!(A, B, C, D);

impl SafeArgs for () {}
impl SafeArgs for (i64,) {}
impl SafeArgs for (i64, i64) {}
impl SafeArgs for (i64, i64, i64) {}
impl SafeArgs for (i64, i64, i64, i64) {}

/// Structural identity of an expression: receiver type, operation, signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExprKey {
    receiver: TypeId,
    receiver_name: &'static str,
    op: &'static str,
    signature: NativeSignature,
}

impl ExprKey {
    fn new<R: NativeReceiver>(op: &'static str, signature: NativeSignature) -> Self {
        Self {
            receiver: TypeId::of::<R>(),
            receiver_name: R::receiver_name(),
            op,
            signature,
        }
    }

    pub fn receiver_name(&self) -> &'static str {
        self.receiver_name
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn signature(&self) -> &NativeSignature {
        &self.signature
    }

    /// Transportable description of this key.
    pub fn descriptor(&self) -> ExprDescriptor {
        ExprDescriptor {
            receiver: self.receiver_name.to_string(),
            op: self.op.to_string(),
            signature: self.signature.clone(),
        }
    }
}

impl fmt::Display for ExprKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}{}", self.receiver_name, self.op, self.signature)
    }
}

/// Serializable view of an [`ExprKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExprDescriptor {
    pub receiver: String,
    pub op: String,
    pub signature: NativeSignature,
}

/// A statically typed handle naming one member operation of `R`.
///
/// `A` is the argument tuple and `Ret` the result, both checked against the
/// operation's declared signature at construction.
pub struct TypedNativeExpression<R: NativeReceiver, A, Ret> {
    op: R::Op,
    key: ExprKey,
    _signature: PhantomData<fn(&mut R, A) -> Ret>,
}

impl<R, A, Ret> TypedNativeExpression<R, A, Ret>
where
    R: NativeReceiver,
    A: NativeArgs,
    Ret: NativeWord,
{
    /// Names the member operation `op` of `R`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedExpression` if the declared signature cannot be
    /// represented natively or does not match `A` and `Ret`.
    pub fn member(op: R::Op) -> Result<Self> {
        let name = R::op_name(op);
        let declared = R::signature(op);
        declared.validate().map_err(|e| match e {
            AbiError::UnsupportedExpression(msg) => AbiError::UnsupportedExpression(format!(
                "{}::{name}: {msg}",
                R::receiver_name()
            )),
            other => other,
        })?;

        let requested = NativeSignature::new(A::types(), Ret::TYPE);
        if requested != declared {
            return Err(AbiError::UnsupportedExpression(format!(
                "{}::{name} is declared {declared} but was requested as {requested}",
                R::receiver_name()
            )));
        }

        Ok(Self {
            op,
            key: ExprKey::new::<R>(name, declared),
            _signature: PhantomData,
        })
    }

    pub fn op(&self) -> R::Op {
        self.op
    }

    pub fn key(&self) -> &ExprKey {
        &self.key
    }

    /// Runs the host operation directly, without generated code.
    pub fn call_direct(&self, receiver: &mut R, args: A) -> Result<Ret>
    where
        A: SafeArgs,
    {
        // SAFETY: SafeArgs carry no pointers, so no ownership is transferred.
        unsafe { self.invoke_direct(receiver, args) }
    }

    /// Runs the host operation directly, without generated code.
    ///
    /// # Safety
    ///
    /// Pointer arguments must satisfy the operation's ownership contract
    /// (for example, a pointer handed to an owning assignment must be
    /// releasable by the receiver, or retracted before it is released).
    pub unsafe fn invoke_direct(&self, receiver: &mut R, args: A) -> Result<Ret> {
        let words = args.to_words();
        receiver.invoke_direct(self.op, &words).map(Ret::from_word)
    }
}

impl<R: NativeReceiver, A, Ret> Clone for TypedNativeExpression<R, A, Ret> {
    fn clone(&self) -> Self {
        Self {
            op: self.op,
            key: self.key.clone(),
            _signature: PhantomData,
        }
    }
}

impl<R: NativeReceiver, A, Ret> fmt::Debug for TypedNativeExpression<R, A, Ret> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedNativeExpression")
            .field("op", &self.op)
            .field("key", &self.key)
            .finish()
    }
}

impl<R: NativeReceiver, A, Ret> PartialEq for TypedNativeExpression<R, A, Ret> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<R: NativeReceiver, A, Ret> Eq for TypedNativeExpression<R, A, Ret> {}
