//! Byte-block codecs for value types that cross process boundaries.
//!
//! An external binding layer captures and restores values as opaque byte
//! blocks. Every codec is registered explicitly in a [`CodecRegistry`] during
//! initialisation; nothing registers itself at load time.

use std::any::Any;
use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AbiError, Result};

/// A value with a byte-block representation.
///
/// `from_byte_block(&v.to_byte_block()?)` yields a value equal to `v`.
pub trait ByteBlock: Sized {
    fn to_byte_block(&self) -> Result<Vec<u8>>;

    fn from_byte_block(bytes: &[u8]) -> Result<Self>;
}

impl<T> ByteBlock for T
where
    T: Serialize + DeserializeOwned,
{
    fn to_byte_block(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| AbiError::Codec(e.to_string()))
    }

    fn from_byte_block(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| AbiError::Codec(e.to_string()))
    }
}

/// Captures `value` as a byte block.
pub fn serialize<T: ByteBlock>(value: &T) -> Result<Vec<u8>> {
    value.to_byte_block()
}

/// Restores a value captured by [`serialize`].
pub fn deserialize<T: ByteBlock>(bytes: &[u8]) -> Result<T> {
    T::from_byte_block(bytes)
}

type SerializeFn = fn(&dyn Any) -> Result<Vec<u8>>;
type DeserializeFn = fn(&[u8]) -> Result<Box<dyn Any + Send>>;

struct Codec {
    serialize: SerializeFn,
    deserialize: DeserializeFn,
}

/// Named, type-erased codecs.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: HashMap<&'static str, Codec>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `name`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `name` is already taken.
    pub fn register<T>(&mut self, name: &'static str) -> Result<()>
    where
        T: ByteBlock + Send + 'static,
    {
        if self.codecs.contains_key(name) {
            return Err(AbiError::InvalidArgument(format!(
                "codec `{name}` registered twice"
            )));
        }
        self.codecs.insert(
            name,
            Codec {
                serialize: serialize_erased::<T>,
                deserialize: deserialize_erased::<T>,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.codecs.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn serialize(&self, name: &str, value: &dyn Any) -> Result<Vec<u8>> {
        (self.codec(name)?.serialize)(value)
    }

    pub fn deserialize(&self, name: &str, bytes: &[u8]) -> Result<Box<dyn Any + Send>> {
        (self.codec(name)?.deserialize)(bytes)
    }

    fn codec(&self, name: &str) -> Result<&Codec> {
        self.codecs
            .get(name)
            .ok_or_else(|| AbiError::Codec(format!("no codec registered for `{name}`")))
    }
}

fn serialize_erased<T: ByteBlock + 'static>(value: &dyn Any) -> Result<Vec<u8>> {
    let value = value.downcast_ref::<T>().ok_or_else(|| {
        AbiError::Codec(format!("value is not a {}", std::any::type_name::<T>()))
    })?;
    value.to_byte_block()
}

fn deserialize_erased<T: ByteBlock + Send + 'static>(bytes: &[u8]) -> Result<Box<dyn Any + Send>> {
    Ok(Box::new(T::from_byte_block(bytes)?))
}
