//! Fora Core - shared types for the native ABI layer
//!
//! This crate provides the pieces every other Fora crate builds on:
//! - The error taxonomy shared by host operations and generated code
//! - Status words that cross the native calling convention
//! - Byte-block codecs and the explicit codec registry

pub mod codec;
pub mod error;

pub use codec::{deserialize, serialize, ByteBlock, CodecRegistry};
pub use error::{
    AbiError, ErrorKind, Result, STATUS_INDEX_OUT_OF_RANGE, STATUS_INVALID_ARGUMENT, STATUS_OK,
    STATUS_OUT_OF_MEMORY,
};
