//! Byte-block codecs for the ABI's transportable value types.
//!
//! The registry is built by an explicit call during initialization; nothing
//! registers itself.

use fora_config::CompilerConfig;
use fora_core::{CodecRegistry, Result};

use crate::expr::{ExprDescriptor, NativeSignature};

pub const EXPR_DESCRIPTOR: &str = "fora.expr_descriptor";
pub const NATIVE_SIGNATURE: &str = "fora.native_signature";
pub const COMPILER_CONFIG: &str = "fora.compiler_config";

/// Registers the ABI value types in `registry`.
pub fn register_abi_codecs(registry: &mut CodecRegistry) -> Result<()> {
    registry.register::<ExprDescriptor>(EXPR_DESCRIPTOR)?;
    registry.register::<NativeSignature>(NATIVE_SIGNATURE)?;
    registry.register::<CompilerConfig>(COMPILER_CONFIG)?;
    Ok(())
}

/// A fresh registry holding the ABI value types.
pub fn abi_codecs() -> Result<CodecRegistry> {
    let mut registry = CodecRegistry::new();
    register_abi_codecs(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::NativeType;
    use fora_core::ErrorKind;

    #[test]
    fn test_abi_codecs_registers_all_types() {
        let registry = abi_codecs().unwrap();
        assert_eq!(
            registry.names(),
            vec![COMPILER_CONFIG, EXPR_DESCRIPTOR, NATIVE_SIGNATURE]
        );
    }

    #[test]
    fn test_registering_twice_fails() {
        let mut registry = abi_codecs().unwrap();
        let err = register_abi_codecs(&mut registry).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_signature_through_registry() {
        let registry = abi_codecs().unwrap();
        let sig = NativeSignature::new([NativeType::I64, NativeType::Ptr], NativeType::Unit);

        let bytes = registry.serialize(NATIVE_SIGNATURE, &sig).unwrap();
        let decoded = registry.deserialize(NATIVE_SIGNATURE, &bytes).unwrap();
        assert_eq!(decoded.downcast_ref::<NativeSignature>(), Some(&sig));
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let registry = abi_codecs().unwrap();
        let err = registry
            .serialize(NATIVE_SIGNATURE, &CompilerConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Codec);
    }
}
