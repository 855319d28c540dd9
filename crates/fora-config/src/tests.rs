//! Tests for compiler configuration.

use super::*;

#[test]
fn test_toml_parsing() {
    let toml = r#"
        opt_level = "none"
        enable_verifier = false
        preserve_frame_pointers = true
    "#;

    let config = CompilerConfig::from_toml_str(toml).unwrap();
    assert_eq!(config.opt_level, OptLevel::None);
    assert!(!config.enable_verifier);
    assert!(config.preserve_frame_pointers);
}

#[test]
fn test_yaml_parsing() {
    let yaml = r#"
        opt_level: speed_and_size
    "#;

    let config = CompilerConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.opt_level, OptLevel::SpeedAndSize);
    assert!(config.enable_verifier);
    assert!(!config.preserve_frame_pointers);
}

#[test]
fn test_empty_toml_is_default() {
    let config = CompilerConfig::from_toml_str("").unwrap();
    assert_eq!(config, CompilerConfig::default());
}

#[test]
fn test_invalid_combination() {
    let toml = r#"
        opt_level = "speed_and_size"
        preserve_frame_pointers = true
    "#;
    assert!(matches!(
        CompilerConfig::from_toml_str(toml),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_unknown_opt_level() {
    assert!(matches!(
        CompilerConfig::from_toml_str(r#"opt_level = "fastest""#),
        Err(ConfigError::Toml(_))
    ));
}

#[test]
fn test_builder() {
    let config = CompilerConfig::new()
        .with_opt_level(OptLevel::None)
        .with_verifier(false)
        .with_frame_pointers(true);

    assert_eq!(config.opt_level.as_cranelift_str(), "none");
    assert!(!config.enable_verifier);
    assert!(config.validate().is_ok());
}
