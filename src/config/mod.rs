//! Configuration module for the `MailStack` provisioning system.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `mailstack.json`
//! - Defaulting optional fields and generating secrets once
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod defaults;
mod hash;
mod parser;
mod spec;
mod validator;

pub use defaults::{GeneratedSecrets, apply_defaults, build_dsn, generate_secret};
pub use hash::ConfigHasher;
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILE, LoadedConfig};
pub use spec::{
    AdminConfig, DatabaseConfig, DatabaseType, Feature, MailConfig, NetworkConfig, PathsConfig,
    SecretsConfig, ServicesConfig, StackConfig, TlsConfig, TlsFlavor, WebConfig, WebmailVariant,
    expand_key_template,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult, is_valid_email};
