//! Configuration hashing for change detection.
//!
//! The fingerprint of a defaulted configuration is recorded in every install
//! report so two runs can be compared, and rendered files are digested to
//! tell whether a regeneration actually changed anything.

use sha2::{Digest, Sha256};

use super::spec::StackConfig;

/// Hasher for computing configuration and content hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire configuration.
    ///
    /// Secrets take part in the hash, so a regenerated secret shows up as a
    /// changed fingerprint.
    #[must_use]
    pub fn hash_config(&self, config: &StackConfig) -> String {
        // Struct fields serialize in declaration order, which keeps this stable.
        let encoded = serde_json::to_vec(config).unwrap_or_default();
        self.content_digest(&encoded)
    }

    /// Computes the SHA-256 digest of arbitrary bytes as lowercase hex.
    #[must_use]
    pub fn content_digest(&self, content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(domain: &str) -> StackConfig {
        StackConfig {
            domain: domain.to_string(),
            hostname: format!("mail.{domain}"),
            ..StackConfig::default()
        }
    }

    #[test]
    fn test_config_hash_deterministic() {
        let hasher = ConfigHasher::new();
        let first = hasher.hash_config(&config("example.com"));
        let second = hasher.hash_config(&config("example.com"));

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_different_configs_different_hash() {
        let hasher = ConfigHasher::new();
        assert_ne!(
            hasher.hash_config(&config("example.com")),
            hasher.hash_config(&config("example.org"))
        );
    }

    #[test]
    fn test_content_digest_known_value() {
        let hasher = ConfigHasher::new();
        assert_eq!(
            hasher.content_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");

        assert_eq!(short, "abcdef12");
    }
}
