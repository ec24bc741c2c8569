//! DKIM signing keys.
//!
//! Keys live at a path built from a template with `{domain}` and `{selector}`
//! placeholders. Next to each key a `<domain>.<selector>.dns.txt` file holds
//! the zone line to publish.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info};

use crate::config::{StackConfig, expand_key_template};
use crate::error::{DkimError, MailstackError, Result};
use crate::host::fs::{rooted, write_atomic};

/// Longest character-string allowed in a single TXT record chunk.
const TXT_CHUNK: usize = 255;

/// A DKIM key on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DkimKey {
    /// Private key path.
    pub key_path: PathBuf,
    /// Zone line path.
    pub dns_path: PathBuf,
    /// `v=DKIM1; k=rsa; p=...` record text.
    pub record: String,
    /// False when the key already existed.
    pub created: bool,
}

/// DKIM key store rooted at a path template.
#[derive(Debug, Clone)]
pub struct DkimKeys {
    path_template: String,
    root: PathBuf,
}

impl DkimKeys {
    /// Creates a key store for a path template.
    #[must_use]
    pub fn new(path_template: impl Into<String>) -> Self {
        Self {
            path_template: path_template.into(),
            root: PathBuf::from("/"),
        }
    }

    /// Creates the key store configured for a deployment.
    #[must_use]
    pub fn from_config(config: &StackConfig) -> Self {
        Self::new(config.dkim_path.clone())
    }

    /// Re-anchors every key path under `root`.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Private key path for a domain and selector.
    #[must_use]
    pub fn key_path(&self, domain: &str, selector: &str) -> PathBuf {
        rooted(
            &self.root,
            expand_key_template(&self.path_template, domain, selector),
        )
    }

    /// Zone line path for a domain and selector.
    #[must_use]
    pub fn dns_path(&self, domain: &str, selector: &str) -> PathBuf {
        let key_path = self.key_path(domain, selector);
        let dir = key_path.parent().map_or_else(PathBuf::new, Path::to_path_buf);
        dir.join(format!("{domain}.{selector}.dns.txt"))
    }

    /// Returns true if a key exists for the pair.
    pub async fn exists(&self, domain: &str, selector: &str) -> bool {
        tokio::fs::try_exists(self.key_path(domain, selector))
            .await
            .unwrap_or(false)
    }

    /// Generates a key unless one already exists. Existing keys are never
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if generation fails or an existing key is unreadable.
    pub async fn ensure(&self, domain: &str, selector: &str, bits: usize) -> Result<DkimKey> {
        if self.exists(domain, selector).await {
            debug!(domain, selector, "DKIM key already exists");
            let record = self.dns_record(domain, selector).await?;
            return Ok(DkimKey {
                key_path: self.key_path(domain, selector),
                dns_path: self.dns_path(domain, selector),
                record,
                created: false,
            });
        }
        self.generate(domain, selector, bits).await
    }

    /// Generates a new RSA key, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns `DkimError::Generation` or an IO error.
    pub async fn generate(&self, domain: &str, selector: &str, bits: usize) -> Result<DkimKey> {
        info!("Generating {bits}-bit DKIM key for {domain} (selector {selector})");

        let private_key = tokio::task::spawn_blocking(move || {
            RsaPrivateKey::new(&mut rand::thread_rng(), bits)
        })
        .await
        .map_err(|e| DkimError::Generation {
            message: e.to_string(),
        })?
        .map_err(|e| DkimError::Generation {
            message: e.to_string(),
        })?;

        let pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| DkimError::Generation {
                message: e.to_string(),
            })?;
        let record = record_for(&RsaPublicKey::from(&private_key))?;

        let key_path = self.key_path(domain, selector);
        let dns_path = self.dns_path(domain, selector);
        write_atomic(&key_path, pem.as_bytes(), 0o600).await?;
        write_atomic(&dns_path, zone_line(domain, selector, &record).as_bytes(), 0o644).await?;

        info!("DKIM key written to {}", key_path.display());
        Ok(DkimKey {
            key_path,
            dns_path,
            record,
            created: true,
        })
    }

    /// Derives the DNS record from the stored private key.
    ///
    /// # Errors
    ///
    /// Returns `DkimError::KeyNotFound` or `DkimError::InvalidKey`.
    pub async fn dns_record(&self, domain: &str, selector: &str) -> Result<String> {
        let path = self.key_path(domain, selector);
        let pem = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MailstackError::Dkim(DkimError::KeyNotFound { path: path.clone() })
            } else {
                MailstackError::Io(e)
            }
        })?;

        let private_key = RsaPrivateKey::from_pkcs1_pem(&pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
            .map_err(|e| DkimError::InvalidKey {
                path: path.clone(),
                message: e.to_string(),
            })?;
        record_for(&RsaPublicKey::from(&private_key))
    }
}

/// Builds `v=DKIM1; k=rsa; p=<base64 SPKI DER>` for a public key.
///
/// # Errors
///
/// Returns `DkimError::Generation` if the key cannot be encoded.
pub fn record_for(public_key: &RsaPublicKey) -> Result<String> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| DkimError::Generation {
            message: e.to_string(),
        })?;
    Ok(format!("v=DKIM1; k=rsa; p={}", STANDARD.encode(der.as_bytes())))
}

/// Formats the zone file line, splitting the record into TXT-sized strings.
#[must_use]
pub fn zone_line(domain: &str, selector: &str, record: &str) -> String {
    let chunks: Vec<String> = record
        .as_bytes()
        .chunks(TXT_CHUNK)
        .map(|chunk| format!("\"{}\"", String::from_utf8_lossy(chunk)))
        .collect();
    format!(
        "{selector}._domainkey.{domain}. IN TXT ( {} )\n",
        chunks.join(" ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn keys(dir: &TempDir) -> DkimKeys {
        DkimKeys::new("/var/lib/mailstack/dkim/{domain}.{selector}.key").with_root(dir.path())
    }

    #[test]
    fn test_paths_follow_template() {
        let keys = DkimKeys::new("/keys/{domain}.{selector}.key");
        assert_eq!(
            keys.key_path("example.com", "dkim"),
            PathBuf::from("/keys/example.com.dkim.key")
        );
        assert_eq!(
            keys.dns_path("example.com", "dkim"),
            PathBuf::from("/keys/example.com.dkim.dns.txt")
        );
    }

    #[test]
    fn test_zone_line_splits_long_records() {
        let record = format!("v=DKIM1; k=rsa; p={}", "A".repeat(400));
        let line = zone_line("example.com", "dkim", &record);
        assert!(line.starts_with("dkim._domainkey.example.com. IN TXT ( \"v=DKIM1; k=rsa; p="));
        assert_eq!(line.matches('"').count(), 4);
    }

    #[tokio::test]
    async fn test_generate_then_ensure_keeps_key() {
        let dir = TempDir::new().unwrap();
        let keys = keys(&dir);

        let created = keys.ensure("example.com", "dkim", 1024).await.unwrap();
        assert!(created.created);
        assert!(created.record.starts_with("v=DKIM1; k=rsa; p=MI"));
        assert_eq!(
            created.key_path,
            dir.path().join("var/lib/mailstack/dkim/example.com.dkim.key")
        );

        let before = std::fs::read(&created.key_path).unwrap();
        let again = keys.ensure("example.com", "dkim", 1024).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.record, created.record);
        assert_eq!(std::fs::read(&created.key_path).unwrap(), before);

        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&created.key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let zone = std::fs::read_to_string(&created.dns_path).unwrap();
        assert!(zone.starts_with("dkim._domainkey.example.com. IN TXT"));
    }

    #[tokio::test]
    async fn test_dns_record_for_missing_key() {
        let dir = TempDir::new().unwrap();
        let err = keys(&dir).dns_record("example.com", "dkim").await.unwrap_err();
        assert!(matches!(err, MailstackError::Dkim(DkimError::KeyNotFound { .. })));
    }
}
