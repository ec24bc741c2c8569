//! Configuration validation for mail stack deployments.
//!
//! This module checks a defaulted configuration for missing identity fields,
//! unrecognised enumerations and inconsistent TLS settings before any host
//! state is touched.

use crate::error::{ConfigError, MailstackError, Result};
use tracing::debug;

use super::spec::{DatabaseType, StackConfig, TlsFlavor, WebmailVariant};

/// Validator for mail stack configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    /// Returns true if no error was recorded.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration, failing on the first violation.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError::ValidationError` naming the offending field.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            Err(MailstackError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        } else {
            debug!("Configuration validation passed");
            Ok(result)
        }
    }

    /// Collects every violation without failing.
    #[must_use]
    pub fn check(&self, config: &StackConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_identity(config, &mut result);
        Self::validate_database(config, &mut result);
        Self::validate_tls(config, &mut result);
        Self::validate_services(config, &mut result);
        Self::validate_mail(config, &mut result);
        Self::validate_paths(config, &mut result);

        result
    }

    fn validate_identity(config: &StackConfig, result: &mut ValidationResult) {
        if config.domain.is_empty() {
            result.error("domain", "domain is required");
        } else if !is_valid_dns_name(&config.domain) {
            result.error("domain", format!("'{}' is not a valid domain name", config.domain));
        }

        if config.hostname.is_empty() {
            result.error("hostname", "hostname is required");
        } else if !is_valid_dns_name(&config.hostname) {
            result.error(
                "hostname",
                format!("'{}' is not a valid host name", config.hostname),
            );
        }

        for name in &config.hostnames {
            if !is_valid_dns_name(name) {
                result.error("hostnames", format!("'{name}' is not a valid host name"));
            }
        }

        if config.admin.email.is_empty() {
            result.error("admin.email", "admin email is required");
        } else if !is_valid_email(&config.admin.email) {
            result.error(
                "admin.email",
                format!("'{}' is not a valid email address", config.admin.email),
            );
        }

        if config.admin.password.is_empty() {
            result.error("admin.password", "admin password is required");
        } else if config.admin.password.len() < 8 {
            result
                .warnings
                .push(String::from("admin password is shorter than 8 characters"));
        }
    }

    fn validate_database(config: &StackConfig, result: &mut ValidationResult) {
        match &config.database.kind {
            DatabaseType::Unrecognized(raw) => result.error(
                "database.type",
                format!("invalid database type '{raw}' (expected sqlite, postgresql or mysql)"),
            ),
            DatabaseType::Postgresql | DatabaseType::Mysql => result.warnings.push(format!(
                "database type {} requires manual setup",
                config.database.kind
            )),
            DatabaseType::Sqlite => {}
        }
    }

    fn validate_tls(config: &StackConfig, result: &mut ValidationResult) {
        let Some(flavor) = &config.tls.flavor else {
            result
                .warnings
                .push(String::from("tls.flavor not set; TLS is disabled"));
            return;
        };

        match flavor {
            TlsFlavor::Unrecognized(raw) => result.error(
                "tls.flavor",
                format!(
                    "invalid TLS flavor '{raw}' (expected letsencrypt, mail-letsencrypt, cert, mail or notls)"
                ),
            ),
            TlsFlavor::Letsencrypt | TlsFlavor::MailLetsencrypt => {
                if config.tls.email.is_empty() {
                    result.error("tls.email", "TLS email is required for Let's Encrypt");
                } else if !is_valid_email(&config.tls.email) {
                    result.error(
                        "tls.email",
                        format!("'{}' is not a valid email address", config.tls.email),
                    );
                }
            }
            TlsFlavor::Cert | TlsFlavor::Mail => {
                if config.tls.cert_path.is_empty() {
                    result.error("tls.cert_path", "certificate path is required for custom certificates");
                }
                if config.tls.key_path.is_empty() {
                    result.error("tls.key_path", "key path is required for custom certificates");
                }
            }
            TlsFlavor::Notls => result
                .warnings
                .push(String::from("TLS is disabled; credentials travel in clear text")),
        }
    }

    fn validate_services(config: &StackConfig, result: &mut ValidationResult) {
        if let WebmailVariant::Unrecognized(raw) = &config.services.webmail {
            result.error(
                "services.webmail",
                format!("invalid webmail '{raw}' (expected none, roundcube or snappymail)"),
            );
        }
    }

    fn validate_mail(config: &StackConfig, result: &mut ValidationResult) {
        let mail = &config.mail;
        if mail.message_size_limit == 0 {
            result.error("mail.message_size_limit", "message size limit must be positive");
        }
        if mail.dkim_selector.is_empty() {
            result.error("mail.dkim_selector", "DKIM selector cannot be empty");
        } else if !mail
            .dkim_selector
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            result.error(
                "mail.dkim_selector",
                format!("'{}' is not a valid DKIM selector", mail.dkim_selector),
            );
        }
        if !(1024..=4096).contains(&mail.dkim_key_bits) {
            result.error(
                "mail.dkim_key_bits",
                format!("DKIM key size {} is outside 1024..=4096", mail.dkim_key_bits),
            );
        }
    }

    fn validate_paths(config: &StackConfig, result: &mut ValidationResult) {
        let paths = &config.paths;
        let named = [
            ("paths.data", &paths.data),
            ("paths.mail", &paths.mail),
            ("paths.dkim", &paths.dkim),
            ("paths.queue", &paths.queue),
            ("paths.filter", &paths.filter),
            ("paths.certs", &paths.certs),
            ("paths.overrides", &paths.overrides),
        ];
        for (field, value) in named {
            if !value.starts_with('/') {
                result.error(field, format!("'{value}' must be an absolute path"));
            }
        }
    }
}

/// Checks that a name is a plausible DNS name (letters, digits, hyphens, dots).
#[must_use]
pub fn is_valid_dns_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    name.trim_end_matches('.').split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Checks that an address has a non-empty local part and a DNS domain.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    match email.rsplit_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !local.contains(char::is_whitespace) && is_valid_dns_name(domain)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::apply_defaults;

    fn valid_config() -> StackConfig {
        let mut config = StackConfig {
            domain: String::from("example.com"),
            hostname: String::from("mail.example.com"),
            ..StackConfig::default()
        };
        config.admin.email = String::from("admin@example.com");
        config.admin.password = String::from("correct-horse");
        config.tls.flavor = Some(TlsFlavor::Notls);
        apply_defaults(&mut config);
        config
    }

    fn failing_field(config: &StackConfig) -> Option<String> {
        match ConfigValidator::new().validate(config) {
            Err(MailstackError::Config(err)) => err.field().map(str::to_string),
            _ => None,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(ConfigValidator::new().validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_required_fields_are_named() {
        let mut config = valid_config();
        config.domain.clear();
        assert_eq!(failing_field(&config).as_deref(), Some("domain"));

        let mut config = valid_config();
        config.hostname.clear();
        assert_eq!(failing_field(&config).as_deref(), Some("hostname"));

        let mut config = valid_config();
        config.admin.email.clear();
        assert_eq!(failing_field(&config).as_deref(), Some("admin.email"));

        let mut config = valid_config();
        config.admin.password.clear();
        assert_eq!(failing_field(&config).as_deref(), Some("admin.password"));
    }

    #[test]
    fn test_letsencrypt_requires_email() {
        let mut config = valid_config();
        config.tls.flavor = Some(TlsFlavor::Letsencrypt);
        assert_eq!(failing_field(&config).as_deref(), Some("tls.email"));

        config.tls.email = String::from("ops@example.com");
        assert!(failing_field(&config).is_none());
    }

    #[test]
    fn test_unrecognized_enums_are_rejected() {
        let mut config = valid_config();
        config.database.kind = DatabaseType::Unrecognized(String::from("oracle"));
        assert_eq!(failing_field(&config).as_deref(), Some("database.type"));

        let mut config = valid_config();
        config.tls.flavor = Some(TlsFlavor::Unrecognized(String::from("maybe")));
        assert_eq!(failing_field(&config).as_deref(), Some("tls.flavor"));
    }

    #[test]
    fn test_check_collects_everything() {
        let mut config = valid_config();
        config.domain.clear();
        config.admin.password.clear();
        config.tls.flavor = Some(TlsFlavor::Cert);

        let result = ConfigValidator::new().check(&config);
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["domain", "admin.password", "tls.cert_path", "tls.key_path"]
        );
    }

    #[test]
    fn test_dns_names() {
        assert!(is_valid_dns_name("example.com"));
        assert!(is_valid_dns_name("mail.example.com."));
        assert!(!is_valid_dns_name("-bad.example.com"));
        assert!(!is_valid_dns_name("exa mple.com"));
        assert!(!is_valid_dns_name("a..b"));
        assert!(is_valid_email("postmaster@example.com"));
        assert!(!is_valid_email("postmaster"));
    }
}
