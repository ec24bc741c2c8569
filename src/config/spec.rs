//! Configuration model for a `MailStack` deployment.
//!
//! These types map one-to-one onto `mailstack.json`. Every optional field is
//! filled by [`super::defaults::apply_defaults`] at load time, after which the
//! structure is treated as read-only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The root configuration structure for a `MailStack` deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct StackConfig {
    /// Primary mail domain.
    pub domain: String,
    /// Fully qualified host name of this server.
    pub hostname: String,
    /// All host names served (never empty after load).
    pub hostnames: Vec<String>,
    /// Local part of the postmaster alias.
    pub postmaster: String,
    /// Initial administrator account.
    pub admin: AdminConfig,
    /// User/domain/alias database.
    pub database: DatabaseConfig,
    /// Certificate provisioning.
    pub tls: TlsConfig,
    /// Mail policy.
    pub mail: MailConfig,
    /// Web front-end paths.
    pub web: WebConfig,
    /// Optional features.
    pub services: ServicesConfig,
    /// Network settings.
    pub network: NetworkConfig,
    /// Managed filesystem roots.
    pub paths: PathsConfig,
    /// DKIM key path template with `{domain}` and `{selector}` placeholders.
    pub dkim_path: String,
    /// Generated-once secret material.
    pub secrets: SecretsConfig,
    /// Time zone for web applications.
    pub timezone: String,
    /// DNS resolver used by Rspamd.
    pub resolver: String,
    /// Redis `host:port`.
    pub redis_address: String,
    /// Webmail session lifetime in seconds.
    pub session_lifetime: u64,
    /// Upload limit for webmail in megabytes.
    pub max_filesize_mb: u64,
    /// Header carrying the client address behind a proxy.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub real_ip_header: String,
    /// Trusted proxy network for `real_ip_header`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub real_ip_from: String,
}

/// Administrator account created at the end of installation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AdminConfig {
    /// Administrator address.
    pub email: String,
    /// Administrator password (cleartext, hashed on insert).
    pub password: String,
}

/// Database descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Backend type.
    #[serde(rename = "type")]
    pub kind: DatabaseType,
    /// `SQLite` file path.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Server host.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Server port.
    #[serde(skip_serializing_if = "is_zero_u16")]
    pub port: u16,
    /// Database name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Database user.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user: String,
    /// Database password.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    /// Connection string, derived from the fields above when empty.
    pub dsn: String,
}

/// Supported database backends.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DatabaseType {
    /// Local `SQLite` file.
    #[default]
    Sqlite,
    /// `PostgreSQL` server.
    Postgresql,
    /// `MySQL` or `MariaDB` server.
    Mysql,
    /// A value that names no known backend.
    Unrecognized(String),
}

/// TLS provisioning settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Certificate flavor.
    pub flavor: Option<TlsFlavor>,
    /// ACME account email.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub email: String,
    /// Custom certificate path.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cert_path: String,
    /// Custom private key path.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key_path: String,
}

/// How certificates are obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TlsFlavor {
    /// ACME certificates for all front-ends.
    Letsencrypt,
    /// ACME certificates for mail protocols only.
    MailLetsencrypt,
    /// Operator-supplied certificate.
    Cert,
    /// Operator-supplied certificate for mail protocols only.
    Mail,
    /// No TLS.
    Notls,
    /// A value that names no known flavor.
    Unrecognized(String),
}

/// Mail policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct MailConfig {
    /// Maximum message size in bytes.
    pub message_size_limit: u64,
    /// Outbound rate limit expression, e.g. `200/day`.
    pub message_ratelimit: String,
    /// Default mailbox quota in bytes.
    pub default_quota: u64,
    /// Recipient delimiter character.
    pub recipient_delimiter: String,
    /// DKIM selector.
    pub dkim_selector: String,
    /// DKIM RSA modulus size.
    pub dkim_key_bits: u32,
    /// Smarthost for outbound mail.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub relay_host: String,
    /// Smarthost SASL user.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub relay_user: String,
    /// Smarthost SASL password.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub relay_password: String,
}

/// Web front-end paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct WebConfig {
    /// Admin UI path.
    pub admin_path: String,
    /// Webmail path.
    pub webmail_path: String,
    /// API path.
    pub api_path: String,
    /// Site name shown in web UIs.
    pub sitename: String,
    /// Public website URL.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub website: String,
}

/// Optional features.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ServicesConfig {
    /// `ClamAV` scanning.
    pub antivirus: bool,
    /// Webmail variant; the single source of truth for "webmail enabled".
    pub webmail: WebmailVariant,
    /// Remote mailbox fetching.
    pub fetchmail: bool,
    /// `CalDAV`/`CardDAV` via Radicale.
    pub webdav: bool,
    /// Office macro scanning.
    pub oletools: bool,
}

/// Webmail selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WebmailVariant {
    /// No webmail.
    #[default]
    None,
    /// Roundcube.
    Roundcube,
    /// `SnappyMail`.
    Snappymail,
    /// A value that names no known webmail.
    Unrecognized(String),
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct NetworkConfig {
    /// IPv4 subnet of the mail stack.
    pub subnet: String,
    /// IPv6 subnet of the mail stack.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subnet6: String,
    /// IPv4 bind address.
    pub bind_ipv4: String,
    /// IPv6 bind address.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bind_ipv6: String,
    /// Networks allowed to relay, space separated.
    pub relay_networks: String,
}

/// Managed filesystem roots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PathsConfig {
    /// Lookup maps, database, DH parameters.
    pub data: String,
    /// Mailboxes.
    pub mail: String,
    /// DKIM keys.
    pub dkim: String,
    /// Postfix queue.
    pub queue: String,
    /// Rspamd filter state.
    pub filter: String,
    /// Installed certificates.
    pub certs: String,
    /// Operator override snippets.
    pub overrides: String,
}

/// Secret material, generated when absent and never rotated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SecretsConfig {
    /// Session signing key.
    pub secret_key: String,
    /// Roundcube DES key.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub roundcube_key: String,
    /// Snuffleupagus cookie encryption key.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub snuffleupagus_key: String,
}

/// Optional features that pull in extra packages and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    /// `ClamAV`.
    Antivirus,
    /// Webmail with PHP-FPM.
    Webmail,
    /// Fetchmail.
    Fetchmail,
    /// Radicale.
    Webdav,
    /// Oletools.
    Oletools,
}

const fn is_zero_u16(value: &u16) -> bool {
    *value == 0
}

impl StackConfig {
    /// Returns true if a webmail variant is selected.
    #[must_use]
    pub const fn webmail_enabled(&self) -> bool {
        matches!(
            self.services.webmail,
            WebmailVariant::Roundcube | WebmailVariant::Snappymail
        )
    }

    /// Returns the TLS flavor, treating an unset flavor as disabled.
    #[must_use]
    pub fn tls_flavor(&self) -> TlsFlavor {
        self.tls.flavor.clone().unwrap_or(TlsFlavor::Notls)
    }

    /// Returns the enabled optional features in a stable order.
    #[must_use]
    pub fn enabled_features(&self) -> Vec<Feature> {
        let mut features = Vec::new();
        if self.services.antivirus {
            features.push(Feature::Antivirus);
        }
        if self.webmail_enabled() {
            features.push(Feature::Webmail);
        }
        if self.services.fetchmail {
            features.push(Feature::Fetchmail);
        }
        if self.services.webdav {
            features.push(Feature::Webdav);
        }
        if self.services.oletools {
            features.push(Feature::Oletools);
        }
        features
    }

    /// Expands the DKIM path template for a domain and selector.
    #[must_use]
    pub fn dkim_key_path(&self, domain: &str, selector: &str) -> PathBuf {
        PathBuf::from(expand_key_template(&self.dkim_path, domain, selector))
    }

    /// Returns the `SQLite` database file path.
    #[must_use]
    pub fn sqlite_path(&self) -> PathBuf {
        if let Some(path) = self.database.dsn.strip_prefix("sqlite:")
            && !path.is_empty()
        {
            return PathBuf::from(path);
        }
        if self.database.path.is_empty() {
            PathBuf::from(&self.paths.data).join("mailstack.db")
        } else {
            PathBuf::from(&self.database.path)
        }
    }
}

/// Substitutes `{domain}` and `{selector}` in a key path template.
#[must_use]
pub fn expand_key_template(template: &str, domain: &str, selector: &str) -> String {
    template
        .replace("{domain}", domain)
        .replace("{selector}", selector)
}

impl DatabaseType {
    /// Returns the canonical configuration name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for DatabaseType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "sqlite" | "sqlite3" => Self::Sqlite,
            "postgresql" | "postgres" => Self::Postgresql,
            "mysql" | "mariadb" => Self::Mysql,
            _ => Self::Unrecognized(raw),
        }
    }
}

impl From<DatabaseType> for String {
    fn from(kind: DatabaseType) -> Self {
        match kind {
            DatabaseType::Unrecognized(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TlsFlavor {
    /// Returns the canonical configuration name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Letsencrypt => "letsencrypt",
            Self::MailLetsencrypt => "mail-letsencrypt",
            Self::Cert => "cert",
            Self::Mail => "mail",
            Self::Notls => "notls",
            Self::Unrecognized(raw) => raw,
        }
    }

    /// Returns true for flavors whose certificates come from an ACME client.
    #[must_use]
    pub const fn uses_acme(&self) -> bool {
        matches!(self, Self::Letsencrypt | Self::MailLetsencrypt)
    }

    /// Returns true for flavors using operator-supplied certificate files.
    #[must_use]
    pub const fn uses_custom_certs(&self) -> bool {
        matches!(self, Self::Cert | Self::Mail)
    }

    /// Returns true unless TLS is disabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::Notls)
    }
}

impl From<String> for TlsFlavor {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "letsencrypt" => Self::Letsencrypt,
            "mail-letsencrypt" => Self::MailLetsencrypt,
            "cert" => Self::Cert,
            "mail" => Self::Mail,
            "notls" => Self::Notls,
            _ => Self::Unrecognized(raw),
        }
    }
}

impl From<TlsFlavor> for String {
    fn from(flavor: TlsFlavor) -> Self {
        match flavor {
            TlsFlavor::Unrecognized(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for TlsFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WebmailVariant {
    /// Returns the canonical configuration name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Roundcube => "roundcube",
            Self::Snappymail => "snappymail",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for WebmailVariant {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "" | "none" => Self::None,
            "roundcube" => Self::Roundcube,
            "snappymail" => Self::Snappymail,
            _ => Self::Unrecognized(raw),
        }
    }
}

impl From<WebmailVariant> for String {
    fn from(variant: WebmailVariant) -> Self {
        match variant {
            WebmailVariant::Unrecognized(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for WebmailVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Feature {
    /// Returns the feature name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Antivirus => "antivirus",
            Self::Webmail => "webmail",
            Self::Fetchmail => "fetchmail",
            Self::Webdav => "webdav",
            Self::Oletools => "oletools",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_aliases_canonicalize() {
        assert_eq!(DatabaseType::from(String::from("postgres")), DatabaseType::Postgresql);
        assert_eq!(DatabaseType::from(String::from("mariadb")), DatabaseType::Mysql);
        assert_eq!(String::from(DatabaseType::Postgresql), "postgresql");
        assert_eq!(
            TlsFlavor::from(String::from("bogus")),
            TlsFlavor::Unrecognized(String::from("bogus"))
        );
        assert_eq!(WebmailVariant::from(String::new()), WebmailVariant::None);
    }

    #[test]
    fn test_webmail_enabled_derived_from_variant() {
        let mut config = StackConfig::default();
        assert!(!config.webmail_enabled());

        config.services.webmail = WebmailVariant::Snappymail;
        assert!(config.webmail_enabled());
        assert_eq!(config.enabled_features(), vec![Feature::Webmail]);
    }

    #[test]
    fn test_sqlite_path_prefers_dsn() {
        let mut config = StackConfig::default();
        config.paths.data = String::from("/var/lib/mailstack/data");
        assert_eq!(
            config.sqlite_path(),
            PathBuf::from("/var/lib/mailstack/data/mailstack.db")
        );

        config.database.dsn = String::from("sqlite:/srv/mail.db");
        assert_eq!(config.sqlite_path(), PathBuf::from("/srv/mail.db"));
    }

    #[test]
    fn test_expand_key_template() {
        assert_eq!(
            expand_key_template("/keys/{domain}.{selector}.key", "example.com", "dkim"),
            "/keys/example.com.dkim.key"
        );
    }
}
