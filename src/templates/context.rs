//! Projection of the configuration into the flat rendering context.
//!
//! Every name a template may reference is a [`ContextKey`]. The projection in
//! [`ContextKey::project`] is an exhaustive match, so adding a key without a
//! producer does not compile.

use std::collections::HashMap;

use crate::config::StackConfig;

use super::value::Value;

/// A name available to templates as `.Name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContextKey {
    /// Primary mail domain.
    Domain,
    /// Host name.
    Hostname,
    /// All host names as a list.
    Hostnames,
    /// All host names joined with commas.
    HostnamesStr,
    /// Postmaster local part.
    Postmaster,
    /// Administrator address.
    AdminEmail,
    /// Maximum message size in bytes.
    MessageSizeLimit,
    /// Outbound rate limit.
    MessageRateLimit,
    /// Default quota in bytes.
    DefaultQuota,
    /// Recipient delimiter.
    RecipientDelimiter,
    /// DKIM selector.
    DkimSelector,
    /// DKIM key path template with `{domain}`/`{selector}` placeholders.
    DkimKeyPath,
    /// Smarthost.
    RelayHost,
    /// Smarthost user.
    RelayUser,
    /// Smarthost password.
    RelayPassword,
    /// IPv4 subnet.
    Subnet,
    /// IPv6 subnet.
    Subnet6,
    /// IPv4 bind address.
    BindIpv4,
    /// IPv6 bind address.
    BindIpv6,
    /// Relay networks.
    RelayNetworks,
    /// TLS flavor name.
    TlsFlavor,
    /// True unless TLS is disabled.
    TlsEnabled,
    /// Admin UI path.
    AdminPath,
    /// Webmail path.
    WebmailPath,
    /// API path.
    ApiPath,
    /// Site name.
    Sitename,
    /// Public website.
    Website,
    /// Data directory.
    DataPath,
    /// Mailbox directory.
    MailPath,
    /// DKIM key directory.
    DkimPath,
    /// Queue directory.
    QueuePath,
    /// Filter directory.
    FilterPath,
    /// Certificate directory.
    CertsPath,
    /// Override snippets directory.
    OverridesPath,
    /// Session secret.
    SecretKey,
    /// Roundcube DES key.
    RoundcubeKey,
    /// Snuffleupagus key.
    SnuffleupagusKey,
    /// Antivirus flag.
    EnableAntivirus,
    /// Webmail flag, derived from the variant.
    EnableWebmail,
    /// Webmail variant name.
    Webmail,
    /// Fetchmail flag.
    EnableFetchmail,
    /// Webdav flag.
    EnableWebdav,
    /// Oletools flag.
    EnableOletools,
    /// Time zone.
    Timezone,
    /// DNS resolver.
    Resolver,
    /// Redis `host:port`.
    RedisAddress,
    /// Redis host.
    RedisHost,
    /// Redis port.
    RedisPort,
    /// Webmail session lifetime in seconds.
    SessionLifetime,
    /// Upload limit in megabytes.
    MaxFilesize,
    /// Real IP header.
    RealIpHeader,
    /// Trusted proxy network.
    RealIpFrom,
    /// Database type.
    DatabaseType,
    /// Database connection string.
    DatabaseDsn,
    /// `SQLite` file path.
    DatabasePath,
}

impl ContextKey {
    /// Every key, in declaration order.
    pub const ALL: [Self; 55] = [
        Self::Domain,
        Self::Hostname,
        Self::Hostnames,
        Self::HostnamesStr,
        Self::Postmaster,
        Self::AdminEmail,
        Self::MessageSizeLimit,
        Self::MessageRateLimit,
        Self::DefaultQuota,
        Self::RecipientDelimiter,
        Self::DkimSelector,
        Self::DkimKeyPath,
        Self::RelayHost,
        Self::RelayUser,
        Self::RelayPassword,
        Self::Subnet,
        Self::Subnet6,
        Self::BindIpv4,
        Self::BindIpv6,
        Self::RelayNetworks,
        Self::TlsFlavor,
        Self::TlsEnabled,
        Self::AdminPath,
        Self::WebmailPath,
        Self::ApiPath,
        Self::Sitename,
        Self::Website,
        Self::DataPath,
        Self::MailPath,
        Self::DkimPath,
        Self::QueuePath,
        Self::FilterPath,
        Self::CertsPath,
        Self::OverridesPath,
        Self::SecretKey,
        Self::RoundcubeKey,
        Self::SnuffleupagusKey,
        Self::EnableAntivirus,
        Self::EnableWebmail,
        Self::Webmail,
        Self::EnableFetchmail,
        Self::EnableWebdav,
        Self::EnableOletools,
        Self::Timezone,
        Self::Resolver,
        Self::RedisAddress,
        Self::RedisHost,
        Self::RedisPort,
        Self::SessionLifetime,
        Self::MaxFilesize,
        Self::RealIpHeader,
        Self::RealIpFrom,
        Self::DatabaseType,
        Self::DatabaseDsn,
        Self::DatabasePath,
    ];

    /// Name used in templates, without the leading dot.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Domain => "Domain",
            Self::Hostname => "Hostname",
            Self::Hostnames => "Hostnames",
            Self::HostnamesStr => "HostnamesStr",
            Self::Postmaster => "Postmaster",
            Self::AdminEmail => "AdminEmail",
            Self::MessageSizeLimit => "MessageSizeLimit",
            Self::MessageRateLimit => "MessageRateLimit",
            Self::DefaultQuota => "DefaultQuota",
            Self::RecipientDelimiter => "RecipientDelimiter",
            Self::DkimSelector => "DKIMSelector",
            Self::DkimKeyPath => "DKIMKeyPath",
            Self::RelayHost => "RelayHost",
            Self::RelayUser => "RelayUser",
            Self::RelayPassword => "RelayPassword",
            Self::Subnet => "Subnet",
            Self::Subnet6 => "Subnet6",
            Self::BindIpv4 => "BindIPv4",
            Self::BindIpv6 => "BindIPv6",
            Self::RelayNetworks => "RelayNetworks",
            Self::TlsFlavor => "TLSFlavor",
            Self::TlsEnabled => "TLSEnabled",
            Self::AdminPath => "AdminPath",
            Self::WebmailPath => "WebmailPath",
            Self::ApiPath => "APIPath",
            Self::Sitename => "Sitename",
            Self::Website => "Website",
            Self::DataPath => "DataPath",
            Self::MailPath => "MailPath",
            Self::DkimPath => "DKIMPath",
            Self::QueuePath => "QueuePath",
            Self::FilterPath => "FilterPath",
            Self::CertsPath => "CertsPath",
            Self::OverridesPath => "OverridesPath",
            Self::SecretKey => "SecretKey",
            Self::RoundcubeKey => "RoundcubeKey",
            Self::SnuffleupagusKey => "SnuffleupagusKey",
            Self::EnableAntivirus => "EnableAntivirus",
            Self::EnableWebmail => "EnableWebmail",
            Self::Webmail => "Webmail",
            Self::EnableFetchmail => "EnableFetchmail",
            Self::EnableWebdav => "EnableWebdav",
            Self::EnableOletools => "EnableOletools",
            Self::Timezone => "Timezone",
            Self::Resolver => "Resolver",
            Self::RedisAddress => "RedisAddress",
            Self::RedisHost => "RedisHost",
            Self::RedisPort => "RedisPort",
            Self::SessionLifetime => "SessionLifetime",
            Self::MaxFilesize => "MaxFilesize",
            Self::RealIpHeader => "RealIPHeader",
            Self::RealIpFrom => "RealIPFrom",
            Self::DatabaseType => "DatabaseType",
            Self::DatabaseDsn => "DatabaseDSN",
            Self::DatabasePath => "DatabasePath",
        }
    }

    /// Resolves a template name to a key.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|key| key.name() == name)
    }

    /// Produces this key's value from the configuration.
    #[must_use]
    pub fn project(self, config: &StackConfig) -> Value {
        match self {
            Self::Domain => config.domain.as_str().into(),
            Self::Hostname => config.hostname.as_str().into(),
            Self::Hostnames => hostnames(config).into(),
            Self::HostnamesStr => hostnames(config).join(",").into(),
            Self::Postmaster => config.postmaster.as_str().into(),
            Self::AdminEmail => config.admin.email.as_str().into(),
            Self::MessageSizeLimit => config.mail.message_size_limit.into(),
            Self::MessageRateLimit => config.mail.message_ratelimit.as_str().into(),
            Self::DefaultQuota => config.mail.default_quota.into(),
            Self::RecipientDelimiter => config.mail.recipient_delimiter.as_str().into(),
            Self::DkimSelector => config.mail.dkim_selector.as_str().into(),
            Self::DkimKeyPath => config.dkim_path.as_str().into(),
            Self::RelayHost => config.mail.relay_host.as_str().into(),
            Self::RelayUser => config.mail.relay_user.as_str().into(),
            Self::RelayPassword => config.mail.relay_password.as_str().into(),
            Self::Subnet => config.network.subnet.as_str().into(),
            Self::Subnet6 => config.network.subnet6.as_str().into(),
            Self::BindIpv4 => config.network.bind_ipv4.as_str().into(),
            Self::BindIpv6 => config.network.bind_ipv6.as_str().into(),
            Self::RelayNetworks => config.network.relay_networks.as_str().into(),
            Self::TlsFlavor => config.tls_flavor().as_str().into(),
            Self::TlsEnabled => config.tls_flavor().is_enabled().into(),
            Self::AdminPath => config.web.admin_path.as_str().into(),
            Self::WebmailPath => config.web.webmail_path.as_str().into(),
            Self::ApiPath => config.web.api_path.as_str().into(),
            Self::Sitename => config.web.sitename.as_str().into(),
            Self::Website => config.web.website.as_str().into(),
            Self::DataPath => config.paths.data.as_str().into(),
            Self::MailPath => config.paths.mail.as_str().into(),
            Self::DkimPath => config.paths.dkim.as_str().into(),
            Self::QueuePath => config.paths.queue.as_str().into(),
            Self::FilterPath => config.paths.filter.as_str().into(),
            Self::CertsPath => config.paths.certs.as_str().into(),
            Self::OverridesPath => config.paths.overrides.as_str().into(),
            Self::SecretKey => config.secrets.secret_key.as_str().into(),
            Self::RoundcubeKey => config.secrets.roundcube_key.as_str().into(),
            Self::SnuffleupagusKey => config.secrets.snuffleupagus_key.as_str().into(),
            Self::EnableAntivirus => config.services.antivirus.into(),
            Self::EnableWebmail => config.webmail_enabled().into(),
            Self::Webmail => config.services.webmail.as_str().into(),
            Self::EnableFetchmail => config.services.fetchmail.into(),
            Self::EnableWebdav => config.services.webdav.into(),
            Self::EnableOletools => config.services.oletools.into(),
            Self::Timezone => config.timezone.as_str().into(),
            Self::Resolver => config.resolver.as_str().into(),
            Self::RedisAddress => config.redis_address.as_str().into(),
            Self::RedisHost => split_address(&config.redis_address).0.into(),
            Self::RedisPort => split_address(&config.redis_address).1.into(),
            Self::SessionLifetime => config.session_lifetime.into(),
            Self::MaxFilesize => config.max_filesize_mb.into(),
            Self::RealIpHeader => config.real_ip_header.as_str().into(),
            Self::RealIpFrom => config.real_ip_from.as_str().into(),
            Self::DatabaseType => config.database.kind.as_str().into(),
            Self::DatabaseDsn => config.database.dsn.as_str().into(),
            Self::DatabasePath => config.sqlite_path().to_string_lossy().into_owned().into(),
        }
    }
}

fn hostnames(config: &StackConfig) -> Vec<String> {
    if config.hostnames.is_empty() {
        vec![config.hostname.clone()]
    } else {
        config.hostnames.clone()
    }
}

/// Splits `host:port`, defaulting the port to 6379.
fn split_address(address: &str) -> (&str, &str) {
    match address.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            (host, port)
        }
        _ => (address, "6379"),
    }
}

/// The values of every context key for one render call.
#[derive(Debug, Clone)]
pub struct RenderContext {
    values: HashMap<ContextKey, Value>,
}

impl RenderContext {
    /// Projects the configuration into a context.
    #[must_use]
    pub fn from_config(config: &StackConfig) -> Self {
        let values = ContextKey::ALL
            .iter()
            .map(|key| (*key, key.project(config)))
            .collect();
        Self { values }
    }

    /// Returns the value of a key.
    #[must_use]
    pub fn get(&self, key: ContextKey) -> Value {
        self.values.get(&key).cloned().unwrap_or_else(Value::empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique_and_resolve() {
        let names: HashSet<_> = ContextKey::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), ContextKey::ALL.len());
        for key in ContextKey::ALL {
            assert_eq!(ContextKey::from_name(key.name()), Some(key));
        }
        assert_eq!(ContextKey::from_name("Nope"), None);
    }

    #[test]
    fn test_projection_covers_every_key() {
        let mut config = StackConfig::default();
        config.domain = String::from("example.com");
        config.hostname = String::from("mail.example.com");
        config.redis_address = String::from("10.0.0.2:6380");
        let context = RenderContext::from_config(&config);

        assert_eq!(context.values.len(), ContextKey::ALL.len());
        assert_eq!(
            context.get(ContextKey::Hostnames),
            Value::List(vec![String::from("mail.example.com")])
        );
        assert_eq!(context.get(ContextKey::RedisHost), Value::from("10.0.0.2"));
        assert_eq!(context.get(ContextKey::RedisPort), Value::from("6380"));
        assert_eq!(context.get(ContextKey::TlsFlavor), Value::from("notls"));
        assert_eq!(context.get(ContextKey::EnableWebmail), Value::Bool(false));
    }

    #[test]
    fn test_split_address_without_port() {
        assert_eq!(split_address("redis"), ("redis", "6379"));
        assert_eq!(split_address("[::1]:6379"), ("[::1]", "6379"));
    }
}
