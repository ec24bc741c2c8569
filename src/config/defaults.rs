//! Field defaulting for loaded configurations.
//!
//! Defaults are applied in a fixed order so that derived values (the DKIM
//! path template, the database connection string, the upload limit) see
//! already-defaulted inputs. Applying defaults to a defaulted configuration
//! changes nothing.

use rand::RngCore;

use super::spec::{DatabaseConfig, DatabaseType, StackConfig, WebmailVariant};

/// Default postmaster local part.
pub const DEFAULT_POSTMASTER: &str = "postmaster";
/// Default maximum message size (50 MB).
pub const DEFAULT_MESSAGE_SIZE_LIMIT: u64 = 50_000_000;
/// Default outbound rate limit.
pub const DEFAULT_RATELIMIT: &str = "200/day";
/// Default mailbox quota (1 GB).
pub const DEFAULT_QUOTA: u64 = 1_000_000_000;
/// Default DKIM selector.
pub const DEFAULT_DKIM_SELECTOR: &str = "dkim";
/// Default DKIM key size.
pub const DEFAULT_DKIM_KEY_BITS: u32 = 2048;
/// Root of the default data directories.
pub const DEFAULT_STATE_ROOT: &str = "/var/lib/mailstack";

const BYTES_PER_MB: u64 = 1_048_576;

/// Secret fields that were generated during defaulting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedSecrets {
    /// Names of the generated fields.
    pub fields: Vec<&'static str>,
}

impl GeneratedSecrets {
    /// Returns true if no secret had to be generated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Fills every unset optional field with its documented default.
///
/// Secrets are generated only when empty, so values read from a persisted
/// file always win.
pub fn apply_defaults(config: &mut StackConfig) -> GeneratedSecrets {
    set_if_empty(&mut config.postmaster, DEFAULT_POSTMASTER);

    let mail = &mut config.mail;
    if mail.message_size_limit == 0 {
        mail.message_size_limit = DEFAULT_MESSAGE_SIZE_LIMIT;
    }
    set_if_empty(&mut mail.message_ratelimit, DEFAULT_RATELIMIT);
    if mail.default_quota == 0 {
        mail.default_quota = DEFAULT_QUOTA;
    }
    set_if_empty(&mut mail.recipient_delimiter, "+");
    set_if_empty(&mut mail.dkim_selector, DEFAULT_DKIM_SELECTOR);
    if mail.dkim_key_bits == 0 {
        mail.dkim_key_bits = DEFAULT_DKIM_KEY_BITS;
    }

    let web = &mut config.web;
    set_if_empty(&mut web.admin_path, "/admin");
    set_if_empty(&mut web.webmail_path, "/webmail");
    set_if_empty(&mut web.api_path, "/api");
    set_if_empty(&mut web.sitename, "MailStack");

    let network = &mut config.network;
    set_if_empty(&mut network.subnet, "192.168.203.0/24");
    set_if_empty(&mut network.bind_ipv4, "0.0.0.0");
    set_if_empty(&mut network.relay_networks, "127.0.0.0/8 [::1]/128");

    let paths = &mut config.paths;
    set_if_empty(&mut paths.data, &format!("{DEFAULT_STATE_ROOT}/data"));
    set_if_empty(&mut paths.mail, &format!("{DEFAULT_STATE_ROOT}/mail"));
    set_if_empty(&mut paths.dkim, &format!("{DEFAULT_STATE_ROOT}/dkim"));
    set_if_empty(&mut paths.queue, &format!("{DEFAULT_STATE_ROOT}/queue"));
    set_if_empty(&mut paths.filter, &format!("{DEFAULT_STATE_ROOT}/filter"));
    set_if_empty(&mut paths.certs, &format!("{DEFAULT_STATE_ROOT}/certs"));
    set_if_empty(&mut paths.overrides, "/etc/mailstack/overrides");

    if config.dkim_path.is_empty() {
        config.dkim_path = format!("{}/{{domain}}.{{selector}}.key", config.paths.dkim);
    }

    if config.hostnames.is_empty() && !config.hostname.is_empty() {
        config.hostnames = vec![config.hostname.clone()];
    }

    set_if_empty(&mut config.timezone, "UTC");
    set_if_empty(&mut config.resolver, "8.8.8.8");
    set_if_empty(&mut config.redis_address, "127.0.0.1:6379");
    if config.session_lifetime == 0 {
        config.session_lifetime = 10_800;
    }
    if config.max_filesize_mb == 0 {
        config.max_filesize_mb = (config.mail.message_size_limit / BYTES_PER_MB).max(1);
    }

    apply_database_defaults(&mut config.database);
    if config.database.dsn.is_empty() {
        config.database.dsn = build_dsn(&config.database, &config.paths.data);
    }

    generate_missing_secrets(config)
}

/// Fills backend-specific connection defaults.
fn apply_database_defaults(database: &mut DatabaseConfig) {
    let default_port = match database.kind {
        DatabaseType::Postgresql => 5432,
        DatabaseType::Mysql => 3306,
        DatabaseType::Sqlite | DatabaseType::Unrecognized(_) => return,
    };
    set_if_empty(&mut database.host, "localhost");
    if database.port == 0 {
        database.port = default_port;
    }
    set_if_empty(&mut database.name, "mailstack");
    set_if_empty(&mut database.user, "mailstack");
}

/// Builds the connection string for a database descriptor.
///
/// Pure: the same inputs always produce the same string.
#[must_use]
pub fn build_dsn(database: &DatabaseConfig, data_path: &str) -> String {
    match &database.kind {
        DatabaseType::Sqlite => {
            if database.path.is_empty() {
                format!("sqlite:{data_path}/mailstack.db")
            } else {
                format!("sqlite:{}", database.path)
            }
        }
        DatabaseType::Postgresql => format!(
            "pgsql:host={};port={};dbname={};user={};password={}",
            database.host, database.port, database.name, database.user, database.password
        ),
        DatabaseType::Mysql => format!(
            "mysql:host={};port={};dbname={};user={};password={}",
            database.host, database.port, database.name, database.user, database.password
        ),
        DatabaseType::Unrecognized(_) => String::new(),
    }
}

fn generate_missing_secrets(config: &mut StackConfig) -> GeneratedSecrets {
    let mut generated = GeneratedSecrets::default();
    let webmail = config.services.webmail.clone();
    let secrets = &mut config.secrets;

    if secrets.secret_key.is_empty() {
        secrets.secret_key = generate_secret(32);
        generated.fields.push("secrets.secret_key");
    }
    if secrets.roundcube_key.is_empty() && webmail == WebmailVariant::Roundcube {
        secrets.roundcube_key = generate_secret(24);
        generated.fields.push("secrets.roundcube_key");
    }
    if secrets.snuffleupagus_key.is_empty()
        && matches!(webmail, WebmailVariant::Roundcube | WebmailVariant::Snappymail)
    {
        secrets.snuffleupagus_key = generate_secret(32);
        generated.fields.push("secrets.snuffleupagus_key");
    }

    generated
}

/// Generates a random lowercase hex string of `length` characters.
#[must_use]
pub fn generate_secret(length: usize) -> String {
    let mut bytes = vec![0u8; length.div_ceil(2)];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut encoded = hex::encode(bytes);
    encoded.truncate(length);
    encoded
}

fn set_if_empty(field: &mut String, value: &str) {
    if field.is_empty() {
        *field = value.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> StackConfig {
        StackConfig {
            domain: String::from("example.com"),
            hostname: String::from("mail.example.com"),
            ..StackConfig::default()
        }
    }

    #[test]
    fn test_defaults_fill_documented_values() {
        let mut config = minimal();
        let generated = apply_defaults(&mut config);

        assert_eq!(config.postmaster, "postmaster");
        assert_eq!(config.mail.message_size_limit, 50_000_000);
        assert_eq!(config.mail.message_ratelimit, "200/day");
        assert_eq!(config.mail.dkim_selector, "dkim");
        assert_eq!(config.hostnames, vec![String::from("mail.example.com")]);
        assert_eq!(config.paths.dkim, "/var/lib/mailstack/dkim");
        assert_eq!(config.dkim_path, "/var/lib/mailstack/dkim/{domain}.{selector}.key");
        assert_eq!(config.database.dsn, "sqlite:/var/lib/mailstack/data/mailstack.db");
        assert_eq!(config.max_filesize_mb, 47);
        assert_eq!(config.secrets.secret_key.len(), 32);
        assert!(config.secrets.roundcube_key.is_empty());
        assert_eq!(generated.fields, vec!["secrets.secret_key"]);
    }

    #[test]
    fn test_derived_defaults_follow_custom_paths() {
        let mut config = minimal();
        config.paths.dkim = String::from("/srv/keys");
        config.paths.data = String::from("/srv/data");
        apply_defaults(&mut config);

        assert_eq!(config.dkim_path, "/srv/keys/{domain}.{selector}.key");
        assert_eq!(config.database.dsn, "sqlite:/srv/data/mailstack.db");
    }

    #[test]
    fn test_defaults_are_idempotent() {
        let mut config = minimal();
        config.services.webmail = WebmailVariant::Roundcube;
        apply_defaults(&mut config);
        let once = config.clone();

        let generated = apply_defaults(&mut config);
        assert!(generated.is_empty());
        assert_eq!(config, once);
        assert_eq!(config.secrets.roundcube_key.len(), 24);
    }

    #[test]
    fn test_build_dsn_is_pure() {
        let database = DatabaseConfig {
            kind: DatabaseType::Postgresql,
            host: String::from("db"),
            port: 5432,
            name: String::from("mail"),
            user: String::from("mail"),
            password: String::from("pw"),
            ..DatabaseConfig::default()
        };
        let first = build_dsn(&database, "/data");
        assert_eq!(first, "pgsql:host=db;port=5432;dbname=mail;user=mail;password=pw");
        assert_eq!(first, build_dsn(&database, "/data"));
    }

    #[test]
    fn test_generate_secret_length() {
        assert_eq!(generate_secret(24).len(), 24);
        assert!(generate_secret(32).chars().all(|c| c.is_ascii_hexdigit()));
    }
}
