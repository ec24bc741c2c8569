//! Mail users, domains and aliases.
//!
//! The daemons read this store directly: Dovecot authenticates against the
//! users table and Postfix resolves domains and aliases from it.

mod password;
mod sqlite;

pub use password::{PASSWORD_SCHEME, hash_password, verify_password};
pub use sqlite::SqliteStore;

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{DatabaseType, StackConfig, is_valid_email};
use crate::error::{MailstackError, Result, StoreError};
use crate::host::fs::rooted;

/// A mailbox owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailUser {
    /// Address.
    pub email: String,
    /// Quota in bytes, 0 for unlimited.
    pub quota_bytes: i64,
    /// Whether the account may log in.
    pub enabled: bool,
    /// Whether the account administers every domain.
    pub global_admin: bool,
}

/// A hosted domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailDomain {
    /// Domain name.
    pub name: String,
    /// Number of users in the domain.
    pub user_count: i64,
}

/// A forwarding address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailAlias {
    /// Alias address.
    pub email: String,
    /// Destination addresses.
    pub destinations: Vec<String>,
    /// Whether the alias is active.
    pub enabled: bool,
}

/// Fields for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    /// Address.
    pub email: &'a str,
    /// Cleartext password, hashed before storage.
    pub password: &'a str,
    /// Quota in bytes.
    pub quota_bytes: i64,
    /// Global administrator flag.
    pub global_admin: bool,
}

/// Storage for users, domains and aliases.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Creates tables and indexes if missing.
    async fn init_schema(&self) -> Result<()>;

    /// Adds a domain unless present. Returns true if it was inserted.
    async fn ensure_domain(&self, name: &str) -> Result<bool>;

    /// Adds a new domain.
    async fn add_domain(&self, name: &str) -> Result<()>;

    /// Deletes a domain that has no users.
    async fn delete_domain(&self, name: &str) -> Result<()>;

    /// Lists domains with their user counts.
    async fn list_domains(&self) -> Result<Vec<MailDomain>>;

    /// Adds a user to an existing domain.
    async fn add_user(&self, user: NewUser<'_>) -> Result<()>;

    /// Deletes a user.
    async fn delete_user(&self, email: &str) -> Result<()>;

    /// Returns a user if present.
    async fn get_user(&self, email: &str) -> Result<Option<MailUser>>;

    /// Lists all users.
    async fn list_users(&self) -> Result<Vec<MailUser>>;

    /// Replaces a user's password.
    async fn change_password(&self, email: &str, password: &str) -> Result<()>;

    /// Adds an alias in an existing domain.
    async fn add_alias(&self, email: &str, destinations: &[String]) -> Result<()>;

    /// Deletes an alias.
    async fn delete_alias(&self, email: &str) -> Result<()>;

    /// Returns one alias.
    async fn get_alias(&self, email: &str) -> Result<MailAlias>;

    /// Lists all aliases.
    async fn list_aliases(&self) -> Result<Vec<MailAlias>>;
}

/// Splits an address into local part and domain.
///
/// # Errors
///
/// Returns `StoreError::InvalidEmail` for malformed addresses.
pub fn split_email(email: &str) -> std::result::Result<(&str, &str), StoreError> {
    match email.split_once('@') {
        Some(parts) if is_valid_email(email) => Ok(parts),
        _ => Err(StoreError::InvalidEmail {
            email: email.to_string(),
        }),
    }
}

/// Opens the store configured for a deployment, with host paths under `root`.
///
/// # Errors
///
/// Returns `NotImplemented` with manual setup commands for server backends,
/// or a store error if the `SQLite` file cannot be opened.
pub async fn open_store(config: &StackConfig, root: &Path) -> Result<Box<dyn MailStore>> {
    match &config.database.kind {
        DatabaseType::Sqlite => {
            let store = SqliteStore::open(&rooted(root, config.sqlite_path())).await?;
            Ok(Box::new(store))
        }
        DatabaseType::Postgresql => Err(MailstackError::NotImplemented {
            feature: String::from("PostgreSQL database initialization"),
            remediation: postgres_remediation(config),
        }),
        DatabaseType::Mysql => Err(MailstackError::NotImplemented {
            feature: String::from("MySQL database initialization"),
            remediation: mysql_remediation(config),
        }),
        DatabaseType::Unrecognized(raw) => Err(MailstackError::internal(format!(
            "unsupported database type '{raw}'"
        ))),
    }
}

fn postgres_remediation(config: &StackConfig) -> String {
    let db = &config.database;
    format!(
        "  CREATE DATABASE {name};\n  CREATE USER {user} WITH PASSWORD '<password>';\n  GRANT ALL PRIVILEGES ON DATABASE {name} TO {user};",
        name = db.name,
        user = db.user,
    )
}

fn mysql_remediation(config: &StackConfig) -> String {
    let db = &config.database;
    format!(
        "  CREATE DATABASE {name};\n  CREATE USER '{user}'@'{host}' IDENTIFIED BY '<password>';\n  GRANT ALL PRIVILEGES ON {name}.* TO '{user}'@'{host}';\n  FLUSH PRIVILEGES;",
        name = db.name,
        user = db.user,
        host = db.host,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::apply_defaults;

    #[test]
    fn test_split_email() {
        assert_eq!(split_email("bob@example.com").unwrap(), ("bob", "example.com"));
        assert!(split_email("bob").is_err());
        assert!(split_email("@example.com").is_err());
    }

    #[tokio::test]
    async fn test_server_backends_are_not_implemented() {
        let mut config = StackConfig::default();
        config.database.kind = DatabaseType::Postgresql;
        apply_defaults(&mut config);

        let err = open_store(&config, Path::new("/")).await.err().unwrap();
        match err {
            MailstackError::NotImplemented { remediation, .. } => {
                assert!(remediation.contains("CREATE DATABASE mailstack;"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
