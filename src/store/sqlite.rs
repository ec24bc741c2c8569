//! `SQLite` implementation of [`MailStore`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::error::{Result, StoreError};

use super::password::hash_password;
use super::{MailAlias, MailDomain, MailStore, MailUser, NewUser, split_email};

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        display_name TEXT NOT NULL DEFAULT '',
        quota_bytes INTEGER NOT NULL DEFAULT 0,
        enabled INTEGER NOT NULL DEFAULT 1,
        global_admin INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS domains (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        max_users INTEGER NOT NULL DEFAULT 0,
        max_aliases INTEGER NOT NULL DEFAULT 0,
        max_quota_bytes INTEGER NOT NULL DEFAULT 0,
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS aliases (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        destination TEXT NOT NULL,
        wildcard INTEGER NOT NULL DEFAULT 0,
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS domain_admins (
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        domain_id INTEGER NOT NULL REFERENCES domains(id) ON DELETE CASCADE,
        PRIMARY KEY (user_id, domain_id)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)",
    "CREATE INDEX IF NOT EXISTS idx_domains_name ON domains(name)",
    "CREATE INDEX IF NOT EXISTS idx_aliases_email ON aliases(email)",
];

/// Mail store in a local `SQLite` file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteStore {
    /// Opens the database, creating the file and its directory if missing.
    ///
    /// # Errors
    ///
    /// Returns an IO error for the directory or a store error for the file.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        debug!("Opened mail store at {}", path.display());
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn domain_exists(&self, name: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM domains WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn require_domain(&self, name: &str) -> Result<()> {
        if self.domain_exists(name).await? {
            Ok(())
        } else {
            Err(StoreError::DomainNotFound {
                domain: name.to_string(),
            }
            .into())
        }
    }

    async fn alias_exists(&self, email: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM aliases WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

fn parse_destinations(raw: &str) -> std::result::Result<Vec<String>, StoreError> {
    raw.split(',')
        .map(str::trim)
        .map(|address| {
            if address.is_empty() || !address.contains('@') {
                Err(StoreError::InvalidDestination {
                    address: address.to_string(),
                })
            } else {
                Ok(address.to_string())
            }
        })
        .collect()
}

fn alias_from_row((email, destination, enabled): (String, String, bool)) -> MailAlias {
    MailAlias {
        email,
        destinations: destination
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(String::from)
            .collect(),
        enabled,
    }
}

#[async_trait]
impl MailStore for SqliteStore {
    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema ready at {}", self.path.display());
        Ok(())
    }

    async fn ensure_domain(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO domains (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_domain(&self, name: &str) -> Result<()> {
        if self.domain_exists(name).await? {
            return Err(StoreError::DomainExists {
                domain: name.to_string(),
            }
            .into());
        }
        sqlx::query("INSERT INTO domains (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        info!(domain = name, "Domain added");
        Ok(())
    }

    async fn delete_domain(&self, name: &str) -> Result<()> {
        self.require_domain(name).await?;

        let users: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE substr(email, instr(email, '@') + 1) = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        if users > 0 {
            return Err(StoreError::DomainHasUsers {
                domain: name.to_string(),
                users,
            }
            .into());
        }

        sqlx::query("DELETE FROM domains WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        info!(domain = name, "Domain deleted");
        Ok(())
    }

    async fn list_domains(&self) -> Result<Vec<MailDomain>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r"
            SELECT d.name, COUNT(u.id)
            FROM domains d
            LEFT JOIN users u ON substr(u.email, instr(u.email, '@') + 1) = d.name
            GROUP BY d.name
            ORDER BY d.name
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, user_count)| MailDomain { name, user_count })
            .collect())
    }

    async fn add_user(&self, user: NewUser<'_>) -> Result<()> {
        let (_, domain) = split_email(user.email)?;
        self.require_domain(domain).await?;
        if self.get_user(user.email).await?.is_some() {
            return Err(StoreError::UserExists {
                email: user.email.to_string(),
            }
            .into());
        }

        let hash = hash_password(user.password)?;
        sqlx::query(
            r"
            INSERT INTO users (email, password_hash, quota_bytes, global_admin)
            VALUES (?, ?, ?, ?)
            ",
        )
        .bind(user.email)
        .bind(&hash)
        .bind(user.quota_bytes)
        .bind(user.global_admin)
        .execute(&self.pool)
        .await?;

        info!(email = user.email, admin = user.global_admin, "User added");
        Ok(())
    }

    async fn delete_user(&self, email: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM users WHERE email = ?")
            .bind(email)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound {
                email: email.to_string(),
            }
            .into());
        }
        info!(email, "User deleted");
        Ok(())
    }

    async fn get_user(&self, email: &str) -> Result<Option<MailUser>> {
        let row: Option<(String, i64, bool, bool)> = sqlx::query_as(
            "SELECT email, quota_bytes, enabled, global_admin FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(email, quota_bytes, enabled, global_admin)| MailUser {
            email,
            quota_bytes,
            enabled,
            global_admin,
        }))
    }

    async fn list_users(&self) -> Result<Vec<MailUser>> {
        let rows: Vec<(String, i64, bool, bool)> = sqlx::query_as(
            "SELECT email, quota_bytes, enabled, global_admin FROM users ORDER BY email",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(email, quota_bytes, enabled, global_admin)| MailUser {
                email,
                quota_bytes,
                enabled,
                global_admin,
            })
            .collect())
    }

    async fn change_password(&self, email: &str, password: &str) -> Result<()> {
        let hash = hash_password(password)?;
        let result = sqlx::query(
            "UPDATE users SET password_hash = ?, updated_at = CURRENT_TIMESTAMP WHERE email = ?",
        )
        .bind(&hash)
        .bind(email)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound {
                email: email.to_string(),
            }
            .into());
        }
        info!(email, "Password changed");
        Ok(())
    }

    async fn add_alias(&self, email: &str, destinations: &[String]) -> Result<()> {
        let (_, domain) = split_email(email)?;
        self.require_domain(domain).await?;

        if self.alias_exists(email).await? {
            return Err(StoreError::AliasExists {
                email: email.to_string(),
            }
            .into());
        }
        if self.get_user(email).await?.is_some() {
            return Err(StoreError::AliasIsUser {
                email: email.to_string(),
            }
            .into());
        }

        let joined = destinations.join(",");
        let destinations = parse_destinations(&joined)?;
        sqlx::query("INSERT INTO aliases (email, destination) VALUES (?, ?)")
            .bind(email)
            .bind(destinations.join(","))
            .execute(&self.pool)
            .await?;

        info!(alias = email, "Alias added -> {}", destinations.join(", "));
        Ok(())
    }

    async fn delete_alias(&self, email: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM aliases WHERE email = ?")
            .bind(email)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::AliasNotFound {
                email: email.to_string(),
            }
            .into());
        }
        info!(alias = email, "Alias deleted");
        Ok(())
    }

    async fn get_alias(&self, email: &str) -> Result<MailAlias> {
        let row: Option<(String, String, bool)> =
            sqlx::query_as("SELECT email, destination, enabled FROM aliases WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;

        row.map(alias_from_row).ok_or_else(|| {
            StoreError::AliasNotFound {
                email: email.to_string(),
            }
            .into()
        })
    }

    async fn list_aliases(&self) -> Result<Vec<MailAlias>> {
        let rows: Vec<(String, String, bool)> =
            sqlx::query_as("SELECT email, destination, enabled FROM aliases ORDER BY email")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(alias_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailstackError;
    use crate::store::verify_password;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> SqliteStore {
        let store = SqliteStore::open(&dir.path().join("data/mailstack.db"))
            .await
            .unwrap();
        store.init_schema().await.unwrap();
        store
    }

    fn user<'a>(email: &'a str) -> NewUser<'a> {
        NewUser {
            email,
            password: "correct-horse",
            quota_bytes: 1024,
            global_admin: false,
        }
    }

    fn store_error(err: MailstackError) -> StoreError {
        match err {
            MailstackError::Store(e) => e,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store.init_schema().await.unwrap();

        assert!(store.ensure_domain("example.com").await.unwrap());
        assert!(!store.ensure_domain("example.com").await.unwrap());
        assert_eq!(store.list_domains().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_user_requires_domain() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let err = store_error(store.add_user(user("bob@example.com")).await.unwrap_err());
        assert!(matches!(err, StoreError::DomainNotFound { .. }));

        store.add_domain("example.com").await.unwrap();
        store.add_user(user("bob@example.com")).await.unwrap();

        let err = store_error(store.add_user(user("bob@example.com")).await.unwrap_err());
        assert!(matches!(err, StoreError::UserExists { .. }));

        let users = store.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].quota_bytes, 1024);
        assert!(users[0].enabled);
    }

    #[tokio::test]
    async fn test_password_is_stored_hashed() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store.add_domain("example.com").await.unwrap();
        store.add_user(user("bob@example.com")).await.unwrap();
        store
            .change_password("bob@example.com", "battery-staple")
            .await
            .unwrap();

        let hash: String = sqlx::query_scalar("SELECT password_hash FROM users WHERE email = ?")
            .bind("bob@example.com")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert!(verify_password(&hash, "battery-staple"));
        assert!(!verify_password(&hash, "correct-horse"));

        let err = store_error(
            store
                .change_password("nobody@example.com", "x")
                .await
                .unwrap_err(),
        );
        assert!(matches!(err, StoreError::UserNotFound { .. }));
    }

    #[tokio::test]
    async fn test_domain_with_users_cannot_be_deleted() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store.add_domain("example.com").await.unwrap();
        store.add_user(user("bob@example.com")).await.unwrap();

        let domains = store.list_domains().await.unwrap();
        assert_eq!(domains[0].user_count, 1);

        let err = store_error(store.delete_domain("example.com").await.unwrap_err());
        assert!(matches!(err, StoreError::DomainHasUsers { users: 1, .. }));

        store.delete_user("bob@example.com").await.unwrap();
        store.delete_domain("example.com").await.unwrap();
        assert!(store.list_domains().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_alias_rules() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store.add_domain("example.com").await.unwrap();
        store.add_user(user("bob@example.com")).await.unwrap();

        let err = store_error(
            store
                .add_alias("bob@example.com", &[String::from("alice@example.net")])
                .await
                .unwrap_err(),
        );
        assert!(matches!(err, StoreError::AliasIsUser { .. }));

        let err = store_error(
            store
                .add_alias("info@example.com", &[String::from("not-an-address")])
                .await
                .unwrap_err(),
        );
        assert!(matches!(err, StoreError::InvalidDestination { .. }));

        store
            .add_alias(
                "info@example.com",
                &[String::from("bob@example.com, alice@example.net")],
            )
            .await
            .unwrap();
        let alias = store.get_alias("info@example.com").await.unwrap();
        assert_eq!(alias.destinations, vec!["bob@example.com", "alice@example.net"]);

        let err = store_error(
            store
                .add_alias("info@example.com", &[String::from("bob@example.com")])
                .await
                .unwrap_err(),
        );
        assert!(matches!(err, StoreError::AliasExists { .. }));

        store.delete_alias("info@example.com").await.unwrap();
        assert!(store.list_aliases().await.unwrap().is_empty());
        let err = store_error(store.get_alias("info@example.com").await.unwrap_err());
        assert!(matches!(err, StoreError::AliasNotFound { .. }));
    }
}
