//! Configuration parser for loading and saving `mailstack.json`.
//!
//! Loading is parse, then defaults, then validation. Environment overrides
//! and `.env` files are only consulted by the explicit env-aware entry points.

use crate::error::{ConfigError, MailstackError, Result};
use crate::host::fs::write_atomic;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::defaults::{GeneratedSecrets, apply_defaults};
use super::spec::StackConfig;
use super::validator::ConfigValidator;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "mailstack.json";

/// A defaulted configuration together with what defaulting had to invent.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The defaulted configuration.
    pub config: StackConfig,
    /// Secrets generated during this load.
    pub generated_secrets: GeneratedSecrets,
    /// File the configuration was read from.
    pub path: PathBuf,
}

impl LoadedConfig {
    /// Returns true if the configuration should be written back so that
    /// generated secrets survive the next run.
    #[must_use]
    pub fn needs_persist(&self) -> bool {
        !self.generated_secrets.is_empty()
    }
}

/// Configuration parser for loading mail stack configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths and the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Loads, defaults and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<LoadedConfig> {
        let loaded = self.load_unchecked(path)?;
        ConfigValidator::new().validate(&loaded.config)?;
        Ok(loaded)
    }

    /// Loads and defaults a configuration file without validating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_unchecked(&self, path: impl AsRef<Path>) -> Result<LoadedConfig> {
        let path = self.resolve(path.as_ref());
        let mut config = self.read_raw(&path)?;
        let generated_secrets = apply_defaults(&mut config);
        Ok(LoadedConfig {
            config,
            generated_secrets,
            path,
        })
    }

    /// Loads a configuration file with environment variable overrides.
    ///
    /// Overrides are applied before defaulting so derived values follow them.
    /// Recognised variables: `MAILSTACK_DOMAIN`, `MAILSTACK_HOSTNAME`,
    /// `MAILSTACK_ADMIN_EMAIL`, `MAILSTACK_ADMIN_PASSWORD`, `MAILSTACK_TLS_EMAIL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<LoadedConfig> {
        self.load_with_overrides(path.as_ref(), |name| std::env::var(name).ok())
    }

    fn load_with_overrides(
        &self,
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<LoadedConfig> {
        let path = self.resolve(path);
        let mut config = self.read_raw(&path)?;

        Self::apply_env_overrides(&mut config, lookup);

        let generated_secrets = apply_defaults(&mut config);
        ConfigValidator::new().validate(&config)?;
        Ok(LoadedConfig {
            config,
            generated_secrets,
            path,
        })
    }

    fn read_raw(&self, path: &Path) -> Result<StackConfig> {
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(MailstackError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            MailstackError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_json(&content, Some(path))
    }

    /// Parses a configuration from a JSON string. No defaults are applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid.
    pub fn parse_json(&self, content: &str, source: Option<&Path>) -> Result<StackConfig> {
        debug!("Parsing JSON configuration");

        let config: StackConfig = serde_json::from_str(content).map_err(|e| {
            let location = source.map_or_else(
                || format!("line {} column {}", e.line(), e.column()),
                |p| format!("{}:{}:{}", p.display(), e.line(), e.column()),
            );
            MailstackError::Config(ConfigError::ParseError {
                message: format!("JSON parse error: {e}"),
                location: Some(location),
            })
        })?;

        debug!("Successfully parsed configuration for domain: {}", config.domain);
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut StackConfig, lookup: impl Fn(&str) -> Option<String>) {
        let overrides: [(&str, &mut String); 5] = [
            ("MAILSTACK_DOMAIN", &mut config.domain),
            ("MAILSTACK_HOSTNAME", &mut config.hostname),
            ("MAILSTACK_ADMIN_EMAIL", &mut config.admin.email),
            ("MAILSTACK_ADMIN_PASSWORD", &mut config.admin.password),
            ("MAILSTACK_TLS_EMAIL", &mut config.tls.email),
        ];

        for (name, field) in overrides {
            if let Some(value) = lookup(name)
                && !value.is_empty()
            {
                debug!("Overriding configuration from {name}");
                *field = value;
            }
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                MailstackError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Serializes the configuration to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(config: &StackConfig) -> Result<String> {
        serde_json::to_string_pretty(config)
            .map(|mut json| {
                json.push('\n');
                json
            })
            .map_err(|e| MailstackError::internal(format!("failed to serialize configuration: {e}")))
    }

    /// Writes the secrets generated during `loaded`'s load back to its file.
    ///
    /// The file is re-read as written, so environment overrides and defaults
    /// stay out of it; only the generated secret fields are filled in.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be re-read or written.
    pub async fn persist_secrets(&self, loaded: &LoadedConfig) -> Result<()> {
        if !loaded.needs_persist() {
            return Ok(());
        }

        let mut raw = self.read_raw(&loaded.path)?;
        let generated = &loaded.config.secrets;
        for field in &loaded.generated_secrets.fields {
            match *field {
                "secrets.secret_key" => raw.secrets.secret_key.clone_from(&generated.secret_key),
                "secrets.roundcube_key" => {
                    raw.secrets.roundcube_key.clone_from(&generated.roundcube_key);
                }
                "secrets.snuffleupagus_key" => {
                    raw.secrets
                        .snuffleupagus_key
                        .clone_from(&generated.snuffleupagus_key);
                }
                other => debug!("{other} is not persisted"),
            }
        }

        info!(
            fields = %loaded.generated_secrets.fields.join(", "),
            "Persisting generated secrets"
        );
        self.save_file(&raw, &loaded.path).await
    }

    /// Writes the configuration back atomically with mode 0600.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::SaveFailed` if the file cannot be written.
    pub async fn save_file(&self, config: &StackConfig, path: impl AsRef<Path>) -> Result<()> {
        let path = self.resolve(path.as_ref());
        let json = Self::to_json(config)?;

        write_atomic(&path, json.as_bytes(), 0o600)
            .await
            .map_err(|e| {
                MailstackError::Config(ConfigError::SaveFailed {
                    path: path.clone(),
                    message: e.to_string(),
                })
            })?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::TlsFlavor;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"{
        "domain": "example.com",
        "hostname": "mail.example.com",
        "admin": { "email": "admin@example.com", "password": "correct-horse" },
        "tls": { "flavor": "notls" },
        "database": { "type": "sqlite" }
    }"#;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = ConfigParser::new().parse_json(MINIMAL, None).unwrap();
        assert_eq!(config.domain, "example.com");
        assert_eq!(config.tls.flavor, Some(TlsFlavor::Notls));
        assert!(config.hostnames.is_empty());
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = ConfigParser::new().parse_json("{ \"domain\": ", None).unwrap_err();
        match err {
            MailstackError::Config(ConfigError::ParseError { location, .. }) => {
                assert!(location.unwrap().starts_with("line 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = ConfigParser::new()
            .load_file(dir.path().join("absent.json"))
            .unwrap_err();
        assert!(matches!(
            err,
            MailstackError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_letsencrypt_without_email_fails_on_load() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{"domain":"example.com","hostname":"mail.example.com",
                "admin":{"email":"a@example.com","password":"password1"},
                "tls":{"flavor":"letsencrypt"}}"#,
        );
        let err = ConfigParser::new().load_file(&path).unwrap_err();
        match err {
            MailstackError::Config(inner) => assert_eq!(inner.field(), Some("tls.email")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_save_load_round_trip_preserves_secrets() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, MINIMAL);
        let parser = ConfigParser::new();

        let first = parser.load_file(&path).unwrap();
        assert!(first.needs_persist());
        parser.save_file(&first.config, &path).await.unwrap();

        let second = parser.load_file(&path).unwrap();
        assert!(!second.needs_persist());
        assert_eq!(second.config, first.config);
        assert_eq!(
            second.config.secrets.secret_key,
            first.config.secrets.secret_key
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_env_overrides_apply_before_defaults() {
        let mut config = ConfigParser::new().parse_json(MINIMAL, None).unwrap();
        let env: HashMap<&str, &str> = [
            ("MAILSTACK_HOSTNAME", "mx.example.com"),
            ("MAILSTACK_TLS_EMAIL", ""),
        ]
        .into_iter()
        .collect();

        ConfigParser::apply_env_overrides(&mut config, |name| {
            env.get(name).map(|value| (*value).to_string())
        });
        apply_defaults(&mut config);

        assert_eq!(config.hostname, "mx.example.com");
        assert_eq!(config.hostnames, vec![String::from("mx.example.com")]);
        assert!(config.tls.email.is_empty());
    }

    #[tokio::test]
    async fn test_persist_secrets_keeps_env_overrides_out_of_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, MINIMAL);
        let parser = ConfigParser::new();
        let env: HashMap<&str, &str> = [
            ("MAILSTACK_ADMIN_PASSWORD", "from-the-environment"),
            ("MAILSTACK_HOSTNAME", "mx.example.com"),
        ]
        .into_iter()
        .collect();

        let loaded = parser
            .load_with_overrides(&path, |name| env.get(name).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(loaded.config.admin.password, "from-the-environment");
        assert!(loaded.needs_persist());

        parser.persist_secrets(&loaded).await.unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(!saved.contains("from-the-environment"));
        assert!(!saved.contains("mx.example.com"));

        let reloaded = parser.load_file(&path).unwrap();
        assert!(!reloaded.needs_persist());
        assert_eq!(reloaded.config.admin.password, "correct-horse");
        assert_eq!(reloaded.config.hostname, "mail.example.com");
        assert_eq!(
            reloaded.config.secrets.secret_key,
            loaded.config.secrets.secret_key
        );
    }

    #[tokio::test]
    async fn test_persist_secrets_without_generated_secrets_leaves_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, MINIMAL);
        let parser = ConfigParser::new();

        let mut loaded = parser.load_file(&path).unwrap();
        loaded.generated_secrets = GeneratedSecrets::default();
        parser.persist_secrets(&loaded).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), MINIMAL);
    }

    #[test]
    fn test_relative_path_uses_base() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, MINIMAL);
        let loaded = ConfigParser::new()
            .with_base_path(dir.path())
            .load_file(DEFAULT_CONFIG_FILE)
            .unwrap();
        assert_eq!(loaded.path, dir.path().join(DEFAULT_CONFIG_FILE));
    }
}
