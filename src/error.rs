//! Error types for the `MailStack` provisioning system.
//!
//! This module provides the error hierarchy for every stage of a host
//! convergence run: configuration loading, prerequisite checks, package
//! installation, template rendering, service control, health verification,
//! the mail user store and DKIM key handling.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the `MailStack` provisioning system.
#[derive(Debug, Error)]
pub enum MailstackError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Host prerequisite errors.
    #[error("Prerequisite error: {0}")]
    Prerequisite(#[from] PrerequisiteError),

    /// Package installation errors.
    #[error("Package error: {0}")]
    Package(#[from] PackageError),

    /// Template rendering errors.
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Service control errors.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Health check errors.
    #[error("Health check failed: {0}")]
    HealthCheck(#[from] HealthCheckError),

    /// Mail store errors.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// DKIM key errors.
    #[error("DKIM error: {0}")]
    Dkim(#[from] DkimError),

    /// TLS provisioning errors.
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// An external tool exited unsuccessfully.
    #[error("Command '{program}' failed: {message}")]
    Command {
        /// Program that was run.
        program: String,
        /// Exit status and captured output.
        message: String,
    },

    /// The requested backend or feature has no automated implementation.
    #[error("{feature} is not implemented; configure it manually:\n{remediation}")]
    NotImplemented {
        /// What could not be done.
        feature: String,
        /// Manual setup instructions.
        remediation: String,
    },

    /// A named pipeline step failed.
    #[error("{step} failed: {source}")]
    StepFailed {
        /// Human-readable step name.
        step: String,
        /// Underlying error.
        #[source]
        source: Box<MailstackError>,
    },

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// The configuration could not be written back.
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed {
        /// Destination path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}

/// Host prerequisite errors, raised before any mutation occurs.
#[derive(Debug, Error)]
pub enum PrerequisiteError {
    /// The installer is not running with root privileges.
    #[error("installation must be run as root")]
    NotPrivileged,

    /// No usable init system was found.
    #[error("systemd is required but not found")]
    NoInitSystem,

    /// The operating system could not be identified.
    #[error("unable to detect operating system: {message}")]
    DetectionFailed {
        /// Description of the failure.
        message: String,
    },

    /// The operating system is not supported.
    #[error("unsupported operating system: {description}")]
    UnsupportedOs {
        /// Detected OS description.
        description: String,
    },
}

/// Package installation errors.
#[derive(Debug, Error)]
pub enum PackageError {
    /// Refreshing package lists failed.
    #[error("failed to update package lists: {message}")]
    UpdateFailed {
        /// Description of the failure.
        message: String,
    },

    /// Installing packages failed.
    #[error("failed to install {packages}: {message}")]
    InstallFailed {
        /// Space separated package names.
        packages: String,
        /// Description of the failure.
        message: String,
    },

    /// No package manager is known for this OS family.
    #[error("no package manager available for {family}")]
    UnsupportedFamily {
        /// OS family name.
        family: String,
    },
}

/// Template rendering errors.
#[derive(Debug, Error)]
pub enum RenderError {
    /// No template with that identifier is embedded.
    #[error("template not found: {id}")]
    NotFound {
        /// Requested template identifier.
        id: String,
    },

    /// The template source is malformed.
    #[error("syntax error in template {template} at line {line}: {message}")]
    Syntax {
        /// Template identifier.
        template: String,
        /// 1-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// Writing the rendered output failed.
    #[error("failed to write {path}: {message}")]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}

/// Service control errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A unit control action failed.
    #[error("failed to {action} {unit}: {message}")]
    ActionFailed {
        /// Unit name.
        unit: String,
        /// Action attempted (enable, start, ...).
        action: String,
        /// Description of the failure.
        message: String,
    },

    /// Reloading the unit database failed.
    #[error("failed to reload systemd: {message}")]
    DaemonReloadFailed {
        /// Description of the failure.
        message: String,
    },
}

/// Aggregate of unhealthy services and ports.
#[derive(Debug, Error)]
pub enum HealthCheckError {
    /// Some services are inactive or ports are not listening.
    #[error("inactive services: [{}], closed ports: [{}]", .services.join(", "), format_ports(.ports))]
    Unhealthy {
        /// Units that are not active.
        services: Vec<String>,
        /// Required ports with no listener.
        ports: Vec<u16>,
    },

    /// Every unit is active but the socket table could not be read.
    #[error("ports not checked: {reason}")]
    PortsUnchecked {
        /// Why the listening ports were unavailable.
        reason: String,
    },
}

/// Mail store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The address is not of the form `local@domain`.
    #[error("invalid email address: {email}")]
    InvalidEmail {
        /// Offending address.
        email: String,
    },

    /// The domain is unknown.
    #[error("domain {domain} does not exist - add it first with 'mailstack domain add {domain}'")]
    DomainNotFound {
        /// Domain name.
        domain: String,
    },

    /// The domain already exists.
    #[error("domain {domain} already exists")]
    DomainExists {
        /// Domain name.
        domain: String,
    },

    /// The domain still has users.
    #[error("domain {domain} still has {users} user(s); delete them first")]
    DomainHasUsers {
        /// Domain name.
        domain: String,
        /// Number of users in the domain.
        users: i64,
    },

    /// The user already exists.
    #[error("user {email} already exists")]
    UserExists {
        /// User address.
        email: String,
    },

    /// The user is unknown.
    #[error("user {email} does not exist")]
    UserNotFound {
        /// User address.
        email: String,
    },

    /// The alias already exists.
    #[error("alias {email} already exists")]
    AliasExists {
        /// Alias address.
        email: String,
    },

    /// The alias is unknown.
    #[error("alias {email} does not exist")]
    AliasNotFound {
        /// Alias address.
        email: String,
    },

    /// The alias address already belongs to a mailbox.
    #[error("cannot create alias: {email} is already a real user")]
    AliasIsUser {
        /// Alias address.
        email: String,
    },

    /// An alias destination is empty or not an address.
    #[error("invalid destination address: '{address}'")]
    InvalidDestination {
        /// Offending destination.
        address: String,
    },

    /// Password hashing failed.
    #[error("failed to hash password: {message}")]
    PasswordHash {
        /// Description of the failure.
        message: String,
    },

    /// Database driver error.
    #[error("database error: {message}")]
    Database {
        /// Description of the failure.
        message: String,
    },
}

/// DKIM key errors.
#[derive(Debug, Error)]
pub enum DkimError {
    /// Key generation failed.
    #[error("failed to generate RSA key: {message}")]
    Generation {
        /// Description of the failure.
        message: String,
    },

    /// No key exists at the expected location.
    #[error("no DKIM key at {path}")]
    KeyNotFound {
        /// Expected key path.
        path: PathBuf,
    },

    /// The stored key could not be decoded.
    #[error("invalid DKIM key {path}: {message}")]
    InvalidKey {
        /// Key path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}

/// TLS provisioning errors.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The ACME client is not installed.
    #[error("certbot not found - ensure it's installed")]
    AcmeClientMissing,

    /// A configured certificate or key file is missing.
    #[error("{kind} file not found: {path}")]
    SourceMissing {
        /// "certificate" or "key".
        kind: &'static str,
        /// Configured path.
        path: PathBuf,
    },

    /// Certificate issuance failed.
    #[error("certbot failed: {message}\nMake sure your domain DNS is pointing to this server and ports 80/443 are open")]
    AcmeFailed {
        /// Description of the failure.
        message: String,
    },
}

/// Result type alias for `MailStack` operations.
pub type Result<T> = std::result::Result<T, MailstackError>;

fn format_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl MailstackError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Creates a command failure error.
    #[must_use]
    pub fn command(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Wraps an error with the name of the step that produced it.
    #[must_use]
    pub fn step_failed(step: impl Into<String>, source: Self) -> Self {
        Self::StepFailed {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Returns the failing step name, if this error was produced by the pipeline.
    #[must_use]
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Self::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Returns the innermost error, unwrapping step context.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Returns the offending field of a validation error.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::ValidationError { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

impl StoreError {
    /// Creates a database error with the given message.
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<sqlx::Error> for MailstackError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failed_names_step() {
        let inner = MailstackError::from(PrerequisiteError::NotPrivileged);
        let err = MailstackError::step_failed("Checking prerequisites", inner);

        assert_eq!(err.step_name(), Some("Checking prerequisites"));
        assert!(err.to_string().starts_with("Checking prerequisites failed"));
        assert!(matches!(
            err.root_cause(),
            MailstackError::Prerequisite(PrerequisiteError::NotPrivileged)
        ));
    }

    #[test]
    fn test_health_error_lists_everything() {
        let err = HealthCheckError::Unhealthy {
            services: vec![String::from("postfix"), String::from("nginx")],
            ports: vec![25, 443],
        };
        let text = err.to_string();
        assert!(text.contains("postfix, nginx"));
        assert!(text.contains("25, 443"));
    }

    #[test]
    fn test_validation_field() {
        let err = ConfigError::validation("TLS email is required", "tls.email");
        assert_eq!(err.field(), Some("tls.email"));
    }
}
