//! The ordered installation steps and their failure severities.
//!
//! The order encodes dependencies between steps: accounts exist before the
//! directories they own, directories exist before files are rendered into
//! them, and files are in place before any service is started.

use serde::Serialize;
use std::fmt;

use crate::config::{DatabaseType, StackConfig};

/// One unit of convergence work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Identify the distribution.
    DetectOs,
    /// Privilege and init system checks.
    CheckPrerequisites,
    /// Required and optional packages.
    InstallPackages,
    /// System accounts and groups.
    CreateUsers,
    /// Managed directories with owners and modes.
    CreateDirectories,
    /// Rendered configuration files and lookup maps.
    GenerateConfig,
    /// Mail store schema and primary domain.
    InitDatabase,
    /// DKIM key for the primary domain.
    GenerateDkim,
    /// Certificates.
    SetupTls,
    /// Unit drop-ins.
    ConfigureServices,
    /// Enable, start and restart units.
    StartServices,
    /// Initial administrator account.
    CreateAdmin,
    /// Unit states and listening ports.
    HealthCheck,
}

impl StepKind {
    /// Every step in execution order.
    pub const ALL: [Self; 13] = [
        Self::DetectOs,
        Self::CheckPrerequisites,
        Self::InstallPackages,
        Self::CreateUsers,
        Self::CreateDirectories,
        Self::GenerateConfig,
        Self::InitDatabase,
        Self::GenerateDkim,
        Self::SetupTls,
        Self::ConfigureServices,
        Self::StartServices,
        Self::CreateAdmin,
        Self::HealthCheck,
    ];

    /// Human-readable step name used in progress output and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DetectOs => "Detecting OS",
            Self::CheckPrerequisites => "Checking prerequisites",
            Self::InstallPackages => "Installing packages",
            Self::CreateUsers => "Creating system users",
            Self::CreateDirectories => "Creating directories",
            Self::GenerateConfig => "Generating configuration files",
            Self::InitDatabase => "Initializing database",
            Self::GenerateDkim => "Generating DKIM keys",
            Self::SetupTls => "Setting up TLS certificates",
            Self::ConfigureServices => "Configuring services",
            Self::StartServices => "Starting services",
            Self::CreateAdmin => "Creating admin user",
            Self::HealthCheck => "Running health checks",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a failing step stops the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Stop at the first error.
    Fatal,
    /// Log and continue.
    Warn,
}

/// A step with its severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// What the step does.
    pub kind: StepKind,
    /// How its failure is treated.
    pub severity: Severity,
}

/// The ordered steps for one configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    steps: Vec<Step>,
}

impl InstallPlan {
    /// Builds the plan for a configuration.
    ///
    /// Database initialization is only fatal for the built-in `SQLite`
    /// backend; the health check never aborts the run.
    #[must_use]
    pub fn for_config(config: &StackConfig) -> Self {
        let steps = StepKind::ALL
            .into_iter()
            .map(|kind| {
                let severity = match kind {
                    StepKind::InitDatabase if config.database.kind != DatabaseType::Sqlite => {
                        Severity::Warn
                    }
                    StepKind::HealthCheck => Severity::Warn,
                    _ => Severity::Fatal,
                };
                Step { kind, severity }
            })
            .collect();
        Self { steps }
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Position of a step in the plan.
    #[must_use]
    pub fn position(&self, kind: StepKind) -> Option<usize> {
        self.steps.iter().position(|s| s.kind == kind)
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the plan has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_order() {
        let plan = InstallPlan::for_config(&StackConfig::default());
        let pos = |kind| plan.position(kind).unwrap();

        assert_eq!(plan.len(), 13);
        assert!(pos(StepKind::DetectOs) < pos(StepKind::InstallPackages));
        assert!(pos(StepKind::CheckPrerequisites) < pos(StepKind::InstallPackages));
        assert!(pos(StepKind::CreateUsers) < pos(StepKind::CreateDirectories));
        assert!(pos(StepKind::CreateDirectories) < pos(StepKind::GenerateConfig));
        assert!(pos(StepKind::GenerateConfig) < pos(StepKind::StartServices));
        assert!(pos(StepKind::ConfigureServices) < pos(StepKind::StartServices));
        assert_eq!(pos(StepKind::HealthCheck), 12);
    }

    #[test]
    fn test_severities() {
        let sqlite = InstallPlan::for_config(&StackConfig::default());
        let severity = |plan: &InstallPlan, kind| plan.steps()[plan.position(kind).unwrap()].severity;

        assert_eq!(severity(&sqlite, StepKind::InitDatabase), Severity::Fatal);
        assert_eq!(severity(&sqlite, StepKind::HealthCheck), Severity::Warn);
        assert_eq!(severity(&sqlite, StepKind::GenerateConfig), Severity::Fatal);

        let mut config = StackConfig::default();
        config.database.kind = DatabaseType::Mysql;
        let mysql = InstallPlan::for_config(&config);
        assert_eq!(severity(&mysql, StepKind::InitDatabase), Severity::Warn);
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = StepKind::ALL.iter().map(|k| k.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), StepKind::ALL.len());
    }
}
