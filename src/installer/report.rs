//! Outcome of an installation run.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Feature;
use crate::host::OsDescriptor;
use crate::templates::FileWrite;

use super::health::HealthReport;
use super::steps::{Severity, Step};

/// How a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Finished without problems.
    Completed,
    /// Finished with warnings, or failed with Warn severity.
    Warned,
    /// Nothing to do for this configuration.
    Skipped,
    /// Failed with Fatal severity.
    Failed,
    /// Never reached.
    NotRun,
}

/// Outcome of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    /// Step name.
    pub name: &'static str,
    /// Configured severity.
    pub severity: Severity,
    /// Final status.
    pub status: StepStatus,
    /// Warnings and errors raised by the step.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

/// An optional feature left unavailable by a failed package install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradedFeature {
    /// Affected feature.
    pub feature: Feature,
    /// Packages that failed to install.
    pub packages: Vec<String>,
    /// Package manager error.
    pub reason: String,
}

/// A unit that failed to enable, start or restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceFailure {
    /// Unit name.
    pub unit: String,
    /// Error text.
    pub error: String,
}

/// A rendered or otherwise managed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    /// Host path.
    pub path: String,
    /// SHA-256 of the content, when rendered.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub digest: String,
    /// False when the file already matched.
    pub changed: bool,
}

impl From<FileWrite> for FileRecord {
    fn from(write: FileWrite) -> Self {
        Self {
            path: write.path.display().to_string(),
            digest: write.digest,
            changed: write.changed,
        }
    }
}

/// The fatal step failure that ended a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FatalFailure {
    /// Step name.
    pub step: String,
    /// Error text.
    pub error: String,
}

/// Full report of an installation run.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    /// Host name of the machine.
    pub host: String,
    /// Fingerprint of the applied configuration.
    pub config_hash: String,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end.
    pub finished_at: Option<DateTime<Utc>>,
    /// Detected OS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<OsDescriptor>,
    /// Per-step outcomes in plan order.
    pub steps: Vec<StepRecord>,
    /// Features left unavailable.
    pub degraded: Vec<DegradedFeature>,
    /// Units that failed during the start pass.
    pub service_failures: Vec<ServiceFailure>,
    /// Managed files.
    pub files: Vec<FileRecord>,
    /// DKIM zone record for the primary domain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dkim_record: Option<String>,
    /// Health check results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthReport>,
    /// Fatal failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<FatalFailure>,
}

impl InstallReport {
    /// Creates a report with every step marked as not run.
    #[must_use]
    pub fn new(config_hash: impl Into<String>, steps: &[Step]) -> Self {
        Self {
            host: local_hostname(),
            config_hash: config_hash.into(),
            started_at: Utc::now(),
            finished_at: None,
            os: None,
            steps: steps
                .iter()
                .map(|step| StepRecord {
                    name: step.kind.name(),
                    severity: step.severity,
                    status: StepStatus::NotRun,
                    messages: Vec::new(),
                })
                .collect(),
            degraded: Vec::new(),
            service_failures: Vec::new(),
            files: Vec::new(),
            dkim_record: None,
            health: None,
            fatal: None,
        }
    }

    /// Stamps the end time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Returns true if no fatal step failed and the health check passed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.fatal.is_none() && self.health.as_ref().is_some_and(HealthReport::is_healthy)
    }

    /// Returns the record for a step name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Number of files whose content changed.
    #[must_use]
    pub fn changed_files(&self) -> usize {
        self.files.iter().filter(|f| f.changed).count()
    }
}

fn local_hostname() -> String {
    hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::installer::steps::InstallPlan;

    #[test]
    fn test_new_report_marks_steps_not_run() {
        let plan = InstallPlan::for_config(&StackConfig::default());
        let report = InstallReport::new("abc", plan.steps());

        assert_eq!(report.steps.len(), 13);
        assert!(report.steps.iter().all(|s| s.status == StepStatus::NotRun));
        assert!(!report.is_success());
        assert_eq!(report.step("Detecting OS").unwrap().severity, Severity::Fatal);
    }

    #[test]
    fn test_success_requires_health() {
        let plan = InstallPlan::for_config(&StackConfig::default());
        let mut report = InstallReport::new("abc", plan.steps());
        report.health = Some(HealthReport::default());
        assert!(report.is_success());

        report.fatal = Some(FatalFailure {
            step: String::from("Installing packages"),
            error: String::from("boom"),
        });
        assert!(!report.is_success());
    }
}
