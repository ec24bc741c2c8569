//! Installation orchestration.
//!
//! This module provides:
//! - The ordered step plan with per-step severities
//! - The installer driving host collaborators through that plan
//! - The final report with degraded features and health results

mod health;
mod pipeline;
mod report;
mod steps;
mod units;

pub use health::{HealthChecker, HealthReport, PortHealth, ServiceHealth};
pub use pipeline::{Host, InstallOptions, Installer, MAIL_GROUP, SERVICE_USER, acme_domains};
pub use report::{
    DegradedFeature, FatalFailure, FileRecord, InstallReport, ServiceFailure, StepRecord, StepStatus,
};
pub use steps::{InstallPlan, Severity, Step, StepKind};
pub use units::{
    PHP_FPM_UNIT, RESTART_UNITS, health_units, override_fragment, override_path, override_units,
    required_ports, start_order,
};
