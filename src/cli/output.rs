//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::installer::{DegradedFeature, FileRecord, HealthReport, InstallReport, StepStatus};
use crate::store::{MailAlias, MailDomain, MailUser};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Step row for the install summary.
#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Step")]
    name: String,
    #[tabled(rename = "Result")]
    status: String,
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "Service")]
    unit: String,
    #[tabled(rename = "State")]
    state: String,
}

#[derive(Tabled)]
struct UserRow {
    #[tabled(rename = "Email")]
    email: String,
    #[tabled(rename = "Quota")]
    quota: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
    #[tabled(rename = "Admin")]
    admin: String,
}

#[derive(Tabled)]
struct DomainRow {
    #[tabled(rename = "Domain")]
    name: String,
    #[tabled(rename = "Users")]
    users: i64,
}

#[derive(Tabled)]
struct AliasRow {
    #[tabled(rename = "Alias")]
    email: String,
    #[tabled(rename = "Destinations")]
    destinations: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn json<T: Serialize + ?Sized>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_default()
    }

    /// Formats an installation report.
    #[must_use]
    pub fn format_report(&self, report: &InstallReport) -> String {
        match self.format {
            OutputFormat::Json => Self::json(report),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &InstallReport) -> String {
        let mut output = String::new();

        let _ = write!(output, "\nInstallation on {}\n", report.host);
        if let Some(os) = &report.os {
            let _ = writeln!(output, "   OS: {os}");
        }
        let _ = write!(
            output,
            "   Config hash: {}\n\n",
            ConfigHasher::new().short_hash(&report.config_hash)
        );

        let rows: Vec<StepRow> = report
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| StepRow {
                index: i + 1,
                name: step.name.to_string(),
                status: Self::format_step_status(step.status),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = writeln!(
            output,
            "\nFiles: {} managed, {} changed",
            report.files.len(),
            report.changed_files()
        );

        if !report.degraded.is_empty() {
            output.push('\n');
            output.push_str(&Self::format_degraded_text(&report.degraded));
        }

        if !report.service_failures.is_empty() {
            let _ = write!(output, "\n{} Service failures:\n", "⚠".yellow());
            for failure in &report.service_failures {
                let _ = writeln!(output, "   - {}: {}", failure.unit, failure.error);
            }
        }

        if let Some(record) = &report.dkim_record {
            let _ = write!(output, "\nDKIM record to publish:\n   {record}");
        }

        if let Some(health) = &report.health {
            output.push('\n');
            output.push_str(&Self::format_health_text(health));
        }

        if let Some(fatal) = &report.fatal {
            let _ = write!(
                output,
                "\n{} {} failed: {}\n",
                "✗".red(),
                fatal.step,
                fatal.error
            );
        } else if report.is_success() {
            let _ = write!(output, "\n{} MailStack is installed and healthy\n", "✓".green());
        } else {
            let _ = write!(
                output,
                "\n{} Installation finished, but the health check failed\n   Check: journalctl -u postfix -u dovecot -u rspamd -n 50\n",
                "⚠".yellow()
            );
        }

        output
    }

    /// Formats service and port health.
    #[must_use]
    pub fn format_health(&self, health: &HealthReport) -> String {
        match self.format {
            OutputFormat::Json => Self::json(health),
            OutputFormat::Text => Self::format_health_text(health),
        }
    }

    fn format_health_text(health: &HealthReport) -> String {
        let rows: Vec<ServiceRow> = health
            .services
            .iter()
            .map(|s| ServiceRow {
                unit: s.unit.clone(),
                state: if s.active {
                    "active".green().to_string()
                } else {
                    "inactive".red().to_string()
                },
            })
            .collect();

        let mut output = Table::new(rows).to_string();
        output.push('\n');

        if let Some(reason) = &health.port_check_skipped {
            let _ = writeln!(output, "{} Ports not checked: {reason}", "⚠".yellow());
        }
        for port in &health.ports {
            let mark = if port.listening { "✓".green() } else { "✗".red() };
            let _ = writeln!(output, "   {mark} {} ({})", port.port, port.name);
        }
        output
    }

    /// Formats features degraded by failed optional packages.
    #[must_use]
    pub fn format_degraded(&self, degraded: &[DegradedFeature]) -> String {
        match self.format {
            OutputFormat::Json => Self::json(degraded),
            OutputFormat::Text if degraded.is_empty() => {
                format!("{} All packages up to date\n", "✓".green())
            }
            OutputFormat::Text => Self::format_degraded_text(degraded),
        }
    }

    fn format_degraded_text(degraded: &[DegradedFeature]) -> String {
        let mut output = format!("{} Degraded features:\n", "⚠".yellow());
        for feature in degraded {
            let _ = writeln!(
                output,
                "   - {} ({}): {}",
                feature.feature,
                feature.packages.join(" "),
                feature.reason
            );
        }
        output
    }

    /// Formats configuration validation results.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult) -> String {
        match self.format {
            OutputFormat::Json => {
                let errors: Vec<_> = result
                    .errors
                    .iter()
                    .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                    .collect();
                Self::json(&serde_json::json!({
                    "valid": result.is_valid(),
                    "errors": errors,
                    "warnings": result.warnings,
                }))
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid\n", "✓".green())
                } else {
                    let mut text = format!("{} Configuration is invalid:\n", "✗".red());
                    for error in &result.errors {
                        let _ = writeln!(text, "   - {}: {}", error.field.bold(), error.message);
                    }
                    text
                };
                for warning in &result.warnings {
                    let _ = writeln!(output, "   {} {warning}", "⚠".yellow());
                }
                output
            }
        }
    }

    /// Formats regenerated files.
    #[must_use]
    pub fn format_files(&self, files: &[FileRecord]) -> String {
        match self.format {
            OutputFormat::Json => Self::json(files),
            OutputFormat::Text => {
                let mut output = String::new();
                for file in files {
                    let mark = if file.changed { "~".yellow() } else { "=".dimmed() };
                    let _ = writeln!(output, "   {mark} {}", file.path);
                }
                let changed = files.iter().filter(|f| f.changed).count();
                let _ = writeln!(output, "\n{} files, {changed} changed", files.len());
                output
            }
        }
    }

    /// Formats a user list.
    #[must_use]
    pub fn format_users(&self, users: &[MailUser]) -> String {
        match self.format {
            OutputFormat::Json => Self::json(users),
            OutputFormat::Text if users.is_empty() => String::from("No users.\n"),
            OutputFormat::Text => {
                let rows: Vec<UserRow> = users
                    .iter()
                    .map(|u| UserRow {
                        email: u.email.clone(),
                        quota: Self::format_bytes(u.quota_bytes),
                        enabled: Self::yes_no(u.enabled),
                        admin: Self::yes_no(u.global_admin),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a domain list.
    #[must_use]
    pub fn format_domains(&self, domains: &[MailDomain]) -> String {
        match self.format {
            OutputFormat::Json => Self::json(domains),
            OutputFormat::Text if domains.is_empty() => String::from("No domains.\n"),
            OutputFormat::Text => {
                let rows: Vec<DomainRow> = domains
                    .iter()
                    .map(|d| DomainRow {
                        name: d.name.clone(),
                        users: d.user_count,
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats an alias list.
    #[must_use]
    pub fn format_aliases(&self, aliases: &[MailAlias]) -> String {
        match self.format {
            OutputFormat::Json => Self::json(aliases),
            OutputFormat::Text if aliases.is_empty() => String::from("No aliases.\n"),
            OutputFormat::Text => {
                let rows: Vec<AliasRow> = aliases
                    .iter()
                    .map(|a| AliasRow {
                        email: a.email.clone(),
                        destinations: a.destinations.join(", "),
                        enabled: Self::yes_no(a.enabled),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a single alias.
    #[must_use]
    pub fn format_alias(&self, alias: &MailAlias) -> String {
        match self.format {
            OutputFormat::Json => Self::json(alias),
            OutputFormat::Text => {
                let mut output = format!("{}\n", alias.email.bold());
                for destination in &alias.destinations {
                    let _ = writeln!(output, "   -> {destination}");
                }
                if !alias.enabled {
                    let _ = writeln!(output, "   (disabled)");
                }
                output
            }
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                Self::json(&serde_json::json!({ "status": "success", "message": message }))
            }
            OutputFormat::Text => format!("{} {message}", "✓".green()),
        }
    }

    fn format_step_status(status: StepStatus) -> String {
        match status {
            StepStatus::Completed => "ok".green().to_string(),
            StepStatus::Warned => "warning".yellow().to_string(),
            StepStatus::Skipped => "skipped".dimmed().to_string(),
            StepStatus::Failed => "failed".red().to_string(),
            StepStatus::NotRun => "-".dimmed().to_string(),
        }
    }

    fn yes_no(value: bool) -> String {
        String::from(if value { "yes" } else { "no" })
    }

    /// Formats a byte count with a binary unit; 0 means unlimited.
    fn format_bytes(bytes: i64) -> String {
        const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
        if bytes <= 0 {
            return String::from("unlimited");
        }
        let mut value = bytes;
        let mut unit = 0;
        while value >= 1024 && value % 1024 == 0 && unit < UNITS.len() - 1 {
            value /= 1024;
            unit += 1;
        }
        format!("{value} {}", UNITS[unit])
    }
}
