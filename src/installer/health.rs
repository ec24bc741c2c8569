//! Post-install health verification.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::StackConfig;
use crate::error::HealthCheckError;
use crate::host::{ServiceManager, SystemOps};

use super::units::{health_units, required_ports};

/// State of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    /// Unit name.
    pub unit: String,
    /// Whether the unit is active.
    pub active: bool,
}

/// State of one required port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortHealth {
    /// TCP port.
    pub port: u16,
    /// Protocol label.
    pub name: String,
    /// Whether something listens on it.
    pub listening: bool,
}

/// Aggregated health of an installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Per-unit state.
    pub services: Vec<ServiceHealth>,
    /// Per-port state; empty when ports could not be checked.
    pub ports: Vec<PortHealth>,
    /// Set when the socket table was unreadable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_check_skipped: Option<String>,
}

impl HealthReport {
    /// Units that are not active.
    #[must_use]
    pub fn inactive_services(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|s| !s.active)
            .map(|s| s.unit.clone())
            .collect()
    }

    /// Required ports without a listener.
    #[must_use]
    pub fn closed_ports(&self) -> Vec<u16> {
        self.ports
            .iter()
            .filter(|p| !p.listening)
            .map(|p| p.port)
            .collect()
    }

    /// Returns true if every unit is active and every required port was
    /// seen listening. An unreadable socket table is not healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.port_check_skipped.is_none()
            && self.services.iter().all(|s| s.active)
            && self.ports.iter().all(|p| p.listening)
    }

    /// Converts the report into a single pass/fail.
    ///
    /// # Errors
    ///
    /// Returns `HealthCheckError::Unhealthy` listing every failure, or
    /// `HealthCheckError::PortsUnchecked` when only the port check is missing.
    pub fn ensure_healthy(&self) -> Result<(), HealthCheckError> {
        if self.is_healthy() {
            return Ok(());
        }
        let services = self.inactive_services();
        let ports = self.closed_ports();
        match &self.port_check_skipped {
            Some(reason) if services.is_empty() && ports.is_empty() => {
                Err(HealthCheckError::PortsUnchecked {
                    reason: reason.clone(),
                })
            }
            _ => Err(HealthCheckError::Unhealthy { services, ports }),
        }
    }
}

/// Queries unit state and listening ports.
pub struct HealthChecker<'a> {
    system: &'a dyn SystemOps,
    services: &'a dyn ServiceManager,
}

impl<'a> HealthChecker<'a> {
    /// Creates a checker over the given collaborators.
    #[must_use]
    pub fn new(system: &'a dyn SystemOps, services: &'a dyn ServiceManager) -> Self {
        Self { system, services }
    }

    /// Checks every unit and port the configuration requires.
    pub async fn check(&self, config: &StackConfig) -> HealthReport {
        let mut report = HealthReport::default();

        for unit in health_units(config) {
            let active = self.services.is_active(unit).await;
            debug!(unit, active, "service state");
            report.services.push(ServiceHealth {
                unit: unit.to_string(),
                active,
            });
        }

        match self.system.listening_ports().await {
            Ok(listening) => {
                for (port, name) in required_ports(config) {
                    report.ports.push(PortHealth {
                        port,
                        name: name.to_string(),
                        listening: listening.contains(&port),
                    });
                }
            }
            Err(e) => {
                warn!("Could not check ports: {e}");
                report.port_check_skipped = Some(e.to_string());
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(active: &[bool], listening: &[bool]) -> HealthReport {
        HealthReport {
            services: active
                .iter()
                .enumerate()
                .map(|(i, active)| ServiceHealth {
                    unit: format!("unit{i}"),
                    active: *active,
                })
                .collect(),
            ports: listening
                .iter()
                .zip([25u16, 143, 993])
                .map(|(listening, port)| PortHealth {
                    port,
                    name: String::from("x"),
                    listening: *listening,
                })
                .collect(),
            port_check_skipped: None,
        }
    }

    #[test]
    fn test_healthy_report() {
        let report = report(&[true, true], &[true, true]);
        assert!(report.is_healthy());
        assert!(report.ensure_healthy().is_ok());
    }

    #[test]
    fn test_unhealthy_report_aggregates() {
        let report = report(&[true, false], &[false, true, false]);
        assert!(!report.is_healthy());
        match report.ensure_healthy().unwrap_err() {
            HealthCheckError::Unhealthy { services, ports } => {
                assert_eq!(services, vec![String::from("unit1")]);
                assert_eq!(ports, vec![25, 993]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_skipped_port_check_is_not_healthy() {
        let mut report = report(&[true, true], &[]);
        report.port_check_skipped = Some(String::from("ss: command not found"));

        assert!(!report.is_healthy());
        match report.ensure_healthy().unwrap_err() {
            HealthCheckError::PortsUnchecked { reason } => {
                assert_eq!(reason, "ss: command not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_inactive_service_wins_over_skipped_ports() {
        let mut report = report(&[false], &[]);
        report.port_check_skipped = Some(String::from("ss: command not found"));

        match report.ensure_healthy().unwrap_err() {
            HealthCheckError::Unhealthy { services, ports } => {
                assert_eq!(services, vec![String::from("unit0")]);
                assert!(ports.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
