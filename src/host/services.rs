//! Init system unit control.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Result, ServiceError};

use super::command::run_command;

/// Controls service units.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Enables a unit at boot.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::ActionFailed` on failure.
    async fn enable(&self, unit: &str) -> Result<()>;

    /// Starts a unit.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::ActionFailed` on failure.
    async fn start(&self, unit: &str) -> Result<()>;

    /// Stops a unit.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::ActionFailed` on failure.
    async fn stop(&self, unit: &str) -> Result<()>;

    /// Restarts a unit.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::ActionFailed` on failure.
    async fn restart(&self, unit: &str) -> Result<()>;

    /// Reloads a unit's configuration.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::ActionFailed` on failure.
    async fn reload(&self, unit: &str) -> Result<()>;

    /// Reloads the unit database after drop-ins changed.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::DaemonReloadFailed` on failure.
    async fn daemon_reload(&self) -> Result<()>;

    /// Returns true if the unit is active.
    async fn is_active(&self, unit: &str) -> bool;
}

/// [`ServiceManager`] driving `systemctl`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Systemd;

impl Systemd {
    async fn action(action: &str, unit: &str) -> Result<()> {
        debug!(unit = %unit, "systemctl {}", action);
        let result = run_command("systemctl", &[action, unit]).await?;
        if result.success {
            Ok(())
        } else {
            Err(ServiceError::ActionFailed {
                unit: unit.to_string(),
                action: action.to_string(),
                message: result.message(),
            }
            .into())
        }
    }
}

#[async_trait]
impl ServiceManager for Systemd {
    async fn enable(&self, unit: &str) -> Result<()> {
        Self::action("enable", unit).await
    }

    async fn start(&self, unit: &str) -> Result<()> {
        Self::action("start", unit).await
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        Self::action("stop", unit).await
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        Self::action("restart", unit).await
    }

    async fn reload(&self, unit: &str) -> Result<()> {
        match Self::action("reload", unit).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(unit = %unit, "reload failed ({e}), restarting instead");
                Self::action("restart", unit).await
            }
        }
    }

    async fn daemon_reload(&self) -> Result<()> {
        let result = run_command("systemctl", &["daemon-reload"]).await?;
        if result.success {
            Ok(())
        } else {
            Err(ServiceError::DaemonReloadFailed {
                message: result.message(),
            }
            .into())
        }
    }

    async fn is_active(&self, unit: &str) -> bool {
        run_command("systemctl", &["is-active", "--quiet", unit])
            .await
            .is_ok_and(|r| r.success)
    }
}
