//! System primitives: privilege checks, accounts, ownership and tools.
//!
//! Paths passed to [`SystemOps`] are already anchored under the install root.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

use crate::error::{MailstackError, Result};

use super::command::{program_exists, run_checked, run_command};
use super::fs::set_mode;

/// A system account to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
    /// Login name.
    pub name: String,
    /// Home directory, if any.
    pub home: Option<String>,
    /// Login shell.
    pub shell: String,
    /// Supplementary group.
    pub group: Option<String>,
}

impl UserSpec {
    /// Creates a no-login system account description.
    #[must_use]
    pub fn system(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            home: None,
            shell: String::from("/bin/false"),
            group: None,
        }
    }

    /// Sets the home directory.
    #[must_use]
    pub fn with_home(mut self, home: impl Into<String>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Sets the supplementary group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// Host-level primitives used by the installer.
#[async_trait]
pub trait SystemOps: Send + Sync {
    /// Returns true when running with effective uid 0.
    async fn is_privileged(&self) -> bool;

    /// Returns true if systemd is available.
    async fn has_init_system(&self) -> bool;

    /// Returns true if the user exists.
    async fn user_exists(&self, name: &str) -> bool;

    /// Creates a system user.
    ///
    /// # Errors
    ///
    /// Returns an error if `useradd` fails.
    async fn create_user(&self, user: &UserSpec) -> Result<()>;

    /// Returns true if the group exists.
    async fn group_exists(&self, name: &str) -> bool;

    /// Creates a system group.
    ///
    /// # Errors
    ///
    /// Returns an error if `groupadd` fails.
    async fn create_group(&self, name: &str) -> Result<()>;

    /// Creates a directory (and parents), then applies `mode` and `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error if creation, chmod or chown fails.
    async fn create_directory(&self, path: &Path, owner: &str, mode: u32) -> Result<()>;

    /// Changes the owner of a single path.
    ///
    /// # Errors
    ///
    /// Returns an error if `chown` fails.
    async fn chown(&self, path: &Path, owner: &str) -> Result<()>;

    /// Changes the owner of a tree.
    ///
    /// # Errors
    ///
    /// Returns an error if `chown -R` fails.
    async fn chown_recursive(&self, path: &Path, owner: &str) -> Result<()>;

    /// Returns true if an external tool is installed.
    fn command_exists(&self, program: &str) -> bool;

    /// Runs an external tool, failing on a non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns `MailstackError::Command` on failure.
    async fn run_tool(&self, program: &str, args: &[String]) -> Result<()>;

    /// Returns the TCP ports with a listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket table cannot be read.
    async fn listening_ports(&self) -> Result<BTreeSet<u16>>;
}

/// [`SystemOps`] backed by the real host tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSystem;

#[async_trait]
impl SystemOps for HostSystem {
    async fn is_privileged(&self) -> bool {
        run_command("id", &["-u"])
            .await
            .is_ok_and(|r| r.success && r.stdout.trim() == "0")
    }

    async fn has_init_system(&self) -> bool {
        run_command("systemctl", &["--version"])
            .await
            .is_ok_and(|r| r.success)
    }

    async fn user_exists(&self, name: &str) -> bool {
        run_command("getent", &["passwd", name])
            .await
            .is_ok_and(|r| r.success)
    }

    async fn create_user(&self, user: &UserSpec) -> Result<()> {
        let mut args = vec!["--system", "--no-create-home", "--shell", user.shell.as_str()];
        if let Some(home) = &user.home {
            args.extend(["--home-dir", home.as_str()]);
        }
        if let Some(group) = &user.group {
            args.extend(["--groups", group.as_str()]);
        }
        args.push(user.name.as_str());
        run_checked("useradd", &args).await?;
        Ok(())
    }

    async fn group_exists(&self, name: &str) -> bool {
        run_command("getent", &["group", name])
            .await
            .is_ok_and(|r| r.success)
    }

    async fn create_group(&self, name: &str) -> Result<()> {
        run_checked("groupadd", &["--system", name]).await?;
        Ok(())
    }

    async fn create_directory(&self, path: &Path, owner: &str, mode: u32) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        set_mode(path, mode).await?;
        self.chown(path, owner).await
    }

    async fn chown(&self, path: &Path, owner: &str) -> Result<()> {
        let path = path.to_string_lossy();
        let owner = format!("{owner}:");
        run_checked("chown", &[owner.as_str(), path.as_ref()]).await?;
        Ok(())
    }

    async fn chown_recursive(&self, path: &Path, owner: &str) -> Result<()> {
        let path = path.to_string_lossy();
        let owner = format!("{owner}:");
        run_checked("chown", &["-R", owner.as_str(), path.as_ref()]).await?;
        Ok(())
    }

    fn command_exists(&self, program: &str) -> bool {
        program_exists(program)
    }

    async fn run_tool(&self, program: &str, args: &[String]) -> Result<()> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_checked(program, &args).await?;
        Ok(())
    }

    async fn listening_ports(&self) -> Result<BTreeSet<u16>> {
        let result = run_command("ss", &["-tln"]).await?;
        if !result.success {
            return Err(MailstackError::command("ss -tln", result.message()));
        }
        let ports = parse_ss_output(&result.stdout);
        debug!("Listening ports: {:?}", ports);
        Ok(ports)
    }
}

/// Extracts local ports from `ss -tln` output.
#[must_use]
pub fn parse_ss_output(output: &str) -> BTreeSet<u16> {
    output
        .lines()
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            if columns.next()? != "LISTEN" {
                return None;
            }
            let local = columns.nth(2)?;
            local.rsplit_once(':')?.1.parse().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ss_output() {
        let output = "\
State  Recv-Q Send-Q Local Address:Port Peer Address:Port Process
LISTEN 0      100          0.0.0.0:25        0.0.0.0:*
LISTEN 0      100          0.0.0.0:993       0.0.0.0:*
LISTEN 0      511             [::]:443          [::]:*
LISTEN 0      4096       127.0.0.1:6379      0.0.0.0:*
";
        let ports = parse_ss_output(output);
        assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![25, 443, 993, 6379]);
    }

    #[test]
    fn test_parse_ss_output_ignores_garbage() {
        assert!(parse_ss_output("nothing useful\n").is_empty());
    }

    #[test]
    fn test_user_spec_builder() {
        let user = UserSpec::system("mailstack")
            .with_home("/var/lib/mailstack")
            .with_group("mail");
        assert_eq!(user.shell, "/bin/false");
        assert_eq!(user.home.as_deref(), Some("/var/lib/mailstack"));
        assert_eq!(user.group.as_deref(), Some("mail"));
    }
}
