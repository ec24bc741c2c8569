//! Package manager abstraction and the package sets each feature needs.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{Feature, StackConfig};
use crate::error::{MailstackError, PackageError, Result};

use super::command::{program_exists, run_command};
use super::os::OsFamily;

/// A distribution package manager.
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Tool name, e.g. `apt-get`.
    fn name(&self) -> &'static str;

    /// Refreshes package lists.
    ///
    /// # Errors
    ///
    /// Returns `PackageError::UpdateFailed` if the refresh fails.
    async fn update(&self) -> Result<()>;

    /// Installs (or upgrades) the given packages in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `PackageError::InstallFailed` if the tool reports failure.
    async fn install(&self, packages: &[String]) -> Result<()>;

    /// Returns true if the package is already installed.
    async fn is_installed(&self, package: &str) -> bool;
}

/// Chooses a package manager for an OS family.
pub trait PackageManagerFactory: Send + Sync {
    /// Returns the package manager for `family`.
    ///
    /// # Errors
    ///
    /// Returns `PackageError::UnsupportedFamily` for unknown families.
    fn for_family(&self, family: OsFamily) -> Result<Box<dyn PackageManager>>;
}

/// Factory returning the real system package managers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPackageManagers;

impl PackageManagerFactory for SystemPackageManagers {
    fn for_family(&self, family: OsFamily) -> Result<Box<dyn PackageManager>> {
        if family.is_debian_like() {
            Ok(Box::new(Apt))
        } else if family.is_rhel_like() {
            let program = if program_exists("dnf") { "dnf" } else { "yum" };
            Ok(Box::new(Dnf { program }))
        } else if family == OsFamily::Alpine {
            Ok(Box::new(Apk))
        } else {
            Err(PackageError::UnsupportedFamily {
                family: family.to_string(),
            }
            .into())
        }
    }
}

fn install_failed(packages: &[String], message: String) -> MailstackError {
    PackageError::InstallFailed {
        packages: packages.join(" "),
        message,
    }
    .into()
}

/// Debian/Ubuntu `apt-get`.
#[derive(Debug, Clone, Copy)]
pub struct Apt;

#[async_trait]
impl PackageManager for Apt {
    fn name(&self) -> &'static str {
        "apt-get"
    }

    async fn update(&self) -> Result<()> {
        let result = run_command("apt-get", &["update", "-y"]).await?;
        if result.success {
            Ok(())
        } else {
            Err(PackageError::UpdateFailed {
                message: result.message(),
            }
            .into())
        }
    }

    async fn install(&self, packages: &[String]) -> Result<()> {
        let mut args = vec!["DEBIAN_FRONTEND=noninteractive", "apt-get", "install", "-y"];
        args.extend(packages.iter().map(String::as_str));
        let result = run_command("env", &args).await?;
        if result.success {
            Ok(())
        } else {
            Err(install_failed(packages, result.message()))
        }
    }

    async fn is_installed(&self, package: &str) -> bool {
        run_command("dpkg", &["-l", package])
            .await
            .is_ok_and(|r| r.success && r.stdout.contains(&format!("ii  {package}")))
    }
}

/// Red Hat family `dnf`, or `yum` where dnf is absent.
#[derive(Debug, Clone, Copy)]
pub struct Dnf {
    program: &'static str,
}

#[async_trait]
impl PackageManager for Dnf {
    fn name(&self) -> &'static str {
        self.program
    }

    async fn update(&self) -> Result<()> {
        // check-update exits 100 when updates are available.
        let result = run_command(self.program, &["check-update", "-y"]).await?;
        match result.exit_code {
            Some(0 | 100) => Ok(()),
            _ => Err(PackageError::UpdateFailed {
                message: result.message(),
            }
            .into()),
        }
    }

    async fn install(&self, packages: &[String]) -> Result<()> {
        let mut args = vec!["install", "-y"];
        args.extend(packages.iter().map(String::as_str));
        let result = run_command(self.program, &args).await?;
        if result.success {
            Ok(())
        } else {
            Err(install_failed(packages, result.message()))
        }
    }

    async fn is_installed(&self, package: &str) -> bool {
        run_command("rpm", &["-q", package])
            .await
            .is_ok_and(|r| r.success)
    }
}

/// Alpine `apk`.
#[derive(Debug, Clone, Copy)]
pub struct Apk;

#[async_trait]
impl PackageManager for Apk {
    fn name(&self) -> &'static str {
        "apk"
    }

    async fn update(&self) -> Result<()> {
        let result = run_command("apk", &["update"]).await?;
        if result.success {
            Ok(())
        } else {
            Err(PackageError::UpdateFailed {
                message: result.message(),
            }
            .into())
        }
    }

    async fn install(&self, packages: &[String]) -> Result<()> {
        let mut args = vec!["add", "--no-cache"];
        args.extend(packages.iter().map(String::as_str));
        let result = run_command("apk", &args).await?;
        if result.success {
            Ok(())
        } else {
            Err(install_failed(packages, result.message()))
        }
    }

    async fn is_installed(&self, package: &str) -> bool {
        run_command("apk", &["info", "-e", package])
            .await
            .is_ok_and(|r| r.success)
    }
}

const DEBIAN_BASE: &[&str] = &[
    "postfix",
    "postfix-lmdb",
    "dovecot-core",
    "dovecot-imapd",
    "dovecot-pop3d",
    "dovecot-lmtpd",
    "dovecot-managesieved",
    "dovecot-sieve",
    "rspamd",
    "redis-server",
    "nginx",
    "ca-certificates",
    "curl",
    "gnupg",
    "openssl",
    "python3",
    "python3-pip",
    "libsasl2-modules",
    "sasl2-bin",
];

const RHEL_BASE: &[&str] = &[
    "postfix",
    "postfix-lmdb",
    "dovecot",
    "dovecot-pigeonhole",
    "rspamd",
    "redis",
    "nginx",
    "ca-certificates",
    "curl",
    "gnupg2",
    "openssl",
    "python3",
    "python3-pip",
    "cyrus-sasl",
    "cyrus-sasl-plain",
];

const ALPINE_BASE: &[&str] = &[
    "postfix",
    "postfix-lmdb",
    "dovecot",
    "dovecot-lmtpd",
    "dovecot-pigeonhole-plugin",
    "rspamd",
    "redis",
    "nginx",
    "ca-certificates",
    "curl",
    "gnupg",
    "openssl",
    "python3",
    "py3-pip",
    "cyrus-sasl",
];

/// Returns the packages every installation needs on `family`.
#[must_use]
pub fn required_packages(family: OsFamily, config: &StackConfig) -> Vec<String> {
    let base: &[&str] = if family.is_rhel_like() {
        RHEL_BASE
    } else if family == OsFamily::Alpine {
        ALPINE_BASE
    } else {
        DEBIAN_BASE
    };

    let mut packages: Vec<String> = base.iter().map(|p| (*p).to_string()).collect();
    if config.tls_flavor().uses_acme() {
        packages.push(String::from("certbot"));
    }
    debug!("{} required packages for {}", packages.len(), family);
    packages
}

/// Returns the extra packages an optional feature needs on `family`.
#[must_use]
pub fn optional_packages(family: OsFamily, feature: Feature) -> Vec<String> {
    let debian = family.is_debian_like();
    let rhel = family.is_rhel_like();

    let list: &[&str] = match feature {
        Feature::Antivirus if debian => &["clamav", "clamav-daemon"],
        Feature::Antivirus if rhel => &["clamav", "clamav-update"],
        Feature::Antivirus => &["clamav"],
        Feature::Webmail if debian => &[
            "php-fpm",
            "php-cli",
            "php-json",
            "php-mysql",
            "php-pgsql",
            "php-sqlite3",
            "php-curl",
            "php-mbstring",
            "php-xml",
        ],
        Feature::Webmail if rhel => &[
            "php-fpm",
            "php-cli",
            "php-json",
            "php-mysqlnd",
            "php-pgsql",
            "php-pdo",
            "php-mbstring",
            "php-xml",
        ],
        Feature::Webmail => &[
            "php83-fpm",
            "php83-json",
            "php83-pdo",
            "php83-pdo_mysql",
            "php83-pdo_pgsql",
            "php83-mbstring",
            "php83-xml",
        ],
        Feature::Fetchmail => &["fetchmail"],
        Feature::Webdav => &["radicale"],
        Feature::Oletools if family == OsFamily::Alpine => &["py3-oletools"],
        Feature::Oletools => &["python3-oletools"],
    };

    list.iter().map(|p| (*p).to_string()).collect()
}

/// Installs the packages that are not installed yet.
///
/// Returns the packages that were actually handed to the manager.
///
/// # Errors
///
/// Returns the manager's install error.
pub async fn install_missing(manager: &dyn PackageManager, packages: &[String]) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for package in packages {
        if manager.is_installed(package).await {
            debug!(package = %package, "already installed");
        } else {
            missing.push(package.clone());
        }
    }

    if missing.is_empty() {
        info!("All {} packages already installed", packages.len());
        return Ok(missing);
    }

    info!("Installing {} packages with {}", missing.len(), manager.name());
    manager.install(&missing).await?;
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsFlavor;

    #[test]
    fn test_required_packages_per_family() {
        let config = StackConfig::default();
        let debian = required_packages(OsFamily::Ubuntu, &config);
        assert!(debian.contains(&String::from("redis-server")));
        assert!(!debian.contains(&String::from("certbot")));

        let rhel = required_packages(OsFamily::Fedora, &config);
        assert!(rhel.contains(&String::from("dovecot-pigeonhole")));
    }

    #[test]
    fn test_acme_adds_certbot() {
        let mut config = StackConfig::default();
        config.tls.flavor = Some(TlsFlavor::Letsencrypt);
        assert!(required_packages(OsFamily::Debian, &config).contains(&String::from("certbot")));
    }

    #[test]
    fn test_optional_packages() {
        assert_eq!(
            optional_packages(OsFamily::Debian, Feature::Antivirus),
            vec![String::from("clamav"), String::from("clamav-daemon")]
        );
        assert_eq!(
            optional_packages(OsFamily::Alpine, Feature::Oletools),
            vec![String::from("py3-oletools")]
        );
    }

    #[test]
    fn test_factory_rejects_unknown() {
        assert!(SystemPackageManagers.for_family(OsFamily::Unknown).is_err());
        assert_eq!(
            SystemPackageManagers
                .for_family(OsFamily::Debian)
                .unwrap()
                .name(),
            "apt-get"
        );
    }
}
