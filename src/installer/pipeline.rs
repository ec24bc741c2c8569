//! The convergence pipeline.
//!
//! [`Installer`] walks an [`InstallPlan`] strictly in order. A failing step is
//! wrapped with its name; Fatal steps end the run, Warn steps are logged and
//! the run continues. Every step is safe to repeat on a converged host.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, DatabaseType, StackConfig};
use crate::dkim::{DkimKeys, zone_line};
use crate::error::{MailstackError, PrerequisiteError, Result, TlsError};
use crate::host::fs::{replace_symlink, rooted, set_mode, write_atomic};
use crate::host::{
    HostSystem, OsDescriptor, OsDetector, PackageManagerFactory, ReleaseFileDetector,
    ServiceManager, SystemOps, SystemPackageManagers, Systemd, UserSpec, install_missing,
    optional_packages, required_packages,
};
use crate::store::{NewUser, open_store, split_email};
use crate::templates::{Renderer, entries_for};

use super::health::{HealthChecker, HealthReport};
use super::report::{DegradedFeature, FatalFailure, FileRecord, InstallReport, ServiceFailure, StepStatus};
use super::steps::{InstallPlan, Severity, StepKind};
use super::units::{RESTART_UNITS, override_fragment, override_path, override_units, start_order};

/// Account owning the mail data directories.
pub const SERVICE_USER: &str = "mailstack";

/// Group shared by the mail daemons.
pub const MAIL_GROUP: &str = "mail";

/// Lookup maps kept under the data directory.
const DATA_MAPS: &[&str] = &[
    "virtual_alias_maps",
    "virtual_domains",
    "virtual_mailbox_maps",
    "sender_canonical_maps",
    "recipient_canonical_maps",
    "sender_login_maps",
];

/// Lookup maps kept next to the Postfix configuration.
const POSTFIX_MAPS: &[&str] = &["/etc/postfix/transport.map", "/etc/postfix/tls_policy.map"];

const SASL_PASSWD: &str = "/etc/postfix/sasl_passwd";
const WEBMAIL_SITE: &str = "/etc/nginx/sites-available/webmail.conf";
const WEBMAIL_SITE_LINK: &str = "/etc/nginx/sites-enabled/webmail.conf";
const RENEWAL_HOOK: &str = "/etc/letsencrypt/renewal-hooks/deploy/reload-mailstack.sh";
const RENEWAL_HOOK_SCRIPT: &str = "#!/bin/sh\n\
# Reload services after certificate renewal\n\
systemctl reload nginx\n\
systemctl reload postfix\n\
systemctl reload dovecot\n";

/// The host collaborators a run drives.
pub struct Host {
    /// OS detection.
    pub os: Box<dyn OsDetector>,
    /// Package manager selection.
    pub packages: Box<dyn PackageManagerFactory>,
    /// Accounts, ownership and external tools.
    pub system: Box<dyn SystemOps>,
    /// Unit control.
    pub services: Box<dyn ServiceManager>,
}

impl Host {
    /// Collaborators backed by the real host tools.
    #[must_use]
    pub fn system(root: &Path) -> Self {
        Self {
            os: Box::new(ReleaseFileDetector::new(root)),
            packages: Box::new(SystemPackageManagers),
            system: Box::new(HostSystem),
            services: Box::new(Systemd),
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// Prefix for every host path.
    pub root: PathBuf,
    /// Rewrite rendered files even when unchanged.
    pub force: bool,
    /// Pause between service starts.
    pub settle: Duration,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            force: false,
            settle: Duration::from_millis(500),
        }
    }
}

/// Mutable state threaded through one run.
struct Run {
    os: Option<OsDescriptor>,
    report: InstallReport,
    current: usize,
}

impl Run {
    fn note(&mut self, message: impl Into<String>) {
        if let Some(step) = self.report.steps.get_mut(self.current) {
            step.messages.push(message.into());
        }
    }

    fn os(&self) -> Result<&OsDescriptor> {
        self.os
            .as_ref()
            .ok_or_else(|| MailstackError::internal("operating system has not been detected"))
    }
}

/// Converges a host to a configuration.
pub struct Installer<'a> {
    config: &'a StackConfig,
    host: &'a Host,
    options: InstallOptions,
}

impl<'a> Installer<'a> {
    /// Creates an installer for a configuration and host.
    #[must_use]
    pub const fn new(config: &'a StackConfig, host: &'a Host, options: InstallOptions) -> Self {
        Self {
            config,
            host,
            options,
        }
    }

    /// Runs the full installation plan.
    ///
    /// Never returns early with an error: fatal failures are recorded in the
    /// report, which the caller turns into an exit code.
    pub async fn install(&self) -> InstallReport {
        let plan = InstallPlan::for_config(self.config);
        let hash = ConfigHasher::new().hash_config(self.config);
        let mut run = Run {
            os: None,
            report: InstallReport::new(hash, plan.steps()),
            current: 0,
        };

        info!(
            "Installing MailStack for {} on {}",
            self.config.domain, self.config.hostname
        );

        let total = plan.len();
        for (index, step) in plan.steps().iter().enumerate() {
            run.current = index;
            let name = step.kind.name();
            info!(step = name, "[{}/{}] {}", index + 1, total, name);

            match self.run_step(step.kind, &mut run).await {
                Ok(status) => {
                    let record = &mut run.report.steps[index];
                    record.status = if status == StepStatus::Completed && !record.messages.is_empty() {
                        StepStatus::Warned
                    } else {
                        status
                    };
                }
                Err(err) => {
                    let err = MailstackError::step_failed(name, err);
                    let cause = err.root_cause().to_string();
                    run.note(cause.clone());
                    if step.severity == Severity::Fatal {
                        error!(step = name, "{err}");
                        run.report.steps[index].status = StepStatus::Failed;
                        run.report.fatal = Some(FatalFailure {
                            step: name.to_string(),
                            error: cause,
                        });
                        break;
                    }
                    warn!(step = name, "{err}");
                    run.report.steps[index].status = StepStatus::Warned;
                }
            }
        }

        run.report.finish();
        if run.report.is_success() {
            info!("Installation complete");
        }
        run.report
    }

    /// Re-renders every configuration file and lookup map.
    ///
    /// # Errors
    ///
    /// Returns the failure wrapped with the configuration step's name.
    pub async fn regenerate(&self) -> Result<Vec<FileRecord>> {
        self.generate_config()
            .await
            .map_err(|e| MailstackError::step_failed(StepKind::GenerateConfig.name(), e))
    }

    /// Refreshes package lists and installs or upgrades every package.
    ///
    /// Returns the optional features whose packages failed.
    ///
    /// # Errors
    ///
    /// Returns an error if detection, the refresh or a required package fails.
    pub async fn update(&self) -> Result<Vec<DegradedFeature>> {
        let os = self.host.os.detect().await?;
        let manager = self.host.packages.for_family(os.family)?;

        info!("Updating package lists with {}", manager.name());
        manager.update().await?;
        manager
            .install(&required_packages(os.family, self.config))
            .await?;

        let mut degraded = Vec::new();
        for feature in self.config.enabled_features() {
            let packages = optional_packages(os.family, feature);
            if let Err(e) = manager.install(&packages).await {
                warn!(feature = %feature, "Optional packages failed: {e}");
                degraded.push(DegradedFeature {
                    feature,
                    packages,
                    reason: e.to_string(),
                });
            }
        }
        Ok(degraded)
    }

    /// Reports the state of every managed unit and required port.
    pub async fn status(&self) -> HealthReport {
        HealthChecker::new(self.host.system.as_ref(), self.host.services.as_ref())
            .check(self.config)
            .await
    }

    fn path(&self, path: impl AsRef<Path>) -> PathBuf {
        rooted(&self.options.root, path)
    }

    async fn run_step(&self, kind: StepKind, run: &mut Run) -> Result<StepStatus> {
        match kind {
            StepKind::DetectOs => self.detect_os(run).await,
            StepKind::CheckPrerequisites => self.check_prerequisites().await,
            StepKind::InstallPackages => self.install_packages(run).await,
            StepKind::CreateUsers => self.create_users().await,
            StepKind::CreateDirectories => self.create_directories().await,
            StepKind::GenerateConfig => {
                let files = self.generate_config().await?;
                run.report.files.extend(files);
                Ok(StepStatus::Completed)
            }
            StepKind::InitDatabase => self.init_database().await,
            StepKind::GenerateDkim => self.generate_dkim(run).await,
            StepKind::SetupTls => self.setup_tls().await,
            StepKind::ConfigureServices => self.configure_services(run).await,
            StepKind::StartServices => self.start_services(run).await,
            StepKind::CreateAdmin => self.create_admin(run).await,
            StepKind::HealthCheck => self.health_check(run).await,
        }
    }

    async fn detect_os(&self, run: &mut Run) -> Result<StepStatus> {
        let os = self.host.os.detect().await?;
        if !os.family.is_supported() {
            return Err(PrerequisiteError::UnsupportedOs {
                description: os.to_string(),
            }
            .into());
        }
        info!("Detected {} ({})", os, os.family);
        run.report.os = Some(os.clone());
        run.os = Some(os);
        Ok(StepStatus::Completed)
    }

    async fn check_prerequisites(&self) -> Result<StepStatus> {
        if !self.host.system.is_privileged().await {
            return Err(PrerequisiteError::NotPrivileged.into());
        }
        if !self.host.system.has_init_system().await {
            return Err(PrerequisiteError::NoInitSystem.into());
        }
        Ok(StepStatus::Completed)
    }

    async fn install_packages(&self, run: &mut Run) -> Result<StepStatus> {
        let family = run.os()?.family;
        let manager = self.host.packages.for_family(family)?;

        if let Err(e) = manager.update().await {
            warn!("Package list refresh failed: {e}");
            run.note(format!("package list refresh failed: {e}"));
        }

        install_missing(manager.as_ref(), &required_packages(family, self.config)).await?;

        for feature in self.config.enabled_features() {
            let packages = optional_packages(family, feature);
            if let Err(e) = install_missing(manager.as_ref(), &packages).await {
                warn!(feature = %feature, "Optional packages failed, {feature} is unavailable: {e}");
                run.note(format!("{feature} unavailable: {e}"));
                run.report.degraded.push(DegradedFeature {
                    feature,
                    packages,
                    reason: e.to_string(),
                });
            }
        }
        Ok(StepStatus::Completed)
    }

    async fn create_users(&self) -> Result<StepStatus> {
        let system = self.host.system.as_ref();

        if system.group_exists(MAIL_GROUP).await {
            debug!("group {MAIL_GROUP} exists");
        } else {
            system.create_group(MAIL_GROUP).await?;
            info!("Created group {MAIL_GROUP}");
        }

        let users = [
            UserSpec::system(SERVICE_USER)
                .with_home(self.config.paths.data.clone())
                .with_group(MAIL_GROUP),
            UserSpec::system("postfix").with_group(MAIL_GROUP),
            UserSpec::system("dovecot").with_group(MAIL_GROUP),
        ];
        for user in &users {
            if system.user_exists(&user.name).await {
                debug!("user {} exists", user.name);
                continue;
            }
            system.create_user(user).await?;
            info!("Created user {}", user.name);
        }
        Ok(StepStatus::Completed)
    }

    async fn create_directories(&self) -> Result<StepStatus> {
        let paths = &self.config.paths;
        let directories: [(&str, &str, u32); 9] = [
            (&paths.data, SERVICE_USER, 0o750),
            (&paths.mail, SERVICE_USER, 0o750),
            (&paths.dkim, SERVICE_USER, 0o700),
            (&paths.queue, "postfix", 0o750),
            (&paths.filter, SERVICE_USER, 0o750),
            (&paths.certs, SERVICE_USER, 0o750),
            (&paths.overrides, "root", 0o755),
            ("/etc/mailstack", "root", 0o755),
            ("/var/log/mailstack", SERVICE_USER, 0o750),
        ];

        for (path, owner, mode) in directories {
            let target = self.path(path);
            debug!(path = %target.display(), owner, "directory");
            self.host
                .system
                .create_directory(&target, owner, mode)
                .await?;
        }
        Ok(StepStatus::Completed)
    }

    async fn generate_config(&self) -> Result<Vec<FileRecord>> {
        let renderer = Renderer::new(self.config);
        let mut files = Vec::new();

        for entry in entries_for(self.config) {
            let destination = self.path(entry.destination);
            let write = renderer
                .render_to_file(entry.id, &destination, entry.mode, self.options.force)
                .await?;
            files.push(FileRecord::from(write));
        }
        info!(
            "Rendered {} files ({} changed)",
            files.len(),
            files.iter().filter(|f| f.changed).count()
        );

        self.ensure_lookup_maps().await?;
        self.compile_map(&self.path(SASL_PASSWD)).await?;
        self.ensure_dh_params().await?;

        if self.config.webmail_enabled() {
            let link = self.path(WEBMAIL_SITE_LINK);
            if tokio::fs::symlink_metadata(&link).await.is_err() {
                replace_symlink(&self.path(WEBMAIL_SITE), &link).await?;
                info!("Enabled webmail site");
            }
        }
        Ok(files)
    }

    async fn ensure_lookup_maps(&self) -> Result<()> {
        let data = Path::new(&self.config.paths.data);
        let maps = DATA_MAPS
            .iter()
            .map(|name| data.join(name))
            .chain(POSTFIX_MAPS.iter().map(PathBuf::from));

        for map in maps {
            let path = self.path(&map);
            if tokio::fs::try_exists(&path).await? {
                debug!(path = %path.display(), "lookup map exists");
                continue;
            }
            write_atomic(&path, b"", 0o644).await?;
            self.compile_map(&path).await?;
        }
        Ok(())
    }

    async fn compile_map(&self, path: &Path) -> Result<()> {
        let arg = format!("lmdb:{}", path.display());
        self.host.system.run_tool("postmap", &[arg]).await
    }

    async fn ensure_dh_params(&self) -> Result<()> {
        let path = self.path(Path::new(&self.config.paths.data).join("dhparam.pem"));
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        info!("Generating DH parameters (this may take several minutes)");
        let args = [
            String::from("dhparam"),
            String::from("-out"),
            path.display().to_string(),
            String::from("2048"),
        ];
        self.host.system.run_tool("openssl", &args).await
    }

    async fn init_database(&self) -> Result<StepStatus> {
        let store = open_store(self.config, &self.options.root).await?;
        store.init_schema().await?;
        if store.ensure_domain(&self.config.domain).await? {
            info!("Added primary domain {}", self.config.domain);
        }
        let database = self.path(self.config.sqlite_path());
        set_mode(&database, 0o640).await?;
        self.host.system.chown(&database, "root").await?;
        Ok(StepStatus::Completed)
    }

    async fn generate_dkim(&self, run: &mut Run) -> Result<StepStatus> {
        let domain = &self.config.domain;
        let selector = &self.config.mail.dkim_selector;
        let bits = usize::try_from(self.config.mail.dkim_key_bits)
            .map_err(|e| MailstackError::internal(e.to_string()))?;

        let key = DkimKeys::from_config(self.config)
            .with_root(&self.options.root)
            .ensure(domain, selector, bits)
            .await?;
        run.report.dkim_record = Some(zone_line(domain, selector, &key.record));

        if key.created {
            self.host
                .system
                .chown_recursive(&self.path(&self.config.paths.dkim), SERVICE_USER)
                .await?;
            info!("Publish {} in DNS", key.dns_path.display());
            Ok(StepStatus::Completed)
        } else {
            info!("DKIM key for {domain} already exists, keeping it");
            Ok(StepStatus::Skipped)
        }
    }

    async fn setup_tls(&self) -> Result<StepStatus> {
        let flavor = self.config.tls_flavor();
        if flavor.uses_acme() {
            self.setup_acme().await?;
            Ok(StepStatus::Completed)
        } else if flavor.uses_custom_certs() {
            self.install_custom_certs().await?;
            Ok(StepStatus::Completed)
        } else {
            info!("TLS disabled");
            Ok(StepStatus::Skipped)
        }
    }

    async fn setup_acme(&self) -> Result<()> {
        let system = self.host.system.as_ref();
        if !system.command_exists("certbot") {
            return Err(TlsError::AcmeClientMissing.into());
        }
        debug_assert!(
            !self.config.tls.email.is_empty(),
            "validated configuration carries a TLS email"
        );

        let domains = acme_domains(self.config);
        info!("Requesting certificates for {}", domains.join(", "));

        let mut args: Vec<String> = [
            "certonly",
            "--standalone",
            "--non-interactive",
            "--agree-tos",
            "--keep-until-expiring",
            "--email",
        ]
        .iter()
        .map(|a| (*a).to_string())
        .collect();
        args.push(self.config.tls.email.clone());
        for domain in &domains {
            args.push(String::from("-d"));
            args.push(domain.clone());
        }

        system
            .run_tool("certbot", &args)
            .await
            .map_err(|e| TlsError::AcmeFailed {
                message: e.to_string(),
            })?;

        let live = self.path(format!("/etc/letsencrypt/live/{}", self.config.hostname));
        let certs = self.path(&self.config.paths.certs);
        replace_symlink(&live.join("fullchain.pem"), &certs.join("cert.pem")).await?;
        replace_symlink(&live.join("privkey.pem"), &certs.join("key.pem")).await?;

        write_atomic(&self.path(RENEWAL_HOOK), RENEWAL_HOOK_SCRIPT.as_bytes(), 0o755).await?;
        info!("Certificates linked, renewal hook installed");
        Ok(())
    }

    async fn install_custom_certs(&self) -> Result<()> {
        let certs = self.path(&self.config.paths.certs);
        let sources = [
            ("certificate", &self.config.tls.cert_path, "cert.pem", 0o644),
            ("key", &self.config.tls.key_path, "key.pem", 0o600),
        ];

        for (kind, source, name, mode) in sources {
            let source = self.path(source);
            let content = match tokio::fs::read(&source).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(TlsError::SourceMissing { kind, path: source }.into());
                }
                Err(e) => return Err(e.into()),
            };
            write_atomic(&certs.join(name), &content, mode).await?;
        }
        info!("Custom certificates installed");
        Ok(())
    }

    async fn configure_services(&self, run: &mut Run) -> Result<StepStatus> {
        for unit in override_units(self.config) {
            let path = self.path(override_path(unit));
            let fragment = override_fragment(unit);
            let changed = tokio::fs::read(&path)
                .await
                .map_or(true, |existing| existing != fragment.as_bytes());
            if changed {
                write_atomic(&path, fragment.as_bytes(), 0o644).await?;
                debug!(unit, path = %path.display(), "drop-in written");
            }
            run.report.files.push(FileRecord {
                path: path.display().to_string(),
                digest: String::new(),
                changed,
            });
        }
        self.host.services.daemon_reload().await?;
        Ok(StepStatus::Completed)
    }

    async fn start_services(&self, run: &mut Run) -> Result<StepStatus> {
        let services = self.host.services.as_ref();

        for unit in start_order(self.config) {
            if let Err(e) = services.enable(unit).await {
                self.service_failed(run, unit, &e);
                continue;
            }
            if let Err(e) = services.start(unit).await {
                self.service_failed(run, unit, &e);
                continue;
            }
            info!(unit, "started");
            tokio::time::sleep(self.options.settle).await;
        }

        for unit in RESTART_UNITS {
            if let Err(e) = services.restart(unit).await {
                self.service_failed(run, unit, &e);
            }
            tokio::time::sleep(self.options.settle).await;
        }
        Ok(StepStatus::Completed)
    }

    fn service_failed(&self, run: &mut Run, unit: &str, err: &MailstackError) {
        warn!(unit, "{err}");
        run.note(err.to_string());
        run.report.service_failures.push(ServiceFailure {
            unit: unit.to_string(),
            error: err.to_string(),
        });
    }

    async fn create_admin(&self, run: &mut Run) -> Result<StepStatus> {
        let admin = &self.config.admin;
        if self.config.database.kind != DatabaseType::Sqlite {
            run.note(format!(
                "create {} manually once the {} database is set up",
                admin.email, self.config.database.kind
            ));
            return Ok(StepStatus::Skipped);
        }

        let store = open_store(self.config, &self.options.root).await?;
        let (_, domain) = split_email(&admin.email)?;
        store.ensure_domain(domain).await?;

        if store.get_user(&admin.email).await?.is_some() {
            info!("Admin {} already exists", admin.email);
            return Ok(StepStatus::Skipped);
        }

        store
            .add_user(NewUser {
                email: &admin.email,
                password: &admin.password,
                quota_bytes: i64::try_from(self.config.mail.default_quota).unwrap_or(i64::MAX),
                global_admin: true,
            })
            .await?;
        info!("Created admin {}", admin.email);
        Ok(StepStatus::Completed)
    }

    async fn health_check(&self, run: &mut Run) -> Result<StepStatus> {
        let report = self.status().await;
        if let Some(reason) = &report.port_check_skipped {
            run.note(format!("ports not checked: {reason}"));
        }
        let verdict = report.ensure_healthy();
        run.report.health = Some(report);
        verdict?;
        info!("All health checks passed");
        Ok(StepStatus::Completed)
    }
}

/// Names to request certificates for: the host name, plus the webmail
/// subdomain when webmail is enabled and differs from it.
#[must_use]
pub fn acme_domains(config: &StackConfig) -> Vec<String> {
    let mut domains = vec![config.hostname.clone()];
    if config.webmail_enabled() {
        let webmail = format!("webmail.{}", config.domain);
        if webmail != config.hostname {
            domains.push(webmail);
        }
    }
    domains
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebmailVariant;

    #[test]
    fn test_acme_domains() {
        let mut config = StackConfig::default();
        config.domain = String::from("example.com");
        config.hostname = String::from("mail.example.com");
        assert_eq!(acme_domains(&config), vec!["mail.example.com"]);

        config.services.webmail = WebmailVariant::Roundcube;
        assert_eq!(
            acme_domains(&config),
            vec!["mail.example.com", "webmail.example.com"]
        );

        config.hostname = String::from("webmail.example.com");
        assert_eq!(acme_domains(&config), vec!["webmail.example.com"]);
    }

    #[test]
    fn test_default_options() {
        let options = InstallOptions::default();
        assert_eq!(options.root, PathBuf::from("/"));
        assert!(!options.force);
        assert_eq!(options.settle, Duration::from_millis(500));
    }
}
