//! `MailStack` CLI entrypoint.
//!
//! This is the main entrypoint for the mailstack command-line tool.

use std::path::Path;
use std::process::ExitCode;

use mailstack::cli::{
    AliasCommands, Cli, Commands, ConfigCommands, DkimCommands, DomainCommands, OutputFormatter,
    UserCommands,
};
use mailstack::config::{ConfigHasher, ConfigParser, ConfigValidator, LoadedConfig, StackConfig};
use mailstack::dkim::{DkimKeys, zone_line};
use mailstack::error::Result;
use mailstack::installer::{Host, InstallOptions, Installer};
use mailstack::store::{MailStore, NewUser, open_store};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Placeholder printed instead of secret values.
const REDACTED: &str = "********";

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config;

    match cli.command {
        Commands::Install {
            force,
            root,
            settle_ms,
        } => {
            let options = InstallOptions {
                root,
                force,
                settle: std::time::Duration::from_millis(settle_ms),
            };
            cmd_install(&config_path, options, &formatter).await
        }
        Commands::Update => cmd_update(&config_path, &formatter).await,
        Commands::Status => cmd_status(&config_path, &formatter).await,
        Commands::Config { command } => cmd_config(&config_path, command, &formatter).await,
        Commands::User { command } => {
            cmd_user(&config_path, command, &formatter).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Domain { command } => {
            cmd_domain(&config_path, command, &formatter).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Alias { command } => {
            cmd_alias(&config_path, command, &formatter).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Dkim { command } => {
            cmd_dkim(&config_path, command).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Install the mail stack.
async fn cmd_install(
    config_path: &Path,
    options: InstallOptions,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let loaded = load_config(config_path)?;
    persist_generated(&loaded).await?;

    let host = Host::system(&options.root);
    let installer = Installer::new(&loaded.config, &host, options);
    let report = installer.install().await;

    eprintln!("{}", formatter.format_report(&report));

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Update installed packages.
async fn cmd_update(config_path: &Path, formatter: &OutputFormatter) -> Result<ExitCode> {
    let loaded = load_config(config_path)?;
    let host = Host::system(Path::new("/"));
    let installer = Installer::new(&loaded.config, &host, InstallOptions::default());

    let degraded = installer.update().await?;
    eprintln!("{}", formatter.format_degraded(&degraded));
    Ok(ExitCode::SUCCESS)
}

/// Show service health.
async fn cmd_status(config_path: &Path, formatter: &OutputFormatter) -> Result<ExitCode> {
    let loaded = load_config(config_path)?;
    let host = Host::system(Path::new("/"));
    let installer = Installer::new(&loaded.config, &host, InstallOptions::default());

    let health = installer.status().await;
    eprintln!("{}", formatter.format_health(&health));

    if health.is_healthy() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Configuration commands.
async fn cmd_config(
    config_path: &Path,
    command: ConfigCommands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    match command {
        ConfigCommands::Validate => {
            let parser = parser_for(config_path);
            parser.load_dotenv()?;
            let loaded = parser.load_unchecked(config_file_name(config_path))?;
            let result = ConfigValidator::new().check(&loaded.config);

            eprintln!("{}", formatter.format_validation(&result));
            if result.is_valid() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        ConfigCommands::Show { secrets } => {
            let loaded = load_config(config_path)?;
            let hash = ConfigHasher::new().hash_config(&loaded.config);
            info!(fingerprint = %hash, "Configuration {}", loaded.path.display());

            let config = if secrets {
                loaded.config
            } else {
                redacted(loaded.config)
            };
            eprintln!("{}", ConfigParser::to_json(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        ConfigCommands::Regenerate { force, root } => {
            let loaded = load_config(config_path)?;
            persist_generated(&loaded).await?;

            let options = InstallOptions {
                root,
                force,
                ..InstallOptions::default()
            };
            let host = Host::system(&options.root);
            let installer = Installer::new(&loaded.config, &host, options);

            let files = installer.regenerate().await?;
            eprintln!("{}", formatter.format_files(&files));
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// User management commands.
async fn cmd_user(
    config_path: &Path,
    command: UserCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let loaded = load_config(config_path)?;
    let store = connect(&loaded.config).await?;

    match command {
        UserCommands::Add {
            email,
            password,
            quota,
            admin,
        } => {
            let quota_bytes = quota.unwrap_or_else(|| {
                i64::try_from(loaded.config.mail.default_quota).unwrap_or(i64::MAX)
            });
            store
                .add_user(NewUser {
                    email: &email,
                    password: &password,
                    quota_bytes,
                    global_admin: admin,
                })
                .await?;
            eprintln!("{}", formatter.success(&format!("User {email} added")));
        }
        UserCommands::Delete { email } => {
            store.delete_user(&email).await?;
            eprintln!("{}", formatter.success(&format!("User {email} deleted")));
        }
        UserCommands::List => {
            let users = store.list_users().await?;
            eprintln!("{}", formatter.format_users(&users));
        }
        UserCommands::Password { email, password } => {
            store.change_password(&email, &password).await?;
            eprintln!("{}", formatter.success(&format!("Password changed for {email}")));
        }
    }

    Ok(())
}

/// Domain management commands.
async fn cmd_domain(
    config_path: &Path,
    command: DomainCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let loaded = load_config(config_path)?;
    let store = connect(&loaded.config).await?;

    match command {
        DomainCommands::Add { name } => {
            store.add_domain(&name).await?;
            eprintln!("{}", formatter.success(&format!("Domain {name} added")));
        }
        DomainCommands::Delete { name } => {
            store.delete_domain(&name).await?;
            eprintln!("{}", formatter.success(&format!("Domain {name} deleted")));
        }
        DomainCommands::List => {
            let domains = store.list_domains().await?;
            eprintln!("{}", formatter.format_domains(&domains));
        }
    }

    Ok(())
}

/// Alias management commands.
async fn cmd_alias(
    config_path: &Path,
    command: AliasCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let loaded = load_config(config_path)?;
    let store = connect(&loaded.config).await?;

    match command {
        AliasCommands::Add {
            email,
            destinations,
        } => {
            store.add_alias(&email, &destinations).await?;
            eprintln!("{}", formatter.success(&format!("Alias {email} added")));
        }
        AliasCommands::Delete { email } => {
            store.delete_alias(&email).await?;
            eprintln!("{}", formatter.success(&format!("Alias {email} deleted")));
        }
        AliasCommands::List => {
            let aliases = store.list_aliases().await?;
            eprintln!("{}", formatter.format_aliases(&aliases));
        }
        AliasCommands::Show { email } => {
            let alias = store.get_alias(&email).await?;
            eprintln!("{}", formatter.format_alias(&alias));
        }
    }

    Ok(())
}

/// DKIM key commands.
async fn cmd_dkim(config_path: &Path, command: DkimCommands) -> Result<()> {
    let loaded = load_config(config_path)?;
    let config = &loaded.config;
    let keys = DkimKeys::from_config(config);
    let bits = usize::try_from(config.mail.dkim_key_bits).unwrap_or(2048);

    match command {
        DkimCommands::Generate {
            domain,
            selector,
            force,
        } => {
            let domain = domain.unwrap_or_else(|| config.domain.clone());
            let selector = selector.unwrap_or_else(|| config.mail.dkim_selector.clone());

            let key = if force {
                keys.generate(&domain, &selector, bits).await?
            } else {
                keys.ensure(&domain, &selector, bits).await?
            };

            if !key.created {
                eprintln!(
                    "Key already exists at {} (use --force to replace it)",
                    key.key_path.display()
                );
            }
            eprint!("{}", zone_line(&domain, &selector, &key.record));
        }
        DkimCommands::Show { domain, selector } => {
            let domain = domain.unwrap_or_else(|| config.domain.clone());
            let selector = selector.unwrap_or_else(|| config.mail.dkim_selector.clone());

            let record = keys.dns_record(&domain, &selector).await?;
            eprint!("{}", zone_line(&domain, &selector, &record));
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Creates a parser resolving relative paths against the config directory.
fn parser_for(config_path: &Path) -> ConfigParser {
    ConfigParser::new().with_base_path(config_path.parent().unwrap_or_else(|| Path::new(".")))
}

/// Loads `.env`, then the configuration with environment overrides.
fn load_config(config_path: &Path) -> Result<LoadedConfig> {
    debug!("Loading configuration from: {}", config_path.display());

    let parser = parser_for(config_path);
    parser.load_dotenv()?;
    parser.load_with_env(config_file_name(config_path))
}

/// The config path relative to the parser's base directory.
fn config_file_name(config_path: &Path) -> &Path {
    config_path.file_name().map_or(config_path, Path::new)
}

/// Writes secrets generated during load back to the configuration file.
async fn persist_generated(loaded: &LoadedConfig) -> Result<()> {
    ConfigParser::new().persist_secrets(loaded).await
}

/// Opens the mail store and makes sure its schema exists.
async fn connect(config: &StackConfig) -> Result<Box<dyn MailStore>> {
    let store = open_store(config, Path::new("/")).await?;
    store.init_schema().await?;
    Ok(store)
}

/// Replaces every password and secret with a placeholder.
fn redacted(mut config: StackConfig) -> StackConfig {
    let dsn_has_password = !config.database.password.is_empty();
    let fields = [
        &mut config.admin.password,
        &mut config.database.password,
        &mut config.mail.relay_password,
        &mut config.secrets.secret_key,
        &mut config.secrets.roundcube_key,
        &mut config.secrets.snuffleupagus_key,
    ];
    for field in fields {
        if !field.is_empty() {
            *field = REDACTED.to_string();
        }
    }
    if dsn_has_password {
        config.database.dsn = REDACTED.to_string();
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_hides_secrets() {
        let mut config = StackConfig::default();
        config.admin.password = String::from("hunter2");
        config.secrets.secret_key = String::from("abc");
        config.database.password = String::from("pw");
        config.database.dsn = String::from("pgsql:host=db;password=pw");

        let config = redacted(config);
        assert_eq!(config.admin.password, REDACTED);
        assert_eq!(config.secrets.secret_key, REDACTED);
        assert_eq!(config.database.password, REDACTED);
        assert_eq!(config.database.dsn, REDACTED);
        assert!(config.secrets.roundcube_key.is_empty());
    }

    #[test]
    fn test_config_file_name() {
        assert_eq!(
            config_file_name(Path::new("/etc/mailstack/mailstack.json")),
            Path::new("mailstack.json")
        );
        assert_eq!(config_file_name(Path::new("local.json")), Path::new("local.json"));
    }
}
