//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_FILE;

/// `MailStack` - provision and manage a self-hosted mail server.
#[derive(Parser, Debug)]
#[command(name = "mailstack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "MAILSTACK_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install and configure the mail server on this host.
    Install {
        /// Rewrite configuration files even when unchanged.
        #[arg(short, long)]
        force: bool,

        /// Install below this directory instead of `/`.
        #[arg(long, default_value = "/")]
        root: PathBuf,

        /// Pause between service starts, in milliseconds.
        #[arg(long, default_value = "500")]
        settle_ms: u64,
    },

    /// Update installed packages.
    Update,

    /// Show the state of mail services.
    Status,

    /// Inspect or apply the configuration.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Manage mail users.
    User {
        /// User subcommand.
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage mail domains.
    Domain {
        /// Domain subcommand.
        #[command(subcommand)]
        command: DomainCommands,
    },

    /// Manage mail aliases.
    Alias {
        /// Alias subcommand.
        #[command(subcommand)]
        command: AliasCommands,
    },

    /// Manage DKIM keys.
    Dkim {
        /// DKIM subcommand.
        #[command(subcommand)]
        command: DkimCommands,
    },
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Check the configuration and list every problem.
    Validate,

    /// Print the configuration with defaults applied.
    Show {
        /// Include passwords and secrets.
        #[arg(long)]
        secrets: bool,
    },

    /// Re-render every configuration file.
    Regenerate {
        /// Rewrite files even when unchanged.
        #[arg(short, long)]
        force: bool,

        /// Write below this directory instead of `/`.
        #[arg(long, default_value = "/")]
        root: PathBuf,
    },
}

/// User subcommands.
#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Add a mail user.
    Add {
        /// Email address.
        email: String,

        /// Password.
        #[arg(short, long, env = "MAILSTACK_USER_PASSWORD", hide_env_values = true)]
        password: String,

        /// Quota in bytes (defaults to the configured quota).
        #[arg(short, long)]
        quota: Option<i64>,

        /// Grant global administrator rights.
        #[arg(long)]
        admin: bool,
    },

    /// Delete a mail user.
    Delete {
        /// Email address.
        email: String,
    },

    /// List mail users.
    List,

    /// Change a user's password.
    Password {
        /// Email address.
        email: String,

        /// New password.
        #[arg(short, long, env = "MAILSTACK_USER_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

/// Domain subcommands.
#[derive(Subcommand, Debug)]
pub enum DomainCommands {
    /// Add a mail domain.
    Add {
        /// Domain name.
        name: String,
    },

    /// Delete a mail domain without users.
    Delete {
        /// Domain name.
        name: String,
    },

    /// List mail domains.
    List,
}

/// Alias subcommands.
#[derive(Subcommand, Debug)]
pub enum AliasCommands {
    /// Add an alias.
    Add {
        /// Alias address.
        email: String,

        /// Destination addresses, comma separated or repeated.
        #[arg(required = true)]
        destinations: Vec<String>,
    },

    /// Delete an alias.
    Delete {
        /// Alias address.
        email: String,
    },

    /// List aliases.
    List,

    /// Show one alias.
    Show {
        /// Alias address.
        email: String,
    },
}

/// DKIM subcommands.
#[derive(Subcommand, Debug)]
pub enum DkimCommands {
    /// Generate a key (keeps an existing one unless forced).
    Generate {
        /// Domain (defaults to the primary domain).
        #[arg(short, long)]
        domain: Option<String>,

        /// Selector (defaults to the configured selector).
        #[arg(short, long)]
        selector: Option<String>,

        /// Replace an existing key.
        #[arg(long)]
        force: bool,
    },

    /// Print the DNS record for a key.
    Show {
        /// Domain (defaults to the primary domain).
        #[arg(short, long)]
        domain: Option<String>,

        /// Selector (defaults to the configured selector).
        #[arg(short, long)]
        selector: Option<String>,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
