//! CLI module for the `MailStack` provisioning tool.
//!
//! This module provides the command-line interface for installing the
//! mail stack and managing its users, domains, aliases and DKIM keys.

mod commands;
mod output;

pub use commands::{
    AliasCommands, Cli, Commands, ConfigCommands, DkimCommands, DomainCommands, OutputFormat,
    UserCommands,
};
pub use output::OutputFormatter;
