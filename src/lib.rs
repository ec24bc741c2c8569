// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # `MailStack`
//!
//! Idempotent provisioning of a self-hosted mail server on a single Linux host.
//!
//! ## Overview
//!
//! `MailStack` turns one JSON configuration file into a running mail system:
//!
//! - Postfix for SMTP, Dovecot for IMAP/POP3 and LMTP delivery
//! - Rspamd with Redis for filtering and DKIM signing
//! - Nginx in front of an optional webmail, with ACME or custom certificates
//! - A user, domain and alias store shared by every daemon
//!
//! ## Architecture
//!
//! Installation is a **convergence pipeline**: thirteen ordered steps, each
//! safe to repeat on an already converged host.
//!
//! 1. **Configuration**: loaded, defaulted (secrets generated once) and validated
//! 2. **Templates**: every daemon file is rendered from the configuration
//! 3. **Installer**: drives host collaborators through the steps and reports
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, defaulting and validation
//! - [`templates`]: Template language and the daemon file catalog
//! - [`host`]: OS detection, package managers, services and filesystem
//! - [`store`]: Mail users, domains and aliases
//! - [`dkim`]: DKIM key generation and DNS records
//! - [`installer`]: The convergence pipeline and its report
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```json
//! {
//!   "domain": "example.com",
//!   "hostname": "mail.example.com",
//!   "admin": { "email": "admin@example.com", "password": "change-me" },
//!   "tls": { "flavor": "letsencrypt", "email": "hostmaster@example.com" }
//! }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod dkim;
pub mod error;
pub mod host;
pub mod installer;
pub mod store;
pub mod templates;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, StackConfig};
pub use dkim::DkimKeys;
pub use error::{MailstackError, Result};
pub use installer::{Host, InstallOptions, InstallReport, Installer};
pub use store::{MailStore, SqliteStore, open_store};
pub use templates::{Renderer, Template};
