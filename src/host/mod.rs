//! Host collaborators.
//!
//! Thin wrappers around the tools a provisioning run drives:
//! - OS detection from release files
//! - Package managers (apt-get, dnf/yum, apk)
//! - Accounts, ownership and external tools
//! - systemd unit control
//! - Atomic file writes

mod command;
pub mod fs;
mod os;
mod packages;
mod services;
mod system;

pub use command::{CommandResult, program_exists, run_checked, run_command};
pub use os::{OsDescriptor, OsDetector, OsFamily, ReleaseFileDetector, classify, parse_os_release};
pub use packages::{
    Apk, Apt, Dnf, PackageManager, PackageManagerFactory, SystemPackageManagers, install_missing,
    optional_packages, required_packages,
};
pub use services::{ServiceManager, Systemd};
pub use system::{HostSystem, SystemOps, UserSpec, parse_ss_output};
