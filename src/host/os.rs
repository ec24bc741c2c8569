//! Operating system detection.
//!
//! Reads `/etc/os-release` and the distribution marker files to decide which
//! package manager and package names apply to this host.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{PrerequisiteError, Result};

use super::fs::rooted;

/// Linux distribution family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    /// Debian.
    Debian,
    /// Ubuntu.
    Ubuntu,
    /// Red Hat Enterprise Linux.
    Rhel,
    /// `CentOS`.
    Centos,
    /// Fedora.
    Fedora,
    /// Alpine Linux.
    Alpine,
    /// Anything else.
    Unknown,
}

impl OsFamily {
    /// Returns the family name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debian => "debian",
            Self::Ubuntu => "ubuntu",
            Self::Rhel => "rhel",
            Self::Centos => "centos",
            Self::Fedora => "fedora",
            Self::Alpine => "alpine",
            Self::Unknown => "unknown",
        }
    }

    /// Returns true if packages can be installed on this family.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Returns true for apt based families.
    #[must_use]
    pub const fn is_debian_like(self) -> bool {
        matches!(self, Self::Debian | Self::Ubuntu)
    }

    /// Returns true for dnf/yum based families.
    #[must_use]
    pub const fn is_rhel_like(self) -> bool {
        matches!(self, Self::Rhel | Self::Centos | Self::Fedora)
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detected operating system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OsDescriptor {
    /// Distribution family.
    pub family: OsFamily,
    /// Pretty name, e.g. `Debian GNU/Linux`.
    pub name: String,
    /// Version identifier.
    pub version: String,
    /// CPU architecture.
    pub arch: String,
}

impl fmt::Display for OsDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version, self.arch)
    }
}

/// Source of the host's OS description.
#[async_trait]
pub trait OsDetector: Send + Sync {
    /// Detects the running operating system.
    ///
    /// # Errors
    ///
    /// Returns `PrerequisiteError::DetectionFailed` if nothing identifies the OS.
    async fn detect(&self) -> Result<OsDescriptor>;
}

/// Detector reading release files below a host root.
#[derive(Debug, Clone)]
pub struct ReleaseFileDetector {
    root: PathBuf,
}

impl ReleaseFileDetector {
    /// Creates a detector for the given host root (`/` in production).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read(&self, path: &str) -> Option<String> {
        tokio::fs::read_to_string(rooted(&self.root, path)).await.ok()
    }
}

#[async_trait]
impl OsDetector for ReleaseFileDetector {
    async fn detect(&self) -> Result<OsDescriptor> {
        let arch = std::env::consts::ARCH.to_string();

        if let Some(content) = self.read("/etc/os-release").await {
            let descriptor = parse_os_release(&content, &arch);
            debug!("Detected OS from os-release: {}", descriptor);
            return Ok(descriptor);
        }

        let fallbacks = [
            ("/etc/debian_version", OsFamily::Debian, "Debian"),
            ("/etc/redhat-release", OsFamily::Rhel, "Red Hat"),
            ("/etc/alpine-release", OsFamily::Alpine, "Alpine Linux"),
        ];
        for (path, family, name) in fallbacks {
            if let Some(content) = self.read(path).await {
                let version = content.lines().next().unwrap_or_default().trim().to_string();
                return Ok(OsDescriptor {
                    family,
                    name: name.to_string(),
                    version,
                    arch,
                });
            }
        }

        Err(PrerequisiteError::DetectionFailed {
            message: String::from("no /etc/os-release or distribution release file found"),
        }
        .into())
    }
}

/// Parses the `KEY=value` lines of an os-release file.
#[must_use]
pub fn parse_os_release(content: &str, arch: &str) -> OsDescriptor {
    let fields: HashMap<&str, String> = content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim().trim_matches('"').trim_matches('\'').to_string()))
        .collect();

    let get = |key: &str| fields.get(key).cloned().unwrap_or_default();
    let name = fields
        .get("NAME")
        .or_else(|| fields.get("PRETTY_NAME"))
        .cloned()
        .unwrap_or_else(|| get("ID"));

    OsDescriptor {
        family: classify(&get("ID"), &get("ID_LIKE")),
        name,
        version: get("VERSION_ID"),
        arch: arch.to_string(),
    }
}

/// Maps os-release `ID`/`ID_LIKE` values onto a family.
#[must_use]
pub fn classify(id: &str, id_like: &str) -> OsFamily {
    match id.to_ascii_lowercase().as_str() {
        "debian" => OsFamily::Debian,
        "ubuntu" => OsFamily::Ubuntu,
        "rhel" | "redhat" => OsFamily::Rhel,
        "centos" => OsFamily::Centos,
        "fedora" => OsFamily::Fedora,
        "alpine" => OsFamily::Alpine,
        _ => {
            let like = id_like.to_ascii_lowercase();
            let words: Vec<&str> = like.split_whitespace().collect();
            if words.contains(&"debian") || words.contains(&"ubuntu") {
                OsFamily::Debian
            } else if words.iter().any(|w| matches!(*w, "rhel" | "fedora" | "centos")) {
                OsFamily::Rhel
            } else {
                OsFamily::Unknown
            }
        }
    }
}
