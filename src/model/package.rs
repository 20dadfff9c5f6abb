use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;

use crate::error::{Error, Result};

static PACKAGE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:@[a-z0-9][a-z0-9._~-]*/)?[a-z0-9][a-z0-9._~-]*$")
        .expect("valid package name regex")
});

/// Requested version of a plugin package.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PackageVersion {
    /// Resolved against the registry before any cache lookup.
    Latest,
    Exact(Version),
}

impl PackageVersion {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "latest" {
            return Ok(Self::Latest);
        }

        Version::parse(raw.trim_start_matches('v'))
            .map(Self::Exact)
            .map_err(|source| Error::InvalidVersion {
                version: raw.to_string(),
                source,
            })
    }

    pub fn exact(&self) -> Option<&Version> {
        match self {
            Self::Latest => None,
            Self::Exact(version) => Some(version),
        }
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Exact(version) => write!(f, "{version}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageIdentity {
    name: String,
    pub version: PackageVersion,
}

impl PackageIdentity {
    pub fn new(name: impl Into<String>, version: PackageVersion) -> Result<Self> {
        let name = name.into();
        validate_package_name(&name)?;
        Ok(Self { name, version })
    }

    pub fn latest(name: impl Into<String>) -> Result<Self> {
        Self::new(name, PackageVersion::Latest)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_latest(&self) -> bool {
        matches!(self.version, PackageVersion::Latest)
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

pub fn validate_package_name(name: &str) -> Result<()> {
    if PACKAGE_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidPackageName(name.to_string()))
    }
}

/// Directory a concrete `(name, version)` is materialised into:
/// `store_dir/_<sanitized>@<version>@<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheLocation(PathBuf);

impl CacheLocation {
    pub fn new(store_dir: &Path, name: &str, version: &Version) -> Self {
        Self(store_dir.join(format!("{}{version}@{name}", cache_prefix(name))))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    /// Version encoded in the first path component of a store entry, if
    /// that entry belongs to `name`. Scoped names nest one directory deeper,
    /// so the component ends in `@<scope>` rather than `@<name>`.
    pub fn parse_version(entry_name: &str, name: &str) -> Option<Version> {
        let rest = entry_name.strip_prefix(&cache_prefix(name))?;
        let (version, owner) = rest.split_once('@')?;
        let first_component = name.split('/').next().unwrap_or(name);
        if owner != first_component {
            return None;
        }
        Version::parse(version).ok()
    }
}

fn cache_prefix(name: &str) -> String {
    format!("_{}@", name.replace(['/', '\\'], "_"))
}

impl AsRef<Path> for CacheLocation {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
