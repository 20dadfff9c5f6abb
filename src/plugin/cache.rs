//! Local cache of plugin packages.
//!
//! # Layout
//!
//! ```text
//! <root>/node_modules/_<sanitized>@<version>@<name>/
//!   package.json     # manifest, `main` names the entry file
//! ```
//!
//! Installs are not locked: two processes installing the same
//! `(name, version)` at once both write the same directory and the last
//! writer wins.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use semver::Version;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::package::{CacheLocation, PackageIdentity, PackageVersion};
use crate::plugin::descriptor::PluginDescriptor;
use crate::plugin::installer::{InstallRequest, PackageInstaller, PackageSpec};
use crate::plugin::manifest;
use crate::registry::RegistryClient;

#[derive(Clone)]
pub struct PluginCache {
    registry: RegistryClient,
    installer: Arc<dyn PackageInstaller>,
}

impl PluginCache {
    pub fn new(registry: RegistryClient, installer: Arc<dyn PackageInstaller>) -> Self {
        Self {
            registry,
            installer,
        }
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    /// Whether the descriptor's package is present. For cached plugins this
    /// creates the store directory and resolves `latest` first.
    pub async fn exists(&self, descriptor: &mut PluginDescriptor) -> Result<bool> {
        if !descriptor.is_cached() {
            return Ok(descriptor.target_path().exists());
        }

        self.prepare(descriptor).await?;
        Ok(descriptor
            .cache_location()
            .is_some_and(|location| location.exists()))
    }

    pub async fn install(&self, descriptor: &mut PluginDescriptor) -> Result<()> {
        self.prepare(descriptor).await?;
        let version = self.concrete_version(descriptor)?;
        info!(package = %descriptor.identity.name(), %version, "installing plugin");
        self.run_installer(descriptor, &version).await
    }

    /// Point the descriptor at the newest published version, installing it
    /// when it is not cached yet. Returns the identity actually in use.
    pub async fn update(&self, descriptor: &mut PluginDescriptor) -> Result<PackageIdentity> {
        self.ensure_store_dir(descriptor)?;
        let latest = self
            .registry
            .resolve_latest(descriptor.identity.name())
            .await?;

        let cached = descriptor
            .store_dir()
            .map(|store| CacheLocation::new(store, descriptor.identity.name(), &latest).exists())
            .unwrap_or(false);

        if cached {
            debug!(package = %descriptor.identity.name(), %latest, "already up to date");
        } else {
            info!(package = %descriptor.identity.name(), %latest, "updating plugin");
            self.run_installer(descriptor, &latest).await?;
        }

        descriptor.identity.version = PackageVersion::Exact(latest);
        Ok(descriptor.identity.clone())
    }

    /// Absolute entry file from the nearest manifest, `/`-separated.
    pub fn entry_file(&self, descriptor: &PluginDescriptor) -> Option<PathBuf> {
        manifest::resolve_entry(&descriptor.search_root())
    }

    /// Versions of the descriptor's package already present in the store,
    /// ascending.
    pub fn cached_versions(&self, descriptor: &PluginDescriptor) -> Vec<Version> {
        let Some(store_dir) = descriptor.store_dir() else {
            return Vec::new();
        };
        let name = descriptor.identity.name();

        let Ok(entries) = fs::read_dir(store_dir) else {
            return Vec::new();
        };

        let mut versions: Vec<Version> = entries
            .flatten()
            .filter_map(|entry| {
                let entry_name = entry.file_name();
                CacheLocation::parse_version(entry_name.to_str()?, name)
            })
            .filter(|version| CacheLocation::new(store_dir, name, version).exists())
            .collect();
        versions.sort();
        versions
    }

    fn ensure_store_dir(&self, descriptor: &PluginDescriptor) -> Result<()> {
        match descriptor.store_dir() {
            Some(store_dir) if !store_dir.exists() => {
                fs::create_dir_all(store_dir).map_err(|source| Error::CacheDirUnwritable {
                    path: store_dir.to_path_buf(),
                    source,
                })
            }
            _ => Ok(()),
        }
    }

    async fn prepare(&self, descriptor: &mut PluginDescriptor) -> Result<()> {
        self.ensure_store_dir(descriptor)?;

        if descriptor.identity.is_latest() {
            let latest = self
                .registry
                .resolve_latest(descriptor.identity.name())
                .await?;
            debug!(package = %descriptor.identity.name(), %latest, "resolved latest");
            descriptor.identity.version = PackageVersion::Exact(latest);
        }
        Ok(())
    }

    fn concrete_version(&self, descriptor: &PluginDescriptor) -> Result<Version> {
        descriptor
            .identity
            .version
            .exact()
            .cloned()
            .ok_or_else(|| Error::NoVersions(descriptor.identity.name().to_string()))
    }

    async fn run_installer(&self, descriptor: &PluginDescriptor, version: &Version) -> Result<()> {
        let store_dir = descriptor
            .store_dir()
            .map(PathBuf::from)
            .unwrap_or_else(|| descriptor.target_path().join("node_modules"));

        let request = InstallRequest {
            root: descriptor.target_path().to_path_buf(),
            store_dir,
            registry: self.registry.base_url().to_string(),
            pkgs: vec![PackageSpec {
                name: descriptor.identity.name().to_string(),
                version: version.to_string(),
            }],
        };
        self.installer.install(&request).await
    }
}
