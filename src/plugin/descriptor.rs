use std::path::{Path, PathBuf};

use crate::model::package::{CacheLocation, PackageIdentity};

/// One plugin package as seen by a single dispatch.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub identity: PackageIdentity,
    /// Store directory for cached plugins; `None` for a local override.
    store_dir: Option<PathBuf>,
    /// Installer root for cached plugins, or the plugin directory itself.
    target_path: PathBuf,
}

impl PluginDescriptor {
    /// A plugin materialised under `root/node_modules`.
    pub fn cached(identity: PackageIdentity, root: PathBuf) -> Self {
        Self {
            identity,
            store_dir: Some(root.join("node_modules")),
            target_path: root,
        }
    }

    /// A plugin read straight from `path`, bypassing the cache.
    pub fn local(identity: PackageIdentity, path: PathBuf) -> Self {
        Self {
            identity,
            store_dir: None,
            target_path: path,
        }
    }

    pub fn is_cached(&self) -> bool {
        self.store_dir.is_some()
    }

    pub fn store_dir(&self) -> Option<&Path> {
        self.store_dir.as_deref()
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Known only once the version has been resolved.
    pub fn cache_location(&self) -> Option<CacheLocation> {
        let store_dir = self.store_dir.as_deref()?;
        let version = self.identity.version.exact()?;
        Some(CacheLocation::new(store_dir, self.identity.name(), version))
    }

    /// Directory the entry file search starts from.
    pub fn search_root(&self) -> PathBuf {
        match self.cache_location() {
            Some(location) => location.path().to_path_buf(),
            None => self.target_path.clone(),
        }
    }
}
