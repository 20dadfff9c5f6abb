use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const MANIFEST_FILE: &str = "package.json";

/// The fields of a plugin's `package.json` the cache cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub main: Option<String>,
}

impl PackageManifest {
    pub fn read(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let raw = fs::read_to_string(&manifest_path).map_err(|err| Error::Manifest {
            path: manifest_path.clone(),
            message: err.to_string(),
        })?;

        serde_json::from_str(&raw).map_err(|err| Error::Manifest {
            path: manifest_path,
            message: err.to_string(),
        })
    }
}

/// Nearest directory at or above `start` that contains a manifest.
pub fn find_package_dir(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(MANIFEST_FILE).is_file())
        .map(Path::to_path_buf)
}

/// Resolve the entry file declared by the nearest manifest above `start`.
///
/// The result is absolute, lexically normalised and uses `/` separators on
/// every host. `None` means there is no manifest or it has no `main`.
pub fn resolve_entry(start: &Path) -> Option<PathBuf> {
    let dir = find_package_dir(start)?;
    let manifest = match PackageManifest::read(&dir) {
        Ok(manifest) => manifest,
        Err(err) => {
            tracing::warn!("{err}");
            return None;
        }
    };
    let main = manifest.main.filter(|main| !main.trim().is_empty())?;

    let dir = if dir.is_absolute() {
        dir
    } else {
        std::env::current_dir().ok()?.join(dir)
    };
    Some(PathBuf::from(to_forward_slashes(&normalize(&dir.join(main)))))
}

/// Drop `.` components and fold `..` into their parent without touching the
/// filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

pub fn to_forward_slashes(path: &Path) -> String {
    let text = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        text.into_owned()
    } else {
        text.replace('\\', "/")
    }
}
