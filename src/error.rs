//! Error taxonomy shared by the registry, cache, lifecycle and dispatcher.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A plugin command was constructed from malformed arguments.
    #[error("invalid argv: {0}")]
    InvalidArgv(String),

    /// The host interpreter is older than the configured floor.
    #[error("{program} {found} is not supported, version {required} or newer is required")]
    UnsupportedRuntime {
        program: String,
        found: String,
        required: String,
    },

    #[error("registry unavailable for {package}: {message}")]
    RegistryUnavailable { package: String, message: String },

    #[error("no published versions found for {0}")]
    NoVersions(String),

    #[error("cannot create cache directory {}: {source}", path.display())]
    CacheDirUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("install of {package} failed: {message}")]
    InstallFailed { package: String, message: String },

    #[error("no entry file found for {package} under {}", path.display())]
    EntryNotFound { package: String, path: PathBuf },

    /// A lifecycle hook was left at its default implementation.
    #[error("{command} does not implement {phase}")]
    NotImplemented { command: String, phase: &'static str },

    #[error("failed to start {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("plugin did not finish within {0:?}")]
    PluginTimedOut(Duration),

    #[error("unknown command: {name} (available: {})", available.join(", "))]
    UnknownCommand { name: String, available: Vec<String> },

    #[error("invalid package name: {0:?}")]
    InvalidPackageName(String),

    #[error("invalid version {version:?}: {source}")]
    InvalidVersion {
        version: String,
        #[source]
        source: semver::Error,
    },

    #[error("{}: {message}", path.display())]
    Manifest { path: PathBuf, message: String },

    /// A logical failure reported by a plugin command.
    #[error("{0}")]
    Plugin(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code used when the error aborts a dispatch.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UnknownCommand { .. } | Self::InvalidArgv(_) => 2,
            _ => 1,
        }
    }

    pub fn plugin(message: impl Into<String>) -> Self {
        Self::Plugin(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
