use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use semver::Version;
use serde::Deserialize;

const DEFAULTS: &str = include_str!("../../config/default.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub registry: RegistryConfig,
    pub runtime: RuntimeConfig,
    pub installer: InstallerConfig,
    pub dispatch: DispatchConfig,
    /// Sub-command name to plugin package name.
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
    #[serde(default)]
    pub templates: Vec<TemplateInfo>,

    /// Resolved at load time, never read from files.
    #[serde(skip)]
    pub home_path: PathBuf,
    #[serde(skip)]
    pub target_path: Option<PathBuf>,
    #[serde(skip)]
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Directory under the home directory that holds caches and config.
    pub cli_home: String,
    pub check_update: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub url: String,
    pub original_url: String,
    pub use_original: bool,
    pub timeout_secs: u64,
}

impl RegistryConfig {
    pub fn effective_url(&self) -> &str {
        if self.use_original {
            &self.original_url
        } else {
            &self.url
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Interpreter used to run plugin entry files.
    pub program: String,
    /// Fixed bootstrap arguments placed before the entry path and context.
    #[serde(default)]
    pub args: Vec<String>,
    pub minimum_version: String,
    /// Zero disables the plugin timeout.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl RuntimeConfig {
    pub fn minimum(&self) -> Result<Version> {
        Version::parse(self.minimum_version.trim_start_matches('v'))
            .with_context(|| format!("runtime.minimum_version {:?}", self.minimum_version))
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallerConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecMode {
    /// Fork the interpreter on the plugin's entry file.
    #[default]
    Spawn,
    /// Drive a bundled Rust implementation of the plugin, if one exists.
    InProcess,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub mode: ExecMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    #[default]
    Normal,
    Custom,
}

/// Project template offered by the `init` plugin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TemplateInfo {
    pub name: String,
    pub package: String,
    pub version: String,
    #[serde(default)]
    pub kind: TemplateKind,
    #[serde(default)]
    pub install_command: Option<String>,
    #[serde(default)]
    pub start_command: Option<String>,
}

/// Values that come from the command line or the environment and win over
/// every file layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub home: Option<PathBuf>,
    pub cli_home: Option<String>,
    pub config_file: Option<PathBuf>,
    pub target_path: Option<PathBuf>,
    pub debug: bool,
}

impl AppConfig {
    /// Load configuration with layering: defaults → user config → overrides.
    pub fn load(overrides: &Overrides) -> Result<Self> {
        let home = match overrides.home.clone() {
            Some(home) => home,
            None => dirs_home().ok_or_else(|| anyhow!("cannot determine home directory"))?,
        };
        if !home.is_dir() {
            bail!("home directory {} does not exist", home.display());
        }

        let defaults: AppConfig = toml::from_str(DEFAULTS)?;
        let cli_home = overrides
            .cli_home
            .clone()
            .unwrap_or(defaults.general.cli_home);

        let config_path = overrides
            .config_file
            .clone()
            .unwrap_or_else(|| home.join(&cli_home).join("config.toml"));

        let user = if config_path.exists() {
            Some(
                fs::read_to_string(&config_path)
                    .with_context(|| format!("reading {}", config_path.display()))?,
            )
        } else if overrides.config_file.is_some() {
            bail!("config file {} does not exist", config_path.display());
        } else {
            None
        };

        let mut config = Self::from_layers(user.as_deref())
            .with_context(|| format!("parsing {}", config_path.display()))?;
        config.home_path = home;
        if let Some(cli_home) = overrides.cli_home.clone() {
            config.general.cli_home = cli_home;
        }
        config.target_path = overrides
            .target_path
            .clone()
            .filter(|path| !path.as_os_str().is_empty());
        config.debug = overrides.debug;

        tracing::debug!(
            config = %config_path.display(),
            user_layer = user.is_some(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Merge an optional user layer over the embedded defaults, table by table.
    pub fn from_layers(user: Option<&str>) -> Result<Self> {
        let mut merged: toml::Value = toml::from_str(DEFAULTS)?;
        if let Some(user) = user {
            let overlay: toml::Value = toml::from_str(user)?;
            merge(&mut merged, overlay);
        }
        Ok(merged.try_into()?)
    }

    pub fn cli_home_path(&self) -> PathBuf {
        self.home_path.join(&self.general.cli_home)
    }

    /// Root of the plugin cache: `<cliHome>/dependencies`.
    pub fn dependencies_dir(&self) -> PathBuf {
        self.cli_home_path().join("dependencies")
    }

    pub fn template_dir(&self) -> PathBuf {
        self.cli_home_path().join("template")
    }

    pub fn target_path(&self) -> Option<&Path> {
        self.target_path.as_deref()
    }
}

fn merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = AppConfig::from_layers(None).unwrap();
        assert_eq!(config.general.cli_home, ".sprout-cli");
        assert_eq!(config.dispatch.mode, ExecMode::Spawn);
        assert_eq!(
            config.commands.get("init").map(String::as_str),
            Some("@sprout-cli/init")
        );
        assert_eq!(config.templates.len(), 2);
        assert_eq!(config.templates[1].kind, TemplateKind::Custom);
        assert_eq!(config.runtime.timeout(), None);
    }

    #[test]
    fn user_layer_merges_tables_and_replaces_arrays() {
        let config = AppConfig::from_layers(Some(
            r#"
            [registry]
            use_original = true

            [commands]
            lint = "@sprout-cli/lint"

            [[templates]]
            name = "only"
            package = "only-template"
            version = "2.0.0"
            "#,
        ))
        .unwrap();

        assert_eq!(config.registry.effective_url(), "https://registry.npmjs.org");
        assert_eq!(config.registry.timeout_secs, 10);
        assert_eq!(config.commands.len(), 2);
        assert_eq!(config.templates.len(), 1);
        assert_eq!(config.templates[0].kind, TemplateKind::Normal);
    }

    #[test]
    fn load_applies_overrides() {
        let home = tempfile::tempdir().unwrap();
        let overrides = Overrides {
            home: Some(home.path().to_path_buf()),
            cli_home: Some(".custom".into()),
            target_path: Some(PathBuf::new()),
            debug: true,
            ..Overrides::default()
        };

        let config = AppConfig::load(&overrides).unwrap();
        assert_eq!(config.cli_home_path(), home.path().join(".custom"));
        assert_eq!(
            config.dependencies_dir(),
            home.path().join(".custom").join("dependencies")
        );
        assert!(config.target_path().is_none());
        assert!(config.debug);
    }

    #[test]
    fn load_reads_user_config_from_cli_home() {
        let home = tempfile::tempdir().unwrap();
        let cli_home = home.path().join(".sprout-cli");
        fs::create_dir_all(&cli_home).unwrap();
        fs::write(
            cli_home.join("config.toml"),
            "[runtime]\ntimeout_secs = 30\n",
        )
        .unwrap();

        let config = AppConfig::load(&Overrides {
            home: Some(home.path().to_path_buf()),
            ..Overrides::default()
        })
        .unwrap();
        assert_eq!(config.runtime.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn missing_home_is_an_error() {
        let home = tempfile::tempdir().unwrap();
        let err = AppConfig::load(&Overrides {
            home: Some(home.path().join("absent")),
            ..Overrides::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
