use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use semver::Version;
use tracing::{debug, info, warn};

use crate::command::{Lifecycle, LifecycleEnv, LifecycleState, PluginCommand};
use crate::error::{Error, Result};
use crate::model::config::ExecMode;
use crate::model::context::{InvocationArgs, InvocationContext};
use crate::model::package::{PackageIdentity, PackageVersion, validate_package_name};
use crate::plugin::cache::PluginCache;
use crate::plugin::descriptor::PluginDescriptor;
use crate::plugin::runtime::{HostRuntime, Interpreter};

/// Builds a fresh in-process implementation of a plugin package.
pub type BuiltinFactory = Arc<dyn Fn() -> Box<dyn PluginCommand> + Send + Sync>;

/// Sub-command name to plugin package name. Entries are validated when
/// they are registered, so lookups only fail for names never registered.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    packages: BTreeMap<String, String>,
}

impl CommandTable {
    pub fn from_config(entries: &BTreeMap<String, String>) -> Result<Self> {
        let mut table = Self::default();
        for (command, package) in entries {
            table.register(command, package)?;
        }
        Ok(table)
    }

    pub fn register(&mut self, command: &str, package: &str) -> Result<()> {
        let command = command.trim();
        if command.is_empty() || command.starts_with('-') {
            return Err(Error::InvalidArgv(format!(
                "invalid command name {command:?} for {package}"
            )));
        }
        validate_package_name(package)?;
        self.packages.insert(command.to_string(), package.to_string());
        Ok(())
    }

    pub fn package_for(&self, command: &str) -> Result<&str> {
        self.packages
            .get(command)
            .map(String::as_str)
            .ok_or_else(|| Error::UnknownCommand {
                name: command.to_string(),
                available: self.names(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.packages.keys().cloned().collect()
    }
}

/// What to do when the plugin is already cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Availability {
    /// Install on absence, use whatever is cached otherwise.
    #[default]
    InstallIfMissing,
    /// Move to the newest published version first.
    Refresh,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Installer root of the plugin cache, `<cliHome>/dependencies`.
    pub dependencies_dir: PathBuf,
    /// Local plugin directory that bypasses the cache.
    pub target_path: Option<PathBuf>,
    pub availability: Availability,
    pub mode: ExecMode,
    pub minimum_runtime: Version,
    pub debug: bool,
}

pub struct Dispatcher {
    commands: CommandTable,
    cache: PluginCache,
    interpreter: Interpreter,
    settings: DispatchSettings,
    builtins: HashMap<String, BuiltinFactory>,
}

impl Dispatcher {
    pub fn new(
        commands: CommandTable,
        cache: PluginCache,
        interpreter: Interpreter,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            commands,
            cache,
            interpreter,
            settings,
            builtins: HashMap::new(),
        }
    }

    /// Register an in-process implementation for `package`.
    pub fn with_builtin(mut self, package: impl Into<String>, factory: BuiltinFactory) -> Self {
        self.builtins.insert(package.into(), factory);
        self
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Resolve `command_name` to its plugin, make sure it is available and
    /// run it. Returns the exit code the tool should exit with.
    pub async fn dispatch(&self, command_name: &str, args: InvocationArgs) -> Result<i32> {
        let package = self.commands.package_for(command_name)?;
        let mut descriptor = self.descriptor_for(package)?;
        debug!(
            command = command_name,
            package,
            target = %descriptor.target_path().display(),
            cached = descriptor.is_cached(),
            "dispatching"
        );

        if descriptor.is_cached() {
            self.ensure_available(&mut descriptor).await?;
        } else if !self.cache.exists(&mut descriptor).await? {
            return Err(Error::EntryNotFound {
                package: package.to_string(),
                path: descriptor.target_path().to_path_buf(),
            });
        }

        let entry = self
            .cache
            .entry_file(&descriptor)
            .ok_or_else(|| Error::EntryNotFound {
                package: descriptor.identity.to_string(),
                path: descriptor.search_root(),
            })?;
        debug!(entry = %entry.display(), "resolved entry file");

        let context = InvocationContext::new(command_name, args);
        self.execute(package, &entry, &context).await
    }

    fn descriptor_for(&self, package: &str) -> Result<PluginDescriptor> {
        let identity = PackageIdentity::latest(package)?;
        Ok(match self.settings.target_path.as_ref() {
            Some(path) => PluginDescriptor::local(identity, expand_tilde(path)),
            None => PluginDescriptor::cached(identity, self.settings.dependencies_dir.clone()),
        })
    }

    async fn ensure_available(&self, descriptor: &mut PluginDescriptor) -> Result<()> {
        match self.cache.exists(descriptor).await {
            Ok(false) => self.cache.install(descriptor).await,
            Ok(true) if self.settings.availability == Availability::Refresh => {
                match self.cache.update(descriptor).await {
                    Ok(identity) => {
                        info!(plugin = %identity, "plugin is up to date");
                        Ok(())
                    }
                    Err(err) if is_registry_failure(&err) => {
                        warn!(plugin = %descriptor.identity, "cannot refresh plugin: {err}");
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            Ok(true) => Ok(()),
            Err(err) if is_registry_failure(&err) => self.fall_back_to_cached(descriptor, err),
            Err(err) => Err(err),
        }
    }

    /// Pin the newest cached version when the registry cannot be asked.
    fn fall_back_to_cached(&self, descriptor: &mut PluginDescriptor, err: Error) -> Result<()> {
        let Some(version) = self.cache.cached_versions(descriptor).pop() else {
            return Err(err);
        };
        warn!(
            package = descriptor.identity.name(),
            %version,
            "{err}; using cached version"
        );
        descriptor.identity.version = PackageVersion::Exact(version);
        Ok(())
    }

    async fn execute(&self, package: &str, entry: &Path, context: &InvocationContext) -> Result<i32> {
        if self.settings.mode == ExecMode::InProcess {
            if let Some(factory) = self.builtins.get(package) {
                return Ok(self.execute_in_process(factory, context).await);
            }
            debug!(package, "no in-process implementation, spawning");
        }

        let code = self.interpreter.run(entry, context).await?;
        debug!(code, "plugin exited");
        Ok(code)
    }

    async fn execute_in_process(&self, factory: &BuiltinFactory, context: &InvocationContext) -> i32 {
        let env = LifecycleEnv {
            runtime: HostRuntime::detect(&self.interpreter).await,
            minimum: self.settings.minimum_runtime.clone(),
            debug: self.settings.debug,
        };
        let mut command = factory();

        let mut lifecycle = match Lifecycle::new(context.to_argv()) {
            Ok(lifecycle) => lifecycle,
            Err(err) => {
                warn!("{err}");
                return err.exit_code();
            }
        };

        match lifecycle.run(command.as_mut(), &env).await {
            LifecycleState::Executed => 0,
            _ => 1,
        }
    }
}

fn is_registry_failure(err: &Error) -> bool {
    matches!(err, Error::RegistryUnavailable { .. } | Error::NoVersions(_))
}

fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if !text.starts_with('~') {
        return path.to_path_buf();
    }

    if let Some(base_dirs) = directories::BaseDirs::new() {
        let home = base_dirs.home_dir().to_string_lossy();
        return PathBuf::from(text.replacen('~', &home, 1));
    }

    path.to_path_buf()
}
