use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use semver::Version;
use tracing::{debug, warn};

use crate::cli::Command;
use crate::command::PluginCommand;
use crate::command::init::{InitCommand, InitEnv};
use crate::error::Error;
use crate::model::config::AppConfig;
use crate::plugin::cache::PluginCache;
use crate::plugin::dispatcher::{
    Availability, BuiltinFactory, CommandTable, DispatchSettings, Dispatcher,
};
use crate::plugin::installer::{CommandInstaller, PackageInstaller};
use crate::plugin::runtime::{ENV_CLI_HOME, ENV_DEBUG, Interpreter};
use crate::registry::RegistryClient;

/// Name the tool itself is published under, used for the update notice.
const SELF_PACKAGE: &str = env!("CARGO_PKG_NAME");

pub struct App {
    config: AppConfig,
    cache: PluginCache,
    dispatcher: Dispatcher,
}

impl App {
    pub fn new(config: AppConfig, availability: Availability) -> Result<Self> {
        let installer = Arc::new(CommandInstaller::new(&config.installer));
        Self::with_installer(config, availability, installer)
    }

    pub fn with_installer(
        config: AppConfig,
        availability: Availability,
        installer: Arc<dyn PackageInstaller>,
    ) -> Result<Self> {
        let registry = RegistryClient::new(&config.registry)?;
        let cache = PluginCache::new(registry, installer);

        let interpreter = Interpreter::from_config(&config.runtime)
            .with_env(ENV_CLI_HOME, config.cli_home_path().to_string_lossy())
            .with_env(ENV_DEBUG, if config.debug { "1" } else { "0" });

        let commands = CommandTable::from_config(&config.commands)?;
        let settings = DispatchSettings {
            dependencies_dir: config.dependencies_dir(),
            target_path: config.target_path().map(Path::to_path_buf),
            availability,
            mode: config.dispatch.mode,
            minimum_runtime: config.runtime.minimum()?,
            debug: config.debug,
        };

        let mut dispatcher = Dispatcher::new(commands, cache.clone(), interpreter.clone(), settings);
        let init_package = dispatcher
            .commands()
            .package_for("init")
            .ok()
            .map(str::to_string);
        if let Some(package) = init_package {
            let env = InitEnv {
                cache: cache.clone(),
                template_root: config.template_dir(),
                templates: config.templates.clone(),
                target_dir: std::env::current_dir().context("reading current directory")?,
                interpreter,
            };
            let factory: BuiltinFactory =
                Arc::new(move || Box::new(InitCommand::new(env.clone())) as Box<dyn PluginCommand>);
            dispatcher = dispatcher.with_builtin(package, factory);
        }

        Ok(Self {
            config,
            cache,
            dispatcher,
        })
    }

    /// Run one sub-command and return the process exit code.
    pub async fn run(&self, command: Command) -> i32 {
        debug!(version = env!("CARGO_PKG_VERSION"), "sprout starting");
        match self.try_run(command).await {
            Ok(code) => code,
            Err(err) => {
                self.report(&err);
                err.exit_code()
            }
        }
    }

    async fn try_run(&self, command: Command) -> crate::Result<i32> {
        let (name, args) = command.into_invocation()?;
        // Unknown commands fail before anything touches the network.
        self.dispatcher.commands().package_for(&name)?;

        if self.config.general.check_update {
            self.check_for_update().await;
        }
        self.dispatcher.dispatch(&name, args).await
    }

    /// Newer compatible releases are announced, never installed. Returns the
    /// announced version.
    pub async fn check_for_update(&self) -> Option<Version> {
        let current = Version::parse(env!("CARGO_PKG_VERSION")).ok()?;
        match self
            .cache
            .registry()
            .resolve_compatible(SELF_PACKAGE, &current)
            .await
        {
            Ok(Some(newest)) if newest > current => {
                warn!("{SELF_PACKAGE} {newest} is available (installed: {current})");
                Some(newest)
            }
            Ok(_) => {
                debug!("{SELF_PACKAGE} is up to date");
                None
            }
            Err(err) => {
                debug!("update check skipped: {err}");
                None
            }
        }
    }

    fn report(&self, err: &Error) {
        eprintln!("sprout: {err}");
        if self.config.debug {
            eprintln!("{err:?}");
        }
    }
}
