//! Four-phase lifecycle every plugin command is driven through:
//! environment check, argument split, `init`, `exec`.

pub mod init;

use async_trait::async_trait;
use semver::Version;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::plugin::runtime::HostRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Constructed,
    EnvironmentChecked,
    ArgumentsSplit,
    Initialized,
    Executed,
    Failed,
}

/// Positional arguments and the detached options object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandArgs {
    pub positional: Vec<Value>,
    pub options: Map<String, Value>,
}

impl CommandArgs {
    pub fn positional_str(&self, index: usize) -> Option<&str> {
        self.positional.get(index).and_then(Value::as_str)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.options.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// A plugin command. Both hooks must be overridden; the defaults fail with
/// [`Error::NotImplemented`].
#[async_trait]
pub trait PluginCommand: Send {
    fn name(&self) -> &str;

    async fn init(&mut self, _args: CommandArgs) -> Result<()> {
        Err(Error::NotImplemented {
            command: self.name().to_string(),
            phase: "init",
        })
    }

    async fn exec(&mut self) -> Result<()> {
        Err(Error::NotImplemented {
            command: self.name().to_string(),
            phase: "exec",
        })
    }
}

/// What the environment check compares against.
#[derive(Debug, Clone)]
pub struct LifecycleEnv {
    pub runtime: HostRuntime,
    pub minimum: Version,
    /// Print the full error representation on failure.
    pub debug: bool,
}

#[derive(Debug)]
pub struct Lifecycle {
    argv: Vec<Value>,
    state: LifecycleState,
}

impl Lifecycle {
    pub fn new(argv: Vec<Value>) -> Result<Self> {
        if argv.is_empty() {
            return Err(Error::InvalidArgv("argv must not be empty".to_string()));
        }
        Ok(Self {
            argv,
            state: LifecycleState::Constructed,
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Drive `command` through every phase. A failing phase ends the run in
    /// [`LifecycleState::Failed`]; the error is logged and not returned.
    pub async fn run(
        &mut self,
        command: &mut dyn PluginCommand,
        env: &LifecycleEnv,
    ) -> LifecycleState {
        match self.drive(command, env).await {
            Ok(()) => {
                self.state = LifecycleState::Executed;
                debug!(command = command.name(), "command executed");
            }
            Err(err) => {
                error!(command = command.name(), phase = ?self.state, "{err}");
                if env.debug {
                    eprintln!("{err:?}");
                }
                self.state = LifecycleState::Failed;
            }
        }
        self.state
    }

    async fn drive(&mut self, command: &mut dyn PluginCommand, env: &LifecycleEnv) -> Result<()> {
        check_runtime(env)?;
        self.state = LifecycleState::EnvironmentChecked;

        let args = self.split_args()?;
        self.state = LifecycleState::ArgumentsSplit;

        command.init(args).await?;
        self.state = LifecycleState::Initialized;

        command.exec().await
    }

    fn split_args(&mut self) -> Result<CommandArgs> {
        let mut positional = std::mem::take(&mut self.argv);
        match positional.pop() {
            Some(Value::Object(options)) => Ok(CommandArgs {
                positional,
                options,
            }),
            _ => Err(Error::InvalidArgv(
                "last argument must be an options object".to_string(),
            )),
        }
    }
}

/// Construct a lifecycle from `argv` and run `command` through it. Only
/// construction errors are returned.
pub async fn run_lifecycle(
    command: &mut dyn PluginCommand,
    argv: Vec<Value>,
    env: &LifecycleEnv,
) -> Result<LifecycleState> {
    let mut lifecycle = Lifecycle::new(argv)?;
    Ok(lifecycle.run(command, env).await)
}

fn check_runtime(env: &LifecycleEnv) -> Result<()> {
    match &env.runtime.version {
        Some(found) if *found >= env.minimum => Ok(()),
        found => Err(Error::UnsupportedRuntime {
            program: env.runtime.program.clone(),
            found: found
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown".to_string()),
            required: env.minimum.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Recording {
        args: Option<CommandArgs>,
        executed: bool,
        fail_exec: bool,
    }

    #[async_trait]
    impl PluginCommand for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn init(&mut self, args: CommandArgs) -> Result<()> {
            self.args = Some(args);
            Ok(())
        }

        async fn exec(&mut self) -> Result<()> {
            if self.fail_exec {
                return Err(Error::plugin("boom"));
            }
            self.executed = true;
            Ok(())
        }
    }

    struct Bare;

    #[async_trait]
    impl PluginCommand for Bare {
        fn name(&self) -> &str {
            "bare"
        }
    }

    fn env(version: Option<&str>) -> LifecycleEnv {
        LifecycleEnv {
            runtime: HostRuntime {
                program: "node".into(),
                version: version.map(|v| Version::parse(v).unwrap()),
            },
            minimum: Version::parse("12.0.0").unwrap(),
            debug: false,
        }
    }

    #[tokio::test]
    async fn runs_all_phases_and_splits_options() {
        let mut command = Recording::default();
        let argv = vec![json!("my-app"), json!({ "force": true })];

        let state = run_lifecycle(&mut command, argv, &env(Some("18.0.0")))
            .await
            .unwrap();

        assert_eq!(state, LifecycleState::Executed);
        assert!(command.executed);
        let args = command.args.unwrap();
        assert_eq!(args.positional_str(0), Some("my-app"));
        assert_eq!(args.positional.len(), 1);
        assert!(args.flag("force"));
    }

    #[tokio::test]
    async fn old_runtime_fails_before_init() {
        let mut command = Recording::default();
        let state = run_lifecycle(&mut command, vec![json!({})], &env(Some("10.24.1")))
            .await
            .unwrap();

        assert_eq!(state, LifecycleState::Failed);
        assert!(command.args.is_none());
    }

    #[tokio::test]
    async fn unknown_runtime_version_is_unsupported() {
        let err = check_runtime(&env(None)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedRuntime { found, .. } if found == "unknown"));
    }

    #[tokio::test]
    async fn unimplemented_hooks_fail_the_command() {
        let mut lifecycle = Lifecycle::new(vec![json!({})]).unwrap();
        let state = lifecycle.run(&mut Bare, &env(Some("20.1.0"))).await;
        assert_eq!(state, LifecycleState::Failed);
        assert_eq!(lifecycle.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn exec_errors_are_contained() {
        let mut command = Recording {
            fail_exec: true,
            ..Recording::default()
        };
        let state = run_lifecycle(&mut command, vec![json!({})], &env(Some("12.0.0")))
            .await
            .unwrap();
        assert_eq!(state, LifecycleState::Failed);
        assert!(command.args.is_some());
    }

    #[tokio::test]
    async fn last_argument_must_be_options() {
        let mut command = Recording::default();
        let state = run_lifecycle(&mut command, vec![json!("name")], &env(Some("12.0.0")))
            .await
            .unwrap();
        assert_eq!(state, LifecycleState::Failed);
        assert!(command.args.is_none());
    }

    #[test]
    fn construction_rejects_malformed_argv() {
        assert!(matches!(Lifecycle::new(Vec::new()), Err(Error::InvalidArgv(_))));
        assert!(Lifecycle::new(vec![json!("a"), json!({})]).is_ok());
    }
}
