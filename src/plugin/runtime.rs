use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use semver::Version;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::model::config::RuntimeConfig;
use crate::model::context::InvocationContext;

/// Environment handed to every plugin child process.
pub const ENV_CLI_HOME: &str = "SPROUT_CLI_HOME";
pub const ENV_DEBUG: &str = "SPROUT_DEBUG";

/// The interpreter plugins are forked into: `<program> <args…> <entry> <context>`.
#[derive(Debug, Clone)]
pub struct Interpreter {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    env: Vec<(String, String)>,
}

impl Interpreter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
            env: Vec::new(),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone()).with_timeout(config.timeout())
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }

    /// Run `entry` with the serialized context and wait for the child. The
    /// returned code is the child's own exit code.
    pub async fn run(&self, entry: &Path, context: &InvocationContext) -> Result<i32> {
        let payload = context
            .to_json()
            .map_err(|err| Error::InvalidArgv(err.to_string()))?;
        self.run_args(&[entry.to_string_lossy().into_owned(), payload])
            .await
    }

    /// Spawn the interpreter with `extra` after its fixed arguments.
    pub async fn run_args(&self, extra: &[String]) -> Result<i32> {
        let mut command = self.command();
        command.args(extra);
        tracing::debug!(program = %self.program, ?extra, "spawning plugin");

        let mut child = command.spawn().map_err(|source| Error::SpawnFailed {
            program: self.program.clone(),
            source,
        })?;

        let status = match self.timeout {
            None => child.wait().await?,
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    tracing::warn!(program = %self.program, ?limit, "plugin timed out, killing it");
                    child.kill().await?;
                    return Err(Error::PluginTimedOut(limit));
                }
            },
        };

        Ok(exit_code(status))
    }

    /// Version reported by `<program> --version`, if it can be parsed.
    pub async fn version(&self) -> Option<Version> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        parse_version_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Host interpreter facts the lifecycle environment check compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRuntime {
    pub program: String,
    pub version: Option<Version>,
}

impl HostRuntime {
    pub async fn detect(interpreter: &Interpreter) -> Self {
        Self {
            program: interpreter.program().to_string(),
            version: interpreter.version().await,
        }
    }
}

/// Accepts `v18.17.0`, `18.17.0` and banners such as `node v18.17.0`.
pub fn parse_version_output(raw: &str) -> Option<Version> {
    raw.split_whitespace()
        .map(|word| word.trim_start_matches('v'))
        .find_map(|word| Version::parse(word).ok())
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}
