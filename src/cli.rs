use std::path::PathBuf;

use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser, Subcommand};

use crate::error::{Error, Result};
use crate::model::config::Overrides;
use crate::model::context::{InvocationArgs, Scalar};
use crate::plugin::dispatcher::Availability;

#[derive(Debug, Parser)]
#[command(name = "sprout", version, about, propagate_version = true)]
pub struct Cli {
    /// Verbose logging and full error output
    #[arg(
        short,
        long,
        global = true,
        env = "SPROUT_DEBUG",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    pub debug: bool,

    /// Run plugins from this local directory instead of the cache
    #[arg(short = 't', long, global = true, env = "SPROUT_TARGET_PATH")]
    pub target_path: Option<PathBuf>,

    /// Update the plugin to its newest published version before running it
    #[arg(long, global = true)]
    pub refresh: bool,

    /// Home directory (defaults to the current user's)
    #[arg(long, global = true, env = "SPROUT_HOME")]
    pub home: Option<PathBuf>,

    /// Directory under the home directory holding caches and config
    #[arg(long, global = true, env = "SPROUT_CLI_HOME")]
    pub cli_home: Option<String>,

    /// Configuration file layered over the defaults
    #[arg(long, global = true, env = "SPROUT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a new project from a template
    Init {
        project_name: Option<String>,

        /// Initialize even if the directory is not empty
        #[arg(short, long)]
        force: bool,

        /// Template package or display name
        #[arg(long)]
        template: Option<String>,

        /// Initial project version
        #[arg(id = "project_version", long = "project-version")]
        version: Option<String>,
    },

    /// Any other plugin command registered in the configuration
    #[command(external_subcommand)]
    External(Vec<String>),
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            home: self.home.clone(),
            cli_home: self.cli_home.clone(),
            config_file: self.config.clone(),
            target_path: self.target_path.clone(),
            debug: self.debug,
        }
    }

    pub fn availability(&self) -> Availability {
        if self.refresh {
            Availability::Refresh
        } else {
            Availability::InstallIfMissing
        }
    }
}

impl Command {
    /// Command name and whitelisted arguments handed to the dispatcher.
    pub fn into_invocation(self) -> Result<(String, InvocationArgs)> {
        match self {
            Self::Init {
                project_name,
                force,
                template,
                version,
            } => {
                let mut args = InvocationArgs::default().option("force", force);
                if let Some(name) = project_name {
                    args = args.arg(name);
                }
                if let Some(template) = template {
                    args = args.option("template", template);
                }
                if let Some(version) = version {
                    args = args.option("version", version);
                }
                Ok(("init".to_string(), args))
            }
            Self::External(mut raw) => {
                let name = if raw.is_empty() {
                    String::new()
                } else {
                    raw.remove(0)
                };
                Ok((name, parse_external_args(raw)?))
            }
        }
    }
}

/// `--key=value` becomes a string option, `--no-key` false, any other
/// flag true. Numbers such as `-5` and everything after `--` are
/// positional.
fn parse_external_args(raw: Vec<String>) -> Result<InvocationArgs> {
    let mut args = InvocationArgs::default();
    let mut tokens = raw.into_iter();
    while let Some(token) = tokens.next() {
        if token == "--" {
            for rest in tokens.by_ref() {
                args = args.arg(rest);
            }
            break;
        }

        let flag = token
            .strip_prefix("--")
            .or_else(|| token.strip_prefix('-'))
            .filter(|_| token.len() > 1 && token.parse::<f64>().is_err());
        let Some(flag) = flag else {
            args = args.arg(token);
            continue;
        };

        let (key, value) = match flag.split_once('=') {
            Some((key, value)) => (key, Scalar::from(value)),
            None => match flag.strip_prefix("no-") {
                Some(key) => (key, Scalar::Bool(false)),
                None => (flag, Scalar::Bool(true)),
            },
        };
        if key.is_empty() {
            return Err(Error::InvalidArgv(format!("option {token:?} has no name")));
        }
        args = args.option(key, value);
    }
    Ok(args)
}
