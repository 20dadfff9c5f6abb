use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::model::config::InstallerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSpec {
    pub name: String,
    pub version: String,
}

/// What the external installer is asked to materialise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRequest {
    pub root: PathBuf,
    pub store_dir: PathBuf,
    pub registry: String,
    pub pkgs: Vec<PackageSpec>,
}

impl InstallRequest {
    fn package_label(&self) -> String {
        self.pkgs
            .iter()
            .map(|pkg| format!("{}@{}", pkg.name, pkg.version))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Places package files on disk. Rejections are surfaced verbatim.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, request: &InstallRequest) -> Result<()>;
}

/// Runs an external installer program, `npminstall` by default.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
}

impl CommandInstaller {
    pub fn new(config: &InstallerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }

    fn command_args(&self, request: &InstallRequest) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(format!("--root={}", request.root.display()));
        args.push(format!("--storeDir={}", request.store_dir.display()));
        args.push(format!("--registry={}", request.registry));
        args.extend(
            request
                .pkgs
                .iter()
                .map(|pkg| format!("{}@{}", pkg.name, pkg.version)),
        );
        args
    }
}

#[async_trait]
impl PackageInstaller for CommandInstaller {
    async fn install(&self, request: &InstallRequest) -> Result<()> {
        let args = self.command_args(request);
        tracing::debug!(program = %self.program, ?args, "running installer");

        let failed = |message: String| Error::InstallFailed {
            package: request.package_label(),
            message,
        };

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| failed(format!("cannot run {}: {err}", self.program)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(failed(if stderr.is_empty() {
            format!("{} exited with {}", self.program, output.status)
        } else {
            stderr
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> InstallRequest {
        InstallRequest {
            root: PathBuf::from("/deps"),
            store_dir: PathBuf::from("/deps/node_modules"),
            registry: "https://registry.example".into(),
            pkgs: vec![PackageSpec {
                name: "@sprout-cli/init".into(),
                version: "1.2.0".into(),
            }],
        }
    }

    #[test]
    fn builds_installer_arguments() {
        let installer = CommandInstaller::new(&InstallerConfig {
            program: "npminstall".into(),
            args: vec!["--silent".into()],
        });

        assert_eq!(
            installer.command_args(&request()),
            vec![
                "--silent",
                "--root=/deps",
                "--storeDir=/deps/node_modules",
                "--registry=https://registry.example",
                "@sprout-cli/init@1.2.0",
            ]
        );
    }

    #[test]
    fn request_serializes_like_the_installer_contract() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["storeDir"], "/deps/node_modules");
        assert_eq!(json["pkgs"][0]["version"], "1.2.0");
    }

    #[tokio::test]
    async fn missing_program_is_install_failure() {
        let installer = CommandInstaller::new(&InstallerConfig {
            program: "sprout-test-no-such-installer".into(),
            args: Vec::new(),
        });
        let err = installer.install(&request()).await.unwrap_err();
        assert!(matches!(err, Error::InstallFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_installer_reports_stderr() {
        let installer = CommandInstaller::new(&InstallerConfig {
            program: "sh".into(),
            args: vec!["-c".into(), "echo 'E404 not found' >&2; exit 1".into()],
        });
        let err = installer.install(&request()).await.unwrap_err();
        assert!(err.to_string().contains("E404 not found"));
    }
}
