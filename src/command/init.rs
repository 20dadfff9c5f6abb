use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use ignore::WalkBuilder;
use regex::Regex;
use semver::Version;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, info};

use crate::command::{CommandArgs, PluginCommand};
use crate::error::{Error, Result};
use crate::model::config::{TemplateInfo, TemplateKind};
use crate::model::package::{PackageIdentity, PackageVersion};
use crate::plugin::cache::PluginCache;
use crate::plugin::descriptor::PluginDescriptor;
use crate::plugin::runtime::Interpreter;

/// Programs a template may run after it is copied.
const ALLOWED_COMMANDS: &[&str] = &["npm", "cnpm"];

const DEFAULT_PROJECT_VERSION: &str = "1.0.0";

static PROJECT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(@[a-zA-Z0-9_-]+/)?[a-zA-Z]+(-[a-zA-Z][a-zA-Z0-9]*|_[a-zA-Z][a-zA-Z0-9]*|[a-zA-Z0-9])*$",
    )
    .expect("valid project name regex")
});

/// Everything `init` needs from the host.
#[derive(Clone)]
pub struct InitEnv {
    pub cache: PluginCache,
    /// Installer root for template packages, `<cliHome>/template`.
    pub template_root: PathBuf,
    pub templates: Vec<TemplateInfo>,
    /// Directory the project is created in.
    pub target_dir: PathBuf,
    pub interpreter: Interpreter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub name: String,
    pub version: Version,
    pub template: TemplateInfo,
}

/// Creates a project from a template package.
pub struct InitCommand {
    env: InitEnv,
    project_name: String,
    force: bool,
    template: Option<String>,
    version: Option<String>,
}

impl InitCommand {
    pub fn new(env: InitEnv) -> Self {
        Self {
            env,
            project_name: String::new(),
            force: false,
            template: None,
            version: None,
        }
    }

    pub fn prepare(&self) -> Result<ProjectInfo> {
        if self.env.templates.is_empty() {
            return Err(Error::plugin("no project templates are configured"));
        }

        if !is_dir_empty(&self.env.target_dir)? && !self.force {
            return Err(Error::plugin(format!(
                "{} is not empty, pass --force to initialize anyway",
                self.env.target_dir.display()
            )));
        }

        if !is_valid_project_name(&self.project_name) {
            return Err(Error::plugin(format!(
                "invalid project name: {:?}",
                self.project_name
            )));
        }

        let raw_version = self.version.as_deref().unwrap_or(DEFAULT_PROJECT_VERSION);
        let version = Version::parse(raw_version.trim_start_matches('v')).map_err(|source| {
            Error::InvalidVersion {
                version: raw_version.to_string(),
                source,
            }
        })?;

        let template = match self.template.as_deref() {
            Some(wanted) => self
                .env
                .templates
                .iter()
                .find(|t| t.package == wanted || t.name == wanted)
                .ok_or_else(|| Error::plugin(format!("unknown project template: {wanted}")))?,
            None => &self.env.templates[0],
        };

        Ok(ProjectInfo {
            name: self.project_name.clone(),
            version,
            template: template.clone(),
        })
    }

    /// Make the template package available in the template cache, updating
    /// it when an older copy is present.
    pub async fn download_template(&self, template: &TemplateInfo) -> Result<PluginDescriptor> {
        let identity = PackageIdentity::new(
            template.package.clone(),
            PackageVersion::parse(&template.version)?,
        )?;
        let mut descriptor = PluginDescriptor::cached(identity, self.env.template_root.clone());
        let cache = &self.env.cache;

        if cache.exists(&mut descriptor).await? {
            info!(template = %template.package, "updating template");
            cache.update(&mut descriptor).await?;
        } else {
            info!(template = %template.package, "downloading template");
            cache.install(&mut descriptor).await?;
        }

        if !cache.exists(&mut descriptor).await? {
            return Err(Error::plugin(format!(
                "template {} was not downloaded",
                descriptor.identity
            )));
        }
        info!(template = %descriptor.identity, "template ready");
        Ok(descriptor)
    }

    async fn install_template(
        &self,
        project: &ProjectInfo,
        descriptor: &PluginDescriptor,
    ) -> Result<()> {
        let source = descriptor.search_root().join("template");
        match project.template.kind {
            TemplateKind::Normal => {
                if !source.is_dir() {
                    return Err(Error::plugin(format!(
                        "template {} has no template directory",
                        descriptor.identity
                    )));
                }
                copy_tree(&source, &self.env.target_dir)?;
                info!(target = %self.env.target_dir.display(), "template installed");

                self.run_allowed(project.template.install_command.as_deref(), "dependency install failed")
                    .await?;
                self.run_allowed(project.template.start_command.as_deref(), "starting the project failed")
                    .await
            }
            TemplateKind::Custom => {
                let entry = self
                    .env
                    .cache
                    .entry_file(descriptor)
                    .filter(|entry| entry.is_file())
                    .ok_or_else(|| Error::EntryNotFound {
                        package: descriptor.identity.to_string(),
                        path: descriptor.search_root(),
                    })?;

                let options = json!({
                    "templateInfo": {
                        "name": project.template.name,
                        "package": project.template.package,
                        "version": project.template.version,
                    },
                    "projectInfo": {
                        "name": project.name,
                        "version": project.version.to_string(),
                    },
                    "sourcePath": source,
                    "targetPath": self.env.target_dir,
                });

                let code = self
                    .env
                    .interpreter
                    .run_args(&[entry.to_string_lossy().into_owned(), options.to_string()])
                    .await?;
                if code == 0 {
                    Ok(())
                } else {
                    Err(Error::plugin(format!("custom template exited with {code}")))
                }
            }
        }
    }

    async fn run_allowed(&self, command: Option<&str>, failure: &str) -> Result<()> {
        let Some(command) = command.filter(|c| !c.trim().is_empty()) else {
            return Ok(());
        };

        let mut parts = command.split_whitespace();
        let program = parts.next().unwrap_or_default();
        if !ALLOWED_COMMANDS.contains(&program) {
            return Err(Error::plugin(format!("{program} is not an allowed command")));
        }

        debug!(command, "running template command");
        let status = Command::new(program)
            .args(parts)
            .current_dir(&self.env.target_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| Error::SpawnFailed {
                program: program.to_string(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::plugin(failure))
        }
    }
}

#[async_trait]
impl PluginCommand for InitCommand {
    fn name(&self) -> &str {
        "init"
    }

    async fn init(&mut self, args: CommandArgs) -> Result<()> {
        self.project_name = args.positional_str(0).unwrap_or_default().to_string();
        self.force = args.flag("force");
        self.template = args.option_str("template").map(str::to_string);
        self.version = args.option_str("version").map(str::to_string);
        debug!(project_name = %self.project_name, force = self.force, "init arguments");
        Ok(())
    }

    async fn exec(&mut self) -> Result<()> {
        let project = self.prepare()?;
        debug!(?project, "project info");
        let descriptor = self.download_template(&project.template).await?;
        self.install_template(&project, &descriptor).await
    }
}

pub fn is_valid_project_name(name: &str) -> bool {
    PROJECT_NAME_RE.is_match(name)
}

/// Hidden entries and `node_modules` do not count.
fn is_dir_empty(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(true);
    }
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with('.') && name != "node_modules" {
            return Ok(false);
        }
    }
    Ok(true)
}

fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    fs::create_dir_all(target)?;
    for entry in WalkBuilder::new(source).standard_filters(false).build() {
        let entry = entry.map_err(|err| Error::plugin(format!("walking template: {err}")))?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let destination = target.join(relative);
        if entry.file_type().is_some_and(|t| t.is_dir()) {
            fs::create_dir_all(&destination)?;
        } else {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::Value;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::model::package::CacheLocation;
    use crate::plugin::installer::{InstallRequest, PackageInstaller};
    use crate::registry::RegistryClient;

    /// Materialises a template package with one file under `template/`.
    struct TemplateInstaller;

    #[async_trait]
    impl PackageInstaller for TemplateInstaller {
        async fn install(&self, request: &InstallRequest) -> Result<()> {
            for pkg in &request.pkgs {
                let version = Version::parse(&pkg.version).unwrap();
                let location = CacheLocation::new(&request.store_dir, &pkg.name, &version);
                fs::create_dir_all(location.path().join("template/src"))?;
                fs::write(location.path().join("package.json"), r#"{"main":"index.js"}"#)?;
                fs::write(location.path().join("template/src/main.js"), "// app")?;
                fs::write(location.path().join("template/.gitignore"), "node_modules")?;
            }
            Ok(())
        }
    }

    fn template(package: &str) -> TemplateInfo {
        TemplateInfo {
            name: format!("{package} template"),
            package: package.to_string(),
            version: "1.0.0".to_string(),
            kind: TemplateKind::Normal,
            install_command: None,
            start_command: None,
        }
    }

    async fn env(server: &MockServer, home: &Path, target: &Path) -> InitEnv {
        let registry = RegistryClient::with_url(&server.uri(), Duration::from_secs(5)).unwrap();
        InitEnv {
            cache: PluginCache::new(registry, Arc::new(TemplateInstaller)),
            template_root: home.join("template"),
            templates: vec![template("tpl-a"), template("tpl-b")],
            target_dir: target.to_path_buf(),
            interpreter: Interpreter::new("sh", Vec::new()),
        }
    }

    fn args(value: Value) -> CommandArgs {
        let Value::Array(mut argv) = value else {
            panic!("argv must be an array")
        };
        let Some(Value::Object(options)) = argv.pop() else {
            panic!("options missing")
        };
        CommandArgs {
            positional: argv,
            options,
        }
    }

    #[test]
    fn project_name_rules() {
        assert!(is_valid_project_name("my-app"));
        assert!(is_valid_project_name("app_v2"));
        assert!(is_valid_project_name("@scope/my-app"));
        assert!(!is_valid_project_name(""));
        assert!(!is_valid_project_name("1app"));
        assert!(!is_valid_project_name("my--app"));
        assert!(!is_valid_project_name("app-"));
    }

    #[test]
    fn hidden_entries_do_not_make_a_directory_busy() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".env"), "").unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        assert!(is_dir_empty(dir.path()).unwrap());

        fs::write(dir.path().join("README.md"), "").unwrap();
        assert!(!is_dir_empty(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn prepare_requires_force_for_busy_directories() {
        let server = MockServer::start().await;
        let home = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::write(target.path().join("existing.txt"), "").unwrap();

        let mut command = InitCommand::new(env(&server, home.path(), target.path()).await);
        command.init(args(json!(["my-app", {}]))).await.unwrap();
        assert!(command.prepare().is_err());

        command
            .init(args(json!(["my-app", { "force": true, "template": "tpl-b" }])))
            .await
            .unwrap();
        let project = command.prepare().unwrap();
        assert_eq!(project.template.package, "tpl-b");
        assert_eq!(project.version, Version::parse("1.0.0").unwrap());
    }

    #[tokio::test]
    async fn prepare_validates_name_version_and_template() {
        let server = MockServer::start().await;
        let home = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let mut command = InitCommand::new(env(&server, home.path(), target.path()).await);

        command.init(args(json!(["9lives", {}]))).await.unwrap();
        assert!(command.prepare().is_err());

        command
            .init(args(json!(["app", { "version": "one" }])))
            .await
            .unwrap();
        assert!(matches!(command.prepare(), Err(Error::InvalidVersion { .. })));

        command
            .init(args(json!(["app", { "template": "nope" }])))
            .await
            .unwrap();
        assert!(command.prepare().is_err());
    }

    #[tokio::test]
    async fn exec_downloads_and_copies_the_template() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tpl-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "versions": { "1.0.0": {}, "1.2.0": {} }
            })))
            .mount(&server)
            .await;

        let home = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let mut command = InitCommand::new(env(&server, home.path(), target.path()).await);
        command.init(args(json!(["my-app", {}]))).await.unwrap();
        command.exec().await.unwrap();

        assert!(target.path().join("src/main.js").is_file());
        assert!(target.path().join(".gitignore").is_file());
        assert!(
            home.path()
                .join("template/node_modules/_tpl-a@1.0.0@tpl-a")
                .is_dir()
        );
    }

    #[tokio::test]
    async fn existing_template_is_updated_to_latest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tpl-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "versions": { "1.0.0": {}, "1.2.0": {} }
            })))
            .mount(&server)
            .await;

        let home = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let command = InitCommand::new(env(&server, home.path(), target.path()).await);

        let first = command.download_template(&template("tpl-a")).await.unwrap();
        assert_eq!(first.identity.to_string(), "tpl-a@1.0.0");

        let second = command.download_template(&template("tpl-a")).await.unwrap();
        assert_eq!(second.identity.to_string(), "tpl-a@1.2.0");
    }

    #[tokio::test]
    async fn template_commands_are_whitelisted() {
        let server = MockServer::start().await;
        let home = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let command = InitCommand::new(env(&server, home.path(), target.path()).await);

        let err = command
            .run_allowed(Some("rm -rf /"), "failed")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not an allowed command"));
        command.run_allowed(None, "failed").await.unwrap();
    }
}
