#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use semver::Version;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sprout::model::package::CacheLocation;
use sprout::plugin::installer::{InstallRequest, PackageInstaller};

/// Installs a plugin whose entry is a shell script running `body`.
pub struct ScriptInstaller {
    body: String,
    requests: Mutex<Vec<InstallRequest>>,
}

impl ScriptInstaller {
    pub fn new(body: &str) -> Self {
        Self {
            body: body.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn installed_versions(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .flat_map(|request| request.pkgs.iter().map(|pkg| pkg.version.clone()))
            .collect()
    }
}

#[async_trait]
impl PackageInstaller for ScriptInstaller {
    async fn install(&self, request: &InstallRequest) -> sprout::Result<()> {
        for pkg in &request.pkgs {
            let version = Version::parse(&pkg.version).unwrap();
            let location = CacheLocation::new(&request.store_dir, &pkg.name, &version);
            write_script_plugin(location.path(), &self.body);
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Lay out a plugin package at `dir` with `bin/entry.sh` as its entry.
pub fn write_script_plugin(dir: &Path, body: &str) {
    fs::create_dir_all(dir.join("bin")).unwrap();
    fs::write(
        dir.join("package.json"),
        json!({ "name": "plugin", "version": "1.0.0", "main": "bin/entry.sh" }).to_string(),
    )
    .unwrap();
    fs::write(dir.join("bin/entry.sh"), body).unwrap();
}

/// Registry answering for `package` with the given published versions.
pub async fn registry_with(package: &str, versions: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    let versions: serde_json::Map<String, serde_json::Value> = versions
        .iter()
        .map(|v| (v.to_string(), json!({})))
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("/{package}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "versions": versions })))
        .mount(&server)
        .await;
    server
}
