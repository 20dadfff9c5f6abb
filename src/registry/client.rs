//! HTTP client for the package registry.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use semver::Version;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::config::RegistryConfig;
use crate::registry::versions::VersionSet;

const USER_AGENT_VALUE: &str = concat!("sprout/", env!("CARGO_PKG_VERSION"));

/// Package document served at `<registry>/<name>`. Only the version keys
/// are read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageDocument {
    #[serde(default)]
    pub versions: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        Self::with_url(config.effective_url(), Duration::from_secs(config.timeout_secs))
    }

    pub fn with_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|err| Error::RegistryUnavailable {
                package: String::new(),
                message: format!("failed to create HTTP client: {err}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the package document. Any non-200 answer is `Ok(None)`; only
    /// transport and decoding failures are errors.
    pub async fn package_document(
        &self,
        name: &str,
        registry: Option<&str>,
    ) -> Result<Option<PackageDocument>> {
        let base = registry
            .map(|url| url.trim_end_matches('/'))
            .unwrap_or(&self.base_url);
        let url = format!("{base}/{name}");
        debug!(url = %url, "fetching package document");

        let unavailable = |message: String| Error::RegistryUnavailable {
            package: name.to_string(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| unavailable(err.to_string()))?;

        if response.status() != StatusCode::OK {
            debug!(url = %url, status = %response.status(), "registry returned no document");
            return Ok(None);
        }

        response
            .json::<PackageDocument>()
            .await
            .map(Some)
            .map_err(|err| unavailable(format!("invalid package document: {err}")))
    }

    pub async fn list_versions(&self, name: &str, registry: Option<&str>) -> Result<VersionSet> {
        let document = self
            .package_document(name, registry)
            .await?
            .ok_or_else(|| Error::RegistryUnavailable {
                package: name.to_string(),
                message: "package not found in registry".to_string(),
            })?;

        let versions = VersionSet::from_keys(document.versions.keys().map(String::as_str));
        if versions.is_empty() {
            warn!(package = name, "registry lists no valid versions");
        } else {
            debug!(package = name, count = versions.len(), "listed versions");
        }
        Ok(versions)
    }

    pub async fn resolve_latest(&self, name: &str) -> Result<Version> {
        self.list_versions(name, None)
            .await?
            .latest()
            .cloned()
            .ok_or_else(|| Error::NoVersions(name.to_string()))
    }

    /// Highest published version within the caret range of `base`, used to
    /// avoid crossing a breaking version boundary.
    pub async fn resolve_compatible(&self, name: &str, base: &Version) -> Result<Option<Version>> {
        let versions = self.list_versions(name, None).await?;
        Ok(versions.compatible_with(base).cloned())
    }
}
