use semver::{Version, VersionReq};

/// Versions published for one package, as returned by a single registry query.
///
/// Ordering is full semver precedence: a pre-release sorts below its own
/// release but above every lower release, so `2.0.0-beta > 1.2.0`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionSet(Vec<Version>);

impl VersionSet {
    /// Builds the set from raw registry keys; keys that are not semver are skipped.
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut versions: Vec<Version> = keys
            .into_iter()
            .filter_map(|raw| match Version::parse(raw) {
                Ok(version) => Some(version),
                Err(err) => {
                    tracing::debug!(version = raw, "skipping unparsable version: {err}");
                    None
                }
            })
            .collect();
        versions.sort();
        versions.dedup();
        Self(versions)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn latest(&self) -> Option<&Version> {
        self.0.last()
    }

    /// Highest version satisfying `^base`.
    pub fn compatible_with(&self, base: &Version) -> Option<&Version> {
        let req = VersionReq::parse(&format!("^{base}")).ok()?;
        self.0.iter().rev().find(|version| req.matches(version))
    }
}
