//! npm registry resolver.

use super::MetadataResolver;
use crate::error::{ErrorKind, Result};
use crate::feed::couch::classify;
use crate::models::PackageMetadata;
use async_trait::async_trait;
use exn::ResultExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;

/// Abbreviated packuments carry everything we need at a fraction of the size.
const ABBREVIATED: &str = "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct Packument {
    #[serde(rename = "dist-tags", default)]
    dist_tags: HashMap<String, String>,
    #[serde(default)]
    versions: HashMap<String, VersionDoc>,
}

#[derive(Debug, Deserialize)]
struct VersionDoc {
    dist: Option<Dist>,
    /// Usually a message string; some old packuments use booleans.
    deprecated: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Dist {
    tarball: Option<String>,
}

fn is_deprecated(flag: Option<&serde_json::Value>) -> bool {
    match flag {
        Some(serde_json::Value::String(message)) => !message.is_empty(),
        Some(serde_json::Value::Bool(flag)) => *flag,
        _ => false,
    }
}

/// Interpret a packument body.
///
/// The package counts as deprecated when there is no `latest` dist-tag (it
/// was unpublished), when the tagged version is missing or has no tarball, or
/// when that version carries a deprecation message.
pub(crate) fn parse_packument(name: &str, body: &[u8]) -> Result<PackageMetadata> {
    let packument: Packument = serde_json::from_slice(body).or_raise(|| ErrorKind::Decode)?;
    let Some(latest) = packument.dist_tags.get("latest") else {
        return Ok(PackageMetadata::deprecated(name));
    };
    let doc = packument.versions.get(latest);
    let tarball = doc.and_then(|d| d.dist.as_ref()).and_then(|d| d.tarball.clone());
    let deprecated = tarball.is_none() || doc.is_some_and(|d| is_deprecated(d.deprecated.as_ref()));
    Ok(PackageMetadata {
        name: name.to_string(),
        latest_version: Some(latest.clone()),
        tarball,
        deprecated,
    })
}

/// Resolves packages against an npm-compatible registry.
///
/// # Examples
///
/// ```no_run
/// use regsync_registry::resolve::{MetadataResolver, RegistryResolver};
///
/// # async fn example() -> regsync_registry::error::Result<()> {
/// let resolver = RegistryResolver::new("https://registry.npmjs.org/")?;
/// let metadata = resolver.resolve("left-pad").await?;
/// println!("{:?}", metadata.latest_version);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RegistryResolver {
    base: Url,
    client: Client,
    timeout: Duration,
}
impl RegistryResolver {
    pub fn new(registry: &str) -> Result<Self> {
        let base = match registry.ends_with('/') {
            true => registry.to_string(),
            false => format!("{registry}/"),
        };
        let base = Url::parse(&base).or_raise(|| ErrorKind::InvalidUrl(registry.to_string()))?;
        if base.cannot_be_a_base() {
            exn::bail!(ErrorKind::InvalidUrl(registry.to_string()));
        }
        Ok(Self { base, client: Client::new(), timeout: DEFAULT_TIMEOUT })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Scoped packages keep their `@` but have the slash escaped, which is
    /// how the registry expects them.
    fn packument_url(&self, name: &str) -> Result<Url> {
        self.base.join(&name.replace('/', "%2f")).or_raise(|| ErrorKind::InvalidUrl(name.to_string()))
    }
}

#[async_trait]
impl MetadataResolver for RegistryResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, name: &str) -> Result<PackageMetadata> {
        let url = self.packument_url(name)?;
        let response =
            classify(self.client.get(url).header(ACCEPT, ABBREVIATED).timeout(self.timeout).send().await)?;
        match response.status() {
            // Removed from the registry altogether.
            StatusCode::NOT_FOUND => return Ok(PackageMetadata::deprecated(name)),
            status if !status.is_success() => exn::bail!(ErrorKind::Status(status.as_u16())),
            _ => {},
        }
        let body = classify(response.bytes().await)?;
        parse_packument(name, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FOO: &str = r#"{
        "name": "foo",
        "dist-tags": {"latest": "1.2.0", "next": "2.0.0-rc.1"},
        "versions": {
            "1.1.0": {"dist": {"tarball": "https://registry.npmjs.org/foo/-/foo-1.1.0.tgz"}},
            "1.2.0": {"dist": {"tarball": "https://registry.npmjs.org/foo/-/foo-1.2.0.tgz"}}
        }
    }"#;

    #[test]
    fn test_published() {
        let metadata = parse_packument("foo", FOO.as_bytes()).unwrap();
        assert_eq!(
            metadata,
            PackageMetadata::published("foo", "1.2.0", "https://registry.npmjs.org/foo/-/foo-1.2.0.tgz")
        );
    }

    #[rstest]
    // Unpublished packages lose their dist-tags.
    #[case(r#"{"name": "bar", "time": {"unpublished": {"time": "2016-03-23T00:00:00Z"}}}"#)]
    #[case(r#"{"name": "bar", "dist-tags": {}, "versions": {}}"#)]
    // Latest points at a version that isn't there.
    #[case(r#"{"name": "bar", "dist-tags": {"latest": "1.0.0"}, "versions": {}}"#)]
    // Latest has no tarball.
    #[case(r#"{"name": "bar", "dist-tags": {"latest": "1.0.0"}, "versions": {"1.0.0": {}}}"#)]
    #[case(
        r#"{"name": "bar", "dist-tags": {"latest": "1.0.0"}, "versions": {"1.0.0": {"dist": {"tarball": "t"}, "deprecated": "use baz"}}}"#
    )]
    #[case(
        r#"{"name": "bar", "dist-tags": {"latest": "1.0.0"}, "versions": {"1.0.0": {"dist": {"tarball": "t"}, "deprecated": true}}}"#
    )]
    fn test_deprecated(#[case] body: &str) {
        assert!(parse_packument("bar", body.as_bytes()).unwrap().deprecated);
    }

    #[rstest]
    #[case(r#""deprecated": """#)]
    #[case(r#""deprecated": false"#)]
    fn test_not_deprecated(#[case] flag: &str) {
        let body = format!(
            r#"{{"dist-tags": {{"latest": "1.0.0"}}, "versions": {{"1.0.0": {{"dist": {{"tarball": "t"}}, {flag}}}}}}}"#
        );
        assert!(!parse_packument("baz", body.as_bytes()).unwrap().deprecated);
    }

    #[test]
    fn test_malformed() {
        let err = parse_packument("foo", b"<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Decode));
    }

    #[rstest]
    #[case("https://registry.npmjs.org", "foo", "https://registry.npmjs.org/foo")]
    #[case("https://registry.npmjs.org/", "@types/node", "https://registry.npmjs.org/@types%2fnode")]
    #[case("https://npm.internal/mirror", "foo", "https://npm.internal/mirror/foo")]
    fn test_packument_url(#[case] registry: &str, #[case] name: &str, #[case] expected: &str) {
        let resolver = RegistryResolver::new(registry).unwrap();
        assert_eq!(resolver.packument_url(name).unwrap().as_str(), expected);
    }
}
