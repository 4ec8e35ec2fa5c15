//! Upstream feed access.

use std::time::Duration;

use semver::Version;
use tracing::debug;
use url::Url;
use wharf_core::{
    error::FeedError,
    package::{PackageId, PackageManifest},
    FeedResult,
};

use crate::http_client::ClientConfig;

/// A remote feed that can be asked for single package manifests.
///
/// `Ok(None)` means the upstream definitively does not have the package;
/// [`FeedError::UpstreamUnavailable`] covers timeouts, transport failures
/// and malformed responses. Listing operations are deliberately absent:
/// only single-package lookup ever goes upstream.
pub trait RemoteFeed: Send + Sync {
    fn fetch(&self, id: &PackageId, version: &Version) -> FeedResult<Option<PackageManifest>>;
}

/// HTTP implementation over `GET <base>/packages/<id>/<version>`.
pub struct HttpRemoteFeed {
    agent: ureq::Agent,
    base: Url,
}

impl HttpRemoteFeed {
    /// Builds a client for the configured upstream, with every request
    /// bounded by the given timeout.
    pub fn new(base_url: &str, timeout: Duration) -> FeedResult<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|err| FeedError::UpstreamUnavailable(format!("invalid mirror URL: {err}")))?;
        // Url::join drops the last path segment without this.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let agent = ClientConfig {
            timeout: Some(timeout),
            ..ClientConfig::default()
        }
        .build();
        Ok(Self { agent, base })
    }

    fn package_url(&self, id: &PackageId, version: &Version) -> FeedResult<Url> {
        self.base
            .join(&format!("packages/{}/{}", id.normalized(), version))
            .map_err(|err| FeedError::UpstreamUnavailable(err.to_string()))
    }
}

impl RemoteFeed for HttpRemoteFeed {
    fn fetch(&self, id: &PackageId, version: &Version) -> FeedResult<Option<PackageManifest>> {
        let url = self.package_url(id, version)?;
        debug!("querying upstream feed for {id}@{version}");

        let resp = self
            .agent
            .get(url.as_str())
            .call()
            .map_err(|err| FeedError::UpstreamUnavailable(err.to_string()))?;

        let status = resp.status();
        if status == ureq::http::StatusCode::NOT_FOUND
            || status == ureq::http::StatusCode::GONE
        {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FeedError::UpstreamUnavailable(format!("{url} [{status}]")));
        }

        let manifest: PackageManifest = resp
            .into_body()
            .read_json()
            .map_err(|err| FeedError::UpstreamUnavailable(format!("malformed manifest: {err}")))?;

        // A manifest that answers for a different package is a protocol
        // violation, not a miss.
        if manifest.id != *id || manifest.version != *version {
            return Err(FeedError::UpstreamUnavailable(format!(
                "upstream answered {} for {id}@{version}",
                manifest.key()
            )));
        }
        Ok(Some(manifest))
    }
}
