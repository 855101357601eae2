use crate::{Error, Result, config::UpstreamConfig};
use reqwest::header::{REFERER, USER_AGENT};
use tracing::debug;

/// Rewrites an upstream-hosted media URL into this service's relay scheme.
pub fn relay_url(public_origin: &str, media_url: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(media_url.as_bytes()).collect();
    format!(
        "{}/proxy/image?url={}",
        public_origin.trim_end_matches('/'),
        encoded
    )
}

/// Server-side fetcher for upstream media.
///
/// The upstream CDN rejects hot-linked requests based on the browser's
/// `Origin` and `Sec-Fetch-*` headers. A plain server-side request carrying a
/// browser user agent and the upstream's own origin as referer passes.
pub struct ImageRelay {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl ImageRelay {
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Fetches the media resource. A non-success upstream status is a typed
    /// failure carrying that status, relayed as-is rather than retried.
    pub async fn fetch(&self, media_url: &str) -> Result<reqwest::Response> {
        debug!(url = media_url, "relaying upstream media");

        let response = self
            .http
            .get(media_url)
            .header(USER_AGENT, &self.config.user_agent)
            .header(REFERER, format!("{}/", self.config.origin))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::RelayFetchFailed {
                status: response.status().as_u16(),
            });
        }

        Ok(response)
    }
}
