use std::io;

use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{REFERER, USER_AGENT};
use tracing::debug;
use url::Url;

use crate::config::TimeoutPolicy;
use crate::error::{describe_reqwest_error, ProxyError, Result as ProxyResult};
use super::user_agent::browser_user_agent;

/// Body bytes pulled lazily from the origin connection.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// A response whose headers have arrived but whose body is still on the wire.
///
/// Dropping it closes (or returns to the pool) the underlying connection.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: ByteStream,
}

impl UpstreamResponse {
    /// `charset` parameter of the declared Content-Type, if any.
    pub fn charset(&self) -> Option<&str> {
        let content_type = self.content_type.as_ref()?.to_str().ok()?;
        content_type.split(';').skip(1).find_map(|param| {
            let (name, value) = param.split_once('=')?;
            if name.trim().eq_ignore_ascii_case("charset") {
                Some(value.trim().trim_matches('"'))
            } else {
                None
            }
        })
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Issues streaming GETs to origins under the configured timeouts.
#[derive(Clone)]
pub struct UpstreamFetcher {
    http_client: reqwest::Client,
}

impl UpstreamFetcher {
    pub fn new(timeouts: &TimeoutPolicy) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect_timeout)
            .read_timeout(timeouts.read_timeout)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self { http_client })
    }

    /// Send the request and return as soon as the response head is available.
    pub async fn fetch(&self, url: &Url) -> ProxyResult<UpstreamResponse> {
        let referer = referer_for(url);
        debug!("Fetching {} (referer {})", url, referer);

        let response = self
            .http_client
            .get(url.clone())
            .header(USER_AGENT, browser_user_agent())
            .header(REFERER, referer)
            .send()
            .await?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| ProxyError::Upstream(format!("Invalid upstream status: {}", e)))?;
        let content_type = response.headers().get(CONTENT_TYPE).cloned();

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| io::Error::other(describe_reqwest_error(&e))))
            .boxed();

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

/// `scheme://host[:port]/` of the target, without path or query.
pub fn referer_for(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{}:{}/", url.scheme(), host, port),
        None => format!("{}://{}/", url.scheme(), host),
    }
}
