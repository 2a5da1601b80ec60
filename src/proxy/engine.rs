use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{RawQuery, State},
    http::{header::CONTENT_TYPE, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::{Config, ServerConfig, SizeLimits};
use crate::error::{ProxyError, Result as ProxyResult};
use crate::observability::AccessLogger;
use super::{
    classifier::{classify, ResourceKind},
    cors::add_cors_headers,
    playlist::{decode_text, playlist_content_type, read_limited, RewriteContext, HLS_CONTENT_TYPE},
    relay::{relay, DEFAULT_CONTENT_TYPE},
    upstream::{UpstreamFetcher, UpstreamResponse},
    validator::{validate, AllowlistPolicy},
};

/// Route served by the proxy, and the prefix of every rewritten playlist entry.
pub const PROXY_PATH: &str = "/proxy";

/// Stateless HLS proxy. Everything in here is read-only after construction.
pub struct HlsProxy {
    limits: SizeLimits,
    allowlist: AllowlistPolicy,
    fetcher: UpstreamFetcher,
    access_log: AccessLogger,
}

impl HlsProxy {
    pub fn new(config: &Config, access_log: AccessLogger) -> Result<Self> {
        let fetcher = UpstreamFetcher::new(&config.timeouts)?;

        Ok(Self {
            limits: config.limits,
            allowlist: config.allowlist(),
            fetcher,
            access_log,
        })
    }

    /// Bind and serve until Ctrl-C.
    pub async fn serve(self: Arc<Self>, server_config: &ServerConfig) -> Result<()> {
        let addr = format!("{}:{}", server_config.host, server_config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        info!("HLS proxy listening on {}", addr);

        axum::serve(listener, router(self))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        Ok(())
    }

    /// Validate, fetch and answer one proxy request.
    #[instrument(skip(self))]
    pub async fn handle_proxy_request(
        &self,
        request_id: &str,
        target: Option<&str>,
    ) -> ProxyResult<Response> {
        let raw = target
            .filter(|t| !t.is_empty())
            .ok_or(ProxyError::MissingUrl)?;

        let url = validate(raw, &self.allowlist).map_err(|e| {
            warn!("Rejected target {}: {}", raw, e);
            e
        })?;

        let upstream = self.fetcher.fetch(&url).await?;
        debug!("Upstream answered {} for {}", upstream.status, url);

        match classify(raw) {
            ResourceKind::Playlist => self.serve_playlist(raw, &url, upstream).await,
            ResourceKind::Passthrough => self.serve_passthrough(upstream),
        }
    }

    /// Buffer, decode and rewrite a playlist. All-or-nothing on the size ceiling.
    async fn serve_playlist(
        &self,
        raw: &str,
        url: &Url,
        upstream: UpstreamResponse,
    ) -> ProxyResult<Response> {
        let charset = upstream.charset().map(String::from);
        let UpstreamResponse {
            status,
            content_type,
            body,
        } = upstream;

        let bytes = read_limited(body, self.limits.max_playlist_bytes).await?;
        let text = decode_text(&bytes, charset.as_deref());
        let rewritten = RewriteContext::new(raw, url, PROXY_PATH).rewrite(&text);

        debug!("Rewrote playlist of {} bytes into {} bytes", bytes.len(), rewritten.len());

        let content_type = playlist_content_type(content_type.as_ref().and_then(|v| v.to_str().ok()));
        let content_type = HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(HLS_CONTENT_TYPE));

        build_response(status, content_type, Body::from(rewritten))
    }

    /// Stream any other resource, truncating at the segment ceiling.
    fn serve_passthrough(&self, upstream: UpstreamResponse) -> ProxyResult<Response> {
        let UpstreamResponse {
            status,
            content_type,
            body,
        } = upstream;

        let stream = relay(
            body,
            self.limits.chunk_size,
            self.limits.max_segment_bytes,
        );

        // Passed through byte for byte, even when it is not valid UTF-8.
        let content_type =
            content_type.unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

        build_response(status, content_type, Body::from_stream(stream))
    }
}

fn build_response(
    status: StatusCode,
    content_type: HeaderValue,
    body: Body,
) -> ProxyResult<Response> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(body)
        .map_err(|e| ProxyError::Internal(format!("Failed to build response: {}", e)))
}

/// Router exposing the single proxy endpoint. Usable by any server shell.
pub fn router(proxy: Arc<HlsProxy>) -> Router {
    Router::new()
        .route(PROXY_PATH, get(handle_request).options(handle_request))
        .fallback(handle_not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::map_response(add_cors_headers))
                .into_inner(),
        )
        .with_state(proxy)
}

async fn handle_request(
    State(proxy): State<Arc<HlsProxy>>,
    method: Method,
    RawQuery(query): RawQuery,
) -> Response {
    let start_time = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    let target = query.as_deref().and_then(target_param);

    let (response, accepted) = match proxy
        .handle_proxy_request(&request_id, target.as_deref())
        .await
    {
        Ok(response) => (response, true),
        Err(e) => {
            if e.status_code().is_server_error() {
                error!(error_code = e.error_code(), "Proxy request {} failed: {}", request_id, e);
            } else {
                debug!(error_code = e.error_code(), "Proxy request {} rejected: {}", request_id, e);
            }
            let accepted = !e.is_rejection();
            (e.into_response(), accepted)
        }
    };

    let mode = target
        .as_deref()
        .filter(|_| accepted)
        .map(|t| classify(t).as_str());

    // Streamed bodies are still in flight here, so this is time to headers.
    proxy
        .access_log
        .log_request(
            &request_id,
            method.as_str(),
            target.as_deref(),
            mode,
            response.status().as_u16(),
            start_time.elapsed(),
        )
        .await;

    response
}

async fn handle_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// First `url` value of a query string, form-decoded.
fn target_param(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "url")
        .map(|(_, value)| value.into_owned())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
