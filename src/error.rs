use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::proxy::cors::apply_cors_headers;

/// Request-level error types. Each one is recovered into a plain-text response.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Missing ?url= parameter")]
    MissingUrl,

    #[error("Invalid URL: Unsupported URL scheme")]
    UnsupportedScheme,

    #[error("Invalid URL: Host {host} not allowed")]
    HostNotAllowed { host: String },

    #[error("Upstream fetch error: {0}")]
    Upstream(String),

    #[error("Playlist too large")]
    PlaylistTooLarge,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MissingUrl => StatusCode::BAD_REQUEST,
            ProxyError::UnsupportedScheme => StatusCode::BAD_REQUEST,
            ProxyError::HostNotAllowed { .. } => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::PlaylistTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ProxyError::MissingUrl => "MISSING_URL",
            ProxyError::UnsupportedScheme => "UNSUPPORTED_SCHEME",
            ProxyError::HostNotAllowed { .. } => "HOST_NOT_ALLOWED",
            ProxyError::Upstream(_) => "UPSTREAM_ERROR",
            ProxyError::PlaylistTooLarge => "PLAYLIST_TOO_LARGE",
            ProxyError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// The target was refused before any upstream contact.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ProxyError::MissingUrl | ProxyError::UnsupportedScheme | ProxyError::HostNotAllowed { .. }
        )
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::Upstream(describe_reqwest_error(&err))
    }
}

/// Flatten a reqwest error and its sources into one readable cause.
pub fn describe_reqwest_error(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, self.to_string()).into_response();
        apply_cors_headers(response.headers_mut());
        response
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_messages_and_status() {
        let cases = vec![
            (ProxyError::MissingUrl, 400, "Missing ?url= parameter"),
            (ProxyError::UnsupportedScheme, 400, "Invalid URL: Unsupported URL scheme"),
            (
                ProxyError::HostNotAllowed { host: "evil.com".to_string() },
                400,
                "Invalid URL: Host evil.com not allowed",
            ),
            (
                ProxyError::Upstream("connection refused".to_string()),
                502,
                "Upstream fetch error: connection refused",
            ),
            (ProxyError::PlaylistTooLarge, 413, "Playlist too large"),
        ];

        for (err, status, text) in cases {
            assert_eq!(err.is_rejection(), status == 400);
            let response = err.into_response();
            assert_eq!(response.status().as_u16(), status);
            assert_eq!(
                response.headers()["access-control-allow-origin"],
                "*"
            );
            assert_eq!(
                response.headers()["content-type"],
                "text/plain; charset=utf-8"
            );
            assert_eq!(body_text(response).await, text);
        }
    }
}
