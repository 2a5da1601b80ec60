//! HLS playlist buffering and URI rewriting.
//!
//! Playlists are small text documents, so unlike segments they are read fully
//! (up to a ceiling) before anything is sent. Every media reference that is not
//! already absolute is resolved against the playlist's directory and pointed back
//! at the proxy endpoint, keeping the player on a single origin.

use std::borrow::Cow;

use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};
use url::Url;

use crate::error::ProxyError;

pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Read the whole body, failing once more than `max_bytes` have arrived.
///
/// Nothing read so far is returned on failure.
pub async fn read_limited<S>(mut body: S, max_bytes: u64) -> Result<Bytes, ProxyError>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let mut buffer = BytesMut::new();
    let mut read: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| ProxyError::Upstream(e.to_string()))?;
        if chunk.is_empty() {
            continue;
        }

        read += chunk.len() as u64;
        if read > max_bytes {
            warn!("Playlist exceeded {} bytes, aborting", max_bytes);
            return Err(ProxyError::PlaylistTooLarge);
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer.freeze())
}

/// Decode with the declared charset, or UTF-8 when absent or unknown.
///
/// Malformed sequences become U+FFFD. A leading byte-order mark is dropped.
pub fn decode_text<'a>(bytes: &'a [u8], charset: Option<&str>) -> Cow<'a, str> {
    let encoding = charset
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        debug!("Playlist contained bytes invalid for {}", encoding.name());
    }
    text
}

/// Directory of the target: everything up to and including the final `/`.
pub fn base_of(target: &str) -> String {
    match target.rsplit_once('/') {
        Some((dir, _)) => format!("{}/", dir),
        None => format!("{}/", target),
    }
}

/// Resolves relative playlist entries into proxy-routed URLs.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    base: Url,
    proxy_path: String,
}

impl RewriteContext {
    /// `target` is the playlist URL as requested; `fallback` its parsed form.
    pub fn new(target: &str, fallback: &Url, proxy_path: impl Into<String>) -> Self {
        let base = Url::parse(&base_of(target)).unwrap_or_else(|_| fallback.clone());
        Self {
            base,
            proxy_path: proxy_path.into(),
        }
    }

    /// Rewrite one line. Blank lines, tags and absolute `http` references are kept.
    pub fn rewrite_line<'a>(&self, line: &'a str) -> Cow<'a, str> {
        if line.is_empty() || line.starts_with('#') || line.starts_with("http") {
            return Cow::Borrowed(line);
        }

        match self.base.join(line) {
            Ok(resolved) => Cow::Owned(format!(
                "{}?url={}",
                self.proxy_path,
                urlencoding::encode(resolved.as_str())
            )),
            Err(e) => {
                debug!("Leaving unresolvable playlist entry {:?}: {}", line, e);
                Cow::Borrowed(line)
            }
        }
    }

    /// Rewrite a whole playlist. Lines are rejoined with `\n`.
    pub fn rewrite(&self, text: &str) -> String {
        split_lines(text)
            .map(|line| self.rewrite_line(line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Lines separated by LF, CRLF or a lone CR, without terminators.
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match rest.find(['\n', '\r']) {
            Some(pos) => {
                let line = &rest[..pos];
                let skip = if rest[pos..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[pos + skip..];
                Some(line)
            }
            None => {
                let line = rest;
                rest = "";
                Some(line)
            }
        }
    })
}

/// Keep an upstream type that already names the playlist format, otherwise use
/// the canonical HLS type.
pub fn playlist_content_type(upstream: Option<&str>) -> Cow<'_, str> {
    match upstream {
        Some(ct) if ct.to_ascii_lowercase().contains("mpegurl") => Cow::Borrowed(ct),
        _ => Cow::Borrowed(HLS_CONTENT_TYPE),
    }
}
