/// How a fetched resource is handed back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// HLS manifest: buffered and rewritten.
    Playlist,
    /// Segments, subtitles, keys and anything else: streamed as-is.
    Passthrough,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Playlist => "playlist",
            ResourceKind::Passthrough => "passthrough",
        }
    }
}

/// Classify by the literal, case-sensitive `.m3u8` suffix of the target URL string.
///
/// The upstream Content-Type is deliberately not consulted.
pub fn classify(target_url: &str) -> ResourceKind {
    if target_url.ends_with(".m3u8") {
        ResourceKind::Playlist
    } else {
        ResourceKind::Passthrough
    }
}
