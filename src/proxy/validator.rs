use url::Url;

use crate::error::{ProxyError, Result};

/// Hostnames the proxy may fetch from. Empty means every host is allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowlistPolicy {
    patterns: Vec<HostPattern>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Exact(String),
    /// Stored with its leading dot, e.g. `.example.com` for `*.example.com`.
    Suffix(String),
}

impl AllowlistPolicy {
    pub fn new<'a>(hosts: impl IntoIterator<Item = &'a str>) -> Self {
        let patterns = hosts
            .into_iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .map(|h| match h.strip_prefix('*') {
                Some(suffix) if suffix.starts_with('.') => HostPattern::Suffix(suffix.to_string()),
                _ => HostPattern::Exact(h),
            })
            .collect();

        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Case-insensitive match against the configured patterns.
    pub fn is_allowed(&self, host: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }

        let host = host.to_ascii_lowercase();
        self.patterns.iter().any(|pattern| match pattern {
            HostPattern::Exact(exact) => host == *exact,
            HostPattern::Suffix(suffix) => host.ends_with(suffix.as_str()),
        })
    }
}

/// Parse `raw` and check it against the scheme and host policy.
pub fn validate(raw: &str, policy: &AllowlistPolicy) -> Result<Url> {
    let url = Url::parse(raw).map_err(|_| ProxyError::UnsupportedScheme)?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProxyError::UnsupportedScheme);
    }

    if !policy.is_empty() {
        if let Some(host) = url.host_str() {
            if !policy.is_allowed(host) {
                return Err(ProxyError::HostNotAllowed {
                    host: host.to_string(),
                });
            }
        }
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_schemes() {
        let policy = AllowlistPolicy::default();
        for raw in [
            "ftp://example.com/a.m3u8",
            "file:///etc/passwd",
            "javascript:alert(1)",
            "not a url",
            "//example.com/relative",
        ] {
            assert!(matches!(
                validate(raw, &policy),
                Err(ProxyError::UnsupportedScheme)
            ), "{raw}");
        }
    }

    #[test]
    fn test_accepts_http_and_https() {
        let policy = AllowlistPolicy::default();
        assert!(validate("http://example.com/live/index.m3u8", &policy).is_ok());
        assert!(validate("https://example.com:8443/seg1.ts", &policy).is_ok());
    }

    #[test]
    fn test_wildcard_suffix() {
        let policy = AllowlistPolicy::new(["*.example.com"]);
        assert!(policy.is_allowed("cdn.example.com"));
        assert!(policy.is_allowed("a.b.example.com"));
        assert!(!policy.is_allowed("example.com"));
        assert!(!policy.is_allowed("notexample.com"));
    }

    #[test]
    fn test_exact_match_is_case_insensitive() {
        let policy = AllowlistPolicy::new(["Media.Example.com"]);
        assert!(validate("https://MEDIA.example.COM/x.ts", &policy).is_ok());
        assert!(validate("https://other.example.com/x.ts", &policy).is_err());
    }

    #[test]
    fn test_host_not_allowed_message() {
        let policy = AllowlistPolicy::new(["cdn.example.com"]);
        let err = validate("https://Evil.com:8080/index.m3u8", &policy).unwrap_err();
        assert_eq!(err.to_string(), "Invalid URL: Host evil.com not allowed");
    }

    #[test]
    fn test_empty_policy_allows_everything() {
        let policy = AllowlistPolicy::new(["", "  "]);
        assert!(policy.is_empty());
        assert!(validate("https://anything.test/a.ts", &policy).is_ok());
    }
}
