//! Desktop browser identity sent to origins.
//!
//! Some CDNs refuse segment requests from non-browser clients, so every upstream
//! fetch carries a freshly generated Chrome User-Agent.

use rand::seq::SliceRandom;
use rand::Rng;

/// Used whenever generation produces nothing.
pub const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Recent stable Chrome releases.
const CHROME_VERSIONS: &[&str] = &[
    "120.0.6099.130",
    "121.0.6167.185",
    "122.0.6261.129",
    "123.0.6312.122",
    "124.0.6367.208",
    "125.0.6422.142",
    "126.0.6478.127",
    "127.0.6533.120",
];

#[derive(Debug, Clone, Copy)]
enum Platform {
    Windows,
    MacOS,
    Linux,
}

impl Platform {
    fn random<R: Rng>(rng: &mut R) -> Self {
        // Windows 70%, macOS 20%, Linux 10%
        let roll: f32 = rng.gen();
        if roll < 0.7 {
            Platform::Windows
        } else if roll < 0.9 {
            Platform::MacOS
        } else {
            Platform::Linux
        }
    }

    fn os_string(&self) -> &'static str {
        match self {
            Platform::Windows => "Windows NT 10.0; Win64; x64",
            Platform::MacOS => "Macintosh; Intel Mac OS X 10_15_7",
            Platform::Linux => "X11; Linux x86_64",
        }
    }
}

/// Generate a desktop Chrome User-Agent from `versions`.
fn chrome_user_agent<R: Rng>(rng: &mut R, versions: &[&str]) -> Option<String> {
    let version = versions.choose(rng)?;
    let platform = Platform::random(rng);
    Some(format!(
        "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36",
        platform.os_string(),
        version
    ))
}

/// User-Agent for one upstream request. Never fails.
#[must_use]
pub fn browser_user_agent() -> String {
    chrome_user_agent(&mut rand::thread_rng(), CHROME_VERSIONS)
        .unwrap_or_else(|| FALLBACK_USER_AGENT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_agent_is_desktop_chrome() {
        for _ in 0..50 {
            let ua = browser_user_agent();
            assert!(ua.starts_with("Mozilla/5.0 ("));
            assert!(ua.contains("Chrome/"));
            assert!(ua.ends_with("Safari/537.36"));
            assert!(!ua.contains("Mobile"));
        }
    }

    #[test]
    fn test_empty_version_list_yields_none() {
        let mut rng = rand::thread_rng();
        assert!(chrome_user_agent(&mut rng, &[]).is_none());
    }

    #[test]
    fn test_fallback_is_valid_header_value() {
        assert!(reqwest::header::HeaderValue::from_str(FALLBACK_USER_AGENT).is_ok());
        assert!(FALLBACK_USER_AGENT.contains("Chrome/120.0.0.0"));
    }
}
