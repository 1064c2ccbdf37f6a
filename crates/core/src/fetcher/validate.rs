//! Validation of caller-supplied source URLs.
//!
//! Every URL is checked here before it can appear in the retrieval tool's
//! argument vector. Rules run in a fixed order and the first match wins.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::job::ErrorCode;

/// Longest accepted URL, in bytes.
pub const MAX_URL_LENGTH: usize = 2048;

/// Shell metacharacters and quoting characters that may never appear.
///
/// `?` is handled separately: exactly one is allowed, as the query separator.
const FORBIDDEN_CHARS: &[char] = &[
    ';', '&', '|', '$', '`', '!', '(', ')', '{', '}', '[', ']', '<', '>', '*', '?', '#', '~',
    '\\', '\'', '"', ' ',
];

/// Percent-encoded line breaks, rejected like literal ones.
const ENCODED_LINE_BREAKS: &[&str] = &["%0a", "%0d"];

/// Video platforms recognised by the fetchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    YouTube,
    TikTok,
    Instagram,
    Facebook,
    Vimeo,
    Pinterest,
    X,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::YouTube => "youtube",
            Platform::TikTok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::Facebook => "facebook",
            Platform::Vimeo => "vimeo",
            Platform::Pinterest => "pinterest",
            Platform::X => "x",
        }
    }

    /// Platforms that refuse anonymous retrieval.
    pub fn requires_credentials(&self) -> bool {
        matches!(self, Platform::Instagram)
    }

    /// Match a host against the allow-list (exact domain or any subdomain).
    pub fn from_host(host: &str) -> Option<Platform> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        ALLOWED_DOMAINS.iter().find_map(|(domain, platform)| {
            let subdomain = host
                .strip_suffix(domain)
                .is_some_and(|rest| rest.ends_with('.'));
            (host == *domain || subdomain).then_some(*platform)
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allow-listed video hosting domains. New platforms are added here.
const ALLOWED_DOMAINS: &[(&str, Platform)] = &[
    ("youtube.com", Platform::YouTube),
    ("youtu.be", Platform::YouTube),
    ("tiktok.com", Platform::TikTok),
    ("instagram.com", Platform::Instagram),
    ("facebook.com", Platform::Facebook),
    ("fb.watch", Platform::Facebook),
    ("vimeo.com", Platform::Vimeo),
    ("pinterest.com", Platform::Pinterest),
    ("pin.it", Platform::Pinterest),
    ("x.com", Platform::X),
    ("twitter.com", Platform::X),
];

/// Why a URL was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlRejection {
    #[error("invalid URL: empty")]
    Empty,

    #[error("invalid URL: forbidden character {0:?}")]
    ForbiddenCharacter(char),

    #[error("invalid URL: contains a line break")]
    LineBreak,

    #[error("invalid URL: {0}")]
    Malformed(String),

    #[error("invalid URL: unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("invalid URL: missing host")]
    MissingHost,

    #[error("platform not supported: {0}")]
    PlatformNotSupported(String),

    #[error("invalid URL: {len} bytes exceeds the {max} byte limit")]
    TooLong { len: usize, max: usize },
}

impl UrlRejection {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            UrlRejection::PlatformNotSupported(_) => ErrorCode::PlatformNotSupported,
            _ => ErrorCode::InvalidUrl,
        }
    }
}

/// A URL that passed every rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUrl {
    url: Url,
    platform: Platform,
}

impl ValidatedUrl {
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }
}

fn check_characters(raw: &str) -> Result<(), UrlRejection> {
    let mut seen_query = false;
    for c in raw.chars() {
        if c == '\n' || c == '\r' {
            // reported by the line break rule
            continue;
        }
        if c == '?' && !seen_query {
            seen_query = true;
            continue;
        }
        if c.is_control() || FORBIDDEN_CHARS.contains(&c) {
            return Err(UrlRejection::ForbiddenCharacter(c));
        }
    }
    Ok(())
}

fn has_line_break(raw: &str) -> bool {
    if raw.contains(['\n', '\r']) {
        return true;
    }
    let lower = raw.to_ascii_lowercase();
    ENCODED_LINE_BREAKS.iter().any(|enc| lower.contains(enc))
}

/// Validate a source URL before it is handed to any subprocess.
///
/// Malformed input is an expected condition and is always reported as a
/// [`UrlRejection`], never a panic.
pub fn validate_source_url(raw: &str) -> Result<ValidatedUrl, UrlRejection> {
    if raw.is_empty() {
        return Err(UrlRejection::Empty);
    }

    check_characters(raw)?;

    if has_line_break(raw) {
        return Err(UrlRejection::LineBreak);
    }

    let url = Url::parse(raw).map_err(|e| UrlRejection::Malformed(e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlRejection::UnsupportedScheme(url.scheme().to_string()));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(UrlRejection::Malformed(
            "embedded credentials are not allowed".to_string(),
        ));
    }

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host,
        _ => return Err(UrlRejection::MissingHost),
    };

    let platform = Platform::from_host(host)
        .ok_or_else(|| UrlRejection::PlatformNotSupported(host.to_string()))?;

    if raw.len() > MAX_URL_LENGTH {
        return Err(UrlRejection::TooLong {
            len: raw.len(),
            max: MAX_URL_LENGTH,
        });
    }

    Ok(ValidatedUrl { url, platform })
}
