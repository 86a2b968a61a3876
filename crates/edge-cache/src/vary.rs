//! Request header canonicalization for cache identity.

use std::collections::{BTreeMap, BTreeSet};

use edge_core::CacheConfig;
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::canonical_url::is_static_file;

/// Headers that only describe a single connection and never affect content.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers whose comma-separated elements are order-insensitive tokens.
const UNORDERED_TOKEN_HEADERS: &[&str] = &["accept-encoding"];

/// Whether `name` (any case) is a hop-by-hop header.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// The subset of request headers that participates in cache identity.
///
/// Names are lower-case; headers outside the configured allow-list never
/// appear here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalHeaderSet {
    headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cookies: Option<String>,
}

impl CanonicalHeaderSet {
    /// Whether no header or cookie contributes to identity.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.cookies.is_none()
    }

    /// Normalized headers, sorted by name.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Normalized value of one header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Normalized relevant cookies (`a=1; b=2`), if any.
    pub fn cookies(&self) -> Option<&str> {
        self.cookies.as_deref()
    }
}

/// Selects and normalizes the headers the origin varies on.
#[derive(Debug, Clone, Default)]
pub struct HeaderCanonicalizer {
    vary_headers: BTreeSet<String>,
    vary_cookies: BTreeSet<String>,
    static_extensions: Vec<String>,
}

impl HeaderCanonicalizer {
    /// Create with an explicit header allow-list and cookie name list.
    ///
    /// Hop-by-hop names are dropped from the allow-list. `cookie` is handled
    /// by the cookie list instead of as a raw header.
    pub fn new<H, C>(vary_headers: H, vary_cookies: C) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        let vary_headers = vary_headers
            .into_iter()
            .map(|h| h.as_ref().trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty() && h != "cookie" && !is_hop_by_hop(h))
            .collect();
        let vary_cookies = vary_cookies
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        Self {
            vary_headers,
            vary_cookies,
            static_extensions: Vec::new(),
        }
    }

    /// Create from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(&config.vary_headers, &config.vary_cookies)
            .with_static_extensions(config.static_file_extensions.clone())
    }

    /// Paths with these extensions never vary by cookie.
    pub fn with_static_extensions(mut self, extensions: Vec<String>) -> Self {
        self.static_extensions = extensions;
        self
    }

    /// Canonicalize request headers without path context.
    pub fn canonicalize(&self, headers: &HeaderMap) -> CanonicalHeaderSet {
        self.canonicalize_for_path(headers, "")
    }

    /// Canonicalize request headers for a request to `path`.
    pub fn canonicalize_for_path(&self, headers: &HeaderMap, path: &str) -> CanonicalHeaderSet {
        let mut set = CanonicalHeaderSet::default();

        for name in &self.vary_headers {
            let lines: Vec<String> = headers
                .get_all(name.as_str())
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            if lines.is_empty() {
                continue;
            }
            set.headers
                .insert(name.clone(), normalize_value(name, &lines));
        }

        if !self.vary_cookies.is_empty() && !is_static_file(path, &self.static_extensions) {
            set.cookies = self.normalize_cookies(headers);
        }

        set
    }

    /// Whether a response `Vary` value only names headers this canonicalizer
    /// already keys on. `Vary: *` is never covered.
    pub fn covers_vary(&self, vary: &str) -> bool {
        vary.split(',')
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .all(|name| {
                if name == "*" {
                    false
                } else if name == "cookie" {
                    !self.vary_cookies.is_empty()
                } else {
                    self.vary_headers.contains(&name)
                }
            })
    }

    fn normalize_cookies(&self, headers: &HeaderMap) -> Option<String> {
        let mut kept: Vec<(&str, &str)> = headers
            .get_all(http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                Some((name.trim(), value.trim()))
            })
            .filter(|(name, _)| self.vary_cookies.contains(*name))
            .collect();

        if kept.is_empty() {
            return None;
        }
        kept.sort();
        Some(
            kept.iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

fn normalize_value(name: &str, lines: &[String]) -> String {
    let mut elements: Vec<String> = lines
        .iter()
        .flat_map(|line| line.split(','))
        .map(|e| e.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|e| !e.is_empty())
        .collect();

    if UNORDERED_TOKEN_HEADERS.contains(&name) {
        for e in elements.iter_mut() {
            e.make_ascii_lowercase();
        }
        elements.sort();
        elements.dedup();
    }

    elements.join(",")
}
