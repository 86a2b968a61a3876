//! Request URL canonicalization.

use std::collections::HashSet;

use edge_core::CacheConfig;
use serde::{Deserialize, Serialize};
use url::{form_urlencoded, Url};

use crate::error::{CacheError, CacheResult};

/// Normalized string form of a request URL.
///
/// Two URLs whose queries differ only in parameter order, or in the presence
/// or value of an ignored parameter, share the same canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalUrl {
    url: String,
    path: String,
}

impl CanonicalUrl {
    /// The full canonical URL string.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// The canonical path component.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Strips tracking parameters and sorts the rest.
#[derive(Debug, Clone, Default)]
pub struct UrlCanonicalizer {
    ignored: HashSet<String>,
}

impl UrlCanonicalizer {
    /// Create a canonicalizer that drops the given query parameter names.
    pub fn new<I, S>(ignored: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignored: ignored.into_iter().map(Into::into).collect(),
        }
    }

    /// Create from the configured ignore-list.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ignored_query_params.iter().cloned())
    }

    /// Whether `name` is dropped from canonical URLs.
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.contains(name)
    }

    /// Canonicalize an absolute `http`/`https` URL.
    ///
    /// Scheme and host are lower-cased, default ports and the fragment are
    /// removed, and the remaining query pairs are sorted by name then value.
    /// Duplicate names are kept.
    pub fn canonicalize(&self, raw: &str) -> CacheResult<CanonicalUrl> {
        let invalid = |reason: &str| CacheError::InvalidUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("unsupported scheme"));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host"));
        }

        url.set_fragment(None);

        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| !self.ignored.contains(name.as_ref()))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        pairs.sort();

        if pairs.is_empty() {
            url.set_query(None);
        } else {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&pairs)
                .finish();
            url.set_query(Some(&query));
        }

        Ok(CanonicalUrl {
            path: url.path().to_string(),
            url: url.into(),
        })
    }
}

/// Whether the path names a static media or archive file.
pub fn is_static_file(path: &str, extensions: &[String]) -> bool {
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(raw: &str) -> String {
        UrlCanonicalizer::from_config(&CacheConfig::default())
            .canonicalize(raw)
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_strips_tracking_and_sorts() {
        assert_eq!(
            canon("https://example.com/a?utm_source=x&b=2&a=1"),
            "https://example.com/a?a=1&b=2"
        );
    }

    #[test]
    fn test_param_order_is_irrelevant() {
        assert_eq!(
            canon("https://example.com/p?z=1&y=2&x=3"),
            canon("https://example.com/p?x=3&z=1&y=2")
        );
    }

    #[test]
    fn test_ignored_param_value_is_irrelevant() {
        assert_eq!(
            canon("https://example.com/p?gclid=abc&q=shoes"),
            canon("https://example.com/p?q=shoes&gclid=zzz")
        );
        assert_eq!(
            canon("https://example.com/p?q=shoes&utm_campaign=spring"),
            canon("https://example.com/p?q=shoes")
        );
    }

    #[test]
    fn test_distinct_values_stay_distinct() {
        assert_ne!(
            canon("https://example.com/p?q=shoes"),
            canon("https://example.com/p?q=boots")
        );
    }

    #[test]
    fn test_empty_query_omits_question_mark() {
        assert_eq!(
            canon("https://example.com/a?utm_source=x&utm_medium=y"),
            "https://example.com/a"
        );
        assert_eq!(canon("https://example.com/a?"), "https://example.com/a");
    }

    #[test]
    fn test_duplicates_are_preserved_and_sorted() {
        assert_eq!(
            canon("https://example.com/a?tag=b&x=1&tag=a"),
            "https://example.com/a?tag=a&tag=b&x=1"
        );
    }

    #[test]
    fn test_scheme_host_port_normalized() {
        assert_eq!(
            canon("HTTPS://Example.COM:443/Path#frag"),
            "https://example.com/Path"
        );
        assert_eq!(canon("http://example.com:80"), "http://example.com/");
        assert_eq!(
            canon("http://example.com:8080/x"),
            "http://example.com:8080/x"
        );
    }

    #[test]
    fn test_encoding_is_normalized() {
        assert_eq!(
            canon("https://example.com/s?q=a%20b"),
            canon("https://example.com/s?q=a+b")
        );
    }

    #[test]
    fn test_invalid_urls() {
        let c = UrlCanonicalizer::default();
        assert!(matches!(
            c.canonicalize("/relative/path"),
            Err(CacheError::InvalidUrl { .. })
        ));
        assert!(c.canonicalize("ftp://example.com/file").is_err());
        assert!(c.canonicalize("http://").is_err());
        assert!(c.canonicalize("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_path_is_exposed() {
        let url = UrlCanonicalizer::default()
            .canonicalize("https://example.com/media/clip.mp4?x=1")
            .unwrap();
        assert_eq!(url.path(), "/media/clip.mp4");
    }

    #[test]
    fn test_static_file_detection() {
        let exts = CacheConfig::default().static_file_extensions;
        assert!(is_static_file("/media/clip.MP4", &exts));
        assert!(is_static_file("/a/b/archive.tar", &exts));
        assert!(!is_static_file("/products/shoes", &exts));
        assert!(!is_static_file("/index.html", &exts));
        assert!(!is_static_file("/.zip", &exts));
    }
}
