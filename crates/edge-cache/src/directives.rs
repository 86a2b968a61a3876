//! `Cache-Control` directive parsing.

use http::header::{CACHE_CONTROL, PRAGMA};
use http::HeaderMap;

use crate::error::{CacheError, CacheResult};

/// Delta-seconds values above this are clamped, as HTTP recommends.
const MAX_DELTA_SECONDS: u64 = 2_147_483_648;

/// How stale a response the client is willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxStale {
    /// `max-stale` without a value: any staleness.
    Any,
    /// `max-stale=N`.
    Secs(u64),
}

impl MaxStale {
    /// Whether a response stale by `staleness` seconds is acceptable.
    pub fn permits(&self, staleness: u64) -> bool {
        match self {
            Self::Any => true,
            Self::Secs(limit) => staleness <= *limit,
        }
    }
}

/// Parsed `Cache-Control` directives from a request or a response.
///
/// Directives that do not apply to the message direction are simply never
/// consulted. `malformed` is set when a known directive has an unusable
/// argument or appears twice with different values; callers must then treat
/// the message conservatively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub private: bool,
    pub public: bool,
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
    pub max_stale: Option<MaxStale>,
    pub min_fresh: Option<u64>,
    pub only_if_cached: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    pub immutable: bool,
    pub malformed: bool,
}

impl CacheControl {
    /// Parse a single `Cache-Control` field value.
    pub fn parse(value: &str) -> Self {
        let mut cc = Self::default();
        for directive in split_directives(value) {
            cc.apply(directive);
        }
        cc
    }

    /// Parse every `Cache-Control` line of a header map.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cc = Self::default();
        for line in headers.get_all(CACHE_CONTROL) {
            match line.to_str() {
                Ok(line) => {
                    for directive in split_directives(line) {
                        cc.apply(directive);
                    }
                }
                Err(_) => cc.malformed = true,
            }
        }
        cc
    }

    /// Parse request directives; `Pragma: no-cache` counts as `no-cache`
    /// when the request has no `Cache-Control`.
    pub fn from_request_headers(headers: &HeaderMap) -> Self {
        let mut cc = Self::from_headers(headers);
        if !headers.contains_key(CACHE_CONTROL) {
            cc.no_cache = headers
                .get_all(PRAGMA)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .any(|token| token.trim().eq_ignore_ascii_case("no-cache"));
        }
        cc
    }

    /// Whether a stored response may never be served without revalidation
    /// once stale.
    pub fn forbids_stale(&self) -> bool {
        self.must_revalidate || self.proxy_revalidate || self.no_cache
    }

    /// Fail with [`CacheError::PolicyAmbiguous`] when the directives cannot
    /// be trusted.
    pub fn ensure_consistent(&self) -> CacheResult<()> {
        if self.malformed {
            return Err(CacheError::PolicyAmbiguous(
                "malformed or conflicting Cache-Control".to_string(),
            ));
        }
        Ok(())
    }

    fn apply(&mut self, (name, value): (String, Option<String>)) {
        match name.as_str() {
            "no-store" => self.no_store = true,
            "no-cache" => self.no_cache = true,
            "private" => self.private = true,
            "public" => self.public = true,
            "only-if-cached" => self.only_if_cached = true,
            "must-revalidate" => self.must_revalidate = true,
            "proxy-revalidate" => self.proxy_revalidate = true,
            "immutable" => self.immutable = true,
            "max-age" => set_delta(&mut self.max_age, value, &mut self.malformed),
            "s-maxage" => set_delta(&mut self.s_maxage, value, &mut self.malformed),
            "min-fresh" => set_delta(&mut self.min_fresh, value, &mut self.malformed),
            "max-stale" => {
                let parsed = match value {
                    None => Some(MaxStale::Any),
                    Some(v) => parse_delta(&v).map(MaxStale::Secs),
                };
                match parsed {
                    Some(p) if self.max_stale.map_or(true, |old| old == p) => {
                        self.max_stale = Some(p)
                    }
                    _ => self.malformed = true,
                }
            }
            _ => {}
        }
    }
}

fn set_delta(slot: &mut Option<u64>, value: Option<String>, malformed: &mut bool) {
    match value.as_deref().and_then(parse_delta) {
        Some(secs) if slot.map_or(true, |old| old == secs) => *slot = Some(secs),
        _ => *malformed = true,
    }
}

fn parse_delta(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // All digits, so the only parse failure is overflow.
    Some(
        value
            .parse::<u64>()
            .unwrap_or(MAX_DELTA_SECONDS)
            .min(MAX_DELTA_SECONDS),
    )
}

/// Split a field value into lower-cased names and unquoted arguments,
/// honoring commas inside quoted strings.
fn split_directives(value: &str) -> Vec<(String, Option<String>)> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in value.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let (name, value) = match part.split_once('=') {
                Some((n, v)) => (n, Some(v.trim().trim_matches('"').to_string())),
                None => (part, None),
            };
            Some((name.trim().to_ascii_lowercase(), value))
        })
        .collect()
}
