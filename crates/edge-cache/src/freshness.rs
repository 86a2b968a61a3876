//! Freshness lifetime and age calculation.
//!
//! All values are whole seconds. Ages follow the standard HTTP algorithm:
//!
//! ```text
//! apparent_age          = max(0, response_time - date_value)
//! corrected_age_value   = age_value + (response_time - request_time)
//! corrected_initial_age = max(apparent_age, corrected_age_value)
//! current_age           = corrected_initial_age + (now - response_time)
//! ```

use std::time::Duration;

use edge_core::{unix_secs, CacheConfig};
use http::header::{AGE, DATE, EXPIRES, LAST_MODIFIED};
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::directives::CacheControl;

/// Where a freshness lifetime came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FreshnessSource {
    SMaxAge,
    MaxAge,
    Expires,
    Heuristic,
    Default,
}

impl std::fmt::Display for FreshnessSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SMaxAge => write!(f, "s-maxage"),
            Self::MaxAge => write!(f, "max-age"),
            Self::Expires => write!(f, "expires"),
            Self::Heuristic => write!(f, "heuristic"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Inputs for lifetimes the origin does not state explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct FreshnessParams {
    /// Lifetime when nothing else applies.
    pub default_ttl: Duration,
    /// Fraction of `Date - Last-Modified` used heuristically.
    pub heuristic_fraction: f64,
    /// Cap on heuristic lifetimes.
    pub max_heuristic_ttl: Duration,
}

impl FreshnessParams {
    /// Create from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            default_ttl: config.default_ttl(),
            heuristic_fraction: config.heuristic_fraction,
            max_heuristic_ttl: Duration::from_secs(config.max_heuristic_ttl_secs),
        }
    }
}

impl Default for FreshnessParams {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Parse an HTTP-date header into Unix seconds.
pub fn header_date(headers: &HeaderMap, name: http::HeaderName) -> Option<u64> {
    let value = headers.get(name)?.to_str().ok()?;
    httpdate::parse_http_date(value.trim()).ok().map(unix_secs)
}

/// Compute the freshness lifetime of a response received at `response_time`.
///
/// Precedence for a shared cache: `s-maxage`, `max-age`, `Expires - Date`,
/// the Last-Modified heuristic, then the configured default. An `Expires`
/// value that is not a valid date means "already expired".
pub fn freshness_lifetime(
    headers: &HeaderMap,
    cc: &CacheControl,
    response_time: u64,
    params: &FreshnessParams,
) -> (u64, FreshnessSource) {
    if let Some(secs) = cc.s_maxage {
        return (secs, FreshnessSource::SMaxAge);
    }
    if let Some(secs) = cc.max_age {
        return (secs, FreshnessSource::MaxAge);
    }

    let date = header_date(headers, DATE).unwrap_or(response_time);

    if headers.contains_key(EXPIRES) {
        let lifetime = header_date(headers, EXPIRES)
            .map(|expires| expires.saturating_sub(date))
            .unwrap_or(0);
        return (lifetime, FreshnessSource::Expires);
    }

    if let Some(last_modified) = header_date(headers, LAST_MODIFIED) {
        let since = date.saturating_sub(last_modified) as f64;
        let heuristic = (since * params.heuristic_fraction) as u64;
        return (
            heuristic.min(params.max_heuristic_ttl.as_secs()),
            FreshnessSource::Heuristic,
        );
    }

    (params.default_ttl.as_secs(), FreshnessSource::Default)
}

/// Age of a response at the moment it was received, corrected for transit
/// delay and any `Age` reported by upstream caches.
pub fn corrected_initial_age(headers: &HeaderMap, request_time: u64, response_time: u64) -> u64 {
    let date = header_date(headers, DATE).unwrap_or(response_time);
    let apparent_age = response_time.saturating_sub(date);

    let age_value = headers
        .get(AGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let response_delay = response_time.saturating_sub(request_time);
    let corrected_age_value = age_value.saturating_add(response_delay);

    apparent_age.max(corrected_age_value)
}

/// Current age of a stored response.
pub fn current_age(corrected_initial_age: u64, response_time: u64, now: u64) -> u64 {
    corrected_initial_age.saturating_add(now.saturating_sub(response_time))
}
