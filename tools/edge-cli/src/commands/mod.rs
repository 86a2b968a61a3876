//! CLI command implementations.

pub mod config;
pub mod evaluate;
pub mod key;
pub mod simulate;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use edge_core::CacheRequest;
use http::Method;

/// Arguments for the key command.
#[derive(Args)]
pub struct KeyArgs {
    /// Request URL.
    pub url: String,

    /// Request method.
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Request header as `Name: value` (repeatable).
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

/// Arguments for the evaluate command.
#[derive(Args)]
pub struct EvaluateArgs {
    /// Request URL.
    pub url: String,

    /// Request method.
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Header on the later request as `Name: value` (repeatable).
    #[arg(short = 'H', long = "request-header", value_parser = parse_header)]
    pub request_headers: Vec<(String, String)>,

    /// Header on the origin response as `Name: value` (repeatable).
    #[arg(short = 'R', long = "response-header", value_parser = parse_header)]
    pub response_headers: Vec<(String, String)>,

    /// Origin response status.
    #[arg(short, long, default_value_t = 200)]
    pub status: u16,

    /// Seconds between storing the response and the later request.
    #[arg(short, long, default_value_t = 0)]
    pub age: u64,
}

/// Arguments for the simulate command.
#[derive(Args)]
pub struct SimulateArgs {
    /// Request URL.
    pub url: String,

    /// Header on every request as `Name: value` (repeatable).
    #[arg(short = 'H', long = "request-header", value_parser = parse_header)]
    pub request_headers: Vec<(String, String)>,

    /// Header on every origin response as `Name: value` (repeatable).
    #[arg(short = 'R', long = "response-header", value_parser = parse_header)]
    pub response_headers: Vec<(String, String)>,

    /// Number of requests to send.
    #[arg(short = 'n', long, default_value_t = 5)]
    pub requests: usize,

    /// Seconds between requests.
    #[arg(short, long, default_value_t = 10)]
    pub interval: u64,

    /// Answer conditional requests with 304 when the response has an ETag.
    #[arg(long)]
    pub not_modified: bool,
}

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration.
    Show,
    /// Write a default edge-cache.toml.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Validate the configuration.
    Validate,
}

/// Parse a `Name: value` header argument.
pub fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{}`", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing header name in `{}`", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Build the request described by command-line arguments.
pub fn build_request(url: &str, method: &str, headers: &[(String, String)]) -> Result<CacheRequest> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid method: {}", method))?;
    Ok(headers
        .iter()
        .fold(CacheRequest::new(method, url), |req, (name, value)| {
            req.with_header(name, value)
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Accept-Language:  en-US ").unwrap(),
            ("Accept-Language".to_string(), "en-US".to_string())
        );
        assert_eq!(
            parse_header("Cookie: a=1; b=2").unwrap().1,
            "a=1; b=2".to_string()
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_build_request() {
        let headers = vec![("Accept".to_string(), "text/html".to_string())];
        let req = build_request("https://example.com/", "head", &headers).unwrap();
        assert_eq!(req.method, Method::HEAD);
        assert_eq!(req.header("accept"), Some("text/html"));
    }
}
