//! Configuration management commands.

use std::fs;

use anyhow::{bail, Result};
use edge_core::{generate_default_config, CacheConfig};

use super::{ConfigArgs, ConfigCommand};
use crate::context::Context;
use crate::output::format_duration;

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => show_config(ctx).await,
        ConfigCommand::Init { force } => init_config(force, ctx).await,
        ConfigCommand::Validate => validate_config(ctx).await,
    }
}

async fn show_config(ctx: &Context) -> Result<()> {
    if ctx.output.is_json() {
        ctx.output.json(&ctx.config);
        return Ok(());
    }

    ctx.output.header("Current Configuration");
    match &ctx.config_path {
        Some(path) => ctx.output.kv("source", &path.display().to_string()),
        None => ctx.output.kv("source", "built-in defaults"),
    }

    let config = &ctx.config;

    // Keying
    ctx.output.info("");
    ctx.output.info("[key]");
    ctx.output
        .kv("ignored_query_params", &list_or_none(&config.ignored_query_params));
    ctx.output.kv("vary_headers", &list_or_none(&config.vary_headers));
    ctx.output.kv("vary_cookies", &list_or_none(&config.vary_cookies));

    // Freshness
    ctx.output.info("");
    ctx.output.info("[freshness]");
    ctx.output
        .kv("default_ttl", &format_duration(config.default_ttl_secs));
    ctx.output.kv(
        "revalidation_window",
        &format_duration(config.revalidation_window_secs),
    );
    ctx.output
        .kv("heuristic_fraction", &config.heuristic_fraction.to_string());
    ctx.output.kv(
        "max_heuristic_ttl",
        &format_duration(config.max_heuristic_ttl_secs),
    );

    ctx.output.info("");
    ctx.output
        .kv("explain_headers", &config.explain_headers.to_string());

    Ok(())
}

async fn init_config(force: bool, ctx: &Context) -> Result<()> {
    let config_path = ctx.cwd.join("edge-cache.toml");

    if config_path.exists() && !force {
        bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    fs::write(&config_path, generate_default_config())?;

    ctx.output.success(&format!("Created: {}", config_path.display()));

    Ok(())
}

async fn validate_config(ctx: &Context) -> Result<()> {
    ctx.output.header("Validating configuration");

    // Loading already rejected hard errors; re-check for configs built in code
    ctx.config.validate()?;

    let warnings = lint(&ctx.config);
    if warnings.is_empty() {
        ctx.output.success("Configuration is valid");
        return Ok(());
    }

    for warning in &warnings {
        ctx.output.warn(&format!("Warning: {}", warning));
    }
    ctx.output.success("Configuration is valid (with warnings)");

    Ok(())
}

/// Settings that load fine but probably do not do what was meant.
fn lint(config: &CacheConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    for name in &config.vary_headers {
        if name.eq_ignore_ascii_case("cookie") {
            warnings.push(
                "vary_headers contains \"cookie\"; list individual names in vary_cookies instead"
                    .to_string(),
            );
        }
        if name.eq_ignore_ascii_case("authorization") {
            warnings.push(
                "vary_headers contains \"authorization\"; authorized responses are not shared"
                    .to_string(),
            );
        }
    }

    if config.default_ttl_secs == 0 {
        warnings.push(
            "default_ttl_secs is 0; responses without caching headers are never stored"
                .to_string(),
        );
    }

    if config.max_heuristic_ttl_secs < config.default_ttl_secs {
        warnings.push(format!(
            "max_heuristic_ttl_secs ({}) is below default_ttl_secs ({})",
            config.max_heuristic_ttl_secs, config.default_ttl_secs
        ));
    }

    warnings
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}
