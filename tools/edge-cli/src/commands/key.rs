//! Cache key inspection.

use anyhow::Result;
use edge_cache::RequestNormalizer;

use super::{build_request, KeyArgs};
use crate::context::Context;

/// Run the key command.
pub async fn run(args: KeyArgs, ctx: &Context) -> Result<()> {
    let request = build_request(&args.url, &args.method, &args.headers)?;
    let identity = RequestNormalizer::from_config(&ctx.config).normalize(&request)?;

    if ctx.output.is_json() {
        ctx.output.json(&identity);
        return Ok(());
    }

    ctx.output.header("Cache identity");
    ctx.output.kv("method", request.method.as_str());
    ctx.output.kv("url", identity.url.as_str());
    ctx.output.kv("key", identity.key.as_str());

    if identity.headers.is_empty() {
        ctx.output.kv("varies on", "nothing");
    } else {
        ctx.output.info("Varies on:");
        for (name, value) in identity.headers.headers() {
            ctx.output.list_item(&format!("{}: {}", name, value));
        }
        if let Some(cookies) = identity.headers.cookies() {
            ctx.output.list_item(&format!("cookie: {}", cookies));
        }
    }

    ctx.output.debug(&format!("components: {}", identity.key.components().join(" | ")));
    Ok(())
}
