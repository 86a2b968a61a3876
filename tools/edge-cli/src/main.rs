//! Edge CLI - Inspect how the edge cache keys and answers requests.
//!
//! Commands:
//! - `edge key` - Show the canonical URL, header set and cache key of a request
//! - `edge evaluate` - Decide how a stored response would answer a later request
//! - `edge simulate` - Run a request sequence through an in-memory cache
//! - `edge config` - Manage configuration

mod commands;
mod context;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use edge_observability::{init_tracing, LogConfig};

use commands::{ConfigArgs, EvaluateArgs, KeyArgs, SimulateArgs};

/// Edge CLI - Inspect edge HTTP cache behavior
#[derive(Parser)]
#[command(name = "edge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use JSON output format
    #[arg(long, global = true)]
    json: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the cache key for a request
    Key(KeyArgs),

    /// Evaluate cache policy for a response and a later request
    Evaluate(EvaluateArgs),

    /// Replay requests against an in-memory cache and scripted origin
    Simulate(SimulateArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Library events go to stderr; a second init only happens in tests
    if let Err(e) = init_tracing(&LogConfig::from_verbosity(cli.verbose)) {
        eprintln!("{}", e);
    }

    // Setup output formatting
    let output = output::Output::new(cli.verbose, cli.json);

    // Load config
    let config_path = cli.config.as_deref();
    let ctx = context::Context::load(config_path, output)?;

    // Execute command
    let result = match cli.command {
        Commands::Key(args) => commands::key::run(args, &ctx).await,
        Commands::Evaluate(args) => commands::evaluate::run(args, &ctx).await,
        Commands::Simulate(args) => commands::simulate::run(args, &ctx).await,
        Commands::Config(args) => commands::config::run(args, &ctx).await,
    };

    if let Err(e) = result {
        ctx.output.error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
