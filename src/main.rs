use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use throttler::ratelimit::{RequestContext, RouteId};
use throttler::{Throttler, ThrottlerConfig};

/// Dry-run a throttler configuration against its counter store.
#[derive(Debug, Parser)]
#[command(name = "throttler", version, about)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Route group (controller) to simulate
    #[arg(long, default_value = "default")]
    group: String,

    /// Handler within the group
    #[arg(long, default_value = "index")]
    handler: String,

    /// User-Agent header to send
    #[arg(long)]
    user_agent: Option<String>,

    /// Number of sequential requests to evaluate
    #[arg(short = 'n', long, default_value_t = 1)]
    requests: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting throttler dry run");

    let config = ThrottlerConfig::load(&args.config)?;
    info!(
        rules = config.limits.len(),
        storage = ?config.storage.kind,
        "Configuration loaded"
    );

    let throttler = Throttler::from_config(&config).await?;

    let mut ctx = RequestContext::new(RouteId::new(args.group, args.handler));
    if let Some(user_agent) = args.user_agent {
        ctx = ctx.with_user_agent(user_agent);
    }

    let result = run(&throttler, &ctx, args.requests).await;
    throttler.shutdown().await?;

    if let Err(ref e) = result {
        error!(error = %e, "Dry run failed");
    }
    result
}

async fn run(throttler: &Throttler, ctx: &RequestContext, requests: u32) -> anyhow::Result<()> {
    for _ in 0..requests {
        let decision = throttler.evaluate(ctx).await?;
        println!("{}", serde_json::to_string(&decision)?);
    }
    Ok(())
}
