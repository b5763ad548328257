use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use avm_pipeline::config::{Config, PROBE_MIN_INTERVAL_MS};
use avm_pipeline::db;
use avm_pipeline::error::Result;
use avm_pipeline::labeler::{run_labeler, HttpProbe};
use avm_pipeline::ratelimit::HostRateLimiter;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    let prober = HttpProbe::new()?;
    let mut limiter = HostRateLimiter::new(Duration::from_millis(PROBE_MIN_INTERVAL_MS));

    let stats = run_labeler(&pool, &prober, &mut limiter).await?;
    info!(
        candidates = stats.candidates,
        labeled = stats.labeled,
        skipped_existing = stats.skipped_existing,
        failed = stats.failed,
        "Label run complete: {} labeled of {} candidates",
        stats.labeled,
        stats.candidates,
    );

    Ok(())
}
