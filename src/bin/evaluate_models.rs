use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use avm_pipeline::config::Config;
use avm_pipeline::db;
use avm_pipeline::error::Result;
use avm_pipeline::evaluator::run_evaluation;

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

    let summary = run_evaluation(&pool).await?;
    info!(
        mdape = summary.mdape,
        pi_coverage = summary.pi_coverage,
        samples = summary.sample_count,
        "Evaluation run complete: MdAPE {:.4}, PI coverage {:.4} over {} samples",
        summary.mdape,
        summary.pi_coverage,
        summary.sample_count,
    );

    Ok(())
}
