use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use avm_pipeline::config::Config;
use avm_pipeline::db;
use avm_pipeline::error::Result;
use avm_pipeline::trainer::run_training;

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

    let upload = cfg.storage.is_some();
    let stats = run_training(&pool, &cfg, upload).await?;
    info!(
        candidates = stats.candidates,
        avm_samples = stats.avm_samples,
        tts_samples = stats.tts_samples,
        artifacts = stats.artifacts_written,
        "Training run complete: {} artifacts from {} candidates",
        stats.artifacts_written,
        stats.candidates,
    );

    Ok(())
}
