use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use avm_pipeline::config::{Config, PSEUDO_LABEL_THRESHOLD, TRUE_LABEL_SAMPLE_LIMIT, VISION_SCAN_LIMIT};
use avm_pipeline::db;
use avm_pipeline::error::Result;
use avm_pipeline::vision::{run_vision_training, VisionRunOptions};

/// Vision-condition pseudo-label training run.
#[derive(Parser, Debug)]
#[command(name = "train-vision")]
struct Args {
    /// Pseudo-labels are kept when score >= threshold or <= 1 - threshold.
    #[arg(long, default_value_t = PSEUDO_LABEL_THRESHOLD)]
    threshold: f64,

    /// How many recent analyses with photos to scan.
    #[arg(long, default_value_t = VISION_SCAN_LIMIT)]
    take: i64,

    /// How many recent true condition labels to mix into the training set.
    #[arg(long = "sampleLimit", default_value_t = TRUE_LABEL_SAMPLE_LIMIT)]
    sample_limit: i64,

    /// Mirror the artifact to remote object storage.
    #[arg(long)]
    upload: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

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

    if let Err(e) = run(cfg, args).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config, args: Args) -> Result<()> {
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    let opts = VisionRunOptions {
        threshold: args.threshold,
        take: args.take,
        sample_limit: args.sample_limit,
        upload: args.upload,
    };

    let stats = run_vision_training(&pool, &cfg, &opts).await?;
    info!(
        scanned = stats.scanned,
        pseudo_labeled = stats.pseudo_labeled,
        discarded = stats.discarded_mid_confidence,
        true_labels = stats.true_labels,
        trained_samples = stats.trained_samples,
        "Vision training run complete: {} samples ({} pseudo, {} true)",
        stats.trained_samples,
        stats.pseudo_labeled,
        stats.true_labels,
    );

    Ok(())
}
