use crate::error::{AppError, Result};

/// Right-censoring horizon for time-to-sell labels, in days. A listing still
/// on the market at probe time is labeled `days = 120, censored = true`.
pub const CENSOR_HORIZON_DAYS: i64 = 120;

/// L2 penalty added to every diagonal entry of XᵗX before inversion.
/// Keeps the normal-equations matrix invertible on collinear feature sets.
pub const RIDGE_LAMBDA: f64 = 1e-3;

/// Gauss-Jordan pivot floor. A largest available pivot below this magnitude
/// means the matrix is numerically singular and the solve returns None.
pub const PIVOT_EPS: f64 = 1e-12;

/// Feature vocabulary width. The first 30 numeric/string keys encountered
/// across the snapshot sample become the vector layout for every artifact.
pub const MAX_FEATURE_KEYS: usize = 30;

/// Bounded sample of feature snapshots scanned when collecting the vocabulary.
pub const VOCAB_SAMPLE_LIMIT: i64 = 500;

/// Max unlabeled analyses probed per labeler run.
pub const LABEL_BATCH_LIMIT: i64 = 2000;

/// Max training/evaluation candidates pulled per run.
pub const DATASET_CANDIDATE_LIMIT: i64 = 1000;

/// Minimum spacing between probes to the same host (milliseconds).
pub const PROBE_MIN_INTERVAL_MS: u64 = 500;

/// Default number of recent analyses scanned by the vision trainer.
pub const VISION_SCAN_LIMIT: i64 = 200;

/// Max photo URLs sent to the image-inference service per analysis.
pub const PHOTO_CLASSIFY_LIMIT: usize = 6;

/// Default pseudo-label confidence threshold: keep score >= t or <= 1 - t.
pub const PSEUDO_LABEL_THRESHOLD: f64 = 0.9;

/// Default number of true condition labels mixed into the vision training
/// set; `--sampleLimit` overrides it with no upper cap.
pub const TRUE_LABEL_SAMPLE_LIMIT: i64 = 500;

/// Case-insensitive substrings that mark a listing page as sold.
pub const SOLD_MARKERS: &[&str] = &[
    "vândut",
    "vandut",
    "sold",
    "vânzare încheiată",
    "vanzare incheiata",
];

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    /// Directory where versioned artifacts and latest.json are written.
    pub models_dir: String,
    /// Image-inference endpoint (INFERENCE_URL); vision pseudo-labeling
    /// degrades to true-labeled-only training when unset.
    pub inference_url: Option<String>,
    /// Higher-capacity external trainer (GBM_TRAINER_URL); ridge fallback
    /// when unset or unreachable.
    pub gbm_trainer_url: Option<String>,
    /// Remote object storage; mirroring is enabled only when all four
    /// STORAGE_* vars are present.
    pub storage: Option<StorageConfig>,
    /// Downstream cache endpoint (CACHE_URL); pointer set is skipped when unset.
    pub cache_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let storage = match (
            std::env::var("STORAGE_ENDPOINT").ok(),
            std::env::var("STORAGE_BUCKET").ok(),
            std::env::var("STORAGE_ACCESS_KEY").ok(),
            std::env::var("STORAGE_SECRET").ok(),
        ) {
            (Some(endpoint), Some(bucket), Some(access_key), Some(secret)) => {
                Some(StorageConfig { endpoint, bucket, access_key, secret })
            }
            (None, None, None, None) => None,
            _ => {
                return Err(AppError::Config(
                    "STORAGE_ENDPOINT, STORAGE_BUCKET, STORAGE_ACCESS_KEY and STORAGE_SECRET must be set together".to_string(),
                ))
            }
        };

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "pipeline.db".to_string()),
            models_dir: std::env::var("MODELS_DIR").unwrap_or_else(|_| "models".to_string()),
            inference_url: std::env::var("INFERENCE_URL").ok().filter(|s| !s.is_empty()),
            gbm_trainer_url: std::env::var("GBM_TRAINER_URL").ok().filter(|s| !s.is_empty()),
            storage,
            cache_url: std::env::var("CACHE_URL").ok().filter(|s| !s.is_empty()),
        })
    }
}
