//! Model training orchestration. Fitting goes through a ranked provider
//! list with a uniform contract: the external GBM trainer first, the
//! in-process ridge solver as fallback. An empty dataset yields no model.

use std::time::Duration;

use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::config::Config;
use crate::dataset;
use crate::db;
use crate::error::Result;
use crate::solver::ridge_solve;
use crate::types::{DatasetRow, TrainedModel};

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// A provider that cannot produce a model for this dataset. Never fatal:
/// the trainer moves on to the next provider in rank order.
#[derive(Debug)]
pub struct Unavailable(pub String);

impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External higher-capacity trainer, reached over HTTP. Output weights are
/// structurally interchangeable with the ridge solver's.
pub struct GbmProvider {
    client: reqwest::Client,
    url: Option<String>,
}

#[derive(Deserialize)]
struct GbmResponse {
    weights: Option<Vec<f64>>,
}

impl GbmProvider {
    pub fn new(url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self { client, url })
    }

    pub async fn fit(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
    ) -> std::result::Result<Vec<f64>, Unavailable> {
        let Some(url) = self.url.as_deref() else {
            return Err(Unavailable("GBM trainer not configured".to_string()));
        };

        let body = serde_json::json!({ "x": x, "y": y });
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Unavailable(format!("GBM trainer unreachable: {e}")))?;

        if !resp.status().is_success() {
            return Err(Unavailable(format!("GBM trainer returned {}", resp.status())));
        }

        let parsed: GbmResponse = resp
            .json()
            .await
            .map_err(|e| Unavailable(format!("GBM trainer response malformed: {e}")))?;

        let weights = parsed
            .weights
            .ok_or_else(|| Unavailable("GBM trainer produced no weights".to_string()))?;
        check_width(weights, x.first().map(Vec::len).unwrap_or(0))
    }
}

/// External weights must line up with the row width (intercept included) or
/// the artifact would disagree with its own key list. A mismatch — e.g. a
/// trainer still holding a stale vocabulary — is a provider failure like any
/// other, and the chain falls through to ridge.
fn check_width(weights: Vec<f64>, width: usize) -> std::result::Result<Vec<f64>, Unavailable> {
    if weights.len() != width {
        return Err(Unavailable(format!(
            "GBM trainer returned {} weights for {width}-wide rows",
            weights.len()
        )));
    }
    Ok(weights)
}

/// In-process normal-equations fit.
pub struct RidgeProvider;

impl RidgeProvider {
    pub fn fit(&self, x: &[Vec<f64>], y: &[f64]) -> std::result::Result<Vec<f64>, Unavailable> {
        ridge_solve(x, y).ok_or_else(|| Unavailable("singular regression matrix".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Target fitting
// ---------------------------------------------------------------------------

/// Fit one target through the provider chain. Empty dataset or an
/// all-unavailable chain produce a model with `weights: None` — degenerate
/// data is a reportable outcome, not an error.
pub async fn fit_target(
    name: &str,
    rows: &[DatasetRow],
    keys: &[String],
    gbm: &GbmProvider,
) -> TrainedModel {
    if rows.is_empty() {
        info!(model = name, "Empty dataset, no model trained");
        return TrainedModel { weights: None, keys: keys.to_vec(), samples: 0 };
    }

    let x: Vec<Vec<f64>> = rows.iter().map(|r| r.x.clone()).collect();
    let y: Vec<f64> = rows.iter().map(|r| r.y).collect();

    let weights = match gbm.fit(&x, &y).await {
        Ok(w) => {
            info!(model = name, samples = rows.len(), "Fit via external trainer");
            Some(w)
        }
        Err(unavailable) => {
            info!(model = name, "External trainer unavailable ({unavailable}), falling back to ridge");
            match RidgeProvider.fit(&x, &y) {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!(model = name, samples = rows.len(), "Ridge fit failed: {e}");
                    None
                }
            }
        }
    };

    TrainedModel { weights, keys: keys.to_vec(), samples: rows.len() }
}

// ---------------------------------------------------------------------------
// Price/TTS training run
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct TrainRunStats {
    pub candidates: usize,
    pub avm_samples: usize,
    pub tts_samples: usize,
    pub artifacts_written: usize,
}

/// Full price/TTS training run: vocabulary, both datasets, provider-chain
/// fits, artifact writes. Targets with zero samples are skipped.
pub async fn run_training(pool: &SqlitePool, cfg: &Config, upload: bool) -> Result<TrainRunStats> {
    let keys = dataset::collect_feature_keys(pool).await?;
    let candidates = db::fetch_candidates(pool).await?;
    info!(
        candidates = candidates.len(),
        keys = keys.len(),
        "Training candidates loaded"
    );

    let avm_rows = dataset::build_avm_dataset(pool, &keys, &candidates).await?;
    let tts_rows = dataset::build_tts_dataset(pool, &keys, &candidates).await?;

    let gbm = GbmProvider::new(cfg.gbm_trainer_url.clone())?;
    let store = ArtifactStore::new(cfg)?;

    let mut stats = TrainRunStats {
        candidates: candidates.len(),
        avm_samples: avm_rows.len(),
        tts_samples: tts_rows.len(),
        artifacts_written: 0,
    };

    for (name, rows) in [("avm-price", &avm_rows), ("tts-days", &tts_rows)] {
        if rows.is_empty() {
            info!(model = name, "No training rows, artifact skipped");
            continue;
        }
        let model = fit_target(name, rows, &keys, &gbm).await;
        store.save(name, &model, upload).await?;
        stats.artifacts_written += 1;
    }

    Ok(stats)
}
