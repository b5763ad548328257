//! Vision-condition pseudo-labeling loop. Recent analyses with photos are
//! classified through the external image-inference service; only
//! high-confidence scores are kept as pseudo-labels (active-learning
//! selection), unioned with a bounded sample of true editorial labels, and
//! fitted with the ridge solver.

use std::time::Duration;

use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::config::{Config, PHOTO_CLASSIFY_LIMIT};
use crate::dataset;
use crate::db::models::ConditionLabelRow;
use crate::error::Result;
use crate::trainer::RidgeProvider;
use crate::types::{DatasetRow, TrainedModel};

pub const VISION_MODEL_NAME: &str = "vision-condition";

#[derive(Debug, Clone)]
pub struct VisionRunOptions {
    /// Pseudo-labels are kept when score >= threshold or <= 1 - threshold.
    pub threshold: f64,
    /// How many recent analyses with photos to scan.
    pub take: i64,
    /// How many recent true condition labels to mix into the training set.
    pub sample_limit: i64,
    /// Mirror the artifact to remote storage.
    pub upload: bool,
}

#[derive(Debug, Default)]
pub struct VisionRunStats {
    pub scanned: usize,
    pub pseudo_labeled: usize,
    pub discarded_mid_confidence: usize,
    pub true_labels: usize,
    pub trained_samples: usize,
}

/// Is this classifier output confident enough to keep as a pseudo-label?
/// Mid-range scores are unreliable and discarded.
pub fn is_high_confidence(score: f64, threshold: f64) -> bool {
    score >= threshold || score <= 1.0 - threshold
}

// ---------------------------------------------------------------------------
// Image inference client
// ---------------------------------------------------------------------------

pub struct InferenceClient {
    client: reqwest::Client,
    url: Option<String>,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    score: Option<f64>,
}

impl InferenceClient {
    pub fn new(url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { client, url })
    }

    /// Classify one photo set into a condition score in [0, 1]. None when
    /// the service is unconfigured, unreachable, or returns garbage — the
    /// loop then degrades to true-labeled-only training.
    pub async fn classify(&self, photo_urls: &[String]) -> Option<f64> {
        let url = self.url.as_deref()?;
        let body = serde_json::json!({ "photo_urls": photo_urls });

        let resp = match self.client.post(url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Inference call failed: {e}");
                return None;
            }
        };
        if !resp.status().is_success() {
            warn!("Inference service returned {}", resp.status());
            return None;
        }
        match resp.json::<ClassifyResponse>().await {
            Ok(parsed) => parsed.score.filter(|s| (0.0..=1.0).contains(s)),
            Err(e) => {
                warn!("Inference response malformed: {e}");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Training run
// ---------------------------------------------------------------------------

/// One vision training run. Per-candidate failures are skipped; an empty
/// final dataset ends the run early with no artifact written.
pub async fn run_vision_training(
    pool: &SqlitePool,
    cfg: &Config,
    opts: &VisionRunOptions,
) -> Result<VisionRunStats> {
    let keys = dataset::collect_feature_keys(pool).await?;
    let inference = InferenceClient::new(cfg.inference_url.clone())?;

    let candidates = fetch_photo_candidates(pool, opts.take).await?;
    let mut stats = VisionRunStats { scanned: candidates.len(), ..Default::default() };
    let mut rows: Vec<DatasetRow> = Vec::new();

    for (analysis_id, photo_urls) in &candidates {
        let sample: Vec<String> =
            photo_urls.iter().take(PHOTO_CLASSIFY_LIMIT).cloned().collect();
        let Some(score) = inference.classify(&sample).await else { continue };

        if !is_high_confidence(score, opts.threshold) {
            stats.discarded_mid_confidence += 1;
            continue;
        }

        let Some(x) = dataset::candidate_vector(pool, &keys, analysis_id).await else {
            continue;
        };
        rows.push(DatasetRow { x, y: score });
        stats.pseudo_labeled += 1;
    }

    // Union with true editorial labels.
    let true_labels = sqlx::query_as::<_, ConditionLabelRow>(
        "SELECT analysis_id, score FROM condition_labels ORDER BY created_at DESC LIMIT ?",
    )
    .bind(opts.sample_limit)
    .fetch_all(pool)
    .await?;

    for label in &true_labels {
        let Some(x) = dataset::candidate_vector(pool, &keys, &label.analysis_id).await else {
            continue;
        };
        rows.push(DatasetRow { x, y: label.score });
        stats.true_labels += 1;
    }

    if rows.is_empty() {
        info!("Vision training set empty, no artifact written");
        return Ok(stats);
    }

    let x: Vec<Vec<f64>> = rows.iter().map(|r| r.x.clone()).collect();
    let y: Vec<f64> = rows.iter().map(|r| r.y).collect();
    let weights = match RidgeProvider.fit(&x, &y) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!("Vision ridge fit failed: {e}");
            None
        }
    };

    stats.trained_samples = rows.len();
    let model = TrainedModel { weights, keys, samples: rows.len() };
    ArtifactStore::new(cfg)?.save(VISION_MODEL_NAME, &model, opts.upload).await?;

    Ok(stats)
}

/// Recent analyses that have at least one photo, newest first, with their
/// photo URLs in position order.
async fn fetch_photo_candidates(
    pool: &SqlitePool,
    take: i64,
) -> Result<Vec<(String, Vec<String>)>> {
    let ids = sqlx::query_scalar::<_, String>(
        r#"
        SELECT a.id FROM analyses a
        WHERE EXISTS (SELECT 1 FROM listing_photos p WHERE p.analysis_id = a.id)
        ORDER BY a.created_at DESC
        LIMIT ?
        "#,
    )
    .bind(take)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let urls = sqlx::query_scalar::<_, String>(
            "SELECT url FROM listing_photos WHERE analysis_id = ? ORDER BY position",
        )
        .bind(&id)
        .fetch_all(pool)
        .await?;
        out.push((id, urls));
    }
    Ok(out)
}
