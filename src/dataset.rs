//! Supervised dataset assembly: a fixed feature-key vocabulary collected
//! from snapshot samples, numeric vectorization of heterogeneous feature
//! maps, and the AVM / time-to-sell target joins.

use std::collections::HashSet;

use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::{MAX_FEATURE_KEYS, VOCAB_SAMPLE_LIMIT};
use crate::db::{self, models::CandidateRow};
use crate::error::Result;
use crate::types::DatasetRow;

// ---------------------------------------------------------------------------
// Feature vocabulary
// ---------------------------------------------------------------------------

/// Union of numeric/string feature keys over a bounded snapshot sample, in
/// first-encountered order, truncated to MAX_FEATURE_KEYS. The resulting
/// order is part of the artifact contract: component i of every vector maps
/// to keys[i - 1] for the lifetime of a trained model.
pub async fn collect_feature_keys(pool: &SqlitePool) -> Result<Vec<String>> {
    let snapshots = sqlx::query_scalar::<_, String>(
        "SELECT features FROM feature_snapshots ORDER BY created_at LIMIT ?",
    )
    .bind(VOCAB_SAMPLE_LIMIT)
    .fetch_all(pool)
    .await?;

    let mut keys: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for raw in &snapshots {
        let map: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping malformed feature snapshot: {e}");
                continue;
            }
        };
        for (key, value) in &map {
            if !(value.is_number() || value.is_string()) {
                continue;
            }
            if keys.len() >= MAX_FEATURE_KEYS {
                break;
            }
            if seen.insert(key.clone()) {
                keys.push(key.clone());
            }
        }
        if keys.len() >= MAX_FEATURE_KEYS {
            break;
        }
    }

    Ok(keys)
}

// ---------------------------------------------------------------------------
// Vectorization
// ---------------------------------------------------------------------------

/// Build the design-matrix row for one feature map: intercept 1.0 followed
/// by one component per vocabulary key. Numbers pass through; strings are
/// stripped to their numeric characters and parsed; anything else is 0.
pub fn feature_vector(
    keys: &[String],
    features: &serde_json::Map<String, serde_json::Value>,
) -> Vec<f64> {
    let mut x = Vec::with_capacity(keys.len() + 1);
    x.push(1.0);
    for key in keys {
        x.push(features.get(key).map_or(0.0, numeric_value));
    }
    x
}

fn numeric_value(value: &serde_json::Value) -> f64 {
    match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => parse_numeric_str(s),
        _ => 0.0,
    }
}

/// "87.5 mp" → 87.5, "1.250 EUR" → 1.250, "-3" → -3.0; unparsable → 0.
fn parse_numeric_str(s: &str) -> f64 {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f64>().unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Target joins
// ---------------------------------------------------------------------------

/// AVM rows: y = last observed price at/before the label's creation time.
/// Candidates with no price observation, or price <= 0, are dropped.
pub async fn build_avm_dataset(
    pool: &SqlitePool,
    keys: &[String],
    candidates: &[CandidateRow],
) -> Result<Vec<DatasetRow>> {
    let mut rows = Vec::new();

    for candidate in candidates {
        let true_price =
            match db::resolve_true_price(pool, &candidate.source_url, candidate.label_created_at)
                .await
            {
                Ok(Some(p)) if p > 0.0 => p,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Price lookup failed for {}: {e}", candidate.analysis_id);
                    continue;
                }
            };

        let Some(x) = candidate_vector(pool, keys, &candidate.analysis_id).await else {
            continue;
        };

        rows.push(DatasetRow { x, y: true_price });
    }

    debug!("AVM dataset: {} rows from {} candidates", rows.len(), candidates.len());
    Ok(rows)
}

/// TTS rows: y = observed (non-censored) days on market.
pub async fn build_tts_dataset(
    pool: &SqlitePool,
    keys: &[String],
    candidates: &[CandidateRow],
) -> Result<Vec<DatasetRow>> {
    let mut rows = Vec::new();

    for candidate in candidates {
        if candidate.days < 0 {
            continue;
        }
        let Some(x) = candidate_vector(pool, keys, &candidate.analysis_id).await else {
            continue;
        };
        rows.push(DatasetRow { x, y: candidate.days as f64 });
    }

    debug!("TTS dataset: {} rows from {} candidates", rows.len(), candidates.len());
    Ok(rows)
}

/// Feature vector for one candidate, or None when the snapshot is missing
/// or malformed (logged and skipped, per-candidate isolation).
pub async fn candidate_vector(
    pool: &SqlitePool,
    keys: &[String],
    analysis_id: &str,
) -> Option<Vec<f64>> {
    let raw = match db::fetch_features_json(pool, analysis_id).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!("Feature snapshot lookup failed for {analysis_id}: {e}");
            return None;
        }
    };

    match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&raw) {
        Ok(map) => Some(feature_vector(keys, &map)),
        Err(e) => {
            warn!("Malformed feature snapshot for {analysis_id}: {e}");
            None
        }
    }
}
