//! Realized-error evaluation of deployed estimates: median absolute
//! percentage error and prediction-interval coverage over the same
//! candidate set the dataset builder trains on, persisted as one
//! append-only metrics row per run.

use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::CENSOR_HORIZON_DAYS;
use crate::db;
use crate::error::Result;

pub const EVAL_MODEL_NAME: &str = "avm-price";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalSummary {
    pub mdape: f64,
    pub pi_coverage: f64,
    pub sample_count: usize,
    pub dropped: usize,
}

/// One evaluation run: resolve realized prices, score every candidate's
/// persisted AVM interval, aggregate, and insert a model_metrics row.
pub async fn run_evaluation(pool: &SqlitePool) -> Result<EvalSummary> {
    let candidates = db::fetch_candidates(pool).await?;

    let mut apes: Vec<f64> = Vec::new();
    let mut covered_count = 0usize;
    let mut dropped = 0usize;

    for candidate in &candidates {
        let (Some(avm_low), Some(avm_high)) = (candidate.avm_low, candidate.avm_high) else {
            dropped += 1;
            continue;
        };

        let true_price =
            match db::resolve_true_price(pool, &candidate.source_url, candidate.label_created_at)
                .await
            {
                Ok(Some(p)) if p > 0.0 => p,
                Ok(_) => {
                    dropped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Price lookup failed for {}: {e}", candidate.analysis_id);
                    dropped += 1;
                    continue;
                }
            };

        let avm_mid = (avm_low + avm_high) / 2.0;
        apes.push((avm_mid - true_price).abs() / true_price);
        if true_price >= avm_low && true_price <= avm_high {
            covered_count += 1;
        }
    }

    let summary = EvalSummary {
        mdape: median(&mut apes),
        pi_coverage: if apes.is_empty() {
            0.0
        } else {
            covered_count as f64 / apes.len() as f64
        },
        sample_count: apes.len(),
        dropped,
    };

    persist_metrics(pool, &summary).await?;
    info!(
        model = EVAL_MODEL_NAME,
        mdape = summary.mdape,
        pi_coverage = summary.pi_coverage,
        samples = summary.sample_count,
        dropped = summary.dropped,
        "Evaluation complete"
    );

    Ok(summary)
}

/// Median with the even-size convention of averaging the two middle values.
/// Empty input is a valid outcome and evaluates to exactly 0.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

async fn persist_metrics(pool: &SqlitePool, summary: &EvalSummary) -> Result<()> {
    let details = serde_json::json!({
        "horizonDays": CENSOR_HORIZON_DAYS,
        "evaluated": summary.sample_count,
        "dropped": summary.dropped,
    })
    .to_string();

    sqlx::query(
        r#"
        INSERT INTO model_metrics
            (model_name, mdape, pi_coverage, sample_count, details, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(EVAL_MODEL_NAME)
    .bind(summary.mdape)
    .bind(summary.pi_coverage)
    .bind(summary.sample_count as i64)
    .bind(details)
    .bind(now_secs())
    .execute(pool)
    .await?;

    Ok(())
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
