//! Time-to-sell label derivation. One-shot per analysis: probe the source
//! URL, classify the listing state, derive the censored/uncensored label,
//! and insert it. Already-labeled analyses are never touched again.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::{CENSOR_HORIZON_DAYS, LABEL_BATCH_LIMIT, SOLD_MARKERS};
use crate::db::models::AnalysisRow;
use crate::error::Result;
use crate::ratelimit::{host_of, Clock, HostRateLimiter};
use crate::types::{ListingState, ProbeResult, TtsLabelValues};

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

/// Abstracts the URL probe so the labeling loop can run against a stub.
pub trait Probe {
    /// A transport-level failure is reported as `status: None` — the label
    /// rules treat it the same as a non-2xx response.
    fn probe(&self, url: &str) -> impl std::future::Future<Output = ProbeResult> + Send;
}

pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self { client })
    }
}

impl Probe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeResult {
        match self.client.get(url).send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                ProbeResult { status: Some(status), body }
            }
            Err(e) => {
                warn!("Probe failed for {url}: {e}");
                ProbeResult { status: None, body: String::new() }
            }
        }
    }
}

/// Map a probe result to a listing state. Sold markers are matched
/// case-insensitively anywhere in the body.
pub fn classify_probe(result: &ProbeResult) -> ListingState {
    match result.status {
        Some(status) if (200..300).contains(&status) => {
            let body = result.body.to_lowercase();
            if SOLD_MARKERS.iter().any(|m| body.contains(m)) {
                ListingState::Sold
            } else {
                ListingState::Active
            }
        }
        _ => ListingState::Inaccessible,
    }
}

// ---------------------------------------------------------------------------
// Label rules
// ---------------------------------------------------------------------------

/// Derive label fields from the listing state and elapsed time.
///
/// Sold/inaccessible: event time = elapsed whole days (rounded), clamped to
/// the 120-day horizon with censored = true when it ran past it. Active:
/// right-censored at the horizon. `observed_days` always keeps the true
/// elapsed count; `beyond_horizon` is set only for a post-horizon event.
pub fn derive_label(created_at: i64, probed_at: i64, state: ListingState) -> TtsLabelValues {
    let elapsed_days = (((probed_at - created_at).max(0)) as f64 / 86_400.0).round() as i64;

    match state {
        ListingState::Sold | ListingState::Inaccessible => {
            let beyond = elapsed_days > CENSOR_HORIZON_DAYS;
            TtsLabelValues {
                days: elapsed_days.min(CENSOR_HORIZON_DAYS),
                censored: beyond,
                observed_days: elapsed_days,
                beyond_horizon: beyond,
            }
        }
        ListingState::Active => TtsLabelValues {
            days: CENSOR_HORIZON_DAYS,
            censored: true,
            observed_days: elapsed_days,
            beyond_horizon: false,
        },
    }
}

// ---------------------------------------------------------------------------
// Batch run
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct LabelRunStats {
    pub candidates: usize,
    pub labeled: usize,
    pub skipped_existing: usize,
    pub failed: usize,
}

/// Label every analysis that has a source URL and no label yet, up to the
/// batch cap. Per-candidate failures are logged and skipped; one bad URL
/// never aborts the batch.
pub async fn run_labeler<P: Probe, C: Clock>(
    pool: &SqlitePool,
    prober: &P,
    limiter: &mut HostRateLimiter<C>,
) -> Result<LabelRunStats> {
    let candidates = sqlx::query_as::<_, AnalysisRow>(
        r#"
        SELECT id, source_url, status, created_at
        FROM analyses
        WHERE source_url IS NOT NULL
          AND id NOT IN (SELECT analysis_id FROM tts_labels)
        ORDER BY created_at
        LIMIT ?
        "#,
    )
    .bind(LABEL_BATCH_LIMIT)
    .fetch_all(pool)
    .await?;

    let mut stats = LabelRunStats { candidates: candidates.len(), ..Default::default() };

    for analysis in &candidates {
        let Some(url) = analysis.source_url.as_deref() else { continue };

        let wait = limiter.reserve(&host_of(url));
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let result = prober.probe(url).await;
        let state = classify_probe(&result);
        let label = derive_label(analysis.created_at, now_secs(), state);

        match insert_label(pool, &analysis.id, &label).await {
            Ok(true) => {
                stats.labeled += 1;
                info!(
                    analysis_id = %analysis.id,
                    state = %state,
                    days = label.days,
                    censored = label.censored,
                    "Labeled analysis"
                );
            }
            Ok(false) => stats.skipped_existing += 1,
            Err(e) => {
                stats.failed += 1;
                warn!("Label insert failed for {}: {e}", analysis.id);
            }
        }
    }

    Ok(stats)
}

/// INSERT OR IGNORE so the tts_labels primary key, not this process, is the
/// at-most-one-label guarantee. Returns false when a label already existed.
pub async fn insert_label(
    pool: &SqlitePool,
    analysis_id: &str,
    label: &TtsLabelValues,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO tts_labels
            (analysis_id, days, censored, observed_days, beyond_horizon, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(analysis_id)
    .bind(label.days)
    .bind(label.censored as i64)
    .bind(label.observed_days)
    .bind(label.beyond_horizon as i64)
    .bind(now_secs())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
