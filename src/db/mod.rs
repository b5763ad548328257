pub mod models;

use sqlx::SqlitePool;

use crate::config::DATASET_CANDIDATE_LIMIT;
use crate::error::Result;
use models::CandidateRow;

/// Open the pool and apply embedded migrations.
pub async fn connect(db_path: &str) -> Result<SqlitePool> {
    let pool = SqlitePool::connect(&format!("sqlite:{db_path}?mode=rwc")).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Candidates shared by the dataset builder and the evaluation engine:
/// a source URL, a non-censored time-to-sell label, and a score snapshot.
pub async fn fetch_candidates(pool: &SqlitePool) -> Result<Vec<CandidateRow>> {
    let rows = sqlx::query_as::<_, CandidateRow>(
        r#"
        SELECT a.id AS analysis_id,
               a.source_url AS source_url,
               t.days AS days,
               t.created_at AS label_created_at,
               s.avm_low AS avm_low,
               s.avm_high AS avm_high
        FROM analyses a
        JOIN tts_labels t ON t.analysis_id = a.id AND t.censored = 0
        JOIN score_snapshots s ON s.analysis_id = a.id
        WHERE a.source_url IS NOT NULL
        ORDER BY a.created_at
        LIMIT ?
        "#,
    )
    .bind(DATASET_CANDIDATE_LIMIT)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Most recent observed price for `source_url` at or before `at_or_before`.
/// None when no observation exists in that range.
pub async fn resolve_true_price(
    pool: &SqlitePool,
    source_url: &str,
    at_or_before: i64,
) -> Result<Option<f64>> {
    let price = sqlx::query_scalar::<_, f64>(
        r#"
        SELECT price FROM price_history
        WHERE source_url = ? AND observed_at <= ?
        ORDER BY observed_at DESC
        LIMIT 1
        "#,
    )
    .bind(source_url)
    .bind(at_or_before)
    .fetch_optional(pool)
    .await?;

    Ok(price)
}

/// Feature-snapshot JSON for one analysis, if present.
pub async fn fetch_features_json(
    pool: &SqlitePool,
    analysis_id: &str,
) -> Result<Option<String>> {
    let features = sqlx::query_scalar::<_, String>(
        "SELECT features FROM feature_snapshots WHERE analysis_id = ?",
    )
    .bind(analysis_id)
    .fetch_optional(pool)
    .await?;

    Ok(features)
}
