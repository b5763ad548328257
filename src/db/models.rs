//! Row types matching migrations/0001_init.sql, used with sqlx::query_as.

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnalysisRow {
    pub id: String,
    pub source_url: Option<String>,
    pub status: String,
    pub created_at: i64,
}

/// Joined view used by both the dataset builder and the evaluator:
/// analyses with a non-censored label and a persisted score snapshot.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CandidateRow {
    pub analysis_id: String,
    pub source_url: String,
    pub days: i64,
    pub label_created_at: i64,
    pub avm_low: Option<f64>,
    pub avm_high: Option<f64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConditionLabelRow {
    pub analysis_id: String,
    pub score: f64,
}
