//! End-to-end pipeline tests against an in-memory SQLite database with the
//! embedded migrations applied.

use std::time::Duration;

use sqlx::SqlitePool;

use avm_pipeline::config::Config;
use avm_pipeline::dataset;
use avm_pipeline::db;
use avm_pipeline::evaluator::run_evaluation;
use avm_pipeline::labeler::{run_labeler, Probe};
use avm_pipeline::ratelimit::HostRateLimiter;
use avm_pipeline::trainer::run_training;
use avm_pipeline::types::{Artifact, ProbeResult};
use avm_pipeline::vision::{run_vision_training, VisionRunOptions};

/// In-memory SQLite pinned to one connection — every pooled connection to
/// `sqlite::memory:` would otherwise get its own empty database.
async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn local_config(models_dir: &std::path::Path) -> Config {
    Config {
        log_level: "info".to_string(),
        db_path: ":memory:".to_string(),
        models_dir: models_dir.to_string_lossy().into_owned(),
        inference_url: None,
        gbm_trainer_url: None,
        storage: None,
        cache_url: None,
    }
}

const DAY: i64 = 86_400;

async fn insert_analysis(pool: &SqlitePool, id: &str, url: &str, created_at: i64) {
    sqlx::query("INSERT INTO analyses (id, source_url, status, created_at) VALUES (?, ?, 'active', ?)")
        .bind(id)
        .bind(url)
        .bind(created_at)
        .execute(pool)
        .await
        .unwrap();
}

async fn insert_features(pool: &SqlitePool, id: &str, features: &str, created_at: i64) {
    sqlx::query("INSERT INTO feature_snapshots (analysis_id, features, created_at) VALUES (?, ?, ?)")
        .bind(id)
        .bind(features)
        .bind(created_at)
        .execute(pool)
        .await
        .unwrap();
}

async fn insert_price(pool: &SqlitePool, url: &str, price: f64, observed_at: i64) {
    sqlx::query("INSERT INTO price_history (source_url, price, observed_at) VALUES (?, ?, ?)")
        .bind(url)
        .bind(price)
        .bind(observed_at)
        .execute(pool)
        .await
        .unwrap();
}

async fn insert_label(pool: &SqlitePool, id: &str, days: i64, censored: bool, created_at: i64) {
    sqlx::query(
        r#"
        INSERT INTO tts_labels
            (analysis_id, days, censored, observed_days, beyond_horizon, created_at)
        VALUES (?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(id)
    .bind(days)
    .bind(censored as i64)
    .bind(days)
    .bind(created_at)
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_score(pool: &SqlitePool, id: &str, low: f64, high: f64, created_at: i64) {
    sqlx::query(
        r#"
        INSERT INTO score_snapshots (analysis_id, avm_low, avm_high, avm_mid, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(low)
    .bind(high)
    .bind((low + high) / 2.0)
    .bind(created_at)
    .execute(pool)
    .await
    .unwrap();
}

// ---------------------------------------------------------------------------
// Labeler
// ---------------------------------------------------------------------------

struct StubProbe {
    status: Option<u16>,
    body: String,
}

impl Probe for StubProbe {
    async fn probe(&self, _url: &str) -> ProbeResult {
        ProbeResult { status: self.status, body: self.body.clone() }
    }
}

#[tokio::test]
async fn labeler_is_idempotent_across_runs() {
    let pool = test_pool().await;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;

    // Distinct hosts so the rate limiter never sleeps.
    insert_analysis(&pool, "a1", "https://h1.example.ro/ap/1", now - 50 * DAY).await;
    insert_analysis(&pool, "a2", "https://h2.example.ro/ap/2", now - 10 * DAY).await;

    let prober = StubProbe { status: Some(200), body: "Apartament vândut".to_string() };
    let mut limiter = HostRateLimiter::new(Duration::from_millis(0));

    let first = run_labeler(&pool, &prober, &mut limiter).await.unwrap();
    assert_eq!(first.candidates, 2);
    assert_eq!(first.labeled, 2);

    let second = run_labeler(&pool, &prober, &mut limiter).await.unwrap();
    assert_eq!(second.candidates, 0);
    assert_eq!(second.labeled, 0);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tts_labels")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);

    let days: i64 = sqlx::query_scalar("SELECT days FROM tts_labels WHERE analysis_id = 'a1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(days, 50);
}

#[tokio::test]
async fn active_listing_gets_right_censored_label() {
    let pool = test_pool().await;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;

    insert_analysis(&pool, "a1", "https://h1.example.ro/ap/1", now - 10 * DAY).await;

    let prober = StubProbe { status: Some(200), body: "3 camere, etaj 2".to_string() };
    let mut limiter = HostRateLimiter::new(Duration::from_millis(0));
    run_labeler(&pool, &prober, &mut limiter).await.unwrap();

    let (days, censored): (i64, i64) =
        sqlx::query_as("SELECT days, censored FROM tts_labels WHERE analysis_id = 'a1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(days, 120);
    assert_eq!(censored, 1);
}

// ---------------------------------------------------------------------------
// Dataset builder
// ---------------------------------------------------------------------------

#[tokio::test]
async fn true_price_is_last_observation_before_label() {
    let pool = test_pool().await;
    let url = "https://h1.example.ro/ap/1";

    // Prices 200000 @ t1, 195000 @ t2; label created at t3 > t2.
    insert_price(&pool, url, 200_000.0, 1_000).await;
    insert_price(&pool, url, 195_000.0, 2_000).await;
    insert_price(&pool, url, 190_000.0, 9_000).await; // after the label, ignored

    let price = db::resolve_true_price(&pool, url, 3_000).await.unwrap();
    assert_eq!(price, Some(195_000.0));

    assert_eq!(db::resolve_true_price(&pool, url, 500).await.unwrap(), None);
}

#[tokio::test]
async fn avm_dataset_drops_candidates_without_ground_truth() {
    let pool = test_pool().await;

    insert_analysis(&pool, "a1", "https://h1.example.ro/ap/1", 100).await;
    insert_analysis(&pool, "a2", "https://h2.example.ro/ap/2", 100).await;
    insert_features(&pool, "a1", r#"{"area": 64.5, "rooms": 3}"#, 100).await;
    insert_features(&pool, "a2", r#"{"area": 80.0, "rooms": 4}"#, 100).await;
    insert_label(&pool, "a1", 50, false, 3_000).await;
    insert_label(&pool, "a2", 30, false, 3_000).await;
    insert_score(&pool, "a1", 180_000.0, 210_000.0, 3_000).await;
    insert_score(&pool, "a2", 100_000.0, 120_000.0, 3_000).await;

    // Only a1 has a price observation before its label.
    insert_price(&pool, "https://h1.example.ro/ap/1", 195_000.0, 2_000).await;

    let keys = dataset::collect_feature_keys(&pool).await.unwrap();
    assert_eq!(keys, vec!["area".to_string(), "rooms".to_string()]);

    let candidates = db::fetch_candidates(&pool).await.unwrap();
    assert_eq!(candidates.len(), 2);

    let avm = dataset::build_avm_dataset(&pool, &keys, &candidates).await.unwrap();
    assert_eq!(avm.len(), 1);
    assert_eq!(avm[0].y, 195_000.0);
    assert_eq!(avm[0].x, vec![1.0, 64.5, 3.0]);

    let tts = dataset::build_tts_dataset(&pool, &keys, &candidates).await.unwrap();
    assert_eq!(tts.len(), 2);
    assert_eq!(tts[0].y, 50.0);
}

#[tokio::test]
async fn censored_labels_are_not_candidates() {
    let pool = test_pool().await;

    insert_analysis(&pool, "a1", "https://h1.example.ro/ap/1", 100).await;
    insert_features(&pool, "a1", r#"{"area": 64.5}"#, 100).await;
    insert_label(&pool, "a1", 120, true, 3_000).await;
    insert_score(&pool, "a1", 180_000.0, 210_000.0, 3_000).await;

    let candidates = db::fetch_candidates(&pool).await.unwrap();
    assert!(candidates.is_empty());
}

// ---------------------------------------------------------------------------
// Trainer + artifact store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn training_run_writes_consistent_artifacts() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let cfg = local_config(dir.path());

    // Six candidates, two features, all with ground-truth prices: enough
    // rows for a stable normal-equations fit (n >= p).
    for i in 0..6 {
        let id = format!("a{i}");
        let url = format!("https://h{i}.example.ro/ap/{i}");
        insert_analysis(&pool, &id, &url, 100).await;
        insert_features(
            &pool,
            &id,
            &format!(r#"{{"area": {}, "rooms": {}}}"#, 40.0 + 10.0 * i as f64, 1 + i % 3),
            100 + i,
        )
        .await;
        insert_label(&pool, &id, 20 + 5 * i, false, 3_000).await;
        insert_score(&pool, &id, 90_000.0, 110_000.0, 3_000).await;
        insert_price(&pool, &url, 80_000.0 + 15_000.0 * i as f64, 2_000).await;
    }

    let stats = run_training(&pool, &cfg, false).await.unwrap();
    assert_eq!(stats.avm_samples, 6);
    assert_eq!(stats.tts_samples, 6);
    assert_eq!(stats.artifacts_written, 2);

    let latest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("latest.json")).unwrap()).unwrap();
    for name in ["avm-price", "tts-days"] {
        let file = latest[name]["file"].as_str().unwrap();
        let artifact: Artifact =
            serde_json::from_slice(&std::fs::read(dir.path().join(file)).unwrap()).unwrap();
        let weights = artifact.model.expect("ridge fit should succeed");
        assert_eq!(weights.len(), artifact.keys.len() + 1);
        assert_eq!(artifact.samples, 6);
    }

    // No mirror happened, so no INVALIDATE marker.
    assert!(!dir.path().join("INVALIDATE").exists());
}

#[tokio::test]
async fn stored_artifact_predicts_training_targets() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let cfg = local_config(dir.path());

    // Noiseless linear targets: price = 1000 + 2000*area + 500*rooms. The
    // stored weights, applied to vectors rebuilt from the artifact's own
    // keys, must reproduce them.
    let mut expected = Vec::new();
    for i in 0..6 {
        let id = format!("a{i}");
        let url = format!("https://h{i}.example.ro/ap/{i}");
        let area = 40.0 + 10.0 * i as f64;
        let rooms = (1 + i % 3) as f64;
        let price = 1_000.0 + 2_000.0 * area + 500.0 * rooms;
        insert_analysis(&pool, &id, &url, 100).await;
        insert_features(&pool, &id, &format!(r#"{{"area": {area}, "rooms": {rooms}}}"#), 100 + i)
            .await;
        insert_label(&pool, &id, 30, false, 3_000).await;
        insert_score(&pool, &id, price - 5_000.0, price + 5_000.0, 3_000).await;
        insert_price(&pool, &url, price, 2_000).await;
        expected.push((id, price));
    }

    run_training(&pool, &cfg, false).await.unwrap();

    let latest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("latest.json")).unwrap()).unwrap();
    let file = latest["avm-price"]["file"].as_str().unwrap();
    let artifact: Artifact =
        serde_json::from_slice(&std::fs::read(dir.path().join(file)).unwrap()).unwrap();
    let weights = artifact.model.expect("noiseless fit should produce weights");

    for (id, price) in &expected {
        let x = dataset::candidate_vector(&pool, &artifact.keys, id).await.unwrap();
        let pred: f64 = x.iter().zip(&weights).map(|(a, b)| a * b).sum();
        assert!(
            (pred - price).abs() / price < 1e-3,
            "prediction {pred} too far from target {price}"
        );
    }
}

#[tokio::test]
async fn training_run_with_no_candidates_writes_nothing() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let cfg = local_config(dir.path());

    let stats = run_training(&pool, &cfg, false).await.unwrap();
    assert_eq!(stats.artifacts_written, 0);
    assert!(!dir.path().join("latest.json").exists());
}

// ---------------------------------------------------------------------------
// Vision trainer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn vision_sample_limit_flag_governs_true_label_count() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let cfg = local_config(dir.path());

    // More labels than the default sample size of 500.
    for i in 0..505i64 {
        let id = format!("c{i}");
        insert_analysis(&pool, &id, &format!("https://h.example.ro/ap/{i}"), 100 + i).await;
        insert_features(&pool, &id, &format!(r#"{{"area": {}}}"#, 40 + i % 60), 100 + i).await;
        sqlx::query(
            "INSERT INTO condition_labels (analysis_id, score, created_at) VALUES (?, ?, ?)",
        )
        .bind(&id)
        .bind(0.5 + (i % 2) as f64 * 0.2)
        .bind(100 + i)
        .execute(&pool)
        .await
        .unwrap();
    }

    // No inference URL and no photos: the run trains on true labels only.
    let mut opts = VisionRunOptions { threshold: 0.9, take: 10, sample_limit: 2, upload: false };
    let stats = run_vision_training(&pool, &cfg, &opts).await.unwrap();
    assert_eq!(stats.true_labels, 2);

    opts.sample_limit = 505;
    let stats = run_vision_training(&pool, &cfg, &opts).await.unwrap();
    assert_eq!(stats.true_labels, 505);
    assert_eq!(stats.trained_samples, 505);
}

// ---------------------------------------------------------------------------
// Evaluation engine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn evaluation_scores_interval_and_persists_metrics() {
    let pool = test_pool().await;
    let url = "https://h1.example.ro/ap/1";

    insert_analysis(&pool, "a1", url, 100).await;
    insert_label(&pool, "a1", 50, false, 3_000).await;
    insert_score(&pool, "a1", 180_000.0, 210_000.0, 3_000).await;
    insert_price(&pool, url, 195_000.0, 2_000).await;

    let summary = run_evaluation(&pool).await.unwrap();
    assert_eq!(summary.sample_count, 1);
    // avm_mid = 195000 exactly matches the realized price.
    assert!(summary.mdape.abs() < 1e-12);
    assert_eq!(summary.pi_coverage, 1.0);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM model_metrics")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);

    // Metrics are append-only: a second run adds a row, never updates.
    run_evaluation(&pool).await.unwrap();
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM model_metrics")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 2);
}

#[tokio::test]
async fn evaluation_of_empty_set_reports_exact_zeros() {
    let pool = test_pool().await;

    let summary = run_evaluation(&pool).await.unwrap();
    assert_eq!(summary.sample_count, 0);
    assert_eq!(summary.mdape, 0.0);
    assert_eq!(summary.pi_coverage, 0.0);
}

#[tokio::test]
async fn evaluation_flags_uncovered_intervals() {
    let pool = test_pool().await;
    let url = "https://h1.example.ro/ap/1";

    insert_analysis(&pool, "a1", url, 100).await;
    insert_label(&pool, "a1", 50, false, 3_000).await;
    insert_score(&pool, "a1", 100_000.0, 120_000.0, 3_000).await;
    insert_price(&pool, url, 150_000.0, 2_000).await;

    let summary = run_evaluation(&pool).await.unwrap();
    assert_eq!(summary.sample_count, 1);
    assert_eq!(summary.pi_coverage, 0.0);
    // |110000 - 150000| / 150000
    assert!((summary.mdape - 40_000.0 / 150_000.0).abs() < 1e-12);
}
