//! Versioned model artifacts: one JSON file per target per ISO year-week,
//! a merged latest.json pointer, best-effort remote mirroring with an
//! INVALIDATE marker, and an optional downstream cache pointer set.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::config::{Config, StorageConfig};
use crate::error::{AppError, Result};
use crate::types::{Artifact, LatestEntry, TrainedModel};

pub struct ArtifactStore {
    models_dir: PathBuf,
    storage: Option<StorageConfig>,
    cache_url: Option<String>,
    client: reqwest::Client,
}

impl ArtifactStore {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            models_dir: PathBuf::from(&cfg.models_dir),
            storage: cfg.storage.clone(),
            cache_url: cfg.cache_url.clone(),
            client,
        })
    }

    #[cfg(test)]
    fn local_only(models_dir: &std::path::Path) -> Self {
        Self {
            models_dir: models_dir.to_path_buf(),
            storage: None,
            cache_url: None,
            client: reqwest::Client::new(),
        }
    }

    /// Write the artifact for `name`, update the latest pointer, and mirror
    /// remotely when configured and requested. Local write failures are
    /// infrastructure errors and propagate; mirroring and cache failures are
    /// logged and swallowed — the local artifact stays authoritative.
    pub async fn save(&self, name: &str, model: &TrainedModel, upload: bool) -> Result<PathBuf> {
        if let Some(weights) = &model.weights {
            if weights.len() != model.keys.len() + 1 {
                return Err(AppError::Artifact(format!(
                    "{name}: weight vector length {} does not match {} keys + intercept",
                    weights.len(),
                    model.keys.len()
                )));
            }
        }

        std::fs::create_dir_all(&self.models_dir)?;

        let now = now_secs();
        let (year, week) = iso_year_week(now);
        let filename = format!("{name}@{year}-{week:02}.json");
        let path = self.models_dir.join(&filename);

        let artifact = Artifact {
            model: model.weights.clone(),
            keys: model.keys.clone(),
            created_at: now,
            samples: model.samples,
        };
        std::fs::write(&path, serde_json::to_vec_pretty(&artifact)?)?;
        info!(model = name, file = %filename, samples = model.samples, "Artifact written");

        let mut entry = LatestEntry { file: filename.clone(), updated_at: now, remote: None };

        if upload {
            if let Some(remote) = self.mirror(&filename, &artifact).await {
                self.write_invalidate_marker(now)?;
                entry.remote = Some(remote);
            }
        }

        self.merge_latest(name, entry)?;
        self.set_cache_pointer(name, &filename).await;

        Ok(path)
    }

    /// Read-merge-write latest.json so independent trainer runs never erase
    /// each other's pointers.
    fn merge_latest(&self, name: &str, entry: LatestEntry) -> Result<()> {
        let path = self.models_dir.join("latest.json");
        let mut latest: BTreeMap<String, LatestEntry> = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => BTreeMap::new(),
        };
        latest.insert(name.to_string(), entry);
        std::fs::write(&path, serde_json::to_vec_pretty(&latest)?)?;
        Ok(())
    }

    /// PUT the artifact to the configured object storage. Returns the remote
    /// locator on success, None on any failure (logged at warn).
    async fn mirror(&self, filename: &str, artifact: &Artifact) -> Option<String> {
        let storage = self.storage.as_ref()?;
        let url = format!(
            "{}/{}/{}",
            storage.endpoint.trim_end_matches('/'),
            storage.bucket,
            filename
        );

        let body = match serde_json::to_vec(artifact) {
            Ok(b) => b,
            Err(e) => {
                warn!("Artifact serialization for mirror failed: {e}");
                return None;
            }
        };

        let result = self
            .client
            .put(&url)
            .header("x-access-key", &storage.access_key)
            .header("x-access-secret", &storage.secret)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                info!(file = filename, "Artifact mirrored to object storage");
                Some(url)
            }
            Ok(resp) => {
                warn!("Mirror upload for {filename} returned {}", resp.status());
                None
            }
            Err(e) => {
                warn!("Mirror upload for {filename} failed: {e}");
                None
            }
        }
    }

    /// Advisory marker for downstream caches; written only after a
    /// successful mirror. Consumers must not treat its absence as
    /// "no update available".
    fn write_invalidate_marker(&self, now: i64) -> Result<()> {
        std::fs::write(self.models_dir.join("INVALIDATE"), now.to_string())?;
        Ok(())
    }

    /// Best-effort pointer set in the downstream cache; silent no-op when
    /// no CACHE_URL is configured.
    async fn set_cache_pointer(&self, name: &str, filename: &str) {
        let Some(cache_url) = self.cache_url.as_deref() else { return };
        let body = serde_json::json!({ "key": format!("model:{name}"), "value": filename });
        match self.client.post(cache_url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("Cache pointer set for {name} returned {}", resp.status()),
            Err(e) => warn!("Cache pointer set for {name} failed: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// ISO week math
// ---------------------------------------------------------------------------

/// ISO-8601 year and week for a Unix timestamp. The ISO year can differ
/// from the calendar year near January 1st: a week belongs to the year
/// containing its Thursday.
pub fn iso_year_week(unix_secs: i64) -> (i64, u32) {
    let days = unix_secs.div_euclid(86_400);
    // 1970-01-01 was a Thursday; ISO weekday 1 = Monday .. 7 = Sunday.
    let weekday = (days + 3).rem_euclid(7) + 1;
    let thursday = days + (4 - weekday);
    let (year, _, _) = civil_from_days(thursday);
    let jan1 = days_from_civil(year, 1, 1);
    let week = ((thursday - jan1) / 7 + 1) as u32;
    (year, week)
}

/// Days since 1970-01-01 → (year, month, day), proleptic Gregorian.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// (year, month, day) → days since 1970-01-01, proleptic Gregorian.
fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y.rem_euclid(400);
    let mp = (if m > 2 { m - 3 } else { m + 9 }) as i64;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(y: i64, m: u32, d: u32) -> i64 {
        days_from_civil(y, m, d) * 86_400
    }

    #[test]
    fn civil_roundtrip() {
        for &days in &[-1, 0, 1, 10_957, 20_000, 365 * 57] {
            let (y, m, d) = civil_from_days(days);
            assert_eq!(days_from_civil(y, m, d), days);
        }
        assert_eq!(civil_from_days(0), (1970, 1, 1));
    }

    #[test]
    fn iso_week_mid_year() {
        // 2026-08-23 is a Sunday in ISO week 34.
        assert_eq!(iso_year_week(secs(2026, 8, 23)), (2026, 34));
    }

    #[test]
    fn iso_week_year_boundaries() {
        // 2021-01-01 (Friday) belongs to week 53 of 2020.
        assert_eq!(iso_year_week(secs(2021, 1, 1)), (2020, 53));
        // 2025-12-29 (Monday) belongs to week 1 of 2026.
        assert_eq!(iso_year_week(secs(2025, 12, 29)), (2026, 1));
        // 2026-01-01 (Thursday) is week 1 of 2026.
        assert_eq!(iso_year_week(secs(2026, 1, 1)), (2026, 1));
    }

    #[tokio::test]
    async fn save_rejects_mismatched_weight_length() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::local_only(dir.path());
        let model = TrainedModel {
            weights: Some(vec![1.0, 2.0]),
            keys: vec!["area".to_string(), "rooms".to_string()],
            samples: 10,
        };
        assert!(store.save("avm-price", &model, false).await.is_err());
    }

    #[tokio::test]
    async fn save_writes_artifact_and_latest_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::local_only(dir.path());
        let model = TrainedModel {
            weights: Some(vec![100.0, 2.5, -1.0]),
            keys: vec!["area".to_string(), "rooms".to_string()],
            samples: 42,
        };

        let path = store.save("avm-price", &model, false).await.unwrap();
        let artifact: Artifact =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(artifact.keys.len() + 1, artifact.model.as_ref().unwrap().len());
        assert_eq!(artifact.samples, 42);

        let latest: BTreeMap<String, LatestEntry> =
            serde_json::from_slice(&std::fs::read(dir.path().join("latest.json")).unwrap())
                .unwrap();
        assert!(latest["avm-price"].file.starts_with("avm-price@"));
        assert!(latest["avm-price"].remote.is_none());
    }

    #[tokio::test]
    async fn latest_pointer_merge_keeps_other_targets() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::local_only(dir.path());
        let keys = vec!["area".to_string()];

        let avm = TrainedModel { weights: Some(vec![1.0, 2.0]), keys: keys.clone(), samples: 5 };
        let vision = TrainedModel { weights: Some(vec![0.5, 0.1]), keys, samples: 3 };

        store.save("avm-price", &avm, false).await.unwrap();
        store.save("vision-condition", &vision, false).await.unwrap();

        let latest: BTreeMap<String, LatestEntry> =
            serde_json::from_slice(&std::fs::read(dir.path().join("latest.json")).unwrap())
                .unwrap();
        assert_eq!(latest.len(), 2);
        assert!(latest.contains_key("avm-price"));
        assert!(latest.contains_key("vision-condition"));
    }

    #[tokio::test]
    async fn null_model_artifact_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::local_only(dir.path());
        let model = TrainedModel {
            weights: None,
            keys: vec!["area".to_string()],
            samples: 0,
        };
        let path = store.save("tts-days", &model, false).await.unwrap();
        let artifact: Artifact =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(artifact.model.is_none());
    }
}
