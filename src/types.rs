use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Listing probe outcome
// ---------------------------------------------------------------------------

/// What a listing URL looked like at probe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingState {
    /// Page reachable and contains a sold marker.
    Sold,
    /// 404/410, any other non-2xx status, or a network failure.
    Inaccessible,
    /// 2xx and no sold marker — still on the market.
    Active,
}

impl std::fmt::Display for ListingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ListingState::Sold => "sold",
            ListingState::Inaccessible => "inaccessible",
            ListingState::Active => "active",
        };
        write!(f, "{s}")
    }
}

/// Raw result of one probe: HTTP status if a response arrived, plus body.
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub status: Option<u16>,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Time-to-sell label values
// ---------------------------------------------------------------------------

/// Computed label fields before insertion. `days`/`censored` follow the
/// 120-day clamp; `observed_days` keeps the true elapsed count and
/// `beyond_horizon` distinguishes "sale seen after the horizon" from
/// "still active at probe time".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtsLabelValues {
    pub days: i64,
    pub censored: bool,
    pub observed_days: i64,
    pub beyond_horizon: bool,
}

// ---------------------------------------------------------------------------
// Datasets and trained models
// ---------------------------------------------------------------------------

/// One supervised pair. `x[0]` is always the intercept constant 1.0 and
/// `x[i]` corresponds to `keys[i - 1]` of the vocabulary it was built with.
#[derive(Debug, Clone)]
pub struct DatasetRow {
    pub x: Vec<f64>,
    pub y: f64,
}

/// In-memory result of one model fit, ready for the artifact store.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    /// None when the dataset was empty or every provider was unavailable.
    pub weights: Option<Vec<f64>>,
    pub keys: Vec<String>,
    pub samples: usize,
}

// ---------------------------------------------------------------------------
// Artifact file format
// ---------------------------------------------------------------------------

/// On-disk artifact: `{ model, keys, createdAt, samples }`. The key order is
/// part of the contract — consumers must build vectors in exactly this order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub model: Option<Vec<f64>>,
    pub keys: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    pub samples: usize,
}

/// One entry in latest.json, merged per target across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestEntry {
    pub file: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
    /// Remote locator when the artifact was mirrored to object storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}
