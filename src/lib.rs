//! Valuation-model training, labeling, and evaluation pipeline for a
//! real-estate market-intelligence service. Four scheduled batch jobs share
//! this library: time-to-sell labeling, price/TTS model training,
//! vision-condition pseudo-label training, and deployed-model evaluation.

pub mod artifacts;
pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod evaluator;
pub mod labeler;
pub mod ratelimit;
pub mod solver;
pub mod trainer;
pub mod types;
pub mod vision;
