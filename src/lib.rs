pub mod backtest;
pub mod buckets;
pub mod calibration;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod expected_value;
pub mod outcome;
pub mod pipeline;
pub mod prediction_log;
pub mod probability;
pub mod ranking;
pub mod record;
pub mod report_export;
pub mod store;
pub mod synthetic;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use store::PredictionStore;
