// src/error.rs

use thiserror::Error;

/// Errors raised by the aggregation engine. Every failure either aborts the
/// run with one of these or is resolved by an explicit configured policy.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(
        "out-of-order event for camera {camera_id}: timestamp {timestamp:.3}s \
         falls before open bucket {bucket_index}"
    )]
    OutOfOrderEvent {
        camera_id: String,
        timestamp: f64,
        bucket_index: u64,
    },

    #[error("unknown vehicle class '{class}' for camera {camera_id}")]
    UnknownVehicleClass { camera_id: String, class: String },

    #[error("sink write failed: {0}")]
    SinkWrite(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("event source failed: {0}")]
    Source(String),
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::SinkWrite(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
