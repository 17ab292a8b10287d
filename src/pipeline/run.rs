// src/pipeline/run.rs
//
// Run identity and bookkeeping. A run is one pipeline invocation for one
// camera; its config hash makes "same inputs, same configuration" re-runs
// recognizable for resume.

use crate::error::{EngineError, Result};
use crate::types::Config;
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: String,
    pub camera_id: String,
    pub config_hash: String,
    pub started_at: String,
}

impl RunRecord {
    pub fn new(camera_id: &str, config_hash: &str) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            camera_id: camera_id.to_string(),
            config_hash: config_hash.to_string(),
            started_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Stable hash of the full configuration. Struct field order is fixed and
/// every map in Config is a BTreeMap, so the JSON encoding is canonical.
pub fn config_hash(config: &Config) -> Result<String> {
    let encoded = serde_json::to_string(config)
        .map_err(|e| EngineError::Configuration(format!("config not hashable: {e}")))?;
    let digest = Sha256::digest(encoded.as_bytes());
    Ok(hex::encode(digest))
}

/// End-of-run snapshot reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub camera_id: String,
    pub events_processed: u64,
    pub buckets_emitted: u64,
    pub buckets_skipped: u64,
    pub resumed_from: Option<u64>,
}
