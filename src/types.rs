// src/types.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bucket_seconds: u32,
    pub classes: ClassesConfig,
    pub detector: DetectorConfig,
    pub density: DensityConfig,
    pub emissions: EmissionsConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Vehicle class mapping: raw detector labels -> canonical class names.
/// Keys and values are normalized to lowercase at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassesConfig {
    pub map: BTreeMap<String, String>,
    pub unknown_policy: UnknownClassPolicy,
    #[serde(default = "default_other_class")]
    pub other_class: String,
}

fn default_other_class() -> String {
    "other".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownClassPolicy {
    RouteToOther,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub name: String,
    #[serde(default)]
    pub dummy: DummyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DummyConfig {
    pub mode: String,
    pub max_detections_per_frame: u32,
    pub seed: u64,
    pub sampling_fps: f64,
    pub duration_seconds: f64,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            mode: "none".to_string(),
            max_detections_per_frame: 5,
            seed: 42,
            sampling_fps: 2.0,
            duration_seconds: 120.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DensityMode {
    Fixed,
    Rolling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityConfig {
    pub mode: DensityMode,
    /// Denominator used when no per-camera override (fixed mode) or no
    /// persisted history (rolling mode) applies. Must be >= 1.
    pub default_reference_max: u64,
    #[serde(default)]
    pub reference_max_by_camera: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmissionsConfig {
    /// kg CO2 per vehicle per minute, keyed by canonical class name.
    pub factors: BTreeMap<String, f64>,
    /// Symmetric interval half-width as a fraction: 0.1 => +/-10%.
    pub sensitivity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub db_path: String,
    pub input_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// One per-frame detection from the upstream detector. Timestamps are
/// seconds from run start and must arrive non-decreasing per camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub camera_id: String,
    pub timestamp: f64,
    pub class: String,
    pub confidence: f64,
}

/// A closed, fixed-duration time window for one camera.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub camera_id: String,
    pub index: u64,
    pub start_time: f64,
    pub end_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountRecord {
    pub camera_id: String,
    pub bucket_index: u64,
    /// Zero-filled for every configured class so record shape is stable.
    pub counts: BTreeMap<String, u64>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DensityLevel {
    Low,
    Medium,
    High,
}

impl DensityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DensityLevel::Low => "low",
            DensityLevel::Medium => "medium",
            DensityLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DensityRecord {
    pub camera_id: String,
    pub bucket_index: u64,
    pub density_score: f64,
    pub level: DensityLevel,
    pub reference_max: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmissionRecord {
    pub camera_id: String,
    pub bucket_index: u64,
    pub estimated_co2_kg: f64,
    pub co2_kg_min: f64,
    pub co2_kg_max: f64,
}

/// Everything derived from one closed bucket. Produced atomically, then
/// immutable; the sink upserts all of it under one (camera, bucket) key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketRecords {
    pub bucket: Bucket,
    pub counts: CountRecord,
    pub density: DensityRecord,
    pub emissions: EmissionRecord,
}
