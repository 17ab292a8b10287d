// src/source.rs
//
// Pluggable event sources. The aggregation core only sees the EventSource
// trait; the concrete detector behind it (recorded JSONL events or the
// deterministic stub) is interchangeable.

use crate::error::{EngineError, Result};
use crate::types::{Config, DetectionEvent, DummyConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

pub trait EventSource {
    /// Next event in chronological order, or `Ok(None)` at end of stream.
    fn next_event(&mut self) -> Result<Option<DetectionEvent>>;
}

/// Reads one JSON-encoded DetectionEvent per line. This is the binary's
/// input format for recorded detector output.
pub struct JsonlEventSource {
    reader: BufReader<File>,
    path: String,
    line_no: usize,
}

impl JsonlEventSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            EngineError::Source(format!("cannot open {}: {e}", path.display()))
        })?;
        Ok(Self {
            reader: BufReader::new(file),
            path: path.display().to_string(),
            line_no: 0,
        })
    }
}

impl EventSource for JsonlEventSource {
    fn next_event(&mut self) -> Result<Option<DetectionEvent>> {
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| EngineError::Source(format!("read {}: {e}", self.path)))?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let event: DetectionEvent = serde_json::from_str(trimmed).map_err(|e| {
                EngineError::Source(format!("{}:{}: bad event: {e}", self.path, self.line_no))
            })?;
            return Ok(Some(event));
        }
    }
}

/// Deterministic stub detector: synthesizes per-frame detections from a
/// seeded RNG at a fixed sampling cadence. The same seed and settings always
/// yield the same event sequence.
pub struct DummyEventSource {
    camera_id: String,
    classes: Vec<String>,
    max_detections_per_frame: u32,
    rng: StdRng,
    frame_interval: f64,
    frame: u64,
    total_frames: u64,
    emit: bool,
    pending: VecDeque<DetectionEvent>,
}

impl DummyEventSource {
    pub fn new(camera_id: &str, classes: Vec<String>, dummy: &DummyConfig) -> Self {
        let frame_interval = 1.0 / dummy.sampling_fps;
        let total_frames = (dummy.duration_seconds * dummy.sampling_fps).floor() as u64;
        debug!(
            camera_id,
            seed = dummy.seed,
            total_frames,
            "dummy event source ready"
        );
        Self {
            camera_id: camera_id.to_string(),
            classes,
            max_detections_per_frame: dummy.max_detections_per_frame,
            rng: StdRng::seed_from_u64(dummy.seed),
            frame_interval,
            frame: 0,
            total_frames,
            emit: dummy.mode == "random",
            pending: VecDeque::new(),
        }
    }
}

impl EventSource for DummyEventSource {
    fn next_event(&mut self) -> Result<Option<DetectionEvent>> {
        if !self.emit || self.classes.is_empty() {
            return Ok(None);
        }
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.frame >= self.total_frames {
                return Ok(None);
            }
            let timestamp = self.frame as f64 * self.frame_interval;
            let count = self.rng.gen_range(0..=self.max_detections_per_frame);
            for _ in 0..count {
                let class = self.classes[self.rng.gen_range(0..self.classes.len())].clone();
                let confidence = self.rng.gen_range(0.3..0.95);
                self.pending.push_back(DetectionEvent {
                    camera_id: self.camera_id.clone(),
                    timestamp,
                    class,
                    confidence,
                });
            }
            self.frame += 1;
        }
    }
}

/// Builds the configured source for one camera. `path` is the recorded
/// event file and is required for the jsonl detector.
pub fn create_source(
    config: &Config,
    camera_id: &str,
    path: Option<&Path>,
) -> Result<Box<dyn EventSource>> {
    match config.detector.name.as_str() {
        "jsonl" => {
            let path = path.ok_or_else(|| {
                EngineError::Source(format!("no event file supplied for camera {camera_id}"))
            })?;
            Ok(Box::new(JsonlEventSource::open(path)?))
        }
        "dummy" => {
            // Canonical classes only; the stub never emits unmapped labels.
            let classes: Vec<String> = config
                .classes
                .map
                .values()
                .cloned()
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();
            Ok(Box::new(DummyEventSource::new(
                camera_id,
                classes,
                &config.detector.dummy,
            )))
        }
        other => Err(EngineError::Configuration(format!(
            "unsupported detector '{other}'"
        ))),
    }
}
