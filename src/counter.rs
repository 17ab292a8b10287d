// src/counter.rs
//
// Tallies a finalized bucket's events per canonical vehicle class. Pure:
// the same bucket and configuration always produce the same CountRecord.

use crate::error::{EngineError, Result};
use crate::types::{Bucket, ClassesConfig, CountRecord, DetectionEvent, UnknownClassPolicy};
use std::collections::BTreeMap;

pub struct Counter {
    class_map: BTreeMap<String, String>,
    policy: UnknownClassPolicy,
    other_class: String,
    /// Template with every reportable class zero-filled, cloned per bucket
    /// so record shape is identical across buckets.
    zero_counts: BTreeMap<String, u64>,
}

impl Counter {
    pub fn new(classes: &ClassesConfig) -> Self {
        let mut zero_counts: BTreeMap<String, u64> =
            classes.map.values().map(|c| (c.clone(), 0)).collect();
        if classes.unknown_policy == UnknownClassPolicy::RouteToOther {
            zero_counts.insert(classes.other_class.clone(), 0);
        }
        Self {
            class_map: classes.map.clone(),
            policy: classes.unknown_policy,
            other_class: classes.other_class.clone(),
            zero_counts,
        }
    }

    pub fn count(&self, bucket: &Bucket, events: &[DetectionEvent]) -> Result<CountRecord> {
        let mut counts = self.zero_counts.clone();
        let mut total = 0u64;
        for event in events {
            let raw = event.class.trim().to_lowercase();
            let target = match self.class_map.get(&raw) {
                Some(target) => target.as_str(),
                None => match self.policy {
                    UnknownClassPolicy::RouteToOther => self.other_class.as_str(),
                    UnknownClassPolicy::Reject => {
                        return Err(EngineError::UnknownVehicleClass {
                            camera_id: event.camera_id.clone(),
                            class: event.class.clone(),
                        });
                    }
                },
            };
            *counts.entry(target.to_string()).or_insert(0) += 1;
            total += 1;
        }
        Ok(CountRecord {
            camera_id: bucket.camera_id.clone(),
            bucket_index: bucket.index,
            counts,
            total,
        })
    }

    /// Number of events in the slice that would route to the "other" class,
    /// used by the orchestrator's unknown-routing metric.
    pub fn routes_unknown(&self, events: &[DetectionEvent]) -> usize {
        if self.policy != UnknownClassPolicy::RouteToOther {
            return 0;
        }
        events
            .iter()
            .filter(|e| !self.class_map.contains_key(&e.class.trim().to_lowercase()))
            .count()
    }
}
