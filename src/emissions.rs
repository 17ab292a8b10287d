// src/emissions.rs
//
// Converts per-class counts into a CO2 mass estimate for the bucket, with a
// symmetric sensitivity interval. Stateless and pure given its inputs.

use crate::error::{EngineError, Result};
use crate::types::{CountRecord, EmissionRecord, EmissionsConfig};
use std::collections::BTreeMap;

pub struct EmissionEstimator {
    /// kg CO2 per vehicle per minute.
    factors: BTreeMap<String, f64>,
    sensitivity: f64,
    bucket_minutes: f64,
}

impl EmissionEstimator {
    pub fn new(emissions: &EmissionsConfig, bucket_seconds: u32) -> Self {
        Self {
            factors: emissions.factors.clone(),
            sensitivity: emissions.sensitivity,
            bucket_minutes: f64::from(bucket_seconds) / 60.0,
        }
    }

    pub fn estimate(&self, counts: &CountRecord) -> Result<EmissionRecord> {
        let mut per_minute = 0.0;
        for (class, count) in &counts.counts {
            if *count == 0 {
                continue;
            }
            // Fail closed: a counted class without an explicit factor is a
            // configuration error, never an implicit zero.
            let factor = self.factors.get(class).ok_or_else(|| {
                EngineError::Configuration(format!(
                    "no emission factor configured for counted class '{class}'"
                ))
            })?;
            per_minute += *count as f64 * factor;
        }
        let estimated = per_minute * self.bucket_minutes;
        Ok(EmissionRecord {
            camera_id: counts.camera_id.clone(),
            bucket_index: counts.bucket_index,
            estimated_co2_kg: estimated,
            co2_kg_min: estimated * (1.0 - self.sensitivity),
            co2_kg_max: estimated * (1.0 + self.sensitivity),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator(bucket_seconds: u32, sensitivity: f64) -> EmissionEstimator {
        let mut factors = BTreeMap::new();
        factors.insert("car".to_string(), 0.05);
        factors.insert("truck".to_string(), 0.15);
        EmissionEstimator::new(
            &EmissionsConfig {
                factors,
                sensitivity,
            },
            bucket_seconds,
        )
    }

    fn counts(pairs: &[(&str, u64)]) -> CountRecord {
        let counts: BTreeMap<String, u64> =
            pairs.iter().map(|(c, n)| (c.to_string(), *n)).collect();
        let total = counts.values().sum();
        CountRecord {
            camera_id: "CAM_001".to_string(),
            bucket_index: 0,
            counts,
            total,
        }
    }

    #[test]
    fn test_worked_example_bucket_zero() {
        // 2 cars at 0.05 kg/min over a 60s bucket, +/-10%.
        let record = estimator(60, 0.1).estimate(&counts(&[("car", 2)])).unwrap();
        assert!((record.estimated_co2_kg - 0.1).abs() < 1e-12);
        assert!((record.co2_kg_min - 0.09).abs() < 1e-12);
        assert!((record.co2_kg_max - 0.11).abs() < 1e-12);
    }

    #[test]
    fn test_bucket_duration_scales_estimate() {
        // Same counts over a 30s bucket emit half as much.
        let record = estimator(30, 0.1).estimate(&counts(&[("car", 2)])).unwrap();
        assert!((record.estimated_co2_kg - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_linearity_in_counts() {
        let est = estimator(60, 0.2);
        let base = est.estimate(&counts(&[("car", 3), ("truck", 2)])).unwrap();
        let scaled = est.estimate(&counts(&[("car", 9), ("truck", 6)])).unwrap();
        assert!((scaled.estimated_co2_kg - 3.0 * base.estimated_co2_kg).abs() < 1e-9);
    }

    #[test]
    fn test_interval_brackets_estimate() {
        let record = estimator(60, 0.25)
            .estimate(&counts(&[("truck", 4)]))
            .unwrap();
        assert!(record.co2_kg_min <= record.estimated_co2_kg);
        assert!(record.estimated_co2_kg <= record.co2_kg_max);
        assert!(record.co2_kg_min >= 0.0);
    }

    #[test]
    fn test_zero_counts_produce_zero_interval() {
        let record = estimator(60, 0.1).estimate(&counts(&[("car", 0)])).unwrap();
        assert_eq!(record.estimated_co2_kg, 0.0);
        assert_eq!(record.co2_kg_min, 0.0);
        assert_eq!(record.co2_kg_max, 0.0);
    }

    #[test]
    fn test_missing_factor_for_counted_class_fails_closed() {
        let err = estimator(60, 0.1)
            .estimate(&counts(&[("bus", 1)]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
