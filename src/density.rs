// src/density.rs
//
// Normalizes per-bucket totals into a [0,1] congestion score. Fixed mode is
// stateless; rolling mode carries the camera's historical maximum as explicit
// injected state, which is why buckets must be scored in index order.

use crate::types::{CountRecord, DensityLevel, DensityRecord};

const LOW_MAX: f64 = 0.33;
const MEDIUM_MAX: f64 = 0.66;

/// Rolling reference state for one camera. Seeded once at run start from
/// persisted history; monotonically non-decreasing across buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingState {
    max_total: u64,
}

impl RollingState {
    /// `history` is the largest bucket total ever persisted for the camera
    /// (0 when none). `default_reference_max` keeps the denominator >= 1
    /// until real traffic establishes a maximum.
    pub fn seeded(history: u64, default_reference_max: u64) -> Self {
        Self {
            max_total: history.max(default_reference_max),
        }
    }

    fn observe(&mut self, total: u64) -> u64 {
        self.max_total = self.max_total.max(total);
        self.max_total
    }

    pub fn max_total(&self) -> u64 {
        self.max_total
    }
}

enum Reference {
    Fixed(u64),
    Rolling(RollingState),
}

pub struct DensityScorer {
    reference: Reference,
}

impl DensityScorer {
    /// Fixed mode; `reference_max` already resolved per camera (override or
    /// global default), validated >= 1 at configuration time.
    pub fn fixed(reference_max: u64) -> Self {
        Self {
            reference: Reference::Fixed(reference_max),
        }
    }

    pub fn rolling(state: RollingState) -> Self {
        Self {
            reference: Reference::Rolling(state),
        }
    }

    /// Score one bucket. In rolling mode the bucket's own total is folded
    /// into the maximum before scoring, so a record that sets a new maximum
    /// scores exactly 1.0; earlier records are never rewritten.
    pub fn score(&mut self, counts: &CountRecord) -> DensityRecord {
        let reference_max = match &mut self.reference {
            Reference::Fixed(max) => *max,
            Reference::Rolling(state) => state.observe(counts.total),
        };
        let score = (counts.total as f64 / reference_max as f64).min(1.0);
        DensityRecord {
            camera_id: counts.camera_id.clone(),
            bucket_index: counts.bucket_index,
            density_score: score,
            level: level_for(score),
            reference_max,
        }
    }

    pub fn rolling_state(&self) -> Option<RollingState> {
        match &self.reference {
            Reference::Fixed(_) => None,
            Reference::Rolling(state) => Some(*state),
        }
    }
}

fn level_for(score: f64) -> DensityLevel {
    if score <= LOW_MAX {
        DensityLevel::Low
    } else if score <= MEDIUM_MAX {
        DensityLevel::Medium
    } else {
        DensityLevel::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn counts(bucket_index: u64, total: u64) -> CountRecord {
        CountRecord {
            camera_id: "CAM_001".to_string(),
            bucket_index,
            counts: BTreeMap::new(),
            total,
        }
    }

    #[test]
    fn test_fixed_mode_scores_against_constant() {
        let mut scorer = DensityScorer::fixed(10);
        let record = scorer.score(&counts(0, 2));
        assert_eq!(record.density_score, 0.2);
        assert_eq!(record.level, DensityLevel::Low);
        assert_eq!(record.reference_max, 10);
    }

    #[test]
    fn test_score_clamped_to_one() {
        let mut scorer = DensityScorer::fixed(5);
        let record = scorer.score(&counts(0, 12));
        assert_eq!(record.density_score, 1.0);
        assert_eq!(record.level, DensityLevel::High);
    }

    #[test]
    fn test_total_equal_to_reference_is_high() {
        let mut scorer = DensityScorer::fixed(7);
        let record = scorer.score(&counts(0, 7));
        assert_eq!(record.density_score, 1.0);
        assert_eq!(record.level, DensityLevel::High);
    }

    #[test]
    fn test_zero_total_is_low() {
        let mut scorer = DensityScorer::rolling(RollingState::seeded(0, 30));
        let record = scorer.score(&counts(0, 0));
        assert_eq!(record.density_score, 0.0);
        assert_eq!(record.level, DensityLevel::Low);
    }

    #[test]
    fn test_level_thresholds() {
        let mut scorer = DensityScorer::fixed(100);
        assert_eq!(scorer.score(&counts(0, 33)).level, DensityLevel::Low);
        assert_eq!(scorer.score(&counts(1, 34)).level, DensityLevel::Medium);
        assert_eq!(scorer.score(&counts(2, 66)).level, DensityLevel::Medium);
        assert_eq!(scorer.score(&counts(3, 67)).level, DensityLevel::High);
    }

    #[test]
    fn test_rolling_reference_is_monotonic() {
        let mut scorer = DensityScorer::rolling(RollingState::seeded(8, 1));
        let totals = [3, 12, 5, 20, 7];
        let mut previous = 0;
        for (i, total) in totals.into_iter().enumerate() {
            let record = scorer.score(&counts(i as u64, total));
            assert!(record.reference_max >= previous);
            previous = record.reference_max;
        }
        assert_eq!(previous, 20);
    }

    #[test]
    fn test_new_maximum_scores_one_without_rewriting_history() {
        let mut scorer = DensityScorer::rolling(RollingState::seeded(0, 4));
        let first = scorer.score(&counts(0, 2));
        assert_eq!(first.reference_max, 4);
        // Bucket 1 sets a new max and itself scores 1.0 against it.
        let second = scorer.score(&counts(1, 10));
        assert_eq!(second.reference_max, 10);
        assert_eq!(second.density_score, 1.0);
        // First record is untouched by construction; the new reference only
        // applies from bucket 1 onward.
        assert_eq!(first.reference_max, 4);
    }

    #[test]
    fn test_seed_prefers_history_over_default() {
        let state = RollingState::seeded(50, 30);
        assert_eq!(state.max_total(), 50);
        let state = RollingState::seeded(0, 30);
        assert_eq!(state.max_total(), 30);
    }
}
