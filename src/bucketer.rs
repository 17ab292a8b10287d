// src/bucketer.rs
//
// Partitions one camera's chronological event stream into fixed-duration,
// contiguous buckets. Buckets close the moment an event for a later bucket
// arrives; empty buckets are still emitted so the series has no gaps.

use crate::error::{EngineError, Result};
use crate::types::{Bucket, DetectionEvent};

/// A closed bucket together with the events that fell inside it.
#[derive(Debug, Clone)]
pub struct FinalizedBucket {
    pub bucket: Bucket,
    pub events: Vec<DetectionEvent>,
}

pub struct Bucketer {
    camera_id: String,
    bucket_seconds: f64,
    current_index: u64,
    current_events: Vec<DetectionEvent>,
    saw_event: bool,
}

impl Bucketer {
    pub fn new(camera_id: &str, bucket_seconds: u32) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            bucket_seconds: f64::from(bucket_seconds),
            current_index: 0,
            current_events: Vec::new(),
            saw_event: false,
        }
    }

    /// Assign one event; returns every bucket this event finalized, in index
    /// order. An event belonging to an already-closed bucket is a hard error,
    /// never reordered or dropped.
    pub fn feed(&mut self, event: DetectionEvent) -> Result<Vec<FinalizedBucket>> {
        if event.camera_id != self.camera_id {
            return Err(EngineError::Source(format!(
                "event for camera {} fed to bucketer for camera {}",
                event.camera_id, self.camera_id
            )));
        }
        if !event.timestamp.is_finite() || event.timestamp < 0.0 {
            return Err(EngineError::OutOfOrderEvent {
                camera_id: self.camera_id.clone(),
                timestamp: event.timestamp,
                bucket_index: self.current_index,
            });
        }

        let index = (event.timestamp / self.bucket_seconds).floor() as u64;
        if index < self.current_index {
            return Err(EngineError::OutOfOrderEvent {
                camera_id: self.camera_id.clone(),
                timestamp: event.timestamp,
                bucket_index: self.current_index,
            });
        }

        let mut finalized = Vec::new();
        while self.current_index < index {
            finalized.push(self.close_current());
        }
        self.current_events.push(event);
        self.saw_event = true;
        Ok(finalized)
    }

    /// Finalize the trailing open bucket at end of stream. A stream that
    /// ends exactly on a boundary still yields the empty bucket it opened.
    /// An entirely empty stream yields nothing.
    pub fn finish(&mut self) -> Vec<FinalizedBucket> {
        if !self.saw_event {
            return Vec::new();
        }
        vec![self.close_current()]
    }

    fn close_current(&mut self) -> FinalizedBucket {
        let index = self.current_index;
        let start_time = index as f64 * self.bucket_seconds;
        let bucket = Bucket {
            camera_id: self.camera_id.clone(),
            index,
            start_time,
            end_time: start_time + self.bucket_seconds,
        };
        let events = std::mem::take(&mut self.current_events);
        self.current_index += 1;
        FinalizedBucket { bucket, events }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(timestamp: f64) -> DetectionEvent {
        DetectionEvent {
            camera_id: "CAM_001".to_string(),
            timestamp,
            class: "car".to_string(),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_events_assigned_by_floor_division() {
        let mut bucketer = Bucketer::new("CAM_001", 60);
        assert!(bucketer.feed(event(5.0)).unwrap().is_empty());
        assert!(bucketer.feed(event(10.0)).unwrap().is_empty());

        let closed = bucketer.feed(event(70.0)).unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].bucket.index, 0);
        assert_eq!(closed[0].bucket.start_time, 0.0);
        assert_eq!(closed[0].bucket.end_time, 60.0);
        assert_eq!(closed[0].events.len(), 2);

        let tail = bucketer.finish();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].bucket.index, 1);
        assert_eq!(tail[0].events.len(), 1);
    }

    #[test]
    fn test_gap_buckets_emitted_empty() {
        let mut bucketer = Bucketer::new("CAM_001", 10);
        // First event lands in bucket 3; buckets 0..=2 must still come out.
        let closed = bucketer.feed(event(35.0)).unwrap();
        let indices: Vec<u64> = closed.iter().map(|b| b.bucket.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(closed.iter().all(|b| b.events.is_empty()));
    }

    #[test]
    fn test_coverage_has_no_gap_or_overlap() {
        let mut bucketer = Bucketer::new("CAM_001", 15);
        let mut all = Vec::new();
        for t in [0.0, 14.9, 31.0, 31.0, 88.2] {
            all.extend(bucketer.feed(event(t)).unwrap());
        }
        all.extend(bucketer.finish());

        let mut expected_start = 0.0;
        for fb in &all {
            assert_eq!(fb.bucket.start_time, expected_start);
            expected_start = fb.bucket.end_time;
        }
        // Last event at 88.2 belongs to bucket 5 ([75, 90)).
        assert_eq!(all.last().unwrap().bucket.index, 5);
    }

    #[test]
    fn test_stream_ending_on_boundary_emits_empty_bucket() {
        let mut bucketer = Bucketer::new("CAM_001", 60);
        bucketer.feed(event(50.0)).unwrap();
        // t=120 opens bucket 2 and closes 0 and 1.
        let closed = bucketer.feed(event(120.0)).unwrap();
        assert_eq!(closed.len(), 2);
        let tail = bucketer.finish();
        assert_eq!(tail[0].bucket.index, 2);
        assert_eq!(tail[0].events.len(), 1);
    }

    #[test]
    fn test_out_of_order_event_is_rejected() {
        let mut bucketer = Bucketer::new("CAM_001", 60);
        bucketer.feed(event(70.0)).unwrap();
        let err = bucketer.feed(event(5.0)).unwrap_err();
        match err {
            EngineError::OutOfOrderEvent {
                camera_id,
                timestamp,
                bucket_index,
            } => {
                assert_eq!(camera_id, "CAM_001");
                assert_eq!(timestamp, 5.0);
                assert_eq!(bucket_index, 1);
            }
            other => panic!("expected OutOfOrderEvent, got {other:?}"),
        }
    }

    #[test]
    fn test_same_bucket_backwards_timestamp_is_accepted() {
        // Only events behind the open bucket's start are out of order.
        let mut bucketer = Bucketer::new("CAM_001", 60);
        bucketer.feed(event(40.0)).unwrap();
        assert!(bucketer.feed(event(35.0)).unwrap().is_empty());
    }

    #[test]
    fn test_negative_timestamp_is_rejected() {
        let mut bucketer = Bucketer::new("CAM_001", 60);
        assert!(matches!(
            bucketer.feed(event(-1.0)),
            Err(EngineError::OutOfOrderEvent { .. })
        ));
    }

    #[test]
    fn test_empty_stream_emits_nothing() {
        let mut bucketer = Bucketer::new("CAM_001", 60);
        assert!(bucketer.finish().is_empty());
    }

    #[test]
    fn test_wrong_camera_is_a_source_error() {
        let mut bucketer = Bucketer::new("CAM_002", 60);
        assert!(matches!(
            bucketer.feed(event(1.0)),
            Err(EngineError::Source(_))
        ));
    }
}
