// src/pipeline/orchestrator.rs
//
// Drives one camera's strictly ordered pipeline: source -> bucketer ->
// counter -> density -> emissions -> sink. The rolling-max dependency means
// no bucket is scored before every lower-indexed bucket has been finalized,
// so the loop is sequential by construction. Cameras are independent; run
// one orchestrator per camera for concurrency.

use crate::bucketer::{Bucketer, FinalizedBucket};
use crate::counter::Counter;
use crate::density::{DensityScorer, RollingState};
use crate::emissions::EmissionEstimator;
use crate::error::Result;
use crate::pipeline::metrics::PipelineMetrics;
use crate::pipeline::run::{config_hash, RunRecord, RunStatus, RunSummary};
use crate::sink::Sink;
use crate::source::EventSource;
use crate::types::{BucketRecords, Config, DensityMode};
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

pub struct PipelineOrchestrator<'a, S: Sink> {
    config: &'a Config,
    sink: &'a mut S,
}

impl<'a, S: Sink> PipelineOrchestrator<'a, S> {
    /// Fails before any event is processed if the configuration is invalid.
    pub fn new(config: &'a Config, sink: &'a mut S) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, sink })
    }

    /// Process one camera's event stream end to end. A previously failed run
    /// with the same configuration is resumed: its committed buckets are
    /// recomputed (determinism makes that safe) but not re-written.
    pub fn run(&mut self, camera_id: &str, source: &mut dyn EventSource) -> Result<RunSummary> {
        let hash = config_hash(self.config)?;

        let (run_id, resume_from) = match self.sink.latest_run(camera_id, &hash)? {
            Some((run_id, RunStatus::Completed)) => {
                info!(camera_id, %run_id, "run already completed; nothing to do");
                return Ok(RunSummary {
                    run_id,
                    camera_id: camera_id.to_string(),
                    events_processed: 0,
                    buckets_emitted: 0,
                    buckets_skipped: 0,
                    resumed_from: None,
                });
            }
            Some((run_id, RunStatus::Failed)) => {
                let checkpoint = self.sink.checkpoint(&run_id)?;
                self.sink.reopen_run(&run_id)?;
                info!(camera_id, %run_id, ?checkpoint, "resuming failed run");
                (run_id, checkpoint)
            }
            Some((run_id, RunStatus::Running)) => {
                warn!(
                    camera_id,
                    stale_run_id = %run_id,
                    "found run still marked running; starting a new run"
                );
                let record = RunRecord::new(camera_id, &hash);
                let run_id = record.run_id.clone();
                self.sink.insert_run(&record)?;
                (run_id, None)
            }
            None => {
                let record = RunRecord::new(camera_id, &hash);
                let run_id = record.run_id.clone();
                self.sink.insert_run(&record)?;
                (run_id, None)
            }
        };

        let metrics = PipelineMetrics::new();
        let result = self.process(camera_id, source, &run_id, resume_from, &metrics);
        match result {
            Ok(()) => {
                self.sink.finish_run(&run_id, RunStatus::Completed, None)?;
                let summary = metrics.summary();
                info!(
                    camera_id,
                    %run_id,
                    events = summary.events_processed,
                    buckets = summary.buckets_emitted,
                    skipped = summary.buckets_skipped,
                    empty = summary.empty_buckets,
                    peak_total = summary.peak_bucket_total,
                    "run completed"
                );
                Ok(RunSummary {
                    run_id,
                    camera_id: camera_id.to_string(),
                    events_processed: summary.events_processed,
                    buckets_emitted: summary.buckets_emitted,
                    buckets_skipped: summary.buckets_skipped,
                    resumed_from: resume_from,
                })
            }
            Err(err) => {
                let message = err.to_string();
                error!(camera_id, %run_id, error = %message, "run failed");
                if let Err(finish_err) =
                    self.sink
                        .finish_run(&run_id, RunStatus::Failed, Some(&message))
                {
                    error!(%run_id, error = %finish_err, "could not record run failure");
                }
                Err(err)
            }
        }
    }

    fn process(
        &mut self,
        camera_id: &str,
        source: &mut dyn EventSource,
        run_id: &str,
        resume_from: Option<u64>,
        metrics: &PipelineMetrics,
    ) -> Result<()> {
        let mut bucketer = Bucketer::new(camera_id, self.config.bucket_seconds);
        let counter = Counter::new(&self.config.classes);
        let estimator = EmissionEstimator::new(&self.config.emissions, self.config.bucket_seconds);
        let mut scorer = match self.config.density.mode {
            DensityMode::Fixed => {
                let reference_max = self
                    .config
                    .density
                    .reference_max_by_camera
                    .get(camera_id)
                    .copied()
                    .unwrap_or(self.config.density.default_reference_max);
                DensityScorer::fixed(reference_max)
            }
            DensityMode::Rolling => {
                // The only history fetch: once, at run start.
                let history = self.sink.rolling_max(camera_id)?;
                DensityScorer::rolling(RollingState::seeded(
                    history,
                    self.config.density.default_reference_max,
                ))
            }
        };

        while let Some(event) = source.next_event()? {
            metrics.inc(&metrics.events_processed);
            for finalized in bucketer.feed(event)? {
                self.emit_bucket(
                    run_id,
                    resume_from,
                    &counter,
                    &mut scorer,
                    &estimator,
                    metrics,
                    finalized,
                )?;
            }
        }
        for finalized in bucketer.finish() {
            self.emit_bucket(
                run_id,
                resume_from,
                &counter,
                &mut scorer,
                &estimator,
                metrics,
                finalized,
            )?;
        }

        if metrics.buckets_emitted.load(Ordering::Relaxed)
            + metrics.buckets_skipped.load(Ordering::Relaxed)
            == 0
        {
            warn!(camera_id, "event stream was empty; no buckets produced");
        }
        if let Some(state) = scorer.rolling_state() {
            debug!(camera_id, rolling_max = state.max_total(), "run rolling reference settled");
        }
        Ok(())
    }

    /// Derive and persist one closed bucket. All derivation happens before
    /// any write, so a validation failure leaves no partial emission.
    #[allow(clippy::too_many_arguments)]
    fn emit_bucket(
        &mut self,
        run_id: &str,
        resume_from: Option<u64>,
        counter: &Counter,
        scorer: &mut DensityScorer,
        estimator: &EmissionEstimator,
        metrics: &PipelineMetrics,
        finalized: FinalizedBucket,
    ) -> Result<()> {
        metrics.add(
            &metrics.unknown_routed,
            counter.routes_unknown(&finalized.events) as u64,
        );
        let counts = counter.count(&finalized.bucket, &finalized.events)?;
        let density = scorer.score(&counts);
        let emissions = estimator.estimate(&counts)?;
        metrics.observe_bucket_total(counts.total);
        if counts.total == 0 {
            metrics.inc(&metrics.empty_buckets);
        }
        debug!(
            camera_id = %finalized.bucket.camera_id,
            bucket = finalized.bucket.index,
            total = counts.total,
            density = density.density_score,
            level = density.level.as_str(),
            co2_kg = emissions.estimated_co2_kg,
            "bucket closed"
        );

        let records = BucketRecords {
            bucket: finalized.bucket,
            counts,
            density,
            emissions,
        };
        if resume_from.is_some_and(|committed| records.bucket.index <= committed) {
            metrics.inc(&metrics.buckets_skipped);
            return Ok(());
        }
        self.sink.upsert_bucket(run_id, &records)?;
        metrics.inc(&metrics.buckets_emitted);
        Ok(())
    }
}
