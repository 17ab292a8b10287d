// src/sink.rs
//
// Persistence boundary. The engine talks to a Sink trait: one idempotent
// upsert per closed bucket, a rolling-max history fetch at run start, and
// run bookkeeping rows. SqliteSink is the production implementation;
// MemorySink backs tests and lets them inject arbitrary starting maxima.

use crate::error::{EngineError, Result};
use crate::pipeline::run::{RunRecord, RunStatus};
use crate::types::BucketRecords;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

pub trait Sink {
    /// Largest bucket total ever persisted for the camera, 0 when none.
    /// Queried once per run start in rolling density mode.
    fn rolling_max(&self, camera_id: &str) -> Result<u64>;

    /// Idempotent on (camera_id, bucket_index): re-upserting identical
    /// derived values must not duplicate rows or error. Also advances the
    /// run's checkpoint to this bucket, atomically with the records.
    fn upsert_bucket(&mut self, run_id: &str, records: &BucketRecords) -> Result<()>;

    fn insert_run(&mut self, record: &RunRecord) -> Result<()>;
    fn reopen_run(&mut self, run_id: &str) -> Result<()>;
    fn finish_run(
        &mut self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Most recent run for (camera, config_hash), for resume decisions.
    fn latest_run(&self, camera_id: &str, config_hash: &str) -> Result<Option<(String, RunStatus)>>;

    /// Highest bucket index committed for the run, if any.
    fn checkpoint(&self, run_id: &str) -> Result<Option<u64>>;
}

/// In-memory sink for tests. `upsert_calls` counts writes so idempotence
/// tests can distinguish re-writes from duplicates.
#[derive(Default)]
pub struct MemorySink {
    pub buckets: BTreeMap<(String, u64), BucketRecords>,
    pub runs: BTreeMap<String, (RunRecord, RunStatus, Option<String>)>,
    pub checkpoints: BTreeMap<String, u64>,
    pub history: BTreeMap<String, u64>,
    pub upsert_calls: usize,
    pub fail_writes: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, camera_id: &str, max_total: u64) -> Self {
        self.history.insert(camera_id.to_string(), max_total);
        self
    }
}

impl Sink for MemorySink {
    fn rolling_max(&self, camera_id: &str) -> Result<u64> {
        let persisted = self
            .buckets
            .iter()
            .filter(|((camera, _), _)| camera == camera_id)
            .map(|(_, records)| records.counts.total)
            .max()
            .unwrap_or(0);
        Ok(persisted.max(self.history.get(camera_id).copied().unwrap_or(0)))
    }

    fn upsert_bucket(&mut self, run_id: &str, records: &BucketRecords) -> Result<()> {
        if self.fail_writes {
            return Err(EngineError::SinkWrite("memory sink write refused".into()));
        }
        self.upsert_calls += 1;
        self.buckets.insert(
            (records.bucket.camera_id.clone(), records.bucket.index),
            records.clone(),
        );
        self.checkpoints
            .entry(run_id.to_string())
            .and_modify(|index| *index = (*index).max(records.bucket.index))
            .or_insert(records.bucket.index);
        Ok(())
    }

    fn insert_run(&mut self, record: &RunRecord) -> Result<()> {
        self.runs.insert(
            record.run_id.clone(),
            (record.clone(), RunStatus::Running, None),
        );
        Ok(())
    }

    fn reopen_run(&mut self, run_id: &str) -> Result<()> {
        if let Some(entry) = self.runs.get_mut(run_id) {
            entry.1 = RunStatus::Running;
            entry.2 = None;
        }
        Ok(())
    }

    fn finish_run(
        &mut self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        if let Some(entry) = self.runs.get_mut(run_id) {
            entry.1 = status;
            entry.2 = error_message.map(str::to_string);
        }
        Ok(())
    }

    fn latest_run(&self, camera_id: &str, config_hash: &str) -> Result<Option<(String, RunStatus)>> {
        let found = self
            .runs
            .values()
            .filter(|(record, _, _)| {
                record.camera_id == camera_id && record.config_hash == config_hash
            })
            .max_by(|a, b| a.0.started_at.cmp(&b.0.started_at))
            .map(|(record, status, _)| (record.run_id.clone(), *status));
        Ok(found)
    }

    fn checkpoint(&self, run_id: &str) -> Result<Option<u64>> {
        Ok(self.checkpoints.get(run_id).copied())
    }
}

pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EngineError::SinkWrite(Box::new(e)))?;
            }
        }
        let conn = Connection::open(path)?;
        let sink = Self { conn };
        sink.migrate()?;
        debug!(path = %path.display(), "sqlite sink ready");
        Ok(sink)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_runs (
                run_id TEXT PRIMARY KEY,
                camera_id TEXT NOT NULL,
                config_hash TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                status TEXT NOT NULL,
                error_message TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_runs_camera_hash
                ON pipeline_runs(camera_id, config_hash, started_at);

            CREATE TABLE IF NOT EXISTS vehicle_counts (
                camera_id TEXT NOT NULL,
                bucket_index INTEGER NOT NULL,
                vehicle_class TEXT NOT NULL,
                count INTEGER NOT NULL,
                run_id TEXT NOT NULL,
                PRIMARY KEY (camera_id, bucket_index, vehicle_class)
            );

            CREATE TABLE IF NOT EXISTS traffic_density (
                camera_id TEXT NOT NULL,
                bucket_index INTEGER NOT NULL,
                bucket_start REAL NOT NULL,
                bucket_end REAL NOT NULL,
                total_vehicles INTEGER NOT NULL,
                density_score REAL NOT NULL,
                density_level TEXT NOT NULL,
                reference_max INTEGER NOT NULL,
                run_id TEXT NOT NULL,
                PRIMARY KEY (camera_id, bucket_index)
            );

            CREATE TABLE IF NOT EXISTS emission_estimates (
                camera_id TEXT NOT NULL,
                bucket_index INTEGER NOT NULL,
                estimated_co2_kg REAL NOT NULL,
                co2_kg_min REAL NOT NULL,
                co2_kg_max REAL NOT NULL,
                run_id TEXT NOT NULL,
                PRIMARY KEY (camera_id, bucket_index)
            );

            CREATE TABLE IF NOT EXISTS processing_checkpoints (
                run_id TEXT PRIMARY KEY,
                bucket_index INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl Sink for SqliteSink {
    fn rolling_max(&self, camera_id: &str) -> Result<u64> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(total_vehicles) FROM traffic_density WHERE camera_id = ?1",
            params![camera_id],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0).max(0) as u64)
    }

    fn upsert_bucket(&mut self, run_id: &str, records: &BucketRecords) -> Result<()> {
        // One transaction per bucket: counts, density, emissions, and the
        // checkpoint land together or not at all.
        let tx = self.conn.transaction()?;
        for (class, count) in &records.counts.counts {
            tx.execute(
                "INSERT INTO vehicle_counts (camera_id, bucket_index, vehicle_class, count, run_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (camera_id, bucket_index, vehicle_class) DO UPDATE SET
                     count = excluded.count,
                     run_id = excluded.run_id",
                params![
                    records.bucket.camera_id,
                    records.bucket.index as i64,
                    class,
                    *count as i64,
                    run_id
                ],
            )?;
        }
        tx.execute(
            "INSERT INTO traffic_density
                 (camera_id, bucket_index, bucket_start, bucket_end, total_vehicles,
                  density_score, density_level, reference_max, run_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (camera_id, bucket_index) DO UPDATE SET
                 bucket_start = excluded.bucket_start,
                 bucket_end = excluded.bucket_end,
                 total_vehicles = excluded.total_vehicles,
                 density_score = excluded.density_score,
                 density_level = excluded.density_level,
                 reference_max = excluded.reference_max,
                 run_id = excluded.run_id",
            params![
                records.bucket.camera_id,
                records.bucket.index as i64,
                records.bucket.start_time,
                records.bucket.end_time,
                records.counts.total as i64,
                records.density.density_score,
                records.density.level.as_str(),
                records.density.reference_max as i64,
                run_id
            ],
        )?;
        tx.execute(
            "INSERT INTO emission_estimates
                 (camera_id, bucket_index, estimated_co2_kg, co2_kg_min, co2_kg_max, run_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (camera_id, bucket_index) DO UPDATE SET
                 estimated_co2_kg = excluded.estimated_co2_kg,
                 co2_kg_min = excluded.co2_kg_min,
                 co2_kg_max = excluded.co2_kg_max,
                 run_id = excluded.run_id",
            params![
                records.bucket.camera_id,
                records.bucket.index as i64,
                records.emissions.estimated_co2_kg,
                records.emissions.co2_kg_min,
                records.emissions.co2_kg_max,
                run_id
            ],
        )?;
        tx.execute(
            "INSERT INTO processing_checkpoints (run_id, bucket_index, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (run_id) DO UPDATE SET
                 bucket_index = MAX(processing_checkpoints.bucket_index, excluded.bucket_index),
                 updated_at = excluded.updated_at",
            params![run_id, records.bucket.index as i64, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn insert_run(&mut self, record: &RunRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO pipeline_runs
                 (run_id, camera_id, config_hash, started_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.run_id,
                record.camera_id,
                record.config_hash,
                record.started_at,
                RunStatus::Running.as_str()
            ],
        )?;
        Ok(())
    }

    fn reopen_run(&mut self, run_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE pipeline_runs
             SET status = ?1, error_message = NULL, ended_at = NULL
             WHERE run_id = ?2",
            params![RunStatus::Running.as_str(), run_id],
        )?;
        Ok(())
    }

    fn finish_run(
        &mut self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE pipeline_runs
             SET status = ?1, error_message = ?2, ended_at = ?3
             WHERE run_id = ?4",
            params![
                status.as_str(),
                error_message,
                Utc::now().to_rfc3339(),
                run_id
            ],
        )?;
        Ok(())
    }

    fn latest_run(&self, camera_id: &str, config_hash: &str) -> Result<Option<(String, RunStatus)>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, status FROM pipeline_runs
             WHERE camera_id = ?1 AND config_hash = ?2
             ORDER BY started_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![camera_id, config_hash])?;
        match rows.next()? {
            Some(row) => {
                let run_id: String = row.get(0)?;
                let status: String = row.get(1)?;
                let status = RunStatus::parse(&status).ok_or_else(|| {
                    EngineError::SinkWrite(format!("unknown run status '{status}'").into())
                })?;
                Ok(Some((run_id, status)))
            }
            None => Ok(None),
        }
    }

    fn checkpoint(&self, run_id: &str) -> Result<Option<u64>> {
        let index: Option<i64> = self
            .conn
            .query_row(
                "SELECT bucket_index FROM processing_checkpoints WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(index.map(|i| i.max(0) as u64))
    }
}
