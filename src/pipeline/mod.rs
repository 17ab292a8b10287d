// src/pipeline/mod.rs

pub mod metrics;
pub mod orchestrator;
pub mod run;

pub use metrics::PipelineMetrics;
pub use orchestrator::PipelineOrchestrator;
pub use run::{RunRecord, RunStatus, RunSummary};
