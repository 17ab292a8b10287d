// src/main.rs

mod bucketer;
mod config;
mod counter;
mod density;
mod emissions;
mod error;
mod pipeline;
mod sink;
mod source;
mod types;

use anyhow::{bail, Result};
use pipeline::PipelineOrchestrator;
use sink::SqliteSink;
use source::create_source;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use types::Config;
use walkdir::WalkDir;

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!("traffic_metrics={}", config.logging.level))
        .init();

    info!("🚦 Traffic Metrics Pipeline Starting");
    info!("✓ Configuration loaded from {}", config_path);

    let mut sink = SqliteSink::open(Path::new(&config.storage.db_path))?;
    info!("✓ SQLite sink ready at {}", config.storage.db_path);

    let mut failures = 0usize;
    match config.detector.name.as_str() {
        "jsonl" => {
            let files = find_event_files(&config.storage.input_dir)?;
            if files.is_empty() {
                error!("No event files found in {}", config.storage.input_dir);
                return Ok(());
            }
            info!("Found {} event file(s) to process", files.len());
            for path in files {
                // Camera id is the file stem: data/events/CAM_001.jsonl
                let camera_id = match path.file_stem().and_then(|s| s.to_str()) {
                    Some(stem) => stem.to_string(),
                    None => {
                        error!("Skipping unreadable file name: {}", path.display());
                        failures += 1;
                        continue;
                    }
                };
                info!(%camera_id, file = %path.display(), "Processing camera");
                if run_camera(&config, &mut sink, &camera_id, Some(&path)).is_err() {
                    failures += 1;
                }
            }
        }
        _ => {
            let camera_id = std::env::args().nth(2).unwrap_or_else(|| "CAM_001".to_string());
            info!(%camera_id, "Processing stub detector stream");
            if run_camera(&config, &mut sink, &camera_id, None).is_err() {
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} camera run(s) failed");
    }
    Ok(())
}

fn run_camera(
    config: &Config,
    sink: &mut SqliteSink,
    camera_id: &str,
    path: Option<&Path>,
) -> Result<()> {
    let mut source = create_source(config, camera_id, path)?;
    let mut orchestrator = PipelineOrchestrator::new(config, sink)?;
    match orchestrator.run(camera_id, source.as_mut()) {
        Ok(summary) => {
            info!(
                camera_id,
                run_id = %summary.run_id,
                events = summary.events_processed,
                buckets = summary.buckets_emitted,
                "✓ Camera done"
            );
            Ok(())
        }
        Err(err) => {
            error!(camera_id, error = %err, "Camera run failed");
            Err(err.into())
        }
    }
}

fn find_event_files(input_dir: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(input_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if matches!(ext, "jsonl" | "ndjson") {
                files.push(path.to_path_buf());
            }
        }
    }
    files.sort();
    Ok(files)
}
