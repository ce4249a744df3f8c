//! Kill statistics runtime
//!
//! - Initializes SQLite database with schema
//! - Rebuilds the aggregation index from stored kills
//! - Spawns persist + ingestion tasks
//! - Feeds JSONL submissions from a tailed file or stdin
//!
//! Usage:
//!   cargo run --release --bin killstat_runtime < submissions.jsonl
//!
//! Environment variables:
//!   KILLSTAT_DB_PATH - SQLite database path (default: data/killstat.db)
//!   KILLSTAT_SUBMISSIONS_PATH - JSONL file to tail (default: stdin)
//!   ADMISSION_CEILING / ADMISSION_WINDOW_MS - per-source limit (default: 3 per 1000ms)
//!   STATS_LOG_INTERVAL_MS - counters log interval (default: 10000)

use dotenv::dotenv;
use log::{error, info, warn};
use killstat::pipeline::{
    admission::AdmissionController,
    config::PipelineConfig,
    db::{KillSink, SqliteKillWriter},
    engine::KillStatEngine,
    ingestion::{start_persist_task, start_submission_ingestion},
    normalizer::Submission,
    reader::SubmissionReader,
    types::KillEvent,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Kill statistics runtime");

    let config = PipelineConfig::from_env();
    config.validate()?;

    info!("   ├─ Database: {}", config.db_path);
    info!(
        "   ├─ Admission: {} per {}ms per server",
        config.admission_ceiling, config.admission_window_ms
    );
    info!("   ├─ Capture incomplete kills: {}", config.capture_incomplete);
    info!(
        "   └─ Submissions: {}",
        config.submissions_path.as_deref().unwrap_or("stdin")
    );

    info!("🔧 Initializing database...");
    let writer = SqliteKillWriter::open_with_schema(&config.db_path, &config.schema_dir)?;
    let hosts = writer.load_hosts()?;
    info!("✅ Database initialized ({} hosts)", hosts.len());

    let (persist_tx, persist_rx) = mpsc::channel::<KillEvent>(config.persist_channel_buffer);

    let mut engine = KillStatEngine::new(AdmissionController::new(
        config.admission_ceiling,
        config.admission_window_ms,
    ))
    .with_hosts(hosts)
    .with_capture_incomplete(config.capture_incomplete);

    if config.replay_on_start {
        let stored = writer.load_kills()?;
        let (recorded, skipped) = engine.replay(stored);
        info!("♻️  Replayed {} stored kills ({} incomplete skipped)", recorded, skipped);
    }

    // Attach the sink only after replay so stored kills are not written twice
    let engine = Arc::new(Mutex::new(engine.with_persist_channel(persist_tx)));

    let sink: Arc<dyn KillSink> = Arc::new(writer);
    let persist_handle = tokio::spawn(start_persist_task(persist_rx, sink));

    let (submission_tx, submission_rx) = mpsc::channel::<Submission>(config.ingest_channel_buffer);
    let mut ingestion_handle = tokio::spawn(start_submission_ingestion(
        submission_rx,
        engine,
        config.stats_interval_ms,
    ));

    let feeder_handle = match config.submissions_path.clone() {
        Some(path) => tokio::spawn(feed_from_file(PathBuf::from(path), submission_tx)),
        None => tokio::spawn(feed_from_stdin(submission_tx)),
    };

    info!("✅ All background tasks running");
    info!("🔄 Press CTRL+C to shutdown gracefully");

    let mut ingestion_done = false;
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => warn!("⚠️  Received CTRL+C, shutting down..."),
            Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
        },
        _ = &mut ingestion_handle => {
            ingestion_done = true;
            info!("📭 Submission stream ended");
        }
    }

    // Dropping the feeder closes the submission channel; ingestion drains
    // what is queued, then drops the engine and with it the persist sender.
    feeder_handle.abort();
    if !ingestion_done {
        if let Err(e) = ingestion_handle.await {
            error!("❌ Ingestion task failed: {}", e);
        }
    }

    match timeout(Duration::from_secs(5), persist_handle).await {
        Ok(Ok(summary)) => info!(
            "💾 Persisted {} kills ({} failed)",
            summary.persisted, summary.failed
        ),
        Ok(Err(e)) => error!("❌ Persist task failed: {}", e),
        Err(_) => warn!("⚠️  Persist task did not drain within 5s"),
    }

    info!("✅ Kill statistics runtime stopped");
    Ok(())
}

async fn feed_from_file(path: PathBuf, tx: mpsc::Sender<Submission>) {
    let mut reader = SubmissionReader::new(path);
    if let Err(e) = reader.start().await {
        error!("❌ Failed to open submission stream: {}", e);
        return;
    }

    loop {
        match reader.next_submission().await {
            Ok(submission) => {
                if tx.send(submission).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("❌ Submission stream read failed: {}", e);
                break;
            }
        }
    }
}

async fn feed_from_stdin(tx: mpsc::Sender<Submission>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match Submission::from_jsonl(line) {
                    Ok(submission) => {
                        if tx.send(submission).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("⚠️  Skipping malformed submission line: {}", e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("❌ stdin read failed: {}", e);
                break;
            }
        }
    }
}
