//! Pipeline ingestion - async channel processors
//!
//! Two tasks wired by mpsc channels:
//! - submission ingestion: `Submission` → `KillStatEngine::submit`
//! - persist task: accepted `KillEvent` → `KillSink::persist`
//!
//! The engine lock is taken once per submission, so every event is applied
//! in full before the next one (or any query) sees the index. Sink writes
//! happen on their own task and never hold the engine lock.

use super::db::KillSink;
use super::engine::{KillStatEngine, SubmitOutcome, SubmitStats};
use super::normalizer::Submission;
use super::types::KillEvent;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

/// Lock the shared engine, recovering from a poisoned mutex
///
/// A panic mid-submit cannot leave a half-applied event (the index
/// validates before it mutates), so the inner state is still consistent.
pub fn lock_engine(engine: &Mutex<KillStatEngine>) -> MutexGuard<'_, KillStatEngine> {
    engine.lock().unwrap_or_else(|poisoned| {
        log::warn!("⚠️  Engine lock poisoned, continuing with inner state");
        poisoned.into_inner()
    })
}

/// Totals reported by the persist task when its channel closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSummary {
    pub persisted: u64,
    pub failed: u64,
}

/// Drain the persist channel into the durable sink
///
/// Failures are logged and counted, never propagated: the in-memory index
/// stays authoritative. Runs until every sender is dropped.
pub async fn start_persist_task(
    mut rx: mpsc::Receiver<KillEvent>,
    sink: Arc<dyn KillSink>,
) -> PersistSummary {
    log::info!("💾 Starting persist task");

    let mut summary = PersistSummary::default();

    while let Some(event) = rx.recv().await {
        match sink.persist(&event).await {
            Ok(()) => summary.persisted += 1,
            Err(e) => {
                summary.failed += 1;
                log::error!(
                    "❌ DurablePersistFailed (server {}, attacker {}, victim {}): {}",
                    event.server_id,
                    event.attacker_id,
                    event.victim_id,
                    e
                );
            }
        }
    }

    log::info!(
        "✅ Persist task stopped ({} persisted, {} failed)",
        summary.persisted,
        summary.failed
    );
    summary
}

/// Feed submissions from the channel through the shared engine
///
/// Every `stats_interval_ms` the loop logs throughput and outcome counters
/// and sweeps expired admission windows. Returns the engine's counters once
/// the channel closes.
pub async fn start_submission_ingestion(
    mut rx: mpsc::Receiver<Submission>,
    engine: Arc<Mutex<KillStatEngine>>,
    stats_interval_ms: u64,
) -> SubmitStats {
    log::info!("🚀 Starting submission ingestion");
    log::info!("   ├─ Stats interval: {}ms", stats_interval_ms);
    log::info!("   └─ Waiting for submissions...");

    let mut stats_timer = interval(Duration::from_millis(stats_interval_ms.max(1)));
    let mut window_count = 0u64;
    let mut window_start = std::time::Instant::now();

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(submission) = received else {
                    log::warn!("⚠️  Submission channel closed, stopping ingestion");
                    break;
                };

                let outcome = {
                    let mut engine_guard = lock_engine(&engine);
                    engine_guard.submit(submission.server_id, &submission.fields)
                };

                if let SubmitOutcome::InternalError(msg) = &outcome {
                    log::error!("❌ Internal error for server {}: {}", submission.server_id, msg);
                }
                window_count += 1;
            }

            _ = stats_timer.tick() => {
                let (stats, swept, tracked, indexed) = {
                    let mut engine_guard = lock_engine(&engine);
                    let swept = engine_guard.sweep_admission();
                    (
                        engine_guard.stats(),
                        swept,
                        engine_guard.tracked_sources(),
                        engine_guard.index().len(),
                    )
                };

                if window_count > 0 {
                    let per_sec = window_count as f64 / window_start.elapsed().as_secs_f64();
                    log::info!(
                        "📊 Ingestion rate: {:.1} submissions/sec | accepted: {} | 429: {} | 400: {} | 500: {} | indexed: {}",
                        per_sec,
                        stats.accepted,
                        stats.rate_limited,
                        stats.invalid,
                        stats.internal_errors,
                        indexed
                    );
                }
                if swept > 0 {
                    log::debug!("🧹 Released {} idle sources ({} still tracked)", swept, tracked);
                }
                if stats.persist_dropped > 0 {
                    log::warn!("⚠️  {} accepted kills dropped by a full persist channel", stats.persist_dropped);
                }

                window_count = 0;
                window_start = std::time::Instant::now();
            }
        }
    }

    let stats = lock_engine(&engine).stats();
    log::info!(
        "✅ Submission ingestion stopped ({} submissions, {} accepted, {} incomplete)",
        stats.total(),
        stats.accepted,
        stats.incomplete
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::admission::AdmissionController;
    use crate::pipeline::db::SinkError;
    use crate::pipeline::normalizer::RawKillFields;
    use crate::pipeline::types::Dimension;
    use async_trait::async_trait;
    use serde_json::json;

    /// Sink that records events and fails on a chosen attacker id
    struct RecordingSink {
        events: Mutex<Vec<KillEvent>>,
        fail_attacker: &'static str,
    }

    #[async_trait]
    impl KillSink for RecordingSink {
        async fn persist(&self, event: &KillEvent) -> Result<(), SinkError> {
            if event.attacker_id == self.fail_attacker {
                return Err(SinkError::LockPoisoned);
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn submission(server_id: i64, attacker: &str, weapon: &str) -> Submission {
        let fields: RawKillFields = serde_json::from_value(json!({
            "servername": "tdm-host",
            "game_mode": "tdm",
            "map": "thaw",
            "attacker_id": attacker,
            "victim_id": "0",
            "cause_of_death": weapon,
            "distance": 12.5,
        }))
        .unwrap();
        Submission { server_id, fields }
    }

    #[tokio::test]
    async fn test_ingestion_processes_submissions() {
        let (tx, rx) = mpsc::channel(100);
        let engine = Arc::new(Mutex::new(KillStatEngine::new(AdmissionController::new(
            100, 1_000,
        ))));

        let handle = tokio::spawn(start_submission_ingestion(rx, engine.clone(), 1_000));

        for i in 0..10 {
            tx.send(submission(i % 2, "1", "smr")).await.unwrap();
        }
        tx.send(submission(1, "", "smr")).await.unwrap();
        drop(tx);

        let stats = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.accepted, 11);
        assert_eq!(stats.aggregated, 10);
        assert_eq!(stats.incomplete, 1);

        let engine_guard = lock_engine(&engine);
        let weapons = engine_guard.query_dimension(Dimension::Weapon, &Default::default());
        assert_eq!(weapons.get("smr").map(|b| b.kills), Some(10));
    }

    #[tokio::test]
    async fn test_ingestion_counts_rate_limited() {
        let (tx, rx) = mpsc::channel(100);
        let engine = Arc::new(Mutex::new(KillStatEngine::new(AdmissionController::new(
            1, 60_000,
        ))));

        let handle = tokio::spawn(start_submission_ingestion(rx, engine, 1_000));
        tx.send(submission(5, "1", "smr")).await.unwrap();
        tx.send(submission(5, "1", "smr")).await.unwrap();
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.rate_limited, 1);
    }

    #[tokio::test]
    async fn test_persist_failures_are_counted_not_propagated() {
        let (tx, rx) = mpsc::channel(10);
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
            fail_attacker: "bad",
        });

        let handle = tokio::spawn(start_persist_task(rx, sink.clone()));

        for attacker in ["1", "bad", "2"] {
            let Submission { server_id, fields } = submission(3, attacker, "smr");
            let event = crate::pipeline::normalizer::normalize(server_id, &fields).unwrap();
            tx.send(event).await.unwrap();
        }
        drop(tx);

        let summary = handle.await.unwrap();
        assert_eq!(summary, PersistSummary { persisted: 2, failed: 1 });

        let stored: Vec<String> = sink
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.attacker_id.clone())
            .collect();
        assert_eq!(stored, vec!["1", "2"]);
    }
}
