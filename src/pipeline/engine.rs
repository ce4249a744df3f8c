//! Kill statistics engine - ingestion and query façade
//!
//! Owns the admission controller, the aggregation index and the host
//! directory, and holds the sending end of the persist channel.
//!
//! ## Submission flow
//!
//! ```text
//! (server_id, RawKillFields)
//!     ↓
//! AdmissionController::admit()      → RateLimited (429)
//!     ↓
//! normalizer::normalize()           → ValidationFailed (400)
//!     ↓                               MissingDimension → Accepted, not aggregated
//! AggregationIndex::record()        → InternalError (500), index untouched
//!     ↓
//! persist channel (try_send)        → fire-and-forget, never fails the submit
//!     ↓
//! Accepted (201)
//! ```
//!
//! `submit` and `query` take `&mut self` / `&self`; the runtime shares the
//! engine behind one `Arc<Mutex<_>>` so each event applies in full before the
//! next one starts.

use super::admission::{AdmissionController, AdmissionError};
use super::filter::QueryFilter;
use super::hosts::HostDirectory;
use super::index::AggregationIndex;
use super::normalizer::{self, NormalizationError, RawKillFields};
use super::query::QueryRequest;
use super::types::{Dimension, Grouping, KillEvent};
use serde::Serialize;
use tokio::sync::mpsc;

/// Result of one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    RateLimited { retry_after_ms: i64 },
    ValidationFailed(String),
    InternalError(String),
}

impl SubmitOutcome {
    /// HTTP-equivalent status for the outcome
    pub fn status_code(&self) -> u16 {
        match self {
            SubmitOutcome::Accepted => 201,
            SubmitOutcome::RateLimited { .. } => 429,
            SubmitOutcome::ValidationFailed(_) => 400,
            SubmitOutcome::InternalError(_) => 500,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted)
    }
}

/// Outcome counters since process start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubmitStats {
    pub accepted: u64,
    /// Accepted and folded into the index
    pub aggregated: u64,
    /// Accepted with a missing dimension (not aggregated)
    pub incomplete: u64,
    pub rate_limited: u64,
    pub invalid: u64,
    pub internal_errors: u64,
    /// Accepted events the persist channel could not take
    pub persist_dropped: u64,
}

impl SubmitStats {
    pub fn total(&self) -> u64 {
        self.accepted + self.rate_limited + self.invalid + self.internal_errors
    }
}

pub struct KillStatEngine {
    admission: AdmissionController,
    index: AggregationIndex,
    hosts: HostDirectory,
    /// Persist channel (None: in-memory only)
    persist_tx: Option<mpsc::Sender<KillEvent>>,
    /// Send MissingDimension events to the sink for audit
    capture_incomplete: bool,
    stats: SubmitStats,
}

impl KillStatEngine {
    pub fn new(admission: AdmissionController) -> Self {
        Self {
            admission,
            index: AggregationIndex::new(),
            hosts: HostDirectory::new(),
            persist_tx: None,
            capture_incomplete: false,
            stats: SubmitStats::default(),
        }
    }

    pub fn with_persist_channel(mut self, tx: mpsc::Sender<KillEvent>) -> Self {
        self.persist_tx = Some(tx);
        self
    }

    pub fn with_hosts(mut self, hosts: HostDirectory) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn with_capture_incomplete(mut self, capture: bool) -> Self {
        self.capture_incomplete = capture;
        self
    }

    /// Submit one raw kill from `server_id`
    ///
    /// Admission runs before validation, so malformed submissions still
    /// consume the source's budget.
    pub fn submit(&mut self, server_id: i64, raw: &RawKillFields) -> SubmitOutcome {
        if let Err(e) = self.admission.admit(server_id) {
            log::debug!("🚫 {}", e);
            self.stats.rate_limited += 1;
            let AdmissionError::RateLimited { retry_after_ms, .. } = e;
            return SubmitOutcome::RateLimited { retry_after_ms };
        }

        let event = match normalizer::normalize(server_id, raw) {
            Ok(event) => event,
            Err(NormalizationError::MissingDimension(field)) => {
                return self.accept_incomplete(server_id, raw, field);
            }
            Err(e) => {
                log::debug!("⚠️  Rejected kill from server {}: {}", server_id, e);
                self.stats.invalid += 1;
                return SubmitOutcome::ValidationFailed(e.to_string());
            }
        };

        if let Err(e) = self.index.record(event.clone()) {
            log::error!("❌ Failed to record kill from server {}: {}", server_id, e);
            self.stats.internal_errors += 1;
            return SubmitOutcome::InternalError(e.to_string());
        }

        self.stats.accepted += 1;
        self.stats.aggregated += 1;
        self.enqueue_persist(event);
        SubmitOutcome::Accepted
    }

    fn accept_incomplete(
        &mut self,
        server_id: i64,
        raw: &RawKillFields,
        field: &'static str,
    ) -> SubmitOutcome {
        log::debug!(
            "Kill from server {} missing {}, skipped from aggregation",
            server_id,
            field
        );
        self.stats.accepted += 1;
        self.stats.incomplete += 1;

        if self.capture_incomplete {
            match normalizer::normalize_for_capture(server_id, raw) {
                Ok(event) => self.enqueue_persist(event),
                Err(e) => log::debug!("Incomplete kill not captured: {}", e),
            }
        }
        SubmitOutcome::Accepted
    }

    /// Hand the event to the persist task without waiting
    fn enqueue_persist(&mut self, event: KillEvent) {
        let Some(tx) = &self.persist_tx else {
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.persist_dropped += 1;
                log::warn!("⚠️  Persist channel full, kill not persisted");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.persist_dropped += 1;
                log::error!("❌ Persist channel closed, kill not persisted");
            }
        }
    }

    /// Rebuild the index from stored kills; returns `(recorded, skipped)`
    pub fn replay<I>(&mut self, events: I) -> (usize, usize)
    where
        I: IntoIterator<Item = KillEvent>,
    {
        self.index.replay(events)
    }

    /// Answer a grouping query, decorating server buckets with host names
    pub fn query(&self, request: &QueryRequest) -> Grouping {
        self.query_dimension(request.dimension, &request.filter)
    }

    pub fn query_dimension(&self, dimension: Dimension, filter: &QueryFilter) -> Grouping {
        let mut grouping = self.index.query(dimension, filter);
        if dimension == Dimension::Server {
            self.hosts.decorate(&mut grouping);
        }
        grouping
    }

    pub fn hosts(&self) -> &HostDirectory {
        &self.hosts
    }

    pub fn set_hosts(&mut self, hosts: HostDirectory) {
        self.hosts = hosts;
    }

    pub fn index(&self) -> &AggregationIndex {
        &self.index
    }

    pub fn stats(&self) -> SubmitStats {
        self.stats
    }

    /// Release expired admission windows; returns how many were dropped
    pub fn sweep_admission(&mut self) -> usize {
        self.admission.sweep()
    }

    pub fn tracked_sources(&self) -> usize {
        self.admission.tracked_sources()
    }
}

impl Default for KillStatEngine {
    fn default() -> Self {
        Self::new(AdmissionController::default())
    }
}
