//! Per-source admission control
//!
//! Caps how many kill submissions a single game-server source may have
//! accepted inside a sliding window. Each source owns a small
//! `SourceWindow { count, reset_at_ms }`; the deadline is the pending reset.
//!
//! Sliding-refresh semantics:
//! - First call for a source opens a window (count 0, reset at now + window)
//! - Count at or above the ceiling -> rejected, deadline untouched
//! - Otherwise count += 1 and the deadline is pushed to now + window
//! - Once the deadline passes the count resets to zero exactly once
//!
//! A source with steady admitted traffic therefore keeps its window open and
//! stays capped, instead of bursting once per wall-clock second.

use std::collections::HashMap;

/// Default ceiling: 3 accepted kills per source per window
pub const DEFAULT_ADMISSION_CEILING: u32 = 3;

/// Default window length in milliseconds
pub const DEFAULT_ADMISSION_WINDOW_MS: i64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Source exceeded its ceiling; caller should back off
    RateLimited {
        source_id: i64,
        ceiling: u32,
        retry_after_ms: i64,
    },
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionError::RateLimited {
                source_id,
                ceiling,
                retry_after_ms,
            } => write!(
                f,
                "too many requests from server {} (ceiling {}, retry in {}ms)",
                source_id, ceiling, retry_after_ms
            ),
        }
    }
}

impl std::error::Error for AdmissionError {}

/// Admission state for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceWindow {
    /// Accepted submissions in the current window
    pub count: u32,
    /// Unix millis at which the window resets
    pub reset_at_ms: i64,
}

pub struct AdmissionController {
    ceiling: u32,
    window_ms: i64,
    windows: HashMap<i64, SourceWindow>,
    /// Millisecond clock (injectable for tests)
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl AdmissionController {
    /// Create a controller backed by the system clock
    pub fn new(ceiling: u32, window_ms: i64) -> Self {
        Self::new_with_clock(
            ceiling,
            window_ms,
            Box::new(|| chrono::Utc::now().timestamp_millis()),
        )
    }

    /// Create a controller with a custom millisecond clock
    pub fn new_with_clock(
        ceiling: u32,
        window_ms: i64,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            ceiling,
            window_ms: window_ms.max(1),
            windows: HashMap::new(),
            now_fn,
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Decide whether one submission from `source_id` is accepted
    ///
    /// Rejections never increment the counter and never extend the window.
    pub fn admit(&mut self, source_id: i64) -> Result<(), AdmissionError> {
        let now = (self.now_fn)();
        let window_ms = self.window_ms;

        let window = self.windows.entry(source_id).or_insert(SourceWindow {
            count: 0,
            reset_at_ms: now + window_ms,
        });

        // Pending reset has fired: fresh window
        if now >= window.reset_at_ms {
            window.count = 0;
            window.reset_at_ms = now + window_ms;
        }

        if window.count >= self.ceiling {
            return Err(AdmissionError::RateLimited {
                source_id,
                ceiling: self.ceiling,
                retry_after_ms: (window.reset_at_ms - now).max(0),
            });
        }

        window.count += 1;
        window.reset_at_ms = now + window_ms;
        Ok(())
    }

    /// Current window for a source, if one is still open
    pub fn window(&self, source_id: i64) -> Option<SourceWindow> {
        let now = (self.now_fn)();
        self.windows
            .get(&source_id)
            .copied()
            .filter(|window| now < window.reset_at_ms)
    }

    /// Drop every window whose reset deadline has passed
    ///
    /// Returns the number of sources released.
    pub fn sweep(&mut self) -> usize {
        let now = (self.now_fn)();
        let before = self.windows.len();
        self.windows.retain(|_, window| now < window.reset_at_ms);
        before - self.windows.len()
    }

    /// Number of sources with tracked state (open or not yet swept)
    pub fn tracked_sources(&self) -> usize {
        self.windows.len()
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(DEFAULT_ADMISSION_CEILING, DEFAULT_ADMISSION_WINDOW_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    /// Controller driven by a manually advanced clock
    fn controller_with_clock(ceiling: u32, window_ms: i64) -> (AdmissionController, Arc<AtomicI64>) {
        let clock = Arc::new(AtomicI64::new(1_000_000));
        let clock_fn = clock.clone();
        let controller = AdmissionController::new_with_clock(
            ceiling,
            window_ms,
            Box::new(move || clock_fn.load(Ordering::SeqCst)),
        );
        (controller, clock)
    }

    #[test]
    fn test_admits_up_to_ceiling_then_rejects() {
        let (mut controller, _clock) = controller_with_clock(3, 1_000);

        assert!(controller.admit(7).is_ok());
        assert!(controller.admit(7).is_ok());
        assert!(controller.admit(7).is_ok());

        let err = controller.admit(7).unwrap_err();
        assert!(matches!(err, AdmissionError::RateLimited { source_id: 7, ceiling: 3, .. }));

        // Rejection does not count
        assert_eq!(controller.window(7).map(|w| w.count), Some(3));
    }

    #[test]
    fn test_sources_are_independent() {
        let (mut controller, _clock) = controller_with_clock(1, 1_000);

        assert!(controller.admit(1).is_ok());
        assert!(controller.admit(2).is_ok());
        assert!(controller.admit(1).is_err());
        assert!(controller.admit(2).is_err());
    }

    #[test]
    fn test_window_resets_after_quiet_period() {
        let (mut controller, clock) = controller_with_clock(1, 1_000);

        assert!(controller.admit(9).is_ok());
        assert!(controller.admit(9).is_err());

        clock.fetch_add(1_000, Ordering::SeqCst);
        assert!(controller.admit(9).is_ok());
        assert_eq!(controller.window(9).map(|w| w.count), Some(1));
    }

    #[test]
    fn test_accepted_calls_slide_the_window() {
        let (mut controller, clock) = controller_with_clock(3, 1_000);

        assert!(controller.admit(4).is_ok()); // t=0
        clock.fetch_add(500, Ordering::SeqCst);
        assert!(controller.admit(4).is_ok()); // t=500
        clock.fetch_add(400, Ordering::SeqCst);
        assert!(controller.admit(4).is_ok()); // t=900, reset now at 1900

        // A fixed window would have reset at t=1000
        clock.fetch_add(300, Ordering::SeqCst);
        let err = controller.admit(4).unwrap_err(); // t=1200
        assert_eq!(
            err,
            AdmissionError::RateLimited {
                source_id: 4,
                ceiling: 3,
                retry_after_ms: 700,
            }
        );

        // Rejections do not push the deadline
        clock.fetch_add(700, Ordering::SeqCst);
        assert!(controller.admit(4).is_ok()); // t=1900
    }

    #[test]
    fn test_sweep_releases_expired_sources() {
        let (mut controller, clock) = controller_with_clock(3, 1_000);

        controller.admit(1).unwrap();
        clock.fetch_add(600, Ordering::SeqCst);
        controller.admit(2).unwrap();

        clock.fetch_add(500, Ordering::SeqCst);
        assert_eq!(controller.sweep(), 1);
        assert_eq!(controller.tracked_sources(), 1);
        assert!(controller.window(1).is_none());
        assert!(controller.window(2).is_some());
    }

    #[test]
    fn test_zero_ceiling_rejects_everything() {
        let (mut controller, _clock) = controller_with_clock(0, 1_000);
        assert!(controller.admit(1).is_err());
    }
}
