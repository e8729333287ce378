use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Worker-wide dispatch counters.
///
/// All counters use `Relaxed` ordering; they are independent observations
/// and no cross-variable synchronisation is required. Share via
/// `Arc<Metrics>`; every dispatcher holds a clone of the same instance.
pub struct Metrics {
    /// Deliveries consumed from the broker since startup.
    pub messages_received: AtomicU64,

    /// Deliveries whose handler returned success and were acknowledged.
    pub messages_succeeded: AtomicU64,

    /// Failures rescheduled into the delay ladder. One logical message can
    /// contribute several counts, one per scheduled attempt.
    pub messages_retried: AtomicU64,

    /// Retryable failures finalized because the attempt budget ran out.
    pub messages_exhausted: AtomicU64,

    /// Failures finalized without entering the ladder: non-retryable kinds
    /// and failures on consumers without retry capability.
    pub messages_rejected: AtomicU64,

    /// Deliveries currently between decode and terminal action (gauge).
    pub messages_in_flight: AtomicI64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_succeeded: AtomicU64::new(0),
            messages_retried: AtomicU64::new(0),
            messages_exhausted: AtomicU64::new(0),
            messages_rejected: AtomicU64::new(0),
            messages_in_flight: AtomicI64::new(0),
        }
    }

    // ── Convenience increment methods ─────────────────────────────────────────

    pub fn inc_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_succeeded(&self) {
        self.messages_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retried(&self) {
        self.messages_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_exhausted(&self) {
        self.messages_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_in_flight(&self) {
        self.messages_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_in_flight(&self) {
        self.messages_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    // ── Snapshot ──────────────────────────────────────────────────────────────

    /// Point-in-time snapshot of all counters. Reads are `Relaxed`, so the
    /// snapshot is approximate but sufficient for observability.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.messages_received.load(Ordering::Relaxed),
            succeeded: self.messages_succeeded.load(Ordering::Relaxed),
            retried: self.messages_retried.load(Ordering::Relaxed),
            exhausted: self.messages_exhausted.load(Ordering::Relaxed),
            rejected: self.messages_rejected.load(Ordering::Relaxed),
            in_flight: self.messages_in_flight.load(Ordering::Relaxed),
        }
    }

    /// Log a summary of all counters via `tracing`.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        tracing::info!(
            received = s.received,
            succeeded = s.succeeded,
            retried = s.retried,
            exhausted = s.exhausted,
            rejected = s.rejected,
            in_flight = s.in_flight,
            "📊 metrics summary"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of [`Metrics`] counters.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub exhausted: u64,
    pub rejected: u64,
    pub in_flight: i64,
}
