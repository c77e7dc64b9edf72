//! Ingestion progress events (spec.md §6): `{source id, documents seen,
//! documents committed, documents failed, last error kind}`, emitted at a
//! bounded rate. No teacher analogue (the teacher reports task status via
//! `IngestionTask` rows polled by its HTML dashboard, out of scope here);
//! grounded in the same `tokio::sync::watch`-based "latest value, bounded
//! emission" idiom [`common::cache::Cache`] uses for single-flight
//! coalescing.

use std::time::{Duration, Instant};

use tokio::sync::watch;

/// One source's accumulated run counters at the moment of emission.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgressEvent {
    pub source_id: String,
    pub documents_seen: u64,
    pub documents_committed: u64,
    pub documents_failed: u64,
    pub last_error_kind: Option<String>,
}

/// Accumulates counters for one source and emits on a `watch` channel no
/// more often than `min_interval`, per spec.md §6's "Emitted at a bounded
/// rate". The final state is always flushed by [`ProgressReporter::finish`]
/// regardless of timing, so a caller awaiting the receiver never misses the
/// run's last word.
pub struct ProgressReporter {
    state: ProgressEvent,
    tx: watch::Sender<ProgressEvent>,
    min_interval: Duration,
    last_emit: Instant,
}

impl ProgressReporter {
    pub fn new(source_id: String, min_interval: Duration) -> (Self, watch::Receiver<ProgressEvent>) {
        let state = ProgressEvent {
            source_id,
            ..Default::default()
        };
        let (tx, rx) = watch::channel(state.clone());
        (
            Self {
                state,
                tx,
                min_interval,
                last_emit: Instant::now() - min_interval,
            },
            rx,
        )
    }

    pub fn record_seen(&mut self) {
        self.state.documents_seen += 1;
        self.maybe_emit();
    }

    pub fn record_committed(&mut self) {
        self.state.documents_committed += 1;
        self.maybe_emit();
    }

    pub fn record_failed(&mut self, error_kind: &str) {
        self.state.documents_failed += 1;
        self.state.last_error_kind = Some(error_kind.to_string());
        self.maybe_emit();
    }

    fn maybe_emit(&mut self) {
        if self.last_emit.elapsed() >= self.min_interval {
            let _ = self.tx.send(self.state.clone());
            self.last_emit = Instant::now();
        }
    }

    /// Unconditionally emits the final counters, bypassing the rate bound.
    pub fn finish(self) -> ProgressEvent {
        let _ = self.tx.send(self.state.clone());
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_state_is_always_flushed_regardless_of_rate() {
        let (mut reporter, rx) = ProgressReporter::new("src-a".into(), Duration::from_secs(60));
        reporter.record_seen();
        reporter.record_committed();
        let finished = reporter.finish();

        assert_eq!(finished.documents_seen, 1);
        assert_eq!(finished.documents_committed, 1);
        assert_eq!(rx.borrow().documents_committed, 1);
    }

    #[test]
    fn failed_records_last_error_kind() {
        let (mut reporter, _rx) = ProgressReporter::new("src-a".into(), Duration::from_millis(0));
        reporter.record_failed("ExtractionEmpty");
        let finished = reporter.finish();
        assert_eq!(finished.documents_failed, 1);
        assert_eq!(finished.last_error_kind.as_deref(), Some("ExtractionEmpty"));
    }
}
