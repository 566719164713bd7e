use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleMetrics {
    pub cycles: u64,
    pub xruns: u64,
    pub last_block_ns: u64,
    pub max_block_ns: u64,
    pub faults: u64,
    pub dropped_recording_frames: u64,
    pub dropped_events: u64,
}

/// Counters written by the audio thread and read by anyone holding a clone.
#[derive(Clone)]
pub struct AudioMetricsCollector {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    cycles: AtomicU64,
    xruns: AtomicU64,
    last_block_ns: AtomicU64,
    max_block_ns: AtomicU64,
    faults: AtomicU64,
    dropped_recording_frames: AtomicU64,
    dropped_events: AtomicU64,
    history: ArrayQueue<CycleMetrics>,
}

impl AudioMetricsCollector {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                cycles: AtomicU64::new(0),
                xruns: AtomicU64::new(0),
                last_block_ns: AtomicU64::new(0),
                max_block_ns: AtomicU64::new(0),
                faults: AtomicU64::new(0),
                dropped_recording_frames: AtomicU64::new(0),
                dropped_events: AtomicU64::new(0),
                history: ArrayQueue::new(history_capacity.max(16)),
            }),
        }
    }

    pub fn snapshot(&self) -> CycleMetrics {
        let inner = &self.inner;
        CycleMetrics {
            cycles: inner.cycles.load(Ordering::Relaxed),
            xruns: inner.xruns.load(Ordering::Relaxed),
            last_block_ns: inner.last_block_ns.load(Ordering::Relaxed),
            max_block_ns: inner.max_block_ns.load(Ordering::Relaxed),
            faults: inner.faults.load(Ordering::Relaxed),
            dropped_recording_frames: inner.dropped_recording_frames.load(Ordering::Relaxed),
            dropped_events: inner.dropped_events.load(Ordering::Relaxed),
        }
    }

    /// Records a completed cycle. Returns `true` when it overran `period_ns`.
    #[inline]
    pub fn record_block(&self, duration: Duration, period_ns: u64) -> bool {
        let nanos = duration.as_nanos().min(u128::from(u64::MAX)) as u64;
        let inner = &self.inner;
        inner.cycles.fetch_add(1, Ordering::Relaxed);
        inner.last_block_ns.store(nanos, Ordering::Relaxed);
        inner.max_block_ns.fetch_max(nanos, Ordering::Relaxed);
        let overrun = period_ns > 0 && nanos > period_ns;
        if overrun {
            inner.xruns.fetch_add(1, Ordering::Relaxed);
        }
        self.push_history(self.snapshot());
        overrun
    }

    pub fn xruns(&self) -> u64 {
        self.inner.xruns.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_fault(&self) {
        self.inner.faults.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped_frames(&self, frames: u64) {
        if frames > 0 {
            self.inner
                .dropped_recording_frames
                .fetch_add(frames, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_dropped_event(&self) {
        self.inner.dropped_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Oldest entries are discarded when the history is full.
    fn push_history(&self, metrics: CycleMetrics) {
        if let Err(metrics) = self.inner.history.push(metrics) {
            let _ = self.inner.history.pop();
            let _ = self.inner.history.push(metrics);
        }
    }

    pub fn drain_history(&self) -> Vec<CycleMetrics> {
        let mut out = Vec::with_capacity(self.inner.history.len());
        while let Some(entry) = self.inner.history.pop() {
            out.push(entry);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overruns_count_as_xruns() {
        let metrics = AudioMetricsCollector::new(16);
        assert!(!metrics.record_block(Duration::from_micros(100), 1_000_000));
        assert!(metrics.record_block(Duration::from_millis(2), 1_000_000));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles, 2);
        assert_eq!(snapshot.xruns, 1);
        assert_eq!(snapshot.max_block_ns, 2_000_000);
    }

    #[test]
    fn history_keeps_latest_entries() {
        let metrics = AudioMetricsCollector::new(16);
        for _ in 0..20 {
            metrics.record_block(Duration::from_micros(10), 0);
        }
        let history = metrics.drain_history();
        assert_eq!(history.len(), 16);
        assert_eq!(history.last().map(|entry| entry.cycles), Some(20));
    }
}
