//! Dispatch and worker counters.
//!
//! Shared between the dispatch task, the workers and the reporter through an
//! `Arc`; every update is a single atomic operation.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::WeakSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::queue_len;
use crate::types::WorkItem;

/// Counters of the dispatch pipeline.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    enqueued_total: AtomicU64,
    queue_len_peak: AtomicU64,
    completed_total: AtomicU64,
    failed_total: AtomicU64,
}

/// Point-in-time copy of [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub enqueued_total: u64,
    /// Highest queue length since the previous snapshot
    pub queue_len_peak: u64,
    pub completed_total: u64,
    pub failed_total: u64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an enqueue and raise the high-water mark.
    pub fn record_enqueued(&self, queue_len: usize) {
        self.enqueued_total.fetch_add(1, Ordering::Relaxed);
        self.queue_len_peak
            .fetch_max(queue_len as u64, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn enqueued_total(&self) -> u64 {
        self.enqueued_total.load(Ordering::Relaxed)
    }

    pub fn completed_total(&self) -> u64 {
        self.completed_total.load(Ordering::Relaxed)
    }

    pub fn failed_total(&self) -> u64 {
        self.failed_total.load(Ordering::Relaxed)
    }

    /// Read the queue high-water mark and reset it.
    pub fn take_queue_peak(&self) -> u64 {
        self.queue_len_peak.swap(0, Ordering::Relaxed)
    }

    /// Snapshot all counters, resetting the queue peak.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued_total: self.enqueued_total(),
            queue_len_peak: self.take_queue_peak(),
            completed_total: self.completed_total(),
            failed_total: self.failed_total(),
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "enqueued={} peak={} completed={} failed={}",
            self.enqueued_total, self.queue_len_peak, self.completed_total, self.failed_total
        )
    }
}

/// Log a metrics snapshot every `period` until cancelled.
///
/// Holds only a weak handle on the queue so it never keeps the channel open.
pub fn spawn_reporter(
    metrics: Arc<DispatchMetrics>,
    queue: WeakSender<WorkItem>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = metrics.snapshot();
            let current = queue.upgrade().map(|tx| queue_len(&tx)).unwrap_or(0);
            info!(
                enqueued_total = snapshot.enqueued_total,
                queue_len_peak = snapshot.queue_len_peak,
                queue_len = current,
                completed_total = snapshot.completed_total,
                failed_total = snapshot.failed_total,
                "Dispatch metrics"
            );
        }
    })
}
