//! Scheduling and dispatch.
//!
//! One dispatch task owns every [`FundIterator`] and multiplexes them onto the
//! bounded work queue in round-robin order. [`DispatchCore`] holds the part of
//! the loop both modes share (scan, enqueue, pacing); [`NormalDispatcher`] runs
//! it forever and [`BackfillDispatcher`] runs it stage by stage until each
//! stage converges.

pub mod backfill;
pub mod gap;
pub mod iterator;
pub mod metrics;
pub mod normal;

pub use backfill::{BackfillDispatcher, BackfillOutcome, OverdueProbe, RemainingProbe, Stage};
pub use gap::dispatch_gap;
pub use iterator::{next_boundary, spread_phase, FundIterator, Gate};
pub use metrics::{spawn_reporter, DispatchMetrics, MetricsSnapshot};
pub use normal::{normal_iterators, NormalDispatcher};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::types::WorkItem;

/// Cooldown after a failed selector call, failed backfill step or probe.
pub const SELECTOR_COOLDOWN: Duration = Duration::from_secs(5);

/// Sleep when the work queue is full.
pub const FULL_QUEUE_BACKOFF: Duration = Duration::from_millis(25);

/// Bounds of the idle sleep when no iterator is ready.
pub const IDLE_SLEEP_MIN: Duration = Duration::from_millis(25);
pub const IDLE_SLEEP_MAX: Duration = Duration::from_millis(500);

/// Items currently waiting in the queue behind `tx`.
pub fn queue_len<T>(tx: &mpsc::Sender<T>) -> usize {
    tx.max_capacity() - tx.capacity()
}

/// Sleep for `duration` unless cancelled first. Returns `false` on cancellation.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Result of one round-robin scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    /// An item was enqueued and committed
    Dispatched {
        /// Iterators whose gate was open during the scan
        active: usize,
    },
    /// Queue at capacity; nothing committed
    QueueFull,
    /// No iterator had work
    Idle {
        /// Earliest refill time across iterators
        next_ready: Option<DateTime<Utc>>,
    },
    /// Cancelled, or every worker is gone
    Closed,
}

/// Scan/enqueue/pace machinery shared by both dispatch modes.
pub struct DispatchCore {
    tx: mpsc::Sender<WorkItem>,
    pool_size: usize,
    metrics: Arc<DispatchMetrics>,
    cancel: CancellationToken,
    rr_index: usize,
}

impl DispatchCore {
    pub fn new(
        tx: mpsc::Sender<WorkItem>,
        pool_size: usize,
        metrics: Arc<DispatchMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tx,
            pool_size,
            metrics,
            cancel,
            rr_index: 0,
        }
    }

    pub fn queue_len(&self) -> usize {
        queue_len(&self.tx)
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Start the next scan at the first iterator.
    pub fn reset_rotation(&mut self) {
        self.rr_index = 0;
    }

    /// Peek every iterator starting at the rotation index and enqueue the first
    /// ready item.
    pub async fn scan(&mut self, iterators: &mut [FundIterator], now: DateTime<Utc>) -> Scan {
        if self.cancel.is_cancelled() || self.tx.is_closed() {
            return Scan::Closed;
        }
        if iterators.is_empty() {
            return Scan::Idle { next_ready: None };
        }
        if self.tx.capacity() == 0 {
            return Scan::QueueFull;
        }

        let count = iterators.len();
        let start = self.rr_index % count;
        let mut active = 0;
        let mut first: Option<(usize, WorkItem)> = None;

        for offset in 0..count {
            let idx = (start + offset) % count;
            if iterators[idx].is_eligible(now) {
                active += 1;
            }
            let peeked = tokio::select! {
                _ = self.cancel.cancelled() => return Scan::Closed,
                item = iterators[idx].peek(now) => item,
            };
            if first.is_none() {
                first = peeked.map(|item| (idx, item));
            }
        }

        let Some((idx, item)) = first else {
            let next_ready = iterators.iter().map(FundIterator::next_refill).min();
            return Scan::Idle { next_ready };
        };

        match self.tx.try_send(item) {
            Ok(()) => {
                iterators[idx].commit();
                self.rr_index = (idx + 1) % count;
                self.metrics.record_enqueued(self.queue_len());
                trace!(category = %iterators[idx].category(), active, "Dispatched");
                Scan::Dispatched { active }
            }
            Err(TrySendError::Full(item)) => {
                debug!(item = %item, "Work queue full, item kept for next scan");
                Scan::QueueFull
            }
            Err(TrySendError::Closed(_)) => Scan::Closed,
        }
    }

    /// How long to wait after `scan` returned.
    pub fn pause_after(&self, scan: &Scan, now: DateTime<Utc>) -> Duration {
        match scan {
            Scan::Dispatched { active } => {
                dispatch_gap(*active, self.queue_len(), self.capacity(), self.pool_size)
            }
            Scan::QueueFull => FULL_QUEUE_BACKOFF,
            Scan::Idle { next_ready } => idle_sleep(*next_ready, now),
            Scan::Closed => Duration::ZERO,
        }
    }

    /// Sleep the pause for `scan`. Returns `false` when the loop must stop.
    pub async fn pace(&self, scan: &Scan, now: DateTime<Utc>) -> bool {
        if matches!(scan, Scan::Closed) {
            return false;
        }
        sleep_or_cancel(self.pause_after(scan, now), &self.cancel).await
    }
}

/// Time until `next_ready`, clamped to the idle bounds.
pub fn idle_sleep(next_ready: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    let Some(next) = next_ready else {
        return IDLE_SLEEP_MAX;
    };
    (next - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .clamp(IDLE_SLEEP_MIN, IDLE_SLEEP_MAX)
}
