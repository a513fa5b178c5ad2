//! Per-category work iterator with peek/commit semantics.
//!
//! A [`FundIterator`] owns one category's refill cadence, its buffer of
//! overdue candidates and its gate. The dispatch loop peeks an item, tries to
//! enqueue it, and only commits once the send succeeded; a rejected send leaves
//! the item at the head for the next scan.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::SELECTOR_COOLDOWN;
use crate::category::Category;
use crate::store::CandidateSelector;
use crate::types::{FundCandidate, WorkItem};

/// Gating predicate evaluated at every peek.
pub type Gate = fn(DateTime<Utc>) -> bool;

fn open_gate(_now: DateTime<Utc>) -> bool {
    true
}

/// First boundary `k * interval + phase` (UTC epoch) strictly after `now`.
///
/// An interval of zero means "always due" and yields `now`.
pub fn next_boundary(now: DateTime<Utc>, interval: Duration, phase: Duration) -> DateTime<Utc> {
    let interval_ms = interval.as_millis() as i64;
    if interval_ms <= 0 {
        return now;
    }
    let phase_ms = (phase.as_millis() as i64).rem_euclid(interval_ms);
    let now_ms = now.timestamp_millis();
    let k = (now_ms - phase_ms).div_euclid(interval_ms) + 1;
    let next_ms = k * interval_ms + phase_ms;

    DateTime::from_timestamp_millis(next_ms)
        .unwrap_or_else(|| now + chrono::Duration::milliseconds(interval_ms))
}

/// Phase offset of the `index`-th of `count` iterators sharing `interval`.
pub fn spread_phase(interval: Duration, index: usize, count: usize) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let nanos = interval.as_nanos() * index as u128 / count as u128;
    Duration::from_nanos(nanos as u64)
}

/// Work source for one category.
pub struct FundIterator {
    category: Category,
    selector: Arc<dyn CandidateSelector>,
    /// Staleness interval passed to the selector
    staleness: Duration,
    batch_size: usize,
    refill_interval: Duration,
    phase_offset: Duration,
    next_refill: DateTime<Utc>,
    gate: Gate,
    buffer: Vec<FundCandidate>,
    /// Invariant: `cursor <= buffer.len()`
    cursor: usize,
    /// Singleton job handed out and not yet committed
    pending: bool,
}

impl FundIterator {
    /// Create an ungated iterator that is due immediately.
    pub fn new(
        category: Category,
        selector: Arc<dyn CandidateSelector>,
        staleness: Duration,
        batch_size: usize,
        refill_interval: Duration,
    ) -> Self {
        Self {
            category,
            selector,
            staleness,
            batch_size,
            refill_interval,
            phase_offset: Duration::ZERO,
            next_refill: DateTime::<Utc>::MIN_UTC,
            gate: open_gate,
            buffer: Vec::new(),
            cursor: 0,
            pending: false,
        }
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_phase(mut self, phase: Duration) -> Self {
        self.phase_offset = phase;
        self
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    pub fn phase_offset(&self) -> Duration {
        self.phase_offset
    }

    /// When the next refill (or singleton job) becomes due.
    pub fn next_refill(&self) -> DateTime<Utc> {
        self.next_refill
    }

    /// Candidates still waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Whether the gate admits work at `now`, regardless of buffered items.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        (self.gate)(now)
    }

    /// Current head item, refilling from the selector when due.
    ///
    /// Repeated calls without [`commit`](Self::commit) return the same item.
    pub async fn peek(&mut self, now: DateTime<Utc>) -> Option<WorkItem> {
        if !self.is_eligible(now) {
            self.reset();
            return None;
        }

        if self.category.is_singleton() {
            return self.peek_singleton(now);
        }

        if let Some(candidate) = self.buffer.get(self.cursor) {
            return Some(WorkItem::for_fund(self.category, candidate));
        }

        if now < self.next_refill {
            return None;
        }

        match self
            .selector
            .select_overdue(self.category, self.staleness, self.batch_size)
            .await
        {
            Ok(candidates) => {
                debug!(
                    category = %self.category,
                    candidates = candidates.len(),
                    "Refilled iterator"
                );
                self.buffer = candidates;
                self.cursor = 0;
                self.next_refill = next_boundary(now, self.refill_interval, self.phase_offset);
            }
            Err(e) => {
                warn!(category = %self.category, error = %e, "Candidate selection failed");
                self.next_refill = now + SELECTOR_COOLDOWN;
                return None;
            }
        }

        self.buffer
            .get(self.cursor)
            .map(|candidate| WorkItem::for_fund(self.category, candidate))
    }

    fn peek_singleton(&mut self, now: DateTime<Utc>) -> Option<WorkItem> {
        if self.pending {
            return Some(WorkItem::singleton(self.category));
        }
        if now < self.next_refill {
            return None;
        }
        self.pending = true;
        self.next_refill = next_boundary(now, self.refill_interval, self.phase_offset);
        Some(WorkItem::singleton(self.category))
    }

    /// Consume the item returned by the last [`peek`](Self::peek).
    pub fn commit(&mut self) {
        if self.category.is_singleton() {
            self.pending = false;
            return;
        }
        if self.cursor < self.buffer.len() {
            self.cursor += 1;
            if self.cursor == self.buffer.len() {
                self.buffer = Vec::new();
                self.cursor = 0;
            }
        }
    }

    /// Drop buffered work (gate closed).
    fn reset(&mut self) {
        if !self.buffer.is_empty() {
            debug!(category = %self.category, dropped = self.buffered(), "Gate closed, dropping buffer");
            self.buffer = Vec::new();
        }
        self.cursor = 0;
        self.pending = false;
    }
}

impl std::fmt::Debug for FundIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundIterator")
            .field("category", &self.category)
            .field("refill_interval", &self.refill_interval)
            .field("phase_offset", &self.phase_offset)
            .field("next_refill", &self.next_refill)
            .field("buffered", &self.buffered())
            .field("pending", &self.pending)
            .finish()
    }
}
