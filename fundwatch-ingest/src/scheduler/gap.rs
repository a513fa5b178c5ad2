//! Inter-dispatch delay.
//!
//! The outbound request rate is shaped by the delay between two successful
//! enqueues rather than by a token bucket: the fuller the work queue, the
//! longer the dispatcher waits before handing out more work.

use std::time::Duration;

const GAP_BASE_MS: u64 = 40;
const GAP_DRAINED_MS: u64 = 20;
const GAP_BUSY_MS: u64 = 120;
const GAP_SATURATED_MS: u64 = 250;

/// Multiplier when at most one category is eligible.
const SOLO_FACTOR: u32 = 3;

/// Delay to apply after a successful enqueue.
///
/// * `active_types` - iterators whose gate is open, ready work or not
/// * `queue_len` - items currently waiting in the work queue
/// * `capacity` - work queue capacity
/// * `pool_size` - number of workers
pub fn dispatch_gap(
    active_types: usize,
    queue_len: usize,
    capacity: usize,
    pool_size: usize,
) -> Duration {
    let low = pool_size;
    let high = (2 * pool_size).min(capacity.saturating_sub(1));

    let ms = if queue_len >= capacity.saturating_sub(1) {
        GAP_SATURATED_MS
    } else if queue_len >= high {
        GAP_BUSY_MS
    } else if queue_len < low {
        GAP_DRAINED_MS
    } else {
        GAP_BASE_MS
    };

    let gap = Duration::from_millis(ms);
    if active_types <= 1 {
        gap * SOLO_FACTOR
    } else {
        gap
    }
}
