//! Integration tests for iterator multiplexing.
//!
//! Drives the dispatch core over real channels with scripted selectors.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use common::{candidates, core, ScriptedSelector};
use fundwatch_ingest::category::Category;
use fundwatch_ingest::scheduler::{
    normal_iterators, spread_phase, FundIterator, NormalDispatcher, Scan,
};
use fundwatch_common::Config;

const STALE: Duration = Duration::from_secs(3600);

fn iterator(category: Category, selector: &Arc<ScriptedSelector>, interval: Duration) -> FundIterator {
    FundIterator::new(category, selector.clone(), STALE, 10, interval)
}

// ============================================================================
// Round Robin
// ============================================================================

#[tokio::test]
async fn test_round_robin_fairness() {
    let selector = Arc::new(
        ScriptedSelector::new()
            .script(Category::Details, candidates(&["A1", "A2", "A3"]))
            .script(Category::Indicators, candidates(&["B1", "B2", "B3"]))
            .script(Category::Documents, candidates(&["C1", "C2", "C3"])),
    );
    let mut iterators = vec![
        iterator(Category::Details, &selector, Duration::from_secs(60)),
        iterator(Category::Indicators, &selector, Duration::from_secs(60)),
        iterator(Category::Documents, &selector, Duration::from_secs(60)),
    ];
    let (mut core, mut rx, metrics, _cancel) = core(16, 4);

    let now = Utc::now();
    for _ in 0..6 {
        assert!(matches!(core.scan(&mut iterators, now).await, Scan::Dispatched { active: 3 }));
    }

    let mut order = Vec::new();
    while let Ok(item) = rx.try_recv() {
        order.push(item.fund_code);
    }
    assert_eq!(order, vec!["A1", "B1", "C1", "A2", "B2", "C2"]);
    assert_eq!(metrics.enqueued_total(), 6);
    assert_eq!(metrics.take_queue_peak(), 6);
}

#[tokio::test]
async fn test_full_queue_keeps_item_uncommitted() {
    let selector = Arc::new(
        ScriptedSelector::new().script(Category::Details, candidates(&["HGLG11", "KNRI11"])),
    );
    let mut iterators = vec![iterator(Category::Details, &selector, Duration::from_secs(60))];
    let (mut core, mut rx, _metrics, _cancel) = core(1, 1);

    let now = Utc::now();
    assert!(matches!(core.scan(&mut iterators, now).await, Scan::Dispatched { .. }));
    assert_eq!(core.scan(&mut iterators, now).await, Scan::QueueFull);
    assert_eq!(iterators[0].buffered(), 1);

    assert_eq!(rx.recv().await.unwrap().fund_code, "HGLG11");
    assert!(matches!(core.scan(&mut iterators, now).await, Scan::Dispatched { .. }));
    assert_eq!(rx.recv().await.unwrap().fund_code, "KNRI11");
    assert_eq!(iterators[0].buffered(), 0);
}

#[tokio::test]
async fn test_idle_eligible_iterator_counts_as_active() {
    let selector = Arc::new(
        ScriptedSelector::new().script(Category::Details, candidates(&["A1", "A2"])),
    );
    // Indicators is ungated but has nothing overdue
    let mut iterators = vec![
        iterator(Category::Details, &selector, Duration::from_secs(60)),
        iterator(Category::Indicators, &selector, Duration::from_secs(60)),
    ];
    let (mut core, _rx, _metrics, _cancel) = core(16, 4);

    let now = Utc::now();
    let scan = core.scan(&mut iterators, now).await;
    assert_eq!(scan, Scan::Dispatched { active: 2 });
    assert_eq!(iterators[1].buffered(), 0);

    // One item queued, below the pool size: drained gap, no solo factor
    assert_eq!(core.pause_after(&scan, now), Duration::from_millis(20));
}

#[tokio::test]
async fn test_single_eligible_iterator_triples_gap() {
    let selector = Arc::new(
        ScriptedSelector::new().script(Category::Details, candidates(&["A1"])),
    );
    let mut iterators = vec![iterator(Category::Details, &selector, Duration::from_secs(60))];
    let (mut core, _rx, _metrics, _cancel) = core(16, 4);

    let now = Utc::now();
    let scan = core.scan(&mut iterators, now).await;
    assert_eq!(scan, Scan::Dispatched { active: 1 });
    assert_eq!(core.pause_after(&scan, now), Duration::from_millis(60));
}

#[tokio::test]
async fn test_cancelled_scan_is_closed() {
    let selector = Arc::new(ScriptedSelector::new());
    let mut iterators = vec![iterator(Category::Details, &selector, Duration::ZERO)];
    let (mut core, _rx, _metrics, cancel) = core(4, 1);

    cancel.cancel();
    assert_eq!(core.scan(&mut iterators, Utc::now()).await, Scan::Closed);
    assert!(!core.pace(&Scan::Closed, Utc::now()).await);
}

// ============================================================================
// Refill Cycle
// ============================================================================

#[tokio::test]
async fn test_two_candidates_dispatched_once() {
    let selector = Arc::new(
        ScriptedSelector::new().script(Category::Details, candidates(&["AAAA11", "BBBB11"])),
    );
    let mut iterators = vec![iterator(Category::Details, &selector, Duration::ZERO)];
    let (mut core, mut rx, _metrics, _cancel) = core(8, 2);

    let now = Utc::now();
    assert!(matches!(core.scan(&mut iterators, now).await, Scan::Dispatched { .. }));
    assert!(matches!(core.scan(&mut iterators, now).await, Scan::Dispatched { .. }));
    assert_eq!(iterators[0].buffered(), 0);

    // Buffer drained: the next peek refills and the selector has nothing left
    assert!(iterators[0].peek(now).await.is_none());
    assert!(matches!(core.scan(&mut iterators, now).await, Scan::Idle { .. }));

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.fund_code, "AAAA11");
    assert_eq!(first.cnpj, "cnpj-AAAA11");
    assert_eq!(second.fund_code, "BBBB11");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_overdue_candidates_wait_for_refill_boundary() {
    let interval = Duration::from_secs(60);
    // Both funds stay overdue: the selector returns them on every refill
    let selector = Arc::new(
        ScriptedSelector::new()
            .script(Category::Details, candidates(&["AAAA11", "BBBB11"]))
            .script(Category::Details, candidates(&["AAAA11", "BBBB11"])),
    );
    let mut iterators = vec![iterator(Category::Details, &selector, interval)];
    let (mut core, mut rx, _metrics, _cancel) = core(8, 2);

    let now = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 7).unwrap();
    assert!(matches!(core.scan(&mut iterators, now).await, Scan::Dispatched { .. }));
    assert!(matches!(core.scan(&mut iterators, now).await, Scan::Dispatched { .. }));
    assert_eq!(iterators[0].buffered(), 0);

    let boundary = iterators[0].next_refill();
    assert_eq!(boundary, Utc.with_ymd_and_hms(2026, 3, 2, 14, 1, 0).unwrap());

    // Drained before the boundary: no refill, even though work is overdue
    let before = boundary - chrono::Duration::seconds(1);
    assert!(iterators[0].peek(before).await.is_none());
    assert_eq!(selector.calls(), 1);
    assert_eq!(
        core.scan(&mut iterators, before).await,
        Scan::Idle { next_ready: Some(boundary) }
    );

    // At the boundary the same funds come back
    assert_eq!(iterators[0].peek(boundary).await.unwrap().fund_code, "AAAA11");
    assert_eq!(selector.calls(), 2);
    assert!(matches!(core.scan(&mut iterators, boundary).await, Scan::Dispatched { .. }));

    let codes: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|item| item.fund_code)
        .collect();
    assert_eq!(codes, vec!["AAAA11", "BBBB11", "AAAA11"]);
}

#[tokio::test]
async fn test_phase_spreading() {
    let selector = Arc::new(ScriptedSelector::new());
    let interval = Duration::from_secs(60);
    let count = 4;
    let categories = [
        Category::Details,
        Category::Indicators,
        Category::Cotations,
        Category::Documents,
    ];
    let mut iterators: Vec<FundIterator> = categories
        .iter()
        .enumerate()
        .map(|(i, c)| iterator(*c, &selector, interval).with_phase(spread_phase(interval, i, count)))
        .collect();

    let now = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 7).unwrap();
    for it in iterators.iter_mut() {
        assert!(it.peek(now).await.is_none());
    }

    let refills: Vec<_> = iterators.iter().map(FundIterator::next_refill).collect();
    let distinct: HashSet<_> = refills.iter().collect();
    assert_eq!(distinct.len(), count);
    for refill in &refills {
        assert!(*refill > now);
        assert!(*refill <= now + chrono::Duration::seconds(60));
    }

    // Consecutive boundaries are a quarter interval apart
    let mut sorted = refills.clone();
    sorted.sort();
    for pair in sorted.windows(2) {
        assert_eq!(pair[1] - pair[0], chrono::Duration::seconds(15));
    }
}

#[test]
fn test_normal_iterators_layout() {
    let mut config = Config::default();
    config.scheduler.tick_secs = 60;
    let selector = Arc::new(ScriptedSelector::new());

    let iterators = normal_iterators(
        &[Category::FundList, Category::Details, Category::Quotes],
        selector,
        &config,
    );

    assert_eq!(iterators.len(), 3);
    // Singleton refills on its staleness, per-fund categories on the tick
    assert_eq!(iterators[0].refill_interval(), Duration::from_secs(1440 * 60));
    assert_eq!(iterators[1].refill_interval(), Duration::from_secs(60));
    assert_eq!(iterators[1].phase_offset(), Duration::from_secs(20));
    assert_eq!(iterators[2].phase_offset(), Duration::from_secs(40));
}

#[tokio::test]
async fn test_quotes_gated_outside_business_hours() {
    let config = Config::default();
    let selector = Arc::new(
        ScriptedSelector::new().script(Category::Quotes, candidates(&["MXRF11"])),
    );
    let mut iterators = normal_iterators(&[Category::Quotes], selector.clone(), &config);

    // Sunday noon in São Paulo
    let sunday = Utc.with_ymd_and_hms(2026, 3, 8, 15, 0, 0).unwrap();
    assert!(iterators[0].peek(sunday).await.is_none());
    assert_eq!(selector.calls(), 0);

    let mut forced = Config::default();
    forced.scheduler.force = true;
    let mut iterators = normal_iterators(&[Category::Quotes], selector.clone(), &forced);
    assert_eq!(iterators[0].peek(sunday).await.unwrap().fund_code, "MXRF11");
}

// ============================================================================
// Normal Loop
// ============================================================================

#[tokio::test]
async fn test_normal_dispatcher_runs_until_cancelled() {
    let selector = Arc::new(
        ScriptedSelector::new()
            .script(Category::Details, candidates(&["HGLG11", "KNRI11"]))
            .script(Category::Cotations, candidates(&["VISC11"])),
    );
    let iterators = vec![
        iterator(Category::Details, &selector, Duration::ZERO),
        iterator(Category::Cotations, &selector, Duration::ZERO),
    ];
    let (core, mut rx, metrics, cancel) = core(8, 2);

    let handle = tokio::spawn(NormalDispatcher::new(core, iterators).run());

    let mut codes = HashSet::new();
    for _ in 0..3 {
        let item = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("dispatch timed out")
            .expect("queue closed");
        codes.insert(item.fund_code);
    }
    assert_eq!(codes, HashSet::from(["HGLG11".into(), "KNRI11".into(), "VISC11".into()]));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("dispatcher did not stop")
        .unwrap();
    assert_eq!(metrics.enqueued_total(), 3);
}
