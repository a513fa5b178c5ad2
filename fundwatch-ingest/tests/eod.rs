//! Integration tests for the end-of-day closer under contention.
//!
//! The in-memory backend stands in for the advisory lock with a try-lock, so
//! concurrent closers behave like separate processes sharing one database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;

use fundwatch_ingest::eod::{EodCloser, EodOutcome, EodStore, EOD_LOCK_KEY};
use fundwatch_ingest::store::StoreError;

/// Backend with one try-lock per key and a per-date daily series.
struct LockingStore {
    locks: std::sync::Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    intraday: Vec<(&'static str, f64)>,
    daily: std::sync::Mutex<HashMap<(String, NaiveDate), f64>>,
    batches: AtomicUsize,
    fail: AtomicBool,
}

impl LockingStore {
    fn new(intraday: Vec<(&'static str, f64)>) -> Self {
        Self {
            locks: std::sync::Mutex::new(HashMap::new()),
            intraday,
            daily: std::sync::Mutex::new(HashMap::new()),
            batches: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    fn lock_for(&self, key: i64) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl EodStore for LockingStore {
    async fn close_day_exclusive(
        &self,
        lock_key: i64,
        date: NaiveDate,
    ) -> Result<Option<u64>, StoreError> {
        let lock = self.lock_for(lock_key);
        let Ok(_guard) = lock.try_lock() else {
            return Ok(None);
        };

        self.batches.fetch_add(1, Ordering::SeqCst);
        // Hold the lock long enough for every contender to try it
        tokio::time::sleep(Duration::from_millis(50)).await;

        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Invalid("connection reset".into()));
        }

        let mut daily = self.daily.lock().unwrap();
        for (code, price) in &self.intraday {
            daily.insert((code.to_string(), date), *price);
        }
        Ok(Some(self.intraday.len() as u64))
    }
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

#[tokio::test]
async fn test_concurrent_closers_run_at_most_once() {
    let store = Arc::new(LockingStore::new(vec![("HGLG11", 161.2), ("KNRI11", 139.9)]));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let closer = EodCloser::new(store.clone());
            tokio::spawn(async move { closer.run(date()).await })
        })
        .collect();

    let mut closed = 0;
    let mut skipped = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            EodOutcome::Closed { funds } => {
                assert_eq!(funds, 2);
                closed += 1;
            }
            EodOutcome::Skipped => skipped += 1,
        }
    }

    assert_eq!(closed, 1);
    assert_eq!(skipped, 7);
    assert_eq!(store.batches.load(Ordering::SeqCst), 1);
    assert_eq!(
        store.daily.lock().unwrap().get(&("HGLG11".to_string(), date())),
        Some(&161.2)
    );
}

#[tokio::test]
async fn test_distinct_lock_keys_do_not_exclude() {
    let store = Arc::new(LockingStore::new(vec![("MXRF11", 10.4)]));

    let a = EodCloser::new(store.clone());
    let b = EodCloser::new(store.clone()).with_lock_key(EOD_LOCK_KEY + 1);
    let (ra, rb) = tokio::join!(a.run(date()), b.run(date()));

    assert_eq!(ra.unwrap(), EodOutcome::Closed { funds: 1 });
    assert_eq!(rb.unwrap(), EodOutcome::Closed { funds: 1 });
}

#[tokio::test]
async fn test_failed_batch_writes_nothing() {
    let store = Arc::new(LockingStore::new(vec![("VISC11", 118.0)]));
    store.fail.store(true, Ordering::SeqCst);

    let closer = EodCloser::new(store.clone());
    assert!(closer.run(date()).await.is_err());
    assert!(store.daily.lock().unwrap().is_empty());

    // The lock was released with the failed batch
    store.fail.store(false, Ordering::SeqCst);
    assert_eq!(closer.run(date()).await.unwrap(), EodOutcome::Closed { funds: 1 });
    assert_eq!(store.batches.load(Ordering::SeqCst), 2);
}
