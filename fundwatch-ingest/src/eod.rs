//! End-of-day close.
//!
//! Once per trading date the latest intraday price of every fund becomes its
//! daily close and the fund's derived metrics are marked stale. The batch runs
//! under a cluster-wide try-lock: when another process holds it, the call is a
//! silent no-op.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::market;
use crate::scheduler::Gate;
use crate::store::StoreError;

/// Advisory lock key shared by every process running the closer.
pub const EOD_LOCK_KEY: i64 = 0x00F1_1E0D;

/// Backend of the closer: run the close batch if, and only if, the lock is free.
#[async_trait]
pub trait EodStore: Send + Sync {
    /// `Ok(None)` when the lock is held elsewhere, otherwise funds closed.
    ///
    /// The batch is atomic: on error nothing is written.
    async fn close_day_exclusive(
        &self,
        lock_key: i64,
        date: NaiveDate,
    ) -> Result<Option<u64>, StoreError>;
}

/// Result of one close attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EodOutcome {
    Closed { funds: u64 },
    /// Another process held the lock
    Skipped,
}

/// Singleton end-of-day batch job.
pub struct EodCloser {
    store: Arc<dyn EodStore>,
    lock_key: i64,
}

impl EodCloser {
    pub fn new(store: Arc<dyn EodStore>) -> Self {
        Self {
            store,
            lock_key: EOD_LOCK_KEY,
        }
    }

    pub fn with_lock_key(mut self, lock_key: i64) -> Self {
        self.lock_key = lock_key;
        self
    }

    pub async fn run(&self, date: NaiveDate) -> Result<EodOutcome, StoreError> {
        match self.store.close_day_exclusive(self.lock_key, date).await? {
            Some(funds) => Ok(EodOutcome::Closed { funds }),
            None => Ok(EodOutcome::Skipped),
        }
    }
}

/// Fires the closer once per São Paulo calendar date while the window is open.
pub struct EodTrigger {
    closer: Arc<EodCloser>,
    window: Gate,
    last_fired: Option<NaiveDate>,
    cancel: CancellationToken,
    running: Option<JoinHandle<()>>,
}

impl EodTrigger {
    pub fn new(closer: Arc<EodCloser>, window: Gate, cancel: CancellationToken) -> Self {
        Self {
            closer,
            window,
            last_fired: None,
            cancel,
            running: None,
        }
    }

    /// Date of the last fired close.
    pub fn last_fired(&self) -> Option<NaiveDate> {
        self.last_fired
    }

    /// Spawn the closer if the window is open and today has not fired yet.
    ///
    /// Returns whether a close was started. A failed close is not retried
    /// until the next date's window.
    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        if !(self.window)(now) {
            return false;
        }
        let date = market::trade_date(now);
        if self.last_fired == Some(date) {
            return false;
        }
        self.last_fired = Some(date);

        let closer = Arc::clone(&self.closer);
        let cancel = self.cancel.clone();
        self.running = Some(tokio::spawn(async move {
            info!(%date, "Starting end-of-day close");
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%date, "End-of-day close cancelled");
                    return;
                }
                result = closer.run(date) => result,
            };
            match result {
                Ok(EodOutcome::Closed { funds }) => {
                    info!(%date, funds, "End-of-day close completed");
                }
                Ok(EodOutcome::Skipped) => {
                    debug!(%date, "End-of-day lock held elsewhere, skipped");
                }
                Err(e) => {
                    error!(%date, error = %e, "End-of-day close failed");
                }
            }
        }));

        true
    }

    /// Wait for a close still in flight.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.running.take() {
            let _ = handle.await;
        }
    }
}
