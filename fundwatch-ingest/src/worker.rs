//! Worker pool consuming the work queue.
//!
//! Every worker performs collect-then-persist for one item at a time. Failures
//! are logged and counted, never retried here: the fund's staleness timestamp
//! stays behind, so the next refill selects it again.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::category::Category;
use crate::scheduler::DispatchMetrics;
use crate::source::{SourceError, SourceRegistry};
use crate::store::{Persister, StoreError};
use crate::types::WorkItem;

/// Failure of one work item.
#[derive(Debug, Error)]
pub enum WorkError {
    #[error("No source registered for {0}")]
    NoAdapter(Category),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkError {
    /// Whether a later attempt may succeed without operator action.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NoAdapter(_) => false,
            Self::Source(e) => e.is_recoverable(),
            Self::Store(StoreError::Database(_)) => true,
            Self::Store(_) => false,
        }
    }
}

/// Collect-then-persist for a single item.
pub struct Executor {
    registry: SourceRegistry,
    persister: Arc<dyn Persister>,
}

impl Executor {
    pub fn new(registry: SourceRegistry, persister: Arc<dyn Persister>) -> Self {
        Self {
            registry,
            persister,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub async fn execute(&self, item: &WorkItem) -> Result<(), WorkError> {
        let adapter = self
            .registry
            .get(item.category)
            .ok_or(WorkError::NoAdapter(item.category))?;

        let collected = adapter.collect(&item.request()).await?;
        self.persister.persist(&item.fund_code, &collected).await?;

        debug!(
            category = %item.category,
            fund = %item.fund_code,
            source = adapter.name(),
            "Work item persisted"
        );
        Ok(())
    }
}

/// Fixed pool of workers sharing one receiver.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers.
    ///
    /// Workers exit on cancellation, or once the queue is closed and drained.
    pub fn spawn(
        size: usize,
        rx: mpsc::Receiver<WorkItem>,
        executor: Arc<Executor>,
        metrics: Arc<DispatchMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..size)
            .map(|id| {
                let rx = Arc::clone(&rx);
                let executor = Arc::clone(&executor);
                let metrics = Arc::clone(&metrics);
                let cancel = cancel.clone();
                tokio::spawn(run_worker(id, rx, executor, metrics, cancel))
            })
            .collect();

        info!(workers = size, "Worker pool started");
        Self { handles }
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn run_worker(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    executor: Arc<Executor>,
    metrics: Arc<DispatchMetrics>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            item = async { rx.lock().await.recv().await } => item,
        };
        let Some(item) = next else {
            debug!(worker = id, "Work queue closed");
            break;
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = executor.execute(&item) => result,
        };

        match result {
            Ok(()) => metrics.record_completed(),
            Err(e) => {
                metrics.record_failed();
                warn!(
                    worker = id,
                    category = %item.category,
                    fund = %item.fund_code,
                    error = %e,
                    recoverable = e.is_recoverable(),
                    "Work item failed"
                );
            }
        }
    }
}
