//! One-shot convergence.
//!
//! Backfill walks an ordered list of stages. Collection stages run the shared
//! scan/enqueue/pace cycle over their own iterators until the stage's
//! [`RemainingProbe`] reports nothing left; the other stages run a single job
//! directly and retry it until it succeeds.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{sleep_or_cancel, spread_phase, DispatchCore, FundIterator, Scan, SELECTOR_COOLDOWN};
use crate::category::Category;
use crate::store::{CandidateSelector, DerivedRecompute, StoreError};
use crate::types::WorkItem;
use crate::worker::Executor;
use fundwatch_common::{Config, StalenessConfig};

// ============================================================================
// Stages
// ============================================================================

/// One step of the backfill plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Collect the fund listing directly, retrying until it succeeds
    FundList,
    /// Dispatch the given categories until none is overdue
    Drain(Vec<Category>),
    /// Rebuild dividend-yield aggregates, retrying until it succeeds
    RecomputeDividendYields,
}

impl Stage {
    /// The backfill plan, in execution order.
    pub fn plan() -> Vec<Stage> {
        vec![
            Stage::FundList,
            Stage::Drain(vec![Category::Details, Category::Quotes]),
            Stage::RecomputeDividendYields,
            Stage::Drain(vec![Category::Documents, Category::Cotations]),
            Stage::Drain(vec![Category::Indicators]),
        ]
    }

    pub fn name(&self) -> String {
        match self {
            Stage::FundList => "fund_list".to_string(),
            Stage::Drain(categories) => categories
                .iter()
                .map(Category::name)
                .collect::<Vec<_>>()
                .join("+"),
            Stage::RecomputeDividendYields => "dividend_yield_recompute".to_string(),
        }
    }
}

// ============================================================================
// Convergence Probe
// ============================================================================

/// How much work a stage still has.
#[async_trait]
pub trait RemainingProbe: Send + Sync {
    async fn remaining(&self) -> Result<u64, StoreError>;
}

/// Sums the overdue counts of a stage's categories.
pub struct OverdueProbe {
    selector: Arc<dyn CandidateSelector>,
    targets: Vec<(Category, Duration)>,
}

impl OverdueProbe {
    pub fn new(selector: Arc<dyn CandidateSelector>, targets: Vec<(Category, Duration)>) -> Self {
        Self { selector, targets }
    }
}

#[async_trait]
impl RemainingProbe for OverdueProbe {
    async fn remaining(&self) -> Result<u64, StoreError> {
        let mut total = 0;
        for (category, staleness) in &self.targets {
            total += self.selector.count_overdue(*category, *staleness).await?;
        }
        Ok(total)
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// How a backfill run (or stage) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    Completed,
    Cancelled,
}

/// Dispatch loop of backfill mode.
pub struct BackfillDispatcher {
    core: DispatchCore,
    executor: Arc<Executor>,
    selector: Arc<dyn CandidateSelector>,
    recompute: Arc<dyn DerivedRecompute>,
    staleness: StalenessConfig,
    batch_size: usize,
    refill_interval: Duration,
    retry_delay: Duration,
}

impl BackfillDispatcher {
    pub fn new(
        core: DispatchCore,
        executor: Arc<Executor>,
        selector: Arc<dyn CandidateSelector>,
        recompute: Arc<dyn DerivedRecompute>,
        config: &Config,
    ) -> Self {
        Self {
            core,
            executor,
            selector,
            recompute,
            staleness: config.staleness.clone(),
            batch_size: config.scheduler.batch_size,
            refill_interval: config.scheduler.tick(),
            retry_delay: SELECTOR_COOLDOWN,
        }
    }

    /// Override the refill interval of stage iterators.
    pub fn with_refill_interval(mut self, interval: Duration) -> Self {
        self.refill_interval = interval;
        self
    }

    /// Override the delay between retries of failed steps and probes.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Run every stage of the plan in order.
    pub async fn run(mut self) -> BackfillOutcome {
        let started = std::time::Instant::now();
        info!("Backfill started");

        for stage in Stage::plan() {
            let stage_started = std::time::Instant::now();
            let name = stage.name();
            info!(stage = %name, "Backfill stage started");

            let outcome = match stage {
                Stage::FundList => self.run_fund_list().await,
                Stage::RecomputeDividendYields => self.run_recompute().await,
                Stage::Drain(categories) => self.run_drain(&categories).await,
            };

            if outcome == BackfillOutcome::Cancelled {
                info!(stage = %name, "Backfill cancelled");
                return BackfillOutcome::Cancelled;
            }
            info!(
                stage = %name,
                elapsed_ms = stage_started.elapsed().as_millis() as u64,
                "Backfill stage completed"
            );
        }

        info!(
            elapsed_secs = started.elapsed().as_secs(),
            enqueued_total = self.core.metrics().enqueued_total(),
            "Backfill completed"
        );
        BackfillOutcome::Completed
    }

    async fn run_fund_list(&self) -> BackfillOutcome {
        if !self.executor.registry().contains(Category::FundList) {
            warn!("No fund list source configured, skipping stage");
            return BackfillOutcome::Completed;
        }

        let item = WorkItem::singleton(Category::FundList);
        let cancel = self.core.cancel_token();
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return BackfillOutcome::Cancelled,
                result = self.executor.execute(&item) => result,
            };
            match result {
                Ok(()) => return BackfillOutcome::Completed,
                Err(e) => warn!(error = %e, "Fund list collection failed, retrying"),
            }
            if !sleep_or_cancel(self.retry_delay, cancel).await {
                return BackfillOutcome::Cancelled;
            }
        }
    }

    async fn run_recompute(&self) -> BackfillOutcome {
        let cancel = self.core.cancel_token();
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return BackfillOutcome::Cancelled,
                result = self.recompute.recompute_dividend_yields() => result,
            };
            match result {
                Ok(funds) => {
                    info!(funds, "Dividend-yield aggregates recomputed");
                    return BackfillOutcome::Completed;
                }
                Err(e) => warn!(error = %e, "Dividend-yield recompute failed, retrying"),
            }
            if !sleep_or_cancel(self.retry_delay, cancel).await {
                return BackfillOutcome::Cancelled;
            }
        }
    }

    async fn run_drain(&mut self, categories: &[Category]) -> BackfillOutcome {
        let registered: Vec<Category> = categories
            .iter()
            .copied()
            .filter(|c| self.executor.registry().contains(*c))
            .collect();
        if registered.is_empty() {
            warn!(?categories, "No source configured for stage, skipping");
            return BackfillOutcome::Completed;
        }

        let mut iterators = self.stage_iterators(&registered);
        let probe = OverdueProbe::new(
            Arc::clone(&self.selector),
            registered
                .iter()
                .map(|c| (*c, c.staleness(&self.staleness)))
                .collect(),
        );
        self.run_stage(&mut iterators, &probe).await
    }

    /// Ungated iterators for a stage, phases spread over the refill interval.
    pub fn stage_iterators(&self, categories: &[Category]) -> Vec<FundIterator> {
        let count = categories.len();
        categories
            .iter()
            .enumerate()
            .map(|(index, &category)| {
                FundIterator::new(
                    category,
                    Arc::clone(&self.selector),
                    category.staleness(&self.staleness),
                    self.batch_size,
                    self.refill_interval,
                )
                .with_phase(spread_phase(self.refill_interval, index, count))
            })
            .collect()
    }

    /// Dispatch `iterators` until `probe` reports zero with nothing ready and
    /// the queue empty.
    pub async fn run_stage(
        &mut self,
        iterators: &mut [FundIterator],
        probe: &dyn RemainingProbe,
    ) -> BackfillOutcome {
        self.core.reset_rotation();

        loop {
            let now = Utc::now();
            let scan = self.core.scan(iterators, now).await;
            if scan == Scan::Closed {
                return BackfillOutcome::Cancelled;
            }

            if matches!(scan, Scan::Idle { .. }) && self.core.queue_len() == 0 {
                let remaining = tokio::select! {
                    _ = self.core.cancel_token().cancelled() => return BackfillOutcome::Cancelled,
                    remaining = probe.remaining() => remaining,
                };
                match remaining {
                    Ok(0) => return BackfillOutcome::Completed,
                    Ok(count) => debug!(remaining = count, "Stage not converged yet"),
                    Err(e) => {
                        warn!(error = %e, "Remaining count failed, retrying");
                        if !sleep_or_cancel(self.retry_delay, self.core.cancel_token()).await {
                            return BackfillOutcome::Cancelled;
                        }
                        continue;
                    }
                }
            }

            if !self.core.pace(&scan, now).await {
                return BackfillOutcome::Cancelled;
            }
        }
    }
}
