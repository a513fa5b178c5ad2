//! Continuous dispatch.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::{spread_phase, DispatchCore, FundIterator, Gate};
use crate::category::Category;
use crate::eod::EodTrigger;
use crate::market;
use crate::store::CandidateSelector;
use fundwatch_common::Config;

/// Build one iterator per category for continuous operation.
///
/// Singletons refill on their staleness interval, per-fund categories on the
/// tick. Business-hours categories are gated unless `force` is set. Phases are
/// spread so the iterators do not refill at the same instant.
pub fn normal_iterators(
    categories: &[Category],
    selector: Arc<dyn CandidateSelector>,
    config: &Config,
) -> Vec<FundIterator> {
    let count = categories.len();

    categories
        .iter()
        .enumerate()
        .map(|(index, &category)| {
            let staleness = category.staleness(&config.staleness);
            let refill_interval = if category.is_singleton() {
                staleness
            } else {
                config.scheduler.tick()
            };
            let gate: Gate = if category.is_business_hours_only() && !config.scheduler.force {
                market::business_hours
            } else {
                market::always
            };

            FundIterator::new(
                category,
                Arc::clone(&selector),
                staleness,
                config.scheduler.batch_size,
                refill_interval,
            )
            .with_gate(gate)
            .with_phase(spread_phase(refill_interval, index, count))
        })
        .collect()
}

/// Dispatch loop of normal mode. Runs until cancelled.
pub struct NormalDispatcher {
    core: DispatchCore,
    iterators: Vec<FundIterator>,
    eod: Option<EodTrigger>,
}

impl NormalDispatcher {
    pub fn new(core: DispatchCore, iterators: Vec<FundIterator>) -> Self {
        Self {
            core,
            iterators,
            eod: None,
        }
    }

    /// Attach the end-of-day trigger, polled outside the round robin.
    pub fn with_eod(mut self, trigger: EodTrigger) -> Self {
        self.eod = Some(trigger);
        self
    }

    pub async fn run(mut self) {
        let categories: Vec<&'static str> =
            self.iterators.iter().map(|it| it.category().name()).collect();
        info!(?categories, eod = self.eod.is_some(), "Normal dispatch started");

        loop {
            let now = Utc::now();

            if let Some(eod) = self.eod.as_mut() {
                eod.poll(now);
            }

            let scan = self.core.scan(&mut self.iterators, now).await;
            if !self.core.pace(&scan, now).await {
                break;
            }
        }

        if let Some(eod) = self.eod.take() {
            eod.shutdown().await;
        }

        info!(
            enqueued_total = self.core.metrics().enqueued_total(),
            "Normal dispatch stopped"
        );
    }
}
