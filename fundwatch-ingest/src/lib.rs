//! fundwatch ingest
//!
//! Keeps a Postgres store of real-estate fund (FII) data fresh by collecting
//! from several rate-limited sources under per-category staleness deadlines.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       fundwatch-ingest                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  FundIterator ×N ──▶ Dispatcher ──▶ work queue ──▶ Worker ×M     │
//! │       ▲             (round robin,   (bounded)      collect       │
//! │       │              dispatch gap)                 + persist     │
//! │  CandidateSelector                                    │          │
//! │       ▲                                               ▼          │
//! │       └────────────── fund_state timestamps ◀── PgStore          │
//! │                                                                  │
//! │  EodTrigger ──▶ EodCloser (advisory lock, once per date)         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modes
//!
//! - **Normal**: every configured category is refreshed continuously; the
//!   end-of-day close fires once per trading date.
//! - **Backfill**: stages run in dependency order until nothing is overdue,
//!   then the process exits.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod category;
pub mod eod;
pub mod market;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod types;
pub mod worker;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fundwatch_common::config::{Config, Mode};

use crate::category::Category;
use crate::eod::{EodCloser, EodTrigger};
use crate::scheduler::{
    normal_iterators, spawn_reporter, BackfillDispatcher, BackfillOutcome, DispatchCore,
    DispatchMetrics, Gate, NormalDispatcher,
};
use crate::source::{JsonApiSource, SourceRegistry};
use crate::store::PgStore;
use crate::worker::{Executor, WorkerPool};

/// Register a JSON source for every category with a configured URL.
pub fn build_registry(config: &Config) -> SourceRegistry {
    let timeout = config.sources.timeout();
    let mut registry = SourceRegistry::new();

    for category in Category::ALL {
        match category.source_url(&config.sources) {
            Some(template) => registry.register(
                category,
                Arc::new(JsonApiSource::new(category, template, timeout)),
            ),
            None => info!(category = %category, "No source configured, category disabled"),
        }
    }

    registry
}

/// Cancel `token` on SIGINT or SIGTERM.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down"),
            _ = terminate => info!("Received SIGTERM, shutting down"),
        }
        token.cancel();
    });
}

/// Main ingestion service.
pub struct IngestService {
    config: Config,
}

impl IngestService {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Connect, spawn workers and run the configured mode to completion.
    pub async fn start(self) -> Result<()> {
        let config = self.config;

        let store = Arc::new(
            PgStore::connect(&config.database.url, config.database.max_connections)
                .await
                .context("Failed to initialize PostgreSQL store")?,
        );

        let registry = build_registry(&config);
        if registry.is_empty() {
            anyhow::bail!("No sources configured (set FUNDWATCH_SOURCE_<CATEGORY>_URL)");
        }

        let cancel = CancellationToken::new();
        spawn_signal_handler(cancel.clone());

        let capacity = config.scheduler.resolved_queue_capacity();
        let pool_size = config.scheduler.workers;
        let (tx, rx) = mpsc::channel(capacity);
        let metrics = Arc::new(DispatchMetrics::new());

        let executor = Arc::new(Executor::new(registry.clone(), store.clone()));
        let workers = WorkerPool::spawn(
            pool_size,
            rx,
            Arc::clone(&executor),
            Arc::clone(&metrics),
            cancel.clone(),
        );
        let reporter = spawn_reporter(
            Arc::clone(&metrics),
            tx.downgrade(),
            config.scheduler.metrics_interval(),
            cancel.clone(),
        );

        info!(
            mode = %config.scheduler.mode,
            workers = pool_size,
            queue_capacity = capacity,
            force = config.scheduler.force,
            categories = ?registry.categories(),
            "Ingest service started"
        );

        let core = DispatchCore::new(tx, pool_size, Arc::clone(&metrics), cancel.clone());

        match config.scheduler.mode {
            Mode::Normal => {
                let iterators = normal_iterators(&registry.categories(), store.clone(), &config);
                let window: Gate = if config.scheduler.force {
                    market::always
                } else {
                    market::eod_window
                };
                let trigger = EodTrigger::new(
                    Arc::new(EodCloser::new(store.clone())),
                    window,
                    cancel.clone(),
                );
                NormalDispatcher::new(core, iterators)
                    .with_eod(trigger)
                    .run()
                    .await;
            }
            Mode::Backfill => {
                let outcome =
                    BackfillDispatcher::new(core, executor, store.clone(), store.clone(), &config)
                        .run()
                        .await;
                if outcome == BackfillOutcome::Completed {
                    info!("Backfill finished, draining work queue");
                }
            }
        }

        // The dispatcher owned the only sender: workers finish the queued
        // items and exit, unless cancellation got there first.
        workers.join().await;
        cancel.cancel();
        let _ = reporter.await;

        let snapshot = metrics.snapshot();
        info!(
            enqueued_total = snapshot.enqueued_total,
            completed_total = snapshot.completed_total,
            failed_total = snapshot.failed_total,
            "Ingest service stopped"
        );

        Ok(())
    }
}
