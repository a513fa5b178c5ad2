//! Persistence collaborators of the scheduler.
//!
//! The scheduler only talks to storage through the traits defined here:
//!
//! - [`CandidateSelector`]: which funds are overdue for a category
//! - [`Persister`]: write a collected payload and advance its staleness mark
//! - [`DerivedRecompute`]: rebuild dividend-yield aggregates
//!
//! [`PgStore`] implements all of them (plus the EOD backend) on Postgres.

pub mod postgres;

pub use postgres::PgStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::category::Category;
use crate::types::{Collected, FundCandidate};

/// Errors raised by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Query or connection failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failure at startup
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Storage task aborted or panicked
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Payload cannot be stored as given
    #[error("Invalid data: {0}")]
    Invalid(String),
}

/// Finds funds whose data in a category is older than its staleness interval.
///
/// Results must reflect the timestamps written by the [`Persister`].
#[async_trait]
pub trait CandidateSelector: Send + Sync {
    /// Up to `limit` overdue funds, most overdue first.
    async fn select_overdue(
        &self,
        category: Category,
        interval: Duration,
        limit: usize,
    ) -> Result<Vec<FundCandidate>, StoreError>;

    /// How many funds are still overdue.
    async fn count_overdue(&self, category: Category, interval: Duration)
        -> Result<u64, StoreError>;
}

/// Durable write side.
///
/// Writes are idempotent upserts; on success the fund's staleness timestamp
/// for the payload's category advances in the same transaction.
#[async_trait]
pub trait Persister: Send + Sync {
    async fn persist(&self, fund_code: &str, collected: &Collected) -> Result<(), StoreError>;
}

/// Recomputation of derived aggregates that later stages depend on.
#[async_trait]
pub trait DerivedRecompute: Send + Sync {
    /// Rebuild trailing dividend-yield aggregates; returns funds updated.
    async fn recompute_dividend_yields(&self) -> Result<u64, StoreError>;
}
