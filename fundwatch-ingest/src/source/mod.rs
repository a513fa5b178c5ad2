//! Source adapter abstraction.
//!
//! Defines the [`SourceAdapter`] trait every data source implements and the
//! [`SourceRegistry`] that maps each [`Category`] to its adapter.

pub mod http;

pub use http::JsonApiSource;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::category::Category;
use crate::types::{CollectRequest, Collected};

// ============================================================================
// Source Error
// ============================================================================

/// Errors raised while collecting from an external source.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Source answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Source rate limited the request
    #[error("Rate limited by {0}")]
    RateLimited(String),

    /// Response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Source has no data for the fund
    #[error("No data for {0}")]
    NotFound(String),

    /// Request cannot be built for this fund (missing identifier)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SourceError {
    /// Whether the failure is likely transient.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode(_) | Self::NotFound(_) | Self::InvalidRequest(_) => false,
        }
    }
}

// ============================================================================
// Source Adapter Trait
// ============================================================================

/// A source of one category of fund data.
///
/// Implementations must be safe to call concurrently for different funds.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Name of the source for logging (e.g., "b3-quotes")
    fn name(&self) -> &str;

    /// Perform one unit of collection work.
    async fn collect(&self, request: &CollectRequest) -> Result<Collected, SourceError>;
}

// ============================================================================
// Registry
// ============================================================================

/// Capability table mapping each category to the adapter that collects it.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    adapters: HashMap<Category, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the adapter for a category.
    pub fn register(&mut self, category: Category, adapter: Arc<dyn SourceAdapter>) {
        tracing::debug!(category = %category, source = adapter.name(), "Registered source");
        self.adapters.insert(category, adapter);
    }

    /// Builder-style registration.
    pub fn with(mut self, category: Category, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(category, adapter);
        self
    }

    pub fn get(&self, category: Category) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.get(&category)
    }

    pub fn contains(&self, category: Category) -> bool {
        self.adapters.contains_key(&category)
    }

    /// Registered categories in catalogue order.
    pub fn categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.adapters.contains_key(c))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("categories", &self.categories())
            .finish()
    }
}
