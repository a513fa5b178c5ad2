//! Hand-written collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fundwatch_ingest::category::Category;
use fundwatch_ingest::scheduler::{DispatchCore, DispatchMetrics};
use fundwatch_ingest::source::{SourceAdapter, SourceError};
use fundwatch_ingest::store::{CandidateSelector, DerivedRecompute, Persister, StoreError};
use fundwatch_ingest::types::{CollectRequest, Collected, FundCandidate, Payload, WorkItem};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn candidates(codes: &[&str]) -> Vec<FundCandidate> {
    codes
        .iter()
        .map(|code| FundCandidate::new(*code, format!("cnpj-{code}"), format!("ext-{code}")))
        .collect()
}

/// Dispatch core over a fresh channel.
pub fn core(
    capacity: usize,
    pool_size: usize,
) -> (DispatchCore, mpsc::Receiver<WorkItem>, Arc<DispatchMetrics>, CancellationToken) {
    let (tx, rx) = mpsc::channel(capacity);
    let metrics = Arc::new(DispatchMetrics::new());
    let cancel = CancellationToken::new();
    let core = DispatchCore::new(tx, pool_size, Arc::clone(&metrics), cancel.clone());
    (core, rx, metrics, cancel)
}

// ============================================================================
// Selectors
// ============================================================================

/// Selector returning scripted batches per category, then empty batches.
#[derive(Default)]
pub struct ScriptedSelector {
    batches: Mutex<HashMap<Category, VecDeque<Vec<FundCandidate>>>>,
    calls: AtomicUsize,
}

impl ScriptedSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, category: Category, batch: Vec<FundCandidate>) -> Self {
        self.batches
            .lock()
            .unwrap()
            .entry(category)
            .or_default()
            .push_back(batch);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandidateSelector for ScriptedSelector {
    async fn select_overdue(
        &self,
        category: Category,
        _interval: Duration,
        limit: usize,
    ) -> Result<Vec<FundCandidate>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let batch = self
            .batches
            .lock()
            .unwrap()
            .get_mut(&category)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        Ok(batch.into_iter().take(limit).collect())
    }

    async fn count_overdue(&self, _category: Category, _interval: Duration) -> Result<u64, StoreError> {
        Ok(0)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Store whose overdue set shrinks as payloads are persisted.
pub struct MemoryStore {
    funds: Vec<FundCandidate>,
    fresh: Mutex<HashSet<(Category, String)>>,
    pub persisted: AtomicUsize,
    pub recomputes: AtomicUsize,
}

impl MemoryStore {
    pub fn new(codes: &[&str]) -> Self {
        Self {
            funds: candidates(codes),
            fresh: Mutex::new(HashSet::new()),
            persisted: AtomicUsize::new(0),
            recomputes: AtomicUsize::new(0),
        }
    }

    pub fn is_fresh(&self, category: Category, code: &str) -> bool {
        self.fresh
            .lock()
            .unwrap()
            .contains(&(category, code.to_string()))
    }

    fn overdue(&self, category: Category) -> Vec<FundCandidate> {
        let fresh = self.fresh.lock().unwrap();
        self.funds
            .iter()
            .filter(|f| !fresh.contains(&(category, f.code.clone())))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CandidateSelector for MemoryStore {
    async fn select_overdue(
        &self,
        category: Category,
        _interval: Duration,
        limit: usize,
    ) -> Result<Vec<FundCandidate>, StoreError> {
        Ok(self.overdue(category).into_iter().take(limit).collect())
    }

    async fn count_overdue(&self, category: Category, _interval: Duration) -> Result<u64, StoreError> {
        Ok(self.overdue(category).len() as u64)
    }
}

#[async_trait]
impl Persister for MemoryStore {
    async fn persist(&self, fund_code: &str, collected: &Collected) -> Result<(), StoreError> {
        self.persisted.fetch_add(1, Ordering::SeqCst);
        self.fresh
            .lock()
            .unwrap()
            .insert((collected.payload.category(), fund_code.to_string()));
        Ok(())
    }
}

#[async_trait]
impl DerivedRecompute for MemoryStore {
    async fn recompute_dividend_yields(&self) -> Result<u64, StoreError> {
        self.recomputes.fetch_add(1, Ordering::SeqCst);
        Ok(self.funds.len() as u64)
    }
}

// ============================================================================
// Sources
// ============================================================================

/// Source answering with an empty payload of its category.
pub struct EchoSource {
    category: Category,
    pub calls: AtomicU32,
}

impl EchoSource {
    pub fn new(category: Category) -> Arc<Self> {
        Arc::new(Self {
            category,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl SourceAdapter for EchoSource {
    fn name(&self) -> &str {
        "echo"
    }

    async fn collect(&self, request: &CollectRequest) -> Result<Collected, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let payload = match self.category {
            Category::FundList => Payload::FundList(Vec::new()),
            Category::Quotes => Payload::Quotes(fundwatch_ingest::types::IntradayQuote {
                price: 10.0,
                observed_at: chrono::Utc::now(),
            }),
            Category::Cotations => Payload::Cotations(Vec::new()),
            Category::Documents => Payload::Documents(Vec::new()),
            Category::DividendYieldChart => Payload::DividendYieldChart(Vec::new()),
            Category::Indicators => Payload::Indicators(serde_json::json!({ "code": request.fund_code })),
            Category::MarketSnapshot => Payload::MarketSnapshot(serde_json::json!({})),
            Category::Details => Payload::Details(serde_json::json!({ "code": request.fund_code })),
        };
        Ok(Collected::now(payload))
    }
}

/// Source failing a fixed number of times before succeeding.
pub struct FlakySource {
    inner: Arc<EchoSource>,
    failures_remaining: AtomicU32,
    pub total_calls: AtomicU32,
}

impl FlakySource {
    pub fn new(category: Category, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: EchoSource::new(category),
            failures_remaining: AtomicU32::new(failures),
            total_calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl SourceAdapter for FlakySource {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn collect(&self, request: &CollectRequest) -> Result<Collected, SourceError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(SourceError::Network("mock network failure".into()));
        }
        self.inner.collect(request).await
    }
}

/// Source that always fails.
pub struct BrokenSource;

#[async_trait]
impl SourceAdapter for BrokenSource {
    fn name(&self) -> &str {
        "broken"
    }

    async fn collect(&self, _request: &CollectRequest) -> Result<Collected, SourceError> {
        Err(SourceError::Status {
            status: 503,
            url: "https://source.test".into(),
        })
    }
}
