//! Core value types flowing through the scheduler.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::category::Category;

// ============================================================================
// Scheduling Types
// ============================================================================

/// A fund overdue for refresh in some category, as returned by the selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundCandidate {
    /// Ticker code (e.g., "HGLG11")
    pub code: String,
    /// Registry number of the fund
    pub cnpj: String,
    /// Identifier of the fund on the document portal
    pub external_id: String,
}

impl FundCandidate {
    pub fn new(code: impl Into<String>, cnpj: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            cnpj: cnpj.into(),
            external_id: external_id.into(),
        }
    }
}

/// One unit of collection work handed from the dispatcher to a worker.
///
/// Duplicates are possible; persistence is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub category: Category,
    pub fund_code: String,
    pub cnpj: String,
    pub external_id: String,
}

impl WorkItem {
    /// Work item for one fund.
    pub fn for_fund(category: Category, candidate: &FundCandidate) -> Self {
        Self {
            category,
            fund_code: candidate.code.clone(),
            cnpj: candidate.cnpj.clone(),
            external_id: candidate.external_id.clone(),
        }
    }

    /// Global work item of a singleton category.
    pub fn singleton(category: Category) -> Self {
        Self {
            category,
            fund_code: String::new(),
            cnpj: String::new(),
            external_id: String::new(),
        }
    }

    /// Request passed to the source adapter.
    pub fn request(&self) -> CollectRequest {
        CollectRequest {
            fund_code: self.fund_code.clone(),
            cnpj: self.cnpj.clone(),
            external_id: self.external_id.clone(),
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fund_code.is_empty() {
            write!(f, "{}", self.category)
        } else {
            write!(f, "{}:{}", self.category, self.fund_code)
        }
    }
}

/// Identifiers a source needs to locate one fund.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectRequest {
    pub fund_code: String,
    pub cnpj: String,
    pub external_id: String,
}

// ============================================================================
// Payloads
// ============================================================================

/// Fund entry in the exchange listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundListing {
    pub code: String,
    #[serde(default)]
    pub cnpj: String,
    #[serde(default)]
    pub external_id: String,
    #[serde(default)]
    pub name: String,
}

/// Single intraday price observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntradayQuote {
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

/// Official closing price of one trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyQuote {
    pub date: NaiveDate,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Document published for a fund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundDocument {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub kind: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub url: String,
}

/// Dividend yield of one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DividendYieldPoint {
    /// First day of the reference month
    pub month: NaiveDate,
    /// Yield as a fraction (0.0085 = 0.85%)
    pub value: f64,
}

/// Typed result of one collection, one variant per category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", content = "data", rename_all = "snake_case")]
pub enum Payload {
    FundList(Vec<FundListing>),
    MarketSnapshot(serde_json::Value),
    Details(serde_json::Value),
    Indicators(serde_json::Value),
    Quotes(IntradayQuote),
    Cotations(Vec<DailyQuote>),
    Documents(Vec<FundDocument>),
    DividendYieldChart(Vec<DividendYieldPoint>),
}

impl Payload {
    /// Category this payload belongs to.
    pub fn category(&self) -> Category {
        match self {
            Payload::FundList(_) => Category::FundList,
            Payload::MarketSnapshot(_) => Category::MarketSnapshot,
            Payload::Details(_) => Category::Details,
            Payload::Indicators(_) => Category::Indicators,
            Payload::Quotes(_) => Category::Quotes,
            Payload::Cotations(_) => Category::Cotations,
            Payload::Documents(_) => Category::Documents,
            Payload::DividendYieldChart(_) => Category::DividendYieldChart,
        }
    }

    /// Decode a raw JSON body into the payload of `category`.
    pub fn from_json(category: Category, body: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match category {
            Category::FundList => Payload::FundList(serde_json::from_value(body)?),
            Category::MarketSnapshot => Payload::MarketSnapshot(body),
            Category::Details => Payload::Details(body),
            Category::Indicators => Payload::Indicators(body),
            Category::Quotes => Payload::Quotes(serde_json::from_value(body)?),
            Category::Cotations => Payload::Cotations(serde_json::from_value(body)?),
            Category::Documents => Payload::Documents(serde_json::from_value(body)?),
            Category::DividendYieldChart => {
                Payload::DividendYieldChart(serde_json::from_value(body)?)
            }
        })
    }
}

/// Output of a source adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    pub payload: Payload,
    pub fetched_at: DateTime<Utc>,
}

impl Collected {
    pub fn now(payload: Payload) -> Self {
        Self {
            payload,
            fetched_at: Utc::now(),
        }
    }
}
