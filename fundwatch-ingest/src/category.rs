//! Data category definitions.
//!
//! Every unit of ingestion work belongs to exactly one [`Category`]. The
//! category decides whether work fans out per fund or runs as one global job,
//! whether it is restricted to market hours, and which staleness column
//! records its last successful refresh.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use fundwatch_common::config::{SourcesConfig, StalenessConfig};

/// Kind of data ingested for real-estate funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    // ===== Singleton (one global job per cycle) =====

    /// Listing of every fund traded on the exchange
    FundList,

    /// Exchange-wide market snapshot (index level, breadth)
    MarketSnapshot,

    // ===== Per fund =====

    /// Registration details (administrator, segment, mandate)
    Details,

    /// Fundamental indicators (P/VP, net worth, shareholders)
    Indicators,

    /// Intraday price quotes
    Quotes,

    /// Historical daily cotations
    Cotations,

    /// Documents published on the regulator's portal
    Documents,

    /// Monthly dividend-yield series
    DividendYieldChart,
}

impl Category {
    /// Every category, singletons first.
    pub const ALL: [Category; 8] = [
        Category::FundList,
        Category::MarketSnapshot,
        Category::Details,
        Category::Indicators,
        Category::Quotes,
        Category::Cotations,
        Category::Documents,
        Category::DividendYieldChart,
    ];

    /// Stable name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Category::FundList => "fund_list",
            Category::MarketSnapshot => "market_snapshot",
            Category::Details => "details",
            Category::Indicators => "indicators",
            Category::Quotes => "quotes",
            Category::Cotations => "cotations",
            Category::Documents => "documents",
            Category::DividendYieldChart => "dividend_yield_chart",
        }
    }

    /// One global job per cycle instead of one job per fund.
    pub fn is_singleton(&self) -> bool {
        matches!(self, Category::FundList | Category::MarketSnapshot)
    }

    /// Only worth collecting while the exchange is trading.
    pub fn is_business_hours_only(&self) -> bool {
        matches!(self, Category::Quotes | Category::MarketSnapshot)
    }

    /// Column of `fund_state` holding the last successful refresh.
    ///
    /// Singleton categories have no per-fund state.
    pub fn staleness_column(&self) -> Option<&'static str> {
        match self {
            Category::FundList | Category::MarketSnapshot => None,
            Category::Details => Some("details_updated_at"),
            Category::Indicators => Some("indicators_updated_at"),
            Category::Quotes => Some("quotes_updated_at"),
            Category::Cotations => Some("cotations_updated_at"),
            Category::Documents => Some("documents_updated_at"),
            Category::DividendYieldChart => Some("dividend_yield_updated_at"),
        }
    }

    /// Configured staleness interval.
    pub fn staleness(&self, config: &StalenessConfig) -> Duration {
        let minutes = match self {
            Category::FundList => config.fund_list,
            Category::MarketSnapshot => config.market_snapshot,
            Category::Details => config.details,
            Category::Indicators => config.indicators,
            Category::Quotes => config.quotes,
            Category::Cotations => config.cotations,
            Category::Documents => config.documents,
            Category::DividendYieldChart => config.dividend_yield_chart,
        };
        Duration::from_secs(minutes * 60)
    }

    /// Configured source URL template, if any.
    pub fn source_url<'a>(&self, config: &'a SourcesConfig) -> Option<&'a str> {
        let url = match self {
            Category::FundList => &config.fund_list,
            Category::MarketSnapshot => &config.market_snapshot,
            Category::Details => &config.details,
            Category::Indicators => &config.indicators,
            Category::Quotes => &config.quotes,
            Category::Cotations => &config.cotations,
            Category::Documents => &config.documents,
            Category::DividendYieldChart => &config.dividend_yield_chart,
        };
        url.as_deref()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
