//! Configuration management for fundwatch services.
//!
//! Configuration is sourced from the environment. A `.env` file in the working
//! directory is loaded first (if present) so local runs can keep settings next
//! to the binary.
//!
//! # Configuration Priority
//!
//! 1. Process environment variables (`FUNDWATCH_*` prefix)
//! 2. Values from `.env`
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! ## Core
//! - `FUNDWATCH_DATABASE_URL` → database.url (required)
//! - `FUNDWATCH_MODE` → scheduler.mode (`normal` | `backfill`)
//! - `FUNDWATCH_FORCE` → scheduler.force (disables business-hours gating)
//!
//! ## Scheduler
//! - `FUNDWATCH_TICK_SECS` → scheduler.tick_secs
//! - `FUNDWATCH_WORKERS` → scheduler.workers
//! - `FUNDWATCH_BATCH_SIZE` → scheduler.batch_size
//! - `FUNDWATCH_QUEUE_CAPACITY` → scheduler.queue_capacity
//! - `FUNDWATCH_METRICS_INTERVAL_SECS` → scheduler.metrics_interval_secs
//!
//! ## Staleness (minutes)
//! - `FUNDWATCH_STALE_FUND_LIST_MINUTES`, `FUNDWATCH_STALE_DETAILS_MINUTES`, ...
//!
//! ## Sources
//! - `FUNDWATCH_SOURCE_<CATEGORY>_URL` → sources.<category>
//! - `FUNDWATCH_SOURCE_TIMEOUT_SECS` → sources.timeout_secs
//!
//! ## Observability
//! - `FUNDWATCH_LOG_LEVEL`, `FUNDWATCH_LOG_FORMAT`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Prefix shared by every recognized environment variable.
pub const ENV_PREFIX: &str = "FUNDWATCH_";

// ============================================================================
// Mode
// ============================================================================

/// Operating mode, fixed at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Run every iterator forever on its own cadence.
    #[default]
    Normal,
    /// Drive the backfill stages to convergence once, then exit.
    Backfill,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "backfill" => Ok(Self::Backfill),
            other => Err(Error::Config(format!(
                "unknown mode '{other}', expected 'normal' or 'backfill'"
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Backfill => f.write_str("backfill"),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Database connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    pub url: String,
    /// Maximum pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Scheduler and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Operating mode
    #[serde(default)]
    pub mode: Mode,
    /// Refill interval of per-fund iterators, in seconds
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Worker pool size
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Candidates fetched per refill
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Work queue capacity; `None` means twice the worker count
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// Disable every business-hours and time-window gate
    #[serde(default)]
    pub force: bool,
    /// Period of the dispatch metrics report, in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            tick_secs: default_tick_secs(),
            workers: default_workers(),
            batch_size: default_batch_size(),
            queue_capacity: None,
            force: false,
            metrics_interval_secs: default_metrics_interval(),
        }
    }
}

impl SchedulerConfig {
    /// Refill interval of per-fund iterators.
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    /// Effective work queue capacity.
    pub fn resolved_queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.workers * 2)
    }

    /// Period of the metrics report.
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }
}

/// Staleness interval per data category, in minutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessConfig {
    pub fund_list: u64,
    pub details: u64,
    pub indicators: u64,
    pub quotes: u64,
    pub cotations: u64,
    pub documents: u64,
    pub market_snapshot: u64,
    pub dividend_yield_chart: u64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            fund_list: 1440,
            details: 1440,
            indicators: 1440,
            quotes: 15,
            cotations: 1440,
            documents: 360,
            market_snapshot: 30,
            dividend_yield_chart: 1440,
        }
    }
}

impl StalenessConfig {
    /// Every field paired with its environment key suffix.
    pub fn entries(&self) -> [(&'static str, u64); 8] {
        [
            ("FUND_LIST", self.fund_list),
            ("DETAILS", self.details),
            ("INDICATORS", self.indicators),
            ("QUOTES", self.quotes),
            ("COTATIONS", self.cotations),
            ("DOCUMENTS", self.documents),
            ("MARKET_SNAPSHOT", self.market_snapshot),
            ("DIVIDEND_YIELD_CHART", self.dividend_yield_chart),
        ]
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut u64> {
        match key {
            "FUND_LIST" => Some(&mut self.fund_list),
            "DETAILS" => Some(&mut self.details),
            "INDICATORS" => Some(&mut self.indicators),
            "QUOTES" => Some(&mut self.quotes),
            "COTATIONS" => Some(&mut self.cotations),
            "DOCUMENTS" => Some(&mut self.documents),
            "MARKET_SNAPSHOT" => Some(&mut self.market_snapshot),
            "DIVIDEND_YIELD_CHART" => Some(&mut self.dividend_yield_chart),
            _ => None,
        }
    }
}

/// URL templates of the JSON sources, one per category.
///
/// A template may reference `{code}`, `{cnpj}` and `{external_id}`. A category
/// without a template has no adapter and is not scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub fund_list: Option<String>,
    pub details: Option<String>,
    pub indicators: Option<String>,
    pub quotes: Option<String>,
    pub cotations: Option<String>,
    pub documents: Option<String>,
    pub market_snapshot: Option<String>,
    pub dividend_yield_chart: Option<String>,
    /// HTTP timeout for every source, in seconds
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            fund_list: None,
            details: None,
            indicators: None,
            quotes: None,
            cotations: None,
            documents: None,
            market_snapshot: None,
            dividend_yield_chart: None,
            timeout_secs: default_source_timeout(),
        }
    }
}

impl SourcesConfig {
    /// HTTP timeout for every source.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "FUND_LIST" => Some(&mut self.fund_list),
            "DETAILS" => Some(&mut self.details),
            "INDICATORS" => Some(&mut self.indicators),
            "QUOTES" => Some(&mut self.quotes),
            "COTATIONS" => Some(&mut self.cotations),
            "DOCUMENTS" => Some(&mut self.documents),
            "MARKET_SNAPSHOT" => Some(&mut self.market_snapshot),
            "DIVIDEND_YIELD_CHART" => Some(&mut self.dividend_yield_chart),
            _ => None,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}
fn default_tick_secs() -> u64 {
    60
}
fn default_workers() -> usize {
    4
}
fn default_batch_size() -> usize {
    50
}
fn default_metrics_interval() -> u64 {
    60
}
fn default_source_timeout() -> u64 {
    20
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration for fundwatch services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub staleness: StalenessConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(Error::Config(format!("failed to read .env: {e}"))),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Keys are full variable names, including the `FUNDWATCH_` prefix.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(url) = var("DATABASE_URL") {
            config.database.url = url;
        }
        config.database.max_connections =
            parse_or("DB_MAX_CONNECTIONS", var("DB_MAX_CONNECTIONS"), default_max_connections())?;

        if let Some(mode) = var("MODE") {
            config.scheduler.mode = mode.parse()?;
        }
        if let Some(force) = var("FORCE") {
            config.scheduler.force = parse_bool("FORCE", &force)?;
        }
        config.scheduler.tick_secs = parse_or("TICK_SECS", var("TICK_SECS"), default_tick_secs())?;
        config.scheduler.workers = parse_or("WORKERS", var("WORKERS"), default_workers())?;
        config.scheduler.batch_size =
            parse_or("BATCH_SIZE", var("BATCH_SIZE"), default_batch_size())?;
        if let Some(raw) = var("QUEUE_CAPACITY") {
            config.scheduler.queue_capacity = Some(parse_value("QUEUE_CAPACITY", &raw)?);
        }
        config.scheduler.metrics_interval_secs = parse_or(
            "METRICS_INTERVAL_SECS",
            var("METRICS_INTERVAL_SECS"),
            default_metrics_interval(),
        )?;

        for (suffix, _) in StalenessConfig::default().entries() {
            let name = format!("STALE_{suffix}_MINUTES");
            if let Some(raw) = var(&name) {
                let minutes = parse_value(&name, &raw)?;
                if let Some(slot) = config.staleness.slot_mut(suffix) {
                    *slot = minutes;
                }
            }
            if let Some(url) = var(&format!("SOURCE_{suffix}_URL")) {
                if let Some(slot) = config.sources.slot_mut(suffix) {
                    *slot = Some(url);
                }
            }
        }
        config.sources.timeout_secs = parse_or(
            "SOURCE_TIMEOUT_SECS",
            var("SOURCE_TIMEOUT_SECS"),
            default_source_timeout(),
        )?;

        if let Some(level) = var("LOG_LEVEL") {
            config.observability.log_level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            config.observability.log_format = format;
        }

        Ok(config)
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::Config(format!("{ENV_PREFIX}{name}: cannot parse '{raw}'")))
}

fn parse_or<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{ENV_PREFIX}{name}: expected a boolean, got '{raw}'"
        ))),
    }
}
