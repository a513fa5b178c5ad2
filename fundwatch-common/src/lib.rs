//! fundwatch common - shared configuration, errors and logging.
//!
//! This crate provides:
//! - Environment-sourced configuration types
//! - Configuration validation
//! - Error types
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{
    Config, DatabaseConfig, Mode, ObservabilityConfig, SchedulerConfig, SourcesConfig,
    StalenessConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};
