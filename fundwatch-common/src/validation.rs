//! Configuration validation for fundwatch services.
//!
//! Ensures required values are present and numeric settings are within the
//! ranges the scheduler relies on.

use thiserror::Error;

use crate::config::{
    Config, DatabaseConfig, ObservabilityConfig, SchedulerConfig, StalenessConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.database.validate() {
            errors.push(e);
        }
        if let Err(e) = self.scheduler.validate() {
            errors.push(e);
        }
        if let Err(e) = self.staleness.validate() {
            errors.push(e);
        }
        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }
        if self.sources.timeout_secs == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "sources.timeout_secs".into(),
                reason: "must be at least 1".into(),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "database.url".into(),
            });
        }
        if !(self.url.starts_with("postgres://") || self.url.starts_with("postgresql://")) {
            return Err(ValidationError::InvalidValue {
                field: "database.url".into(),
                reason: "must be a postgres:// URL".into(),
            });
        }
        if self.max_connections == 0 {
            return Err(ValidationError::InvalidValue {
                field: "database.max_connections".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

impl Validate for SchedulerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.workers == 0 {
            return Err(ValidationError::InvalidValue {
                field: "scheduler.workers".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.batch_size == 0 {
            return Err(ValidationError::InvalidValue {
                field: "scheduler.batch_size".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.tick_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "scheduler.tick_secs".into(),
                reason: "must be at least 1 second".into(),
            });
        }
        if self.resolved_queue_capacity() < 2 {
            return Err(ValidationError::InvalidValue {
                field: "scheduler.queue_capacity".into(),
                reason: "must be at least 2".into(),
            });
        }
        if self.metrics_interval_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "scheduler.metrics_interval_secs".into(),
                reason: "must be at least 1 second".into(),
            });
        }
        Ok(())
    }
}

impl Validate for StalenessConfig {
    fn validate(&self) -> ValidationResult<()> {
        for (key, minutes) in self.entries() {
            if minutes == 0 {
                return Err(ValidationError::InvalidValue {
                    field: format!("staleness.{}", key.to_ascii_lowercase()),
                    reason: "must be at least 1 minute".into(),
                });
            }
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}
