//! Configuration validation

use crate::policy::{MissingFieldPolicy, PauseAccounting};
use crate::schema::{RawConfig, RawWorkstation};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Workstation '{workstation_id}': {message}")]
    WorkstationError {
        workstation_id: String,
        message: String,
    },

    #[error("Duplicate workstation ID: {0}")]
    DuplicateWorkstationId(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen_ids = HashSet::new();
    for ws in &config.workstations {
        if !seen_ids.insert(&ws.id) {
            errors.push(ValidationError::DuplicateWorkstationId(ws.id.clone()));
        }
    }

    for ws in &config.workstations {
        errors.extend(validate_workstation(ws));
    }

    if config.service.tick_interval_ms == Some(0) {
        errors.push(invalid("service.tick_interval_ms", "must be greater than 0"));
    }

    if let Some(ratio) = config.timers.alert_threshold_ratio
        && !(ratio > 0.0 && ratio <= 1.0)
    {
        errors.push(invalid(
            "timers.alert_threshold_ratio",
            format!("{} is outside (0, 1]", ratio),
        ));
    }

    if let Some(mode) = &config.timers.pause_accounting
        && PauseAccounting::parse(mode).is_none()
    {
        errors.push(invalid(
            "timers.pause_accounting",
            format!("unknown mode '{}' (expected \"compensated\" or \"legacy\")", mode),
        ));
    }

    if let Some(policy) = &config.backend.missing_fields
        && MissingFieldPolicy::parse(policy).is_none()
    {
        errors.push(invalid(
            "backend.missing_fields",
            format!("unknown policy '{}' (expected \"default\" or \"reject\")", policy),
        ));
    }

    if let Some(url) = &config.backend.base_url
        && let Err(message) = check_base_url(url)
    {
        errors.push(invalid("backend.base_url", message));
    }

    if config.backend.request_timeout_seconds == Some(0) {
        errors.push(invalid(
            "backend.request_timeout_seconds",
            "must be greater than 0",
        ));
    }

    errors
}

fn validate_workstation(ws: &RawWorkstation) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if ws.id.trim().is_empty() {
        errors.push(ValidationError::WorkstationError {
            workstation_id: ws.id.clone(),
            message: "id cannot be empty".into(),
        });
    }

    if ws.capacity == 0 {
        errors.push(ValidationError::WorkstationError {
            workstation_id: ws.id.clone(),
            message: "capacity must be at least 1".into(),
        });
    }

    errors
}

/// Check that a backend URL is absolute http(s) with a host
pub fn check_base_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| format!("'{}' must start with http:// or https://", url))?;

    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(format!("'{}' has no host", url));
    }

    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}
