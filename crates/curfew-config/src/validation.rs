//! Configuration validation

use crate::schema::{RawConfig, RawFeedConfig, RawHostConfig, RawRemoteConfig};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("Invalid remote base_url '{url}': {message}")]
    InvalidRemoteUrl { url: String, message: String },

    #[error("Corrective command: {0}")]
    InvalidCorrectiveCommand(String),

    #[error("Duplicate ignored package: {0}")]
    DuplicateIgnoredPackage(String),

    #[error("Ignored prefix cannot be empty")]
    EmptyIgnoredPrefix,

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let non_zero = [
        (
            "engine.tick_interval_seconds",
            config.engine.tick_interval_seconds,
        ),
        (
            "engine.default_limit_minutes",
            config.engine.default_limit_minutes,
        ),
        (
            "enforcement.recheck_interval_seconds",
            config.enforcement.recheck_interval_seconds,
        ),
        (
            "enforcement.max_attempts",
            config.enforcement.max_attempts.map(u64::from),
        ),
    ];
    for (field, value) in non_zero {
        if value == Some(0) {
            errors.push(ValidationError::ZeroValue { field });
        }
    }

    if let (Some(warning), Some(tick)) = (
        config.engine.warning_threshold_seconds,
        config.engine.tick_interval_seconds,
    ) && warning > 0
        && warning < tick
    {
        errors.push(ValidationError::GlobalError(format!(
            "warning_threshold_seconds ({warning}) is shorter than one tick ({tick}s) and would never fire"
        )));
    }

    errors.extend(validate_feed(&config.feed));

    if let Some(remote) = &config.remote {
        errors.extend(validate_remote(remote));
    }

    errors.extend(validate_host(&config.host));

    errors
}

fn validate_feed(feed: &RawFeedConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(packages) = &feed.ignored_packages {
        let mut seen = HashSet::new();
        for package in packages {
            if !seen.insert(package.as_str()) {
                errors.push(ValidationError::DuplicateIgnoredPackage(package.clone()));
            }
        }
    }

    if let Some(prefixes) = &feed.ignored_prefixes
        && prefixes.iter().any(|p| p.is_empty())
    {
        // An empty prefix would swallow every package
        errors.push(ValidationError::EmptyIgnoredPrefix);
    }

    errors
}

fn validate_remote(remote: &RawRemoteConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Err(message) = check_base_url(&remote.base_url) {
        errors.push(ValidationError::InvalidRemoteUrl {
            url: remote.base_url.clone(),
            message,
        });
    }

    if remote.grant_poll_seconds == Some(0) {
        errors.push(ValidationError::ZeroValue {
            field: "remote.grant_poll_seconds",
        });
    }
    if remote.request_timeout_seconds == Some(0) {
        errors.push(ValidationError::ZeroValue {
            field: "remote.request_timeout_seconds",
        });
    }

    errors
}

fn validate_host(host: &RawHostConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(argv) = &host.corrective_command {
        match argv.first() {
            None => errors.push(ValidationError::InvalidCorrectiveCommand(
                "argv cannot be empty".into(),
            )),
            Some(program) if program.trim().is_empty() => {
                errors.push(ValidationError::InvalidCorrectiveCommand(
                    "program name cannot be blank".into(),
                ))
            }
            Some(_) => {}
        }
    }

    errors
}

/// Check that a base URL uses http(s) and has a host part
pub fn check_base_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| "scheme must be http or https".to_string())?;

    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err("missing host".into());
    }

    Ok(())
}
