//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Accounting tick and limit defaults
    #[serde(default)]
    pub engine: RawEngineConfig,

    /// Enforcement loop settings
    #[serde(default)]
    pub enforcement: RawEnforcementConfig,

    /// Foreground feed filtering
    #[serde(default)]
    pub feed: RawFeedConfig,

    /// Remote limit/grant backend. Absent means offline operation.
    #[serde(default)]
    pub remote: Option<RawRemoteConfig>,

    /// Device-side corrective action
    #[serde(default)]
    pub host: RawHostConfig,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Log directory
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawEngineConfig {
    /// Accounting tick period (default 5)
    pub tick_interval_seconds: Option<u64>,

    /// Remaining time at which a package is warned (default 300)
    pub warning_threshold_seconds: Option<u64>,

    /// Limit used when the partner has not configured one (default 30)
    pub default_limit_minutes: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawEnforcementConfig {
    /// Delay between re-checks while enforcing (default 1)
    pub recheck_interval_seconds: Option<u64>,

    /// Re-check budget before the loop gives up (default 60)
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawFeedConfig {
    /// Exact package ids dropped before reaching the engine.
    /// Replaces the built-in list when set.
    pub ignored_packages: Option<Vec<String>>,

    /// Package id prefixes dropped before reaching the engine.
    /// Replaces the built-in list when set.
    pub ignored_prefixes: Option<Vec<String>>,

    /// This agent's own package id (always ignored)
    pub self_package: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRemoteConfig {
    /// Base URL of the partner backend, e.g. `https://partner.example/api`
    pub base_url: String,

    /// Grant snapshot polling period (default 10)
    pub grant_poll_seconds: Option<u64>,

    /// Per-request timeout (default 10)
    pub request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawHostConfig {
    /// Command run to move the device away from a blocked package.
    /// `{package}` in any argument is replaced with the package id.
    pub corrective_command: Option<Vec<String>>,
}
