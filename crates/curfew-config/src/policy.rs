//! Validated policy structures

use crate::schema::{
    RawConfig, RawEnforcementConfig, RawEngineConfig, RawFeedConfig, RawHostConfig,
    RawRemoteConfig, RawServiceConfig,
};
use curfew_util::{PackageId, default_data_dir, default_log_dir};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Package ids that never reach the engine (system surfaces)
pub const DEFAULT_IGNORED_PACKAGES: &[&str] = &[
    "com.android.systemui",
    "com.android.launcher",
    "com.android.launcher3",
    "com.android.settings",
    "com.google.android.googlequicksearchbox",
    "com.android.inputmethod.latin",
    "com.android.phone",
    "com.android.dialer",
];

/// Package id prefixes that never reach the engine
pub const DEFAULT_IGNORED_PREFIXES: &[&str] = &["android."];

/// Validated policy ready for use by the core engine and the daemon
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub service: ServiceConfig,
    pub engine: EnginePolicy,
    pub enforcement: EnforcementPolicy,
    pub feed: FeedPolicy,
    /// None means offline: default limits and no grants
    pub remote: Option<RemoteConfig>,
    pub host: HostConfig,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            engine: EnginePolicy::from_raw(raw.engine),
            enforcement: EnforcementPolicy::from_raw(raw.enforcement),
            feed: FeedPolicy::from_raw(raw.feed),
            remote: raw.remote.map(RemoteConfig::from_raw),
            host: HostConfig::from_raw(raw.host),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            data_dir: raw.data_dir.unwrap_or_else(default_data_dir),
            log_dir: raw.log_dir.unwrap_or_else(default_log_dir),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// Accounting settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnginePolicy {
    pub tick_interval: Duration,
    pub warning_threshold: Duration,
    /// Applied to packages the partner has not configured
    pub default_limit: Duration,
}

impl EnginePolicy {
    fn from_raw(raw: RawEngineConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(raw.tick_interval_seconds.unwrap_or(5)),
            warning_threshold: Duration::from_secs(raw.warning_threshold_seconds.unwrap_or(300)),
            default_limit: Duration::from_secs(raw.default_limit_minutes.unwrap_or(30) * 60),
        }
    }
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self::from_raw(RawEngineConfig::default())
    }
}

/// Enforcement loop settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnforcementPolicy {
    pub recheck_interval: Duration,
    pub max_attempts: u32,
}

impl EnforcementPolicy {
    fn from_raw(raw: RawEnforcementConfig) -> Self {
        Self {
            recheck_interval: Duration::from_secs(raw.recheck_interval_seconds.unwrap_or(1)),
            max_attempts: raw.max_attempts.unwrap_or(60),
        }
    }
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self::from_raw(RawEnforcementConfig::default())
    }
}

/// Foreground feed denylist
#[derive(Debug, Clone)]
pub struct FeedPolicy {
    pub ignored_packages: HashSet<PackageId>,
    pub ignored_prefixes: Vec<String>,
}

impl FeedPolicy {
    fn from_raw(raw: RawFeedConfig) -> Self {
        let mut ignored_packages: HashSet<PackageId> = match raw.ignored_packages {
            Some(list) => list.into_iter().map(PackageId::from).collect(),
            None => DEFAULT_IGNORED_PACKAGES
                .iter()
                .map(|id| PackageId::from(*id))
                .collect(),
        };
        if let Some(own) = raw.self_package {
            ignored_packages.insert(PackageId::from(own));
        }

        let ignored_prefixes = raw.ignored_prefixes.unwrap_or_else(|| {
            DEFAULT_IGNORED_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect()
        });

        Self {
            ignored_packages,
            ignored_prefixes,
        }
    }

    /// Whether a foreground change for this package should be dropped
    pub fn is_ignored(&self, package: &PackageId) -> bool {
        self.ignored_packages.contains(package)
            || self
                .ignored_prefixes
                .iter()
                .any(|prefix| package.as_str().starts_with(prefix.as_str()))
    }
}

impl Default for FeedPolicy {
    fn default() -> Self {
        Self::from_raw(RawFeedConfig::default())
    }
}

/// Remote backend settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL without trailing slash
    pub base_url: String,
    pub grant_poll_interval: Duration,
    pub request_timeout: Duration,
}

impl RemoteConfig {
    fn from_raw(raw: RawRemoteConfig) -> Self {
        Self {
            base_url: raw.base_url.trim_end_matches('/').to_string(),
            grant_poll_interval: Duration::from_secs(raw.grant_poll_seconds.unwrap_or(10)),
            request_timeout: Duration::from_secs(raw.request_timeout_seconds.unwrap_or(10)),
        }
    }
}

/// Device-side settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfig {
    pub corrective_command: Option<Vec<String>>,
}

impl HostConfig {
    fn from_raw(raw: RawHostConfig) -> Self {
        Self {
            corrective_command: raw.corrective_command,
        }
    }
}
