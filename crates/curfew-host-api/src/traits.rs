//! Collaborator traits

use async_trait::async_trait;
use curfew_api::BlockNotice;
use curfew_util::PackageId;
use std::time::Duration;
use thiserror::Error;

use crate::GrantSnapshot;

/// Errors from the remote partner backend
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Unexpected status {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Remote unavailable")]
    Unavailable,
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors from device-side actions
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Corrective action failed: {0}")]
    ActionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Remote partner backend: limits, grants and notifications.
///
/// Every call is best-effort from the engine's point of view; a failure
/// leaves the engine's cached state untouched.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Configured daily limit in minutes, `None` when the partner has not set one
    async fn fetch_limit(&self, package: &PackageId) -> RemoteResult<Option<u32>>;

    /// Publish the locally spent-down wallet balance
    async fn push_wallet(&self, package: &PackageId, remaining: Duration) -> RemoteResult<()>;

    /// Delete the grant document of a package whose wallet is spent
    async fn clear_grant(&self, package: &PackageId) -> RemoteResult<()>;

    /// Tell the partner a package was just blocked
    async fn notify_partner(&self, notice: &BlockNotice) -> RemoteResult<()>;

    /// Current grant documents, keyed by package
    async fn fetch_grants(&self) -> RemoteResult<GrantSnapshot>;
}

/// Device-side corrective action
#[async_trait]
pub trait DeviceHost: Send + Sync {
    /// Move the device away from `package` (back to a home surface)
    async fn redirect_home(&self, package: &PackageId) -> HostResult<()>;

    /// Optional: check if the device host is healthy
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Backend used when no remote is configured: no limits, no grants
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemote;

#[async_trait]
impl RemoteBackend for OfflineRemote {
    async fn fetch_limit(&self, _package: &PackageId) -> RemoteResult<Option<u32>> {
        Ok(None)
    }

    async fn push_wallet(&self, _package: &PackageId, _remaining: Duration) -> RemoteResult<()> {
        Ok(())
    }

    async fn clear_grant(&self, _package: &PackageId) -> RemoteResult<()> {
        Ok(())
    }

    async fn notify_partner(&self, _notice: &BlockNotice) -> RemoteResult<()> {
        Ok(())
    }

    async fn fetch_grants(&self) -> RemoteResult<GrantSnapshot> {
        Ok(GrantSnapshot::default())
    }
}
