//! Mock collaborators for testing

use async_trait::async_trait;
use curfew_api::BlockNotice;
use curfew_util::PackageId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::{
    DeviceHost, GrantSnapshot, HostError, HostResult, RemoteBackend, RemoteError, RemoteResult,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Mock remote backend for unit/integration testing
#[derive(Clone, Default)]
pub struct MockRemote {
    limits: Arc<Mutex<HashMap<PackageId, u32>>>,
    grants: Arc<Mutex<GrantSnapshot>>,
    pushes: Arc<Mutex<Vec<(PackageId, Duration)>>>,
    clears: Arc<Mutex<Vec<PackageId>>>,
    notices: Arc<Mutex<Vec<BlockNotice>>>,

    /// Configure every call to fail
    pub fail: Arc<Mutex<bool>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_limit_minutes(&self, package: impl Into<PackageId>, minutes: u32) {
        lock(&self.limits).insert(package.into(), minutes);
    }

    pub fn clear_limit(&self, package: &PackageId) {
        lock(&self.limits).remove(package);
    }

    pub fn set_grant(&self, package: impl Into<PackageId>, remaining: Duration) {
        lock(&self.grants).insert(package.into(), remaining);
    }

    pub fn revoke_grant(&self, package: &PackageId) {
        lock(&self.grants).remove(package);
    }

    pub fn set_failing(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    /// Wallet values pushed so far, oldest first
    pub fn pushes(&self) -> Vec<(PackageId, Duration)> {
        lock(&self.pushes).clone()
    }

    /// Grant documents deleted so far, oldest first
    pub fn clears(&self) -> Vec<PackageId> {
        lock(&self.clears).clone()
    }

    /// Partner notifications sent so far
    pub fn notices(&self) -> Vec<BlockNotice> {
        lock(&self.notices).clone()
    }

    fn check(&self) -> RemoteResult<()> {
        if *lock(&self.fail) {
            return Err(RemoteError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for MockRemote {
    async fn fetch_limit(&self, package: &PackageId) -> RemoteResult<Option<u32>> {
        self.check()?;
        Ok(lock(&self.limits).get(package).copied())
    }

    async fn push_wallet(&self, package: &PackageId, remaining: Duration) -> RemoteResult<()> {
        self.check()?;
        lock(&self.pushes).push((package.clone(), remaining));
        Ok(())
    }

    async fn clear_grant(&self, package: &PackageId) -> RemoteResult<()> {
        self.check()?;
        lock(&self.grants).remove(package);
        lock(&self.clears).push(package.clone());
        Ok(())
    }

    async fn notify_partner(&self, notice: &BlockNotice) -> RemoteResult<()> {
        self.check()?;
        lock(&self.notices).push(notice.clone());
        Ok(())
    }

    async fn fetch_grants(&self) -> RemoteResult<GrantSnapshot> {
        self.check()?;
        Ok(lock(&self.grants).clone())
    }
}

/// Mock device host recording corrective actions
#[derive(Clone, Default)]
pub struct MockDevice {
    redirects: Arc<Mutex<Vec<PackageId>>>,

    /// Configure corrective actions to fail
    pub fail: Arc<Mutex<bool>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packages redirected away from so far, oldest first
    pub fn redirects(&self) -> Vec<PackageId> {
        lock(&self.redirects).clone()
    }
}

#[async_trait]
impl DeviceHost for MockDevice {
    async fn redirect_home(&self, package: &PackageId) -> HostResult<()> {
        if *lock(&self.fail) {
            return Err(HostError::ActionFailed("Mock redirect failure".into()));
        }
        lock(&self.redirects).push(package.clone());
        Ok(())
    }
}
