//! HTTP partner backend
//!
//! Endpoints, relative to the configured base URL:
//! - `GET  /limits/{package}`  → `{"minutes": 30}` (404 or null minutes: not configured)
//! - `PUT  /grants/{package}`  ← `{"remaining_millis": 120000}`
//! - `DELETE /grants/{package}` (404: already gone)
//! - `GET  /grants`            → `[{"package": "...", "remaining_millis": 120000}]`
//! - `POST /notifications`     ← `{"type": "app_limit_exceeded", "appPackage": ...}`

use async_trait::async_trait;
use chrono::{DateTime, Local};
use curfew_api::BlockNotice;
use curfew_host_api::{GrantSnapshot, RemoteBackend, RemoteError, RemoteResult};
use curfew_util::PackageId;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct LimitDocument {
    minutes: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GrantDocument {
    package: PackageId,
    remaining_millis: u64,
}

#[derive(Debug, Serialize)]
struct WalletPush {
    remaining_millis: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PartnerNotification<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    app_package: &'a PackageId,
    used_time: u64,
    time_limit: u64,
    blocked_at: DateTime<Local>,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn transport(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::Malformed(e.to_string())
    } else {
        RemoteError::Transport(e.to_string())
    }
}

/// Partner backend reached over HTTP with JSON bodies
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(transport)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn check_status(endpoint: &str, status: StatusCode) -> RemoteResult<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(RemoteError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl RemoteBackend for HttpRemote {
    async fn fetch_limit(&self, package: &PackageId) -> RemoteResult<Option<u32>> {
        let endpoint = format!("limits/{}", package);
        let response = self
            .client
            .get(self.url(&endpoint))
            .send()
            .await
            .map_err(transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(package = %package, "No limit configured remotely");
            return Ok(None);
        }
        Self::check_status(&endpoint, response.status())?;

        let doc: LimitDocument = response.json().await.map_err(transport)?;
        Ok(doc.minutes)
    }

    async fn push_wallet(&self, package: &PackageId, remaining: Duration) -> RemoteResult<()> {
        let endpoint = format!("grants/{}", package);
        let response = self
            .client
            .put(self.url(&endpoint))
            .json(&WalletPush {
                remaining_millis: millis(remaining),
            })
            .send()
            .await
            .map_err(transport)?;

        Self::check_status(&endpoint, response.status())
    }

    async fn clear_grant(&self, package: &PackageId) -> RemoteResult<()> {
        let endpoint = format!("grants/{}", package);
        let response = self
            .client
            .delete(self.url(&endpoint))
            .send()
            .await
            .map_err(transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(package = %package, "Grant already cleared remotely");
            return Ok(());
        }
        Self::check_status(&endpoint, response.status())
    }

    async fn notify_partner(&self, notice: &BlockNotice) -> RemoteResult<()> {
        let body = PartnerNotification {
            kind: "app_limit_exceeded",
            app_package: &notice.package,
            used_time: millis(notice.used),
            time_limit: millis(notice.limit),
            blocked_at: notice.blocked_at,
        };

        let response = self
            .client
            .post(self.url("notifications"))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        Self::check_status("notifications", response.status())
    }

    async fn fetch_grants(&self) -> RemoteResult<GrantSnapshot> {
        let response = self
            .client
            .get(self.url("grants"))
            .send()
            .await
            .map_err(transport)?;
        Self::check_status("grants", response.status())?;

        let docs: Vec<GrantDocument> = response.json().await.map_err(transport)?;
        Ok(docs
            .into_iter()
            .map(|doc| (doc.package, Duration::from_millis(doc.remaining_millis)))
            .collect())
    }
}
