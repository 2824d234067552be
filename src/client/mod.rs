//! HWProxy REST client
//!
//! Stateless apart from the shared `reqwest::Client` connection pool. The
//! backend base URL is re-resolved from the persisted server profile on every
//! call, so switching `prod`/`dev` takes effect without a restart.
//!
//! # Endpoints
//!
//! ```text
//! GET    /get_hw_list, /update_hw_list      device catalog
//! GET    /get_debugs_list[/:user]           debug list
//! POST   /create_debug                      {status, reason?}
//! POST   /finish_debug                      {status, message?}, 429 = rate limited
//! DELETE /delete_debug                      {status, message?}
//! POST   /check_debug                       {status, message?}
//! GET    <hwproxy>/api/user                 per-server auth probe
//! ```

mod error;

pub use error::ClientError;

use crate::config::{BackendConfig, HwproxyConfig};
use crate::models::{Auth, DebugSession, DeviceCatalog, Server, ServerProfile, StorageKey};
use crate::storage::SessionStore;
use futures::future::{select_ok, BoxFuture, FutureExt};
use reqwest::StatusCode;
use serde::Deserialize;

/// Result of a create request that reached the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Accepted,
    /// The fingerprint already exists server-side
    Duplicate,
    Rejected(String),
}

/// Result of a finish/delete/check request that reached the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Accepted,
    Rejected(String),
}

/// `{status, reason?, message?}` body shared by the mutating endpoints
#[derive(Debug, Deserialize)]
struct ActionResponse {
    #[serde(default, deserialize_with = "crate::models::lenient_bool")]
    status: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

impl ActionResponse {
    fn message_text(&self) -> String {
        match &self.message {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => self
                .reason
                .clone()
                .unwrap_or_else(|| "no reason given".to_string()),
        }
    }

    fn into_action(self) -> ActionOutcome {
        if self.status {
            ActionOutcome::Accepted
        } else {
            ActionOutcome::Rejected(self.message_text())
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    data: UserData,
}

#[derive(Debug, Deserialize)]
struct UserData {
    name: String,
}

#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    backend: BackendConfig,
    hwproxy: HwproxyConfig,
    store: SessionStore,
}

impl RemoteClient {
    pub fn new(
        backend: BackendConfig,
        hwproxy: HwproxyConfig,
        store: SessionStore,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(backend.request_timeout())
            .build()
            .map_err(ClientError::Setup)?;

        Ok(Self {
            http,
            backend,
            hwproxy,
            store,
        })
    }

    pub fn hwproxy(&self) -> &HwproxyConfig {
        &self.hwproxy
    }

    /// Backend base URL for the persisted profile (prod when unset or unreadable)
    pub fn base_url(&self) -> String {
        let profile = self
            .store
            .load::<ServerProfile>(StorageKey::Server)
            .unwrap_or_else(|e| {
                tracing::warn!("Unreadable server profile, using prod: {}", e);
                None
            })
            .unwrap_or_default();
        self.backend.base_url(profile)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Device catalog
    // ─────────────────────────────────────────────────────────────────────

    /// Fetch the device catalog; a non-2xx answer is logged and yields `None`
    pub async fn list_devices(&self) -> Result<Option<DeviceCatalog>, ClientError> {
        let url = self.url("/get_hw_list");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::transport(&url, e))?;

        if !resp.status().is_success() {
            tracing::warn!("HTTP {} requesting device catalog", resp.status());
            return Ok(None);
        }

        let catalog = resp
            .json::<DeviceCatalog>()
            .await
            .map_err(|e| ClientError::transport(&url, e))?;
        Ok(Some(catalog))
    }

    /// Ask the backend to rebuild its device catalog
    pub async fn force_refresh_devices(&self) -> Result<(), ClientError> {
        let url = self.url("/update_hw_list");
        self.http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::transport(&url, e))?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Debug sessions
    // ─────────────────────────────────────────────────────────────────────

    /// List debugs, scoped to one creator when `user` is given
    pub async fn list_debugs(&self, user: Option<&str>) -> Result<Vec<DebugSession>, ClientError> {
        let url = match user {
            Some(user) => self.url(&format!("/get_debugs_list/{}", user)),
            None => self.url("/get_debugs_list"),
        };
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::transport(&url, e))?;
        let resp = Self::ensure_success(&url, resp).await?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ClientError::transport(&url, e))?;

        // The backend returns `debugs` keyed by id; tolerate a plain array too
        let entries = match body.get("debugs") {
            Some(serde_json::Value::Object(map)) => map.values().cloned().collect(),
            Some(serde_json::Value::Array(items)) => items.clone(),
            Some(serde_json::Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(ClientError::Decode {
                    url,
                    message: format!("'debugs' is neither object nor array: {}", other),
                })
            }
        };

        // One unreadable record must not hide the rest of the list
        Ok(entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<DebugSession>(entry.clone()) {
                Ok(debug) => Some(debug),
                Err(e) => {
                    tracing::warn!("Skipping unreadable debug from {}: {} ({})", url, e, entry);
                    None
                }
            })
            .collect())
    }

    pub async fn create_debug(&self, debug: &DebugSession) -> Result<CreateOutcome, ClientError> {
        let url = self.url("/create_debug");
        let resp = self
            .http
            .post(&url)
            .json(debug)
            .send()
            .await
            .map_err(|e| ClientError::transport(&url, e))?;

        let body = Self::action_body(&url, resp).await?;
        Ok(if body.status {
            CreateOutcome::Accepted
        } else if body.reason.as_deref() == Some("duplicate") {
            CreateOutcome::Duplicate
        } else {
            CreateOutcome::Rejected(body.message_text())
        })
    }

    /// Finish a running debug, or trigger the download of a finished one
    pub async fn finish_or_download(
        &self,
        debug: &DebugSession,
    ) -> Result<ActionOutcome, ClientError> {
        let url = self.url("/finish_debug");
        let resp = self
            .http
            .post(&url)
            .json(debug)
            .send()
            .await
            .map_err(|e| ClientError::transport(&url, e))?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited);
        }
        let resp = Self::ensure_success(&url, resp).await?;
        Ok(Self::action_body(&url, resp).await?.into_action())
    }

    pub async fn delete_debug(&self, debug: &DebugSession) -> Result<ActionOutcome, ClientError> {
        let url = self.url("/delete_debug");
        let resp = self
            .http
            .delete(&url)
            .json(debug)
            .send()
            .await
            .map_err(|e| ClientError::transport(&url, e))?;

        Ok(Self::action_body(&url, resp).await?.into_action())
    }

    /// Ask the backend to refresh this debug's state
    pub async fn check_debug_status(
        &self,
        debug: &DebugSession,
    ) -> Result<ActionOutcome, ClientError> {
        let url = self.url("/check_debug");
        let resp = self
            .http
            .post(&url)
            .json(debug)
            .send()
            .await
            .map_err(|e| ClientError::transport(&url, e))?;

        Ok(Self::action_body(&url, resp).await?.into_action())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Auth probes
    // ─────────────────────────────────────────────────────────────────────

    /// Username the given server's session belongs to
    pub async fn probe_user(&self, server: Server) -> Result<String, ClientError> {
        let url = format!("{}/api/user", self.hwproxy.server_url(server));
        let mut request = self.http.get(&url);
        if let Some(token) = self.stored_credential(server) {
            request = request.header(
                reqwest::header::COOKIE,
                format!("{}={}", self.hwproxy.session_cookie, token),
            );
        }
        let resp = request
            .send()
            .await
            .map_err(|e| ClientError::transport(&url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Unauthorized {
                server,
                status: status.as_u16(),
            });
        }

        let body: UserResponse = resp
            .json()
            .await
            .map_err(|e| ClientError::transport(&url, e))?;
        Ok(body.data.name)
    }

    /// Session credential captured for `server`, if any
    fn stored_credential(&self, server: Server) -> Option<String> {
        match self.store.load::<Auth>(StorageKey::Auth) {
            Ok(auth) => auth.and_then(|a| a.credential(server).map(str::to_string)),
            Err(e) => {
                tracing::warn!("Unreadable auth record: {}", e);
                None
            }
        }
    }

    /// Probe every configured server at once; the first success wins
    ///
    /// Returns `None` only when every probe failed. Probes still in flight
    /// when a winner arrives are dropped.
    pub async fn check_auth(&self) -> Option<String> {
        let probes: Vec<BoxFuture<'_, Result<String, ClientError>>> = self
            .hwproxy
            .servers
            .iter()
            .map(|&server| self.probe_user(server).boxed())
            .collect();

        if probes.is_empty() {
            return None;
        }

        match select_ok(probes).await {
            Ok((user, _still_running)) => Some(user),
            Err(e) => {
                tracing::info!("Not authorized on any server (last error: {})", e);
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Response helpers
    // ─────────────────────────────────────────────────────────────────────

    async fn ensure_success(
        url: &str,
        resp: reqwest::Response,
    ) -> Result<reqwest::Response, ClientError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ClientError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    /// Decode `{status, reason?, message?}`; error statuses usually carry it too
    async fn action_body(url: &str, resp: reqwest::Response) -> Result<ActionResponse, ClientError> {
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ClientError::transport(url, e))?;

        match serde_json::from_str::<ActionResponse>(&text) {
            Ok(body) => Ok(body),
            Err(_) if !status.is_success() => Err(ClientError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: text,
            }),
            Err(e) => Err(ClientError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
