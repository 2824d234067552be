//! Debug session lifecycle
//!
//! The backend is the source of truth for the debug list. Locally we keep a
//! cache that user actions update optimistically and that every poll replaces
//! wholesale, so any divergence lasts at most one poll interval.
//!
//! User-triggered actions (create, finish, delete) always:
//! - hold a [`BusyGuard`](crate::events::BusyGuard) for their target,
//! - emit a terminal notice,
//! - schedule a refresh poll shortly after they return, whatever the outcome.

pub mod input;
mod poller;
pub mod time;

pub use input::{extract_device_ids, fingerprint, sort_debugs};
pub use poller::ObserverGuard;
pub use time::{format_epoch, parse_relative_time, validate_time_range};

use crate::client::{ActionOutcome, ClientError, CreateOutcome, RemoteClient};
use crate::config::TimingConfig;
use crate::events::{BusyTarget, NoticeLevel};
use crate::form::FormCache;
use crate::models::{
    Auth, DebugSession, DebugState, DeviceCatalog, FormValues, Server, StorageKey,
};
use crate::storage::{SessionStore, StoreError};
use async_trait::async_trait;
use poller::ObserverState;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Create input rejected before any request is sent
///
/// The display text is the notice shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Fill in {} to create debug", .0.join(", "))]
    UnfilledFields(Vec<&'static str>),

    #[error("Remove duplicated unique ID")]
    DuplicateDeviceIds,

    #[error("Invalid input format {0}")]
    TimeFormat(String),

    #[error("Invalid start or stop time")]
    TimeRange,

    #[error("Unknown device type {0}")]
    UnknownDeviceType(String),

    #[error("Unknown server {0}")]
    UnknownServer(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DebugError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("debug {0} is not in the local list")]
    NotFound(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("Try to re-login. Authorization problem.")]
    MissingCredential(Server),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not authenticated; nothing was requested
    Skipped,
    /// Cache replaced with this many debugs
    Updated(usize),
}

/// Per-device result of one create request, by debug id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateReport {
    pub accepted: Vec<String>,
    pub duplicates: Vec<String>,
    pub failed: Vec<String>,
}

/// Asks the user to confirm a destructive action
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciler
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DebugLifecycleReconciler {
    client: RemoteClient,
    store: SessionStore,
    form: FormCache,
    poll_interval: Duration,
    refresh_delay: Duration,
    observers: Arc<Mutex<ObserverState>>,
}

impl DebugLifecycleReconciler {
    pub fn new(
        client: RemoteClient,
        store: SessionStore,
        form: FormCache,
        timing: &TimingConfig,
    ) -> Self {
        Self {
            client,
            store,
            form,
            poll_interval: timing.poll_interval(),
            refresh_delay: timing.refresh_delay(),
            observers: Arc::new(Mutex::new(ObserverState::default())),
        }
    }

    fn auth(&self) -> Result<Auth, StoreError> {
        Ok(self
            .store
            .load::<Auth>(StorageKey::Auth)?
            .unwrap_or_else(Auth::initial))
    }

    /// Cached debugs in stored order
    pub fn cached(&self) -> Result<Vec<DebugSession>, StoreError> {
        Ok(self
            .store
            .load::<Vec<DebugSession>>(StorageKey::Debugs)?
            .unwrap_or_default())
    }

    /// Cached debugs, newest first
    pub fn sorted(&self) -> Result<Vec<DebugSession>, StoreError> {
        let mut debugs = self.cached()?;
        sort_debugs(&mut debugs);
        Ok(debugs)
    }

    fn find(&self, debug_uid: &str) -> Result<DebugSession, DebugError> {
        self.cached()?
            .into_iter()
            .find(|d| d.debug_uid == debug_uid)
            .ok_or_else(|| DebugError::NotFound(debug_uid.to_string()))
    }

    /// Copy of the cached record attributed to the current user
    fn restamped(&self, debug_uid: &str) -> Result<DebugSession, DebugError> {
        let record = self.find(debug_uid)?;
        Ok(record.restamped(self.auth()?.user))
    }

    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.store.bus().notify(level, message);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Polling
    // ─────────────────────────────────────────────────────────────────────

    /// Replace the cached list with the backend's view
    ///
    /// Scoped to the current user unless the view filter is off.
    pub async fn poll_once(&self) -> Result<PollOutcome, DebugError> {
        let auth = self.auth()?;
        if !auth.status {
            tracing::debug!("Skipping debug poll: not authorized");
            return Ok(PollOutcome::Skipped);
        }

        let view_my = self.store.load::<bool>(StorageKey::ViewMy)?.unwrap_or(true);
        let user = auth.user.as_deref().filter(|_| view_my);

        let debugs = self.client.list_debugs(user).await?;
        self.store.save(StorageKey::Debugs, &debugs)?;
        Ok(PollOutcome::Updated(debugs.len()))
    }

    /// Background poll: failures are logged, never surfaced
    pub(crate) async fn poll_logged(&self) {
        match self.poll_once().await {
            Ok(PollOutcome::Updated(n)) => tracing::debug!("Debug list refreshed ({} debugs)", n),
            Ok(PollOutcome::Skipped) => {}
            Err(e) => tracing::warn!("Failed to get debugs list: {}", e),
        }
    }

    /// Poll once after the post-action delay
    pub fn schedule_refresh(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.refresh_delay).await;
            this.poll_logged().await;
        });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Create
    // ─────────────────────────────────────────────────────────────────────

    /// Create one debug per device id in `form.uid`
    ///
    /// Input problems are rejected before any request. After that each
    /// device id is submitted independently, so one failure does not stop
    /// its siblings.
    pub async fn create(&self, form: &FormValues) -> Result<CreateReport, DebugError> {
        let _busy = self.store.bus().busy(BusyTarget::Create);
        let result = self.submit(form).await;
        self.schedule_refresh();

        if let Err(e) = &result {
            match e {
                DebugError::Validation(_) | DebugError::MissingCredential(_) => {
                    self.notify(NoticeLevel::Info, e.to_string());
                }
                other => {
                    tracing::error!("Error creating debug: {}", other);
                    self.notify(NoticeLevel::Warning, "Failed to create new debug");
                }
            }
        }
        result
    }

    async fn submit(&self, form: &FormValues) -> Result<CreateReport, DebugError> {
        let unfilled = form.unfilled_fields();
        if !unfilled.is_empty() {
            return Err(ValidationError::UnfilledFields(unfilled).into());
        }

        let device_ids =
            extract_device_ids(&form.uid).ok_or(ValidationError::DuplicateDeviceIds)?;
        if device_ids.is_empty() {
            return Err(ValidationError::UnfilledFields(vec!["uid"]).into());
        }

        let hw_id = self
            .store
            .load::<DeviceCatalog>(StorageKey::HwList)?
            .and_then(|catalog| catalog.hw_id(&form.device_type))
            .ok_or_else(|| ValidationError::UnknownDeviceType(form.device_type.clone()))?;

        let server: Server = form
            .server
            .parse()
            .map_err(|_| ValidationError::UnknownServer(form.server.clone()))?;

        let auth = self.auth()?;
        let credential = auth
            .credential(server)
            .ok_or(DebugError::MissingCredential(server))?
            .to_string();

        let created_at = chrono::Utc::now().timestamp_millis();
        let start = parse_relative_time(&form.start, created_at)?;
        let stop = parse_relative_time(&form.stop, created_at)?;
        validate_time_range(start, stop, chrono::Utc::now().timestamp())?;

        let mut report = CreateReport::default();
        for device_uid in device_ids {
            let record = DebugSession {
                debug_uid: fingerprint(&device_uid, &hw_id, server),
                device_uid,
                device_type: form.device_type.clone(),
                device_hwuid: hw_id.clone(),
                debug_srv: server,
                debug_start_at: start,
                debug_stop_at: stop,
                debug_state: DebugState::Creating,
                debug_num: "n/a".to_string(),
                debug_creator: auth.user.clone(),
                debug_created_at: created_at,
                session_token: Some(credential.clone()),
                auto_wait: form.auto_wait,
                auto_remove: form.auto_remove,
            };

            match self.client.create_debug(&record).await {
                Ok(CreateOutcome::Accepted) => {
                    self.notify(NoticeLevel::Success, "Create debug request successfully accepted");
                    report.accepted.push(record.debug_uid.clone());
                    if let Err(e) = self.insert_local(record) {
                        tracing::warn!("Failed to cache created debug: {}", e);
                    }
                }
                Ok(CreateOutcome::Duplicate) => {
                    self.notify(
                        NoticeLevel::Warning,
                        format!("Failed to create: {} already exists", record.debug_uid),
                    );
                    report.duplicates.push(record.debug_uid);
                }
                Ok(CreateOutcome::Rejected(reason)) => {
                    tracing::warn!("Create of {} rejected: {}", record.debug_uid, reason);
                    self.notify(NoticeLevel::Warning, "Failed to create new debug");
                    report.failed.push(record.debug_uid);
                }
                Err(e) => {
                    tracing::error!("Failed to create new debug {}: {}", record.debug_uid, e);
                    self.notify(NoticeLevel::Warning, "Failed to create new debug");
                    report.failed.push(record.debug_uid);
                }
            }
        }

        if !report.accepted.is_empty() {
            if let Err(e) = self.form.clear() {
                tracing::warn!("Failed to clear form values: {}", e);
            }
        }
        Ok(report)
    }

    /// Add or replace one record in the cache, keyed by debug id
    fn insert_local(&self, debug: DebugSession) -> Result<(), StoreError> {
        let mut debugs = self.cached()?;
        debugs.retain(|d| d.debug_uid != debug.debug_uid);
        debugs.push(debug);
        self.store.save(StorageKey::Debugs, &debugs)
    }

    fn remove_local(&self, debug_uid: &str) -> Result<(), StoreError> {
        let mut debugs = self.cached()?;
        let before = debugs.len();
        debugs.retain(|d| d.debug_uid != debug_uid);
        if debugs.len() != before {
            self.store.save(StorageKey::Debugs, &debugs)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Finish / download, delete
    // ─────────────────────────────────────────────────────────────────────

    /// Finish a running debug, or download a finished one
    ///
    /// `Ok(None)` means the user declined.
    pub async fn finish(
        &self,
        debug_uid: &str,
        confirmer: &dyn Confirmer,
    ) -> Result<Option<ActionOutcome>, DebugError> {
        let _busy = self
            .store
            .bus()
            .busy(BusyTarget::Finish(debug_uid.to_string()));
        let result = self.finish_confirmed(debug_uid, confirmer).await;
        self.schedule_refresh();
        result
    }

    async fn finish_confirmed(
        &self,
        debug_uid: &str,
        confirmer: &dyn Confirmer,
    ) -> Result<Option<ActionOutcome>, DebugError> {
        let record = self.find(debug_uid).inspect_err(|e| {
            self.notify(NoticeLevel::Warning, format!("Failed to finish debug: {}", e));
        })?;
        let action = record.debug_state.finish_action();

        let prompt = format!("Do you really want to {} debug now?", action);
        if !confirmer.confirm(&prompt).await {
            return Ok(None);
        }

        let payload = self.restamped(debug_uid)?;
        match self.client.finish_or_download(&payload).await {
            Ok(ActionOutcome::Accepted) => {
                self.notify(
                    NoticeLevel::Success,
                    format!("Request to {} {} now successfully accepted", action, debug_uid),
                );
                Ok(Some(ActionOutcome::Accepted))
            }
            Ok(ActionOutcome::Rejected(message)) => {
                self.notify(
                    NoticeLevel::Warning,
                    format!("Failed to {} debug: {}", action, message),
                );
                Ok(Some(ActionOutcome::Rejected(message)))
            }
            Err(ClientError::RateLimited) => {
                self.notify(NoticeLevel::Warning, ClientError::RateLimited.to_string());
                Err(ClientError::RateLimited.into())
            }
            Err(e) => {
                tracing::error!("Failed to {} debug {}: {}", action, debug_uid, e);
                self.notify(
                    NoticeLevel::Warning,
                    format!("Failed to {} debug: {}", action, e),
                );
                Err(e.into())
            }
        }
    }

    /// Delete a debug after confirmation; `Ok(None)` means the user declined
    pub async fn delete(
        &self,
        debug_uid: &str,
        confirmer: &dyn Confirmer,
    ) -> Result<Option<ActionOutcome>, DebugError> {
        let _busy = self
            .store
            .bus()
            .busy(BusyTarget::Remove(debug_uid.to_string()));
        let result = self.delete_confirmed(debug_uid, confirmer).await;
        self.schedule_refresh();
        result
    }

    async fn delete_confirmed(
        &self,
        debug_uid: &str,
        confirmer: &dyn Confirmer,
    ) -> Result<Option<ActionOutcome>, DebugError> {
        if !confirmer.confirm("Do you confirm the deletion?").await {
            return Ok(None);
        }

        let payload = self.restamped(debug_uid).inspect_err(|e| {
            self.notify(NoticeLevel::Warning, format!("Failed to delete debug: {}", e));
        })?;

        match self.client.delete_debug(&payload).await {
            Ok(ActionOutcome::Accepted) => {
                self.notify(
                    NoticeLevel::Success,
                    format!("Request to delete {} successfully accepted", debug_uid),
                );
                if let Err(e) = self.remove_local(debug_uid) {
                    tracing::warn!("Failed to drop deleted debug from cache: {}", e);
                }
                Ok(Some(ActionOutcome::Accepted))
            }
            Ok(ActionOutcome::Rejected(message)) => {
                self.notify(
                    NoticeLevel::Warning,
                    format!("Failed to delete debug: {}", message),
                );
                Ok(Some(ActionOutcome::Rejected(message)))
            }
            Err(e) => {
                tracing::error!("Failed to delete debug {}: {}", debug_uid, e);
                self.notify(NoticeLevel::Warning, format!("Failed to delete debug: {}", e));
                Err(e.into())
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Status checks
    // ─────────────────────────────────────────────────────────────────────

    /// Ask the backend to re-check one debug's state
    pub async fn check(&self, debug_uid: &str) -> Result<ActionOutcome, DebugError> {
        let payload = self.restamped(debug_uid)?;
        Ok(self.client.check_debug_status(&payload).await?)
    }

    /// Check every cached debug in turn; returns how many were accepted
    pub async fn check_all(&self) -> Result<usize, DebugError> {
        let _busy = self.store.bus().busy(BusyTarget::DebugList);

        let mut accepted = 0;
        for record in self.cached()? {
            match self.check(&record.debug_uid).await {
                Ok(ActionOutcome::Accepted) => accepted += 1,
                Ok(ActionOutcome::Rejected(message)) => {
                    tracing::debug!("Check of {} rejected: {}", record.debug_uid, message);
                }
                Err(e) => tracing::warn!("Failed to check the debug {}: {}", record.debug_uid, e),
            }
        }
        Ok(accepted)
    }
}
