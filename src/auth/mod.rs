//! Multi-server authentication
//!
//! Login runs the interactive flow against the primary server, then fans out
//! to every secondary server concurrently. Each secondary credential is merged
//! into the stored `Auth` record as it arrives. Credentials live in distinct
//! `session_token_<server>` fields, so merges in any order give the same record.
//!
//! ```text
//! Unauthenticated ─login─▶ Authenticating(primary) ─▶ AuthenticatedPrimary ─▶ AuthenticatedAll
//!        ▲                                                                          │
//!        └──────────────────────────────── logout (from any phase) ◀────────────────┘
//! ```

pub mod flow;

use crate::client::{ClientError, RemoteClient};
use crate::models::{Auth, Server, StorageKey};
use crate::storage::{SessionStore, StoreError};
use flow::{await_credential, InteractiveAuthFlow};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no session credential from {server} within {after:?}")]
    Timeout { server: Server, after: Duration },

    #[error("login cancelled")]
    Cancelled,

    #[error("login flow on {server} ended without a session credential")]
    NoCredential { server: Server },

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where the login state machine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Unauthenticated,
    Authenticating(Server),
    AuthenticatedPrimary,
    AuthenticatedAll,
}

pub struct AuthCoordinator {
    client: RemoteClient,
    store: SessionStore,
    flow: Arc<dyn InteractiveAuthFlow>,
    login_timeout: Duration,
    phase: watch::Sender<AuthPhase>,
    /// Token of the current login generation; logout and a new login cancel it
    generation: Mutex<CancellationToken>,
}

impl AuthCoordinator {
    pub fn new(
        client: RemoteClient,
        store: SessionStore,
        flow: Arc<dyn InteractiveAuthFlow>,
        login_timeout: Duration,
    ) -> Self {
        let (phase, _) = watch::channel(AuthPhase::Unauthenticated);
        Self {
            client,
            store,
            flow,
            login_timeout,
            phase,
            generation: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn phase(&self) -> AuthPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthPhase> {
        self.phase.subscribe()
    }

    fn servers(&self) -> &[Server] {
        &self.client.hwproxy().servers
    }

    fn current_generation(&self) -> CancellationToken {
        self.generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancel whatever the previous generation is still doing and start a new one
    fn next_generation(&self) -> CancellationToken {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        generation.cancel();
        *generation = CancellationToken::new();
        generation.clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Login / logout
    // ─────────────────────────────────────────────────────────────────────

    /// Interactive login on the primary server, then background fan-out
    ///
    /// Fails only if the primary credential is never captured. Secondary
    /// failures are logged and leave that server's credential null.
    pub async fn login(&self) -> Result<AuthPhase, AuthError> {
        let cancel = self.next_generation();
        let primary = self.client.hwproxy().primary;

        tracing::info!("Starting login on primary server {}", primary);
        self.phase.send_replace(AuthPhase::Authenticating(primary));

        let credential = match await_credential(
            self.flow.as_ref(),
            primary,
            self.login_timeout,
            &cancel,
        )
        .await
        {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!("Login on {} failed: {}", primary, e);
                self.settle_phase();
                return Err(e);
            }
        };

        // Stored before probing so the probe can present the new credential
        let mut auth = Auth::unauthenticated(self.servers());
        auth.status = true;
        auth.srv = Some(primary);
        auth.auth_at = Some(chrono::Utc::now().timestamp_millis());
        auth.set_credential(primary, Some(credential));
        self.store.save(StorageKey::Auth, &auth)?;

        match self.client.check_auth().await {
            Some(user) => {
                self.store.merge_key(StorageKey::Auth, json!({"user": user}))?;
            }
            None => tracing::warn!("Primary credential captured but no server confirmed the user"),
        }
        self.phase.send_replace(AuthPhase::AuthenticatedPrimary);

        let secondaries = self.client.hwproxy().secondaries();
        let captured = self.login_servers(&secondaries, &cancel).await;
        tracing::info!(
            "Login complete: {}/{} secondary servers",
            captured,
            secondaries.len()
        );

        if !cancel.is_cancelled() {
            self.phase.send_replace(AuthPhase::AuthenticatedAll);
        }
        Ok(self.phase())
    }

    /// Clear every server's credential and reset the stored record
    ///
    /// Remote clearing is best-effort; the local reset always happens.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.next_generation();

        for &server in self.servers() {
            if let Err(e) = self.flow.clear_credentials(server).await {
                tracing::warn!("Failed to clear credentials on {}: {}", server, e);
            }
        }

        self.store
            .save(StorageKey::Auth, &Auth::unauthenticated(self.servers()))?;
        self.phase.send_replace(AuthPhase::Unauthenticated);
        tracing::info!("Logged out");
        Ok(())
    }

    /// Log into `servers` concurrently, merging each credential as it arrives
    ///
    /// Returns how many credentials were stored.
    pub(crate) async fn login_servers(&self, servers: &[Server], cancel: &CancellationToken) -> usize {
        let mut pending: FuturesUnordered<_> = servers
            .iter()
            .map(|&server| async move {
                let result =
                    await_credential(self.flow.as_ref(), server, self.login_timeout, cancel).await;
                (server, result)
            })
            .collect();

        let mut stored = 0;
        while let Some((server, result)) = pending.next().await {
            match result {
                Ok(credential) => match self.merge_credential(server, &credential, cancel) {
                    Ok(true) => stored += 1,
                    Ok(false) => {}
                    Err(e) => tracing::warn!("Failed to store credential for {}: {}", server, e),
                },
                Err(AuthError::Cancelled) => {
                    tracing::debug!("Login on {} cancelled", server);
                }
                Err(e) => tracing::warn!("Background login on {} failed: {}", server, e),
            }
        }
        stored
    }

    /// Merge one credential unless the session ended meanwhile
    fn merge_credential(
        &self,
        server: Server,
        credential: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, AuthError> {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let authenticated = self
            .store
            .load::<Auth>(StorageKey::Auth)?
            .is_some_and(|auth| auth.status);
        if !authenticated {
            tracing::debug!("Dropping credential for {}: no longer authenticated", server);
            return Ok(false);
        }

        self.store
            .merge_key(StorageKey::Auth, Auth::credential_patch(server, credential))?;
        tracing::debug!("Stored credential for {}", server);
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Status probe
    // ─────────────────────────────────────────────────────────────────────

    /// Race the status probe across servers and record the result
    ///
    /// On success only `status` and `user` are merged, so stored credentials
    /// survive. When every server rejects, the record is reset.
    pub async fn check_auth(&self) -> Result<Option<String>, AuthError> {
        match self.client.check_auth().await {
            Some(user) => {
                self.store
                    .merge_key(StorageKey::Auth, json!({"status": true, "user": user}))?;
                if self.phase() == AuthPhase::Unauthenticated {
                    self.phase.send_replace(AuthPhase::AuthenticatedPrimary);
                }
                Ok(Some(user))
            }
            None => {
                self.store
                    .save(StorageKey::Auth, &Auth::unauthenticated(self.servers()))?;
                if !matches!(self.phase(), AuthPhase::Authenticating(_)) {
                    self.phase.send_replace(AuthPhase::Unauthenticated);
                }
                Ok(None)
            }
        }
    }

    /// Probe, and when still authenticated re-capture every server's credential
    pub async fn refresh(&self) -> Result<Option<String>, AuthError> {
        let user = self.check_auth().await?;
        if user.is_some() {
            let cancel = self.current_generation();
            let servers = self.servers().to_vec();
            let refreshed = self.login_servers(&servers, &cancel).await;
            tracing::debug!("Refreshed {} credentials", refreshed);
            if refreshed > 0 && !cancel.is_cancelled() {
                self.phase.send_replace(AuthPhase::AuthenticatedAll);
            }
        }
        Ok(user)
    }

    /// Derive the phase from the stored record after an aborted login
    fn settle_phase(&self) {
        let authenticated = matches!(
            self.store.load::<Auth>(StorageKey::Auth),
            Ok(Some(auth)) if auth.status
        );
        self.phase.send_replace(if authenticated {
            AuthPhase::AuthenticatedPrimary
        } else {
            AuthPhase::Unauthenticated
        });
    }
}
