// Background worker
//
// Owns every long-lived component and plays the extension's service worker:
// seeds storage on startup, executes commands sent by the presentation
// layer, and tracks observer connections for debug polling.

use crate::auth::flow::InteractiveAuthFlow;
use crate::auth::AuthCoordinator;
use crate::catalog::DeviceCatalogService;
use crate::client::{ClientError, RemoteClient};
use crate::config::Config;
use crate::debugs::{Confirmer, DebugLifecycleReconciler, ObserverGuard};
use crate::form::FormCache;
use crate::models::{Auth, FormValues, ServerProfile, StorageKey};
use crate::storage::{SessionStore, StoreError};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Messages the presentation layer sends to the worker
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")] // {"message": "check_auth_state"}
pub enum Command {
    Login,
    Logout,
    /// Probe auth and, when authenticated, refresh every server's credential
    CheckAuthState,
    /// An observer opened; polling runs while at least one is connected
    Connect,
    Disconnect,
    /// Toggle "show only my debugs"
    SetViewMy {
        value: bool,
    },
    SetServer {
        profile: ServerProfile,
    },

    // Popup actions. Finish and delete carry the user's answer to the
    // confirmation prompt, asked before the command was sent.
    SaveForm {
        values: FormValues,
    },
    Create {
        values: FormValues,
    },
    Finish {
        debug_uid: String,
        #[serde(default)]
        confirmed: bool,
    },
    Delete {
        debug_uid: String,
        #[serde(default)]
        confirmed: bool,
    },
    Check {
        debug_uid: String,
    },
    CheckAll,
}

/// Confirmation answered up front by the sender
struct Answered(bool);

#[async_trait]
impl Confirmer for Answered {
    async fn confirm(&self, prompt: &str) -> bool {
        tracing::debug!("{} -> {}", prompt, self.0);
        self.0
    }
}

pub struct Worker {
    config: Config,
    store: SessionStore,
    auth: AuthCoordinator,
    catalog: DeviceCatalogService,
    debugs: DebugLifecycleReconciler,
    form: FormCache,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        config: Config,
        store: SessionStore,
        flow: Arc<dyn InteractiveAuthFlow>,
    ) -> Result<Self, ClientError> {
        let client =
            RemoteClient::new(config.backend.clone(), config.hwproxy.clone(), store.clone())?;
        let auth = AuthCoordinator::new(
            client.clone(),
            store.clone(),
            flow,
            config.timing.login_timeout(),
        );
        let catalog = DeviceCatalogService::new(client.clone(), store.clone(), &config.timing);
        let form = FormCache::new(store.clone(), config.timing.form_debounce());
        let debugs =
            DebugLifecycleReconciler::new(client, store.clone(), form.clone(), &config.timing);

        Ok(Self {
            config,
            store,
            auth,
            catalog,
            debugs,
            form,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn auth(&self) -> &AuthCoordinator {
        &self.auth
    }

    pub fn catalog(&self) -> &DeviceCatalogService {
        &self.catalog
    }

    pub fn debugs(&self) -> &DebugLifecycleReconciler {
        &self.debugs
    }

    pub fn form(&self) -> &FormCache {
        &self.form
    }

    /// Stop background loops that honour the worker's cancellation token
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Startup
    // ─────────────────────────────────────────────────────────────────────

    /// Seed storage the way a fresh install or browser start does
    ///
    /// The server profile is kept if already chosen. The auth record is reset
    /// and the view filter defaults to "mine". The device catalog refresh can
    /// spend minutes re-polling an empty backend, so it runs in the returned
    /// task under the worker's shutdown token.
    pub async fn startup(self: &Arc<Self>) -> Result<JoinHandle<()>, StoreError> {
        if self.store.load::<ServerProfile>(StorageKey::Server)?.is_none() {
            self.store.save(StorageKey::Server, &self.config.profile)?;
        }
        self.store.save(
            StorageKey::Auth,
            &Auth::unauthenticated(&self.config.hwproxy.servers),
        )?;
        if self.store.load::<bool>(StorageKey::ViewMy)?.is_none() {
            self.store.save(StorageKey::ViewMy, &true)?;
        }

        let worker = Arc::clone(self);
        let catalog = tokio::spawn(async move {
            match worker.catalog.refresh(&worker.shutdown).await {
                Ok(outcome) => tracing::info!("Device catalog refresh: {:?}", outcome),
                Err(e) => tracing::warn!("Failed to get HW device list: {}", e),
            }
        });

        tracing::info!("Worker started");
        Ok(catalog)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────

    /// Run one command to completion; failures are logged
    pub async fn handle(&self, command: Command) {
        match command {
            Command::Login => {
                if let Err(e) = self.auth.login().await {
                    tracing::error!("Login failed: {}", e);
                }
            }
            Command::Logout => {
                if let Err(e) = self.auth.logout().await {
                    tracing::error!("Logout failed: {}", e);
                }
            }
            Command::CheckAuthState => {
                if let Err(e) = self.auth.refresh().await {
                    tracing::warn!("Auth check failed: {}", e);
                }
            }
            Command::SetViewMy { value } => {
                if let Err(e) = self.set_view_my(value).await {
                    tracing::warn!("Failed to set view filter: {}", e);
                }
            }
            Command::SetServer { profile } => {
                if let Err(e) = self.set_server_profile(profile) {
                    tracing::warn!("Failed to set server profile: {}", e);
                }
            }
            Command::SaveForm { values } => self.form.save_debounced(values),
            Command::Create { values } => {
                // failures are already reported as notices
                if let Err(e) = self.debugs.create(&values).await {
                    tracing::debug!("Create rejected: {}", e);
                }
            }
            Command::Finish {
                debug_uid,
                confirmed,
            } => {
                if let Err(e) = self.debugs.finish(&debug_uid, &Answered(confirmed)).await {
                    tracing::debug!("Finish of {} failed: {}", debug_uid, e);
                }
            }
            Command::Delete {
                debug_uid,
                confirmed,
            } => {
                if let Err(e) = self.debugs.delete(&debug_uid, &Answered(confirmed)).await {
                    tracing::debug!("Delete of {} failed: {}", debug_uid, e);
                }
            }
            Command::Check { debug_uid } => match self.debugs.check(&debug_uid).await {
                Ok(outcome) => tracing::info!("Check of {}: {:?}", debug_uid, outcome),
                Err(e) => tracing::warn!("Failed to check the debug {}: {}", debug_uid, e),
            },
            Command::CheckAll => match self.debugs.check_all().await {
                Ok(accepted) => tracing::info!("Checked all debugs ({} accepted)", accepted),
                Err(e) => tracing::warn!("Failed to check debugs: {}", e),
            },
            observer @ (Command::Connect | Command::Disconnect) => {
                tracing::debug!("{:?} ignored outside the dispatch loop", observer);
            }
        }
    }

    /// Consume commands until the sender closes
    ///
    /// Observer connections are tracked here. Every other command runs in
    /// its own task, so a login waiting on the user never blocks a logout.
    pub fn spawn_dispatch(self: &Arc<Self>, mut commands: mpsc::Receiver<Command>) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let mut observers: Vec<ObserverGuard> = Vec::new();

            while let Some(command) = commands.recv().await {
                tracing::info!("Worker received message: {:?}", command);
                match command {
                    Command::Connect => observers.push(worker.connect_observer()),
                    Command::Disconnect => {
                        observers.pop();
                    }
                    other => {
                        let worker = Arc::clone(&worker);
                        tokio::spawn(async move { worker.handle(other).await });
                    }
                }
            }
            tracing::debug!("Command channel closed, dropping {} observers", observers.len());
        })
    }

    pub fn connect_observer(&self) -> ObserverGuard {
        self.debugs.connect_observer()
    }

    /// Persist the view filter and poll right away with the new scope
    pub async fn set_view_my(&self, value: bool) -> Result<(), StoreError> {
        self.store.save(StorageKey::ViewMy, &value)?;
        self.debugs.poll_logged().await;
        Ok(())
    }

    /// Switch the backend profile; the next request already uses it
    pub fn set_server_profile(&self, profile: ServerProfile) -> Result<(), StoreError> {
        self.store.save(StorageKey::Server, &profile)?;
        tracing::info!("Server profile set to {}", profile.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Server;
    use crate::testing::{self, MockBackend, ScriptedFlow};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn worker_for(router: Router, flow: ScriptedFlow) -> (MockBackend, Arc<Worker>) {
        let backend = MockBackend::spawn(router).await;
        let worker = Worker::new(backend.config.clone(), backend.store.clone(), Arc::new(flow))
            .unwrap();
        (backend, Arc::new(worker))
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[test]
    fn test_command_wire_format() {
        let command: Command = serde_json::from_str(r#"{"message": "check_auth_state"}"#).unwrap();
        assert_eq!(command, Command::CheckAuthState);

        let command: Command =
            serde_json::from_str(r#"{"message": "set_view_my", "value": false}"#).unwrap();
        assert_eq!(command, Command::SetViewMy { value: false });

        let command: Command =
            serde_json::from_str(r#"{"message": "set_server", "profile": "dev"}"#).unwrap();
        assert_eq!(
            command,
            Command::SetServer {
                profile: ServerProfile::Dev
            }
        );
    }

    #[test]
    fn test_popup_command_wire_format() {
        let command: Command =
            serde_json::from_str(r#"{"message": "delete", "debug_uid": "easylog_1"}"#).unwrap();
        assert_eq!(
            command,
            Command::Delete {
                debug_uid: "easylog_1".to_string(),
                confirmed: false
            }
        );

        let command: Command = serde_json::from_str(
            r#"{"message": "create", "values": {"uid": "dev-1", "deviceType": "router"}}"#,
        )
        .unwrap();
        let Command::Create { values } = command else {
            panic!("expected create");
        };
        assert_eq!(values.uid, "dev-1");
        assert_eq!(values.device_type, "router");
        assert_eq!(values.start, "now");
    }

    #[tokio::test]
    async fn test_unconfirmed_delete_sends_nothing() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new().route(
            "/delete_debug",
            axum::routing::delete({
                let hits = hits.clone();
                move || async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"status": true}))
                }
            }),
        );
        let (backend, worker) = worker_for(router, ScriptedFlow::default()).await;
        testing::authenticate(&backend.store, "alice", &[Server::Tgi]);
        backend
            .store
            .save(
                StorageKey::Debugs,
                &vec![crate::models::DebugSession {
                    debug_uid: "easylog_1".to_string(),
                    ..Default::default()
                }],
            )
            .unwrap();

        worker
            .handle(Command::Delete {
                debug_uid: "easylog_1".to_string(),
                confirmed: false,
            })
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(worker.debugs().cached().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_startup_seeds_storage() {
        let router = Router::new().route(
            "/get_hw_list",
            get(|| async { Json(json!({"hw_list": {"router": "ab-cd"}})) }),
        );
        let (backend, worker) = worker_for(router, ScriptedFlow::default()).await;

        worker.startup().await.unwrap().await.unwrap();

        let store = &backend.store;
        assert_eq!(
            store.load::<ServerProfile>(StorageKey::Server).unwrap(),
            Some(ServerProfile::Prod)
        );
        assert_eq!(testing::stored_auth(store), Auth::initial());
        assert_eq!(store.load::<bool>(StorageKey::ViewMy).unwrap(), Some(true));
        assert_eq!(worker.catalog().cached().unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_startup_keeps_existing_choices() {
        let (backend, worker) = worker_for(Router::new(), ScriptedFlow::default()).await;
        backend.store.save(StorageKey::ViewMy, &false).unwrap();
        testing::authenticate(&backend.store, "alice", &[Server::Tgi]);

        worker.startup().await.unwrap().await.unwrap();

        assert_eq!(backend.store.load::<bool>(StorageKey::ViewMy).unwrap(), Some(false));
        // auth never survives a restart
        assert!(!testing::stored_auth(&backend.store).status);
    }

    #[tokio::test]
    async fn test_startup_does_not_wait_for_empty_catalog() {
        let router = Router::new()
            .route("/get_hw_list", get(|| async { Json(json!({"hw_list": {}})) }))
            .route("/update_hw_list", get(|| async { "ok" }));
        let (backend, worker) = worker_for(router, ScriptedFlow::default()).await;

        // the catalog retries for seconds; seeding must not
        let catalog = tokio::time::timeout(Duration::from_millis(500), worker.startup())
            .await
            .expect("startup blocked on the catalog retry")
            .unwrap();
        assert_eq!(backend.store.load::<bool>(StorageKey::ViewMy).unwrap(), Some(true));
        assert!(!catalog.is_finished());

        // commands are served while the catalog is still empty
        worker.handle(Command::SetViewMy { value: false }).await;
        assert_eq!(backend.store.load::<bool>(StorageKey::ViewMy).unwrap(), Some(false));

        worker.shutdown();
        tokio::time::timeout(Duration::from_secs(1), catalog)
            .await
            .expect("catalog retry ignored shutdown")
            .unwrap();
        assert!(worker.catalog().cached().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dispatch_check_auth_state_refreshes_credentials() {
        let flow = ScriptedFlow::with(&[
            (Server::Sgi, 0),
            (Server::Tgi, 0),
            (Server::Usa, 0),
            (Server::Mts, 0),
        ]);
        let (backend, worker) =
            worker_for(testing::probe_router(&[(Server::Sgi, "alice")]), flow).await;
        worker.startup().await.unwrap().await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        let dispatch = worker.spawn_dispatch(rx);
        tx.send(Command::CheckAuthState).await.unwrap();

        let store = backend.store.clone();
        assert!(
            eventually(|| {
                let auth = testing::stored_auth(&store);
                auth.status && Server::ALL.iter().all(|s| auth.credential(*s).is_some())
            })
            .await
        );
        assert_eq!(testing::stored_auth(&store).user.as_deref(), Some("alice"));

        drop(tx);
        dispatch.await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_tracks_observers() {
        let (_backend, worker) = worker_for(Router::new(), ScriptedFlow::default()).await;

        let (tx, rx) = mpsc::channel(8);
        let dispatch = worker.spawn_dispatch(rx);
        tx.send(Command::Connect).await.unwrap();
        tx.send(Command::Connect).await.unwrap();
        tx.send(Command::Disconnect).await.unwrap();

        let debugs = worker.debugs().clone();
        assert!(eventually(|| debugs.observer_count() == 1).await);

        drop(tx);
        dispatch.await.unwrap();
        assert_eq!(worker.debugs().observer_count(), 0);
    }

    #[tokio::test]
    async fn test_set_server_profile_switches_backend() {
        let (backend, worker) = worker_for(Router::new(), ScriptedFlow::default()).await;

        worker.set_server_profile(ServerProfile::Dev).unwrap();
        assert_eq!(backend.client.base_url(), "http://localhost:8001");
        worker.set_server_profile(ServerProfile::Prod).unwrap();
        assert_eq!(backend.client.base_url(), format!("http://{}", backend.addr));
    }

    #[tokio::test]
    async fn test_set_view_my_polls_with_new_scope() {
        let router = Router::new().route(
            "/get_debugs_list",
            get(|| async { Json(json!({"debugs": {"a": {"debug_uid": "a", "debug_creator": "bob"}}})) }),
        );
        let (backend, worker) = worker_for(router, ScriptedFlow::default()).await;
        testing::authenticate(&backend.store, "alice", &[Server::Tgi]);

        worker.set_view_my(false).await.unwrap();
        assert_eq!(worker.debugs().cached().unwrap().len(), 1);
    }
}
