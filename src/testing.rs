// In-process HWProxy stand-in for tests
//
// Every test gets its own axum server on 127.0.0.1:0. Backend routes are
// mounted at the root; per-server HWProxy routes live under /hwproxy/:server
// so one listener can play all four instances.

use crate::auth::flow::InteractiveAuthFlow;
use crate::auth::AuthError;
use crate::client::RemoteClient;
use crate::config::Config;
use crate::events::{AppEvent, EventBus};
use crate::models::{Auth, Server, StorageKey};
use crate::storage::SessionStore;
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub(crate) struct MockBackend {
    pub addr: SocketAddr,
    pub config: Config,
    pub bus: EventBus,
    pub store: SessionStore,
    pub client: RemoteClient,
}

impl MockBackend {
    pub async fn spawn(router: Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let config = config_for(addr);
        let bus = EventBus::new();
        let store = SessionStore::in_memory(bus.clone());
        let client =
            RemoteClient::new(config.backend.clone(), config.hwproxy.clone(), store.clone())
                .unwrap();

        Self {
            addr,
            config,
            bus,
            store,
            client,
        }
    }
}

/// Config whose prod backend and every HWProxy instance point at `addr`
pub(crate) fn config_for(addr: SocketAddr) -> Config {
    let mut config = Config::default();
    config.backend.prod_host = addr.ip().to_string();
    config.backend.prod_port = addr.port();
    config.backend.request_timeout_secs = 5;
    config.hwproxy.host_template = format!("http://{}/hwproxy/{{server}}", addr);
    config.timing.refresh_delay_ms = 20;
    config.timing.catalog_retry_secs = 1;
    config.timing.catalog_max_attempts = 3;
    config.timing.form_debounce_ms = 50;
    config
}

/// `/hwproxy/:server/api/user` answering 200 for the listed servers, 401 otherwise
pub(crate) fn probe_router(users: &[(Server, &str)]) -> Router {
    let users: HashMap<String, String> = users
        .iter()
        .map(|(server, name)| (server.as_str().to_string(), name.to_string()))
        .collect();

    Router::new()
        .route("/hwproxy/:server/api/user", get(probe_user))
        .with_state(Arc::new(users))
}

async fn probe_user(
    State(users): State<Arc<HashMap<String, String>>>,
    Path(server): Path<String>,
) -> impl IntoResponse {
    match users.get(&server) {
        Some(name) => (StatusCode::OK, Json(json!({"data": {"name": name}}))).into_response(),
        None => (StatusCode::UNAUTHORIZED, "unauthorized").into_response(),
    }
}

/// Store an authenticated record holding a credential for each listed server
pub(crate) fn authenticate(store: &SessionStore, user: &str, servers: &[Server]) {
    let mut auth = Auth::initial();
    auth.status = true;
    auth.user = Some(user.to_string());
    auth.srv = Some(Server::Tgi);
    auth.auth_at = Some(1_700_000_000_000);
    for server in servers {
        auth.set_credential(*server, Some(format!("token-{}", server)));
    }
    store.save(StorageKey::Auth, &auth).unwrap();
}

pub(crate) fn stored_auth(store: &SessionStore) -> Auth {
    store.load::<Auth>(StorageKey::Auth).unwrap().unwrap()
}

/// Drain notice messages that are already buffered on `rx`
pub(crate) fn notices(rx: &mut broadcast::Receiver<AppEvent>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AppEvent::Notice { message, .. } = event {
            out.push(message);
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripted login flow
// ─────────────────────────────────────────────────────────────────────────────

/// Login flow that yields `token-<server>` after a per-server delay
///
/// Servers without a script never produce a credential.
#[derive(Default)]
pub(crate) struct ScriptedFlow {
    pub delays: HashMap<Server, Duration>,
    pub fail_clear: Vec<Server>,
    pub cleared: Mutex<Vec<Server>>,
}

impl ScriptedFlow {
    pub fn with(delays: &[(Server, u64)]) -> Self {
        Self {
            delays: delays
                .iter()
                .map(|(server, ms)| (*server, Duration::from_millis(*ms)))
                .collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl InteractiveAuthFlow for ScriptedFlow {
    async fn capture_credential(&self, server: Server) -> Result<String, AuthError> {
        match self.delays.get(&server) {
            Some(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(format!("token-{}", server))
            }
            None => Err(AuthError::NoCredential { server }),
        }
    }

    async fn clear_credentials(&self, server: Server) -> Result<(), AuthError> {
        self.cleared.lock().unwrap().push(server);
        if self.fail_clear.contains(&server) {
            return Err(AuthError::NoCredential { server });
        }
        Ok(())
    }
}
