//! Interactive login capability
//!
//! A login flow opens some authorization surface for one server and resolves
//! once that server hands out a session credential. How the credential is
//! observed depends on the host (browser tab, embedded webview, plain HTTP);
//! the coordinator only sees this trait.

use super::AuthError;
use crate::config::HwproxyConfig;
use crate::models::Server;
use async_trait::async_trait;
use reqwest::header::{LOCATION, SET_COOKIE};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Redirect hops followed before the flow gives up on a server
const MAX_REDIRECTS: usize = 10;

#[async_trait]
pub trait InteractiveAuthFlow: Send + Sync {
    /// Run the login flow against `server` and return the captured credential
    ///
    /// Implementations may wait indefinitely; callers go through
    /// [`await_credential`], which bounds the wait.
    async fn capture_credential(&self, server: Server) -> Result<String, AuthError>;

    /// Drop any credential the host keeps for `server`
    async fn clear_credentials(&self, _server: Server) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Capture a credential, giving up after `timeout` or when `cancel` fires
pub async fn await_credential(
    flow: &dyn InteractiveAuthFlow,
    server: Server,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, AuthError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AuthError::Cancelled),
        result = tokio::time::timeout(timeout, flow.capture_credential(server)) => match result {
            Ok(captured) => captured,
            Err(_) => Err(AuthError::Timeout { server, after: timeout }),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP flow
// ─────────────────────────────────────────────────────────────────────────────

/// Walks `<hwproxy>/authorization` and its redirects by hand, watching every
/// response for the session cookie
///
/// Works wherever the authorization endpoint can complete without a human
/// in the loop (SSO with ambient credentials, already-established upstream
/// session).
pub struct HttpAuthFlow {
    http: reqwest::Client,
    hwproxy: HwproxyConfig,
}

impl HttpAuthFlow {
    pub fn new(hwproxy: HwproxyConfig, request_timeout: Duration) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(request_timeout)
            .build()
            .map_err(crate::client::ClientError::Setup)?;
        Ok(Self { http, hwproxy })
    }

    fn session_cookie(&self, response: &reqwest::Response) -> Option<String> {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|cookie| cookie_value(cookie, &self.hwproxy.session_cookie))
    }
}

#[async_trait]
impl InteractiveAuthFlow for HttpAuthFlow {
    async fn capture_credential(&self, server: Server) -> Result<String, AuthError> {
        let mut url = format!("{}/authorization", self.hwproxy.server_url(server));

        for _ in 0..=MAX_REDIRECTS {
            tracing::debug!("Login flow on {}: GET {}", server, url);
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| crate::client::ClientError::transport(&url, e))?;

            if let Some(token) = self.session_cookie(&response) {
                tracing::info!("Session credential captured for {}", server);
                return Ok(token);
            }

            let next = response
                .status()
                .is_redirection()
                .then(|| response.headers().get(LOCATION))
                .flatten()
                .and_then(|location| location.to_str().ok())
                .and_then(|location| response.url().join(location).ok());

            match next {
                Some(next) => url = next.to_string(),
                None => break,
            }
        }

        Err(AuthError::NoCredential { server })
    }

    /// The client keeps no cookie jar, so the stored Auth record that logout
    /// resets is the only copy of the credential
    async fn clear_credentials(&self, server: Server) -> Result<(), AuthError> {
        tracing::debug!("No host-side session state to clear for {}", server);
        Ok(())
    }
}

/// Value of cookie `name` in one `Set-Cookie` header
fn cookie_value(header: &str, name: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (key, value) = pair.split_once('=')?;
    (key.trim() == name && !value.is_empty()).then(|| value.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use std::future::pending;

    struct NeverFlow;

    #[async_trait]
    impl InteractiveAuthFlow for NeverFlow {
        async fn capture_credential(&self, _server: Server) -> Result<String, AuthError> {
            pending().await
        }
    }

    #[test]
    fn test_cookie_value() {
        assert_eq!(
            cookie_value("AIOHTTP_SESSION=abc123; Path=/; HttpOnly", "AIOHTTP_SESSION").as_deref(),
            Some("abc123")
        );
        assert_eq!(cookie_value("other=1; Path=/", "AIOHTTP_SESSION"), None);
        assert_eq!(cookie_value("AIOHTTP_SESSION=; Max-Age=0", "AIOHTTP_SESSION"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_credential_times_out() {
        let cancel = CancellationToken::new();
        let err = await_credential(&NeverFlow, Server::Tgi, Duration::from_secs(120), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::Timeout { server: Server::Tgi, after } if after == Duration::from_secs(120)
        ));
    }

    #[tokio::test]
    async fn test_await_credential_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = await_credential(&NeverFlow, Server::Sgi, Duration::from_secs(120), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Cancelled));
    }

    #[tokio::test]
    async fn test_http_flow_follows_redirect_to_cookie() {
        let router = Router::new()
            .route(
                "/hwproxy/:server/authorization",
                get(|| async {
                    (StatusCode::FOUND, [(header::LOCATION, "callback")]).into_response()
                }),
            )
            .route(
                "/hwproxy/:server/callback",
                get(|| async {
                    (
                        [(header::SET_COOKIE, "AIOHTTP_SESSION=tok-42; Path=/; HttpOnly")],
                        "ok",
                    )
                        .into_response()
                }),
            );
        let backend = MockBackend::spawn(router).await;

        let flow = HttpAuthFlow::new(backend.config.hwproxy.clone(), Duration::from_secs(5)).unwrap();
        let token = flow.capture_credential(Server::Usa).await.unwrap();
        assert_eq!(token, "tok-42");
    }

    #[tokio::test]
    async fn test_http_flow_without_cookie() {
        let router = Router::new().route("/hwproxy/:server/authorization", get(|| async { "login page" }));
        let backend = MockBackend::spawn(router).await;

        let flow = HttpAuthFlow::new(backend.config.hwproxy.clone(), Duration::from_secs(5)).unwrap();
        let err = flow.capture_credential(Server::Mts).await.unwrap_err();
        assert!(matches!(err, AuthError::NoCredential { server: Server::Mts }));
    }

    #[tokio::test]
    async fn test_http_flow_clear_touches_no_server() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new().fallback({
            let hits = hits.clone();
            move || async move {
                hits.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }
        });
        let backend = MockBackend::spawn(router).await;

        let flow = HttpAuthFlow::new(backend.config.hwproxy.clone(), Duration::from_secs(5)).unwrap();
        for server in Server::ALL {
            flow.clear_credentials(server).await.unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
