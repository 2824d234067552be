// Device catalog refresh
//
// The backend builds its device list lazily, so a freshly started backend can
// answer with an empty catalog. In that case we ask it to rebuild and re-poll
// until the list fills up, a bounded number of times.

use crate::client::{ClientError, RemoteClient};
use crate::config::TimingConfig;
use crate::models::{DeviceCatalog, StorageKey};
use crate::storage::{SessionStore, StoreError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a refresh ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogRefresh {
    /// Catalog stored with this many device types
    Stored(usize),
    /// Backend answered non-2xx; the cached catalog is untouched
    Unavailable,
    /// Still empty after every retry
    Exhausted,
    Cancelled,
}

#[derive(Clone)]
pub struct DeviceCatalogService {
    client: RemoteClient,
    store: SessionStore,
    retry_every: Duration,
    max_attempts: u32,
}

impl DeviceCatalogService {
    pub fn new(client: RemoteClient, store: SessionStore, timing: &TimingConfig) -> Self {
        Self {
            client,
            store,
            retry_every: timing.catalog_retry(),
            max_attempts: timing.catalog_max_attempts,
        }
    }

    /// Last catalog stored, if any
    pub fn cached(&self) -> Result<Option<DeviceCatalog>, StoreError> {
        self.store.load(StorageKey::HwList)
    }

    /// Fetch the catalog and store it once it is non-empty
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<CatalogRefresh, CatalogError> {
        let Some(mut catalog) = self.client.list_devices().await? else {
            return Ok(CatalogRefresh::Unavailable);
        };

        if catalog.is_empty() {
            tracing::info!("Device catalog is empty, asking the backend to rebuild it");
            if let Err(e) = self.client.force_refresh_devices().await {
                tracing::warn!("Failed to force device catalog update: {}", e);
            }

            match self.wait_for_devices(cancel).await {
                Some(filled) => catalog = filled,
                None if cancel.is_cancelled() => return Ok(CatalogRefresh::Cancelled),
                None => {
                    tracing::warn!(
                        "Device catalog still empty after {} attempts",
                        self.max_attempts
                    );
                    return Ok(CatalogRefresh::Exhausted);
                }
            }
        }

        self.store.save(StorageKey::HwList, &catalog)?;
        tracing::info!("Device catalog stored ({} device types)", catalog.len());
        Ok(CatalogRefresh::Stored(catalog.len()))
    }

    async fn wait_for_devices(&self, cancel: &CancellationToken) -> Option<DeviceCatalog> {
        for attempt in 1..=self.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.retry_every) => {}
            }

            match self.client.list_devices().await {
                Ok(Some(catalog)) if !catalog.is_empty() => return Some(catalog),
                Ok(_) => tracing::debug!("Device catalog still empty (attempt {})", attempt),
                Err(e) => tracing::warn!("Failed to get device catalog: {}", e),
            }
        }
        None
    }

    /// Refresh only when nothing usable is cached
    pub async fn ensure_loaded(&self, cancel: &CancellationToken) -> Result<(), CatalogError> {
        if self.cached()?.is_some_and(|c| !c.is_empty()) {
            return Ok(());
        }
        self.refresh(cancel).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn service(backend: &MockBackend) -> DeviceCatalogService {
        DeviceCatalogService::new(
            backend.client.clone(),
            backend.store.clone(),
            &backend.config.timing,
        )
    }

    #[tokio::test]
    async fn test_refresh_stores_catalog() {
        let router = Router::new().route(
            "/get_hw_list",
            get(|| async { Json(json!({"hw_list": {"router": "aa-bb", "switch": "cc"}})) }),
        );
        let backend = MockBackend::spawn(router).await;
        let catalog = service(&backend);

        let outcome = catalog.refresh(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, CatalogRefresh::Stored(2));
        assert_eq!(
            catalog.cached().unwrap().unwrap().hw_id("router").as_deref(),
            Some("aabb")
        );
    }

    #[tokio::test]
    async fn test_empty_catalog_forces_update_then_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let updated = Arc::new(AtomicUsize::new(0));

        let router = Router::new()
            .route(
                "/get_hw_list",
                get({
                    let calls = calls.clone();
                    move || async move {
                        // empty until the second re-poll
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Json(json!({"hw_list": {}}))
                        } else {
                            Json(json!({"hw_list": {"router": "ab"}}))
                        }
                    }
                }),
            )
            .route(
                "/update_hw_list",
                get({
                    let updated = updated.clone();
                    move || async move {
                        updated.fetch_add(1, Ordering::SeqCst);
                        "ok"
                    }
                }),
            );
        let backend = MockBackend::spawn(router).await;
        let mut catalog = service(&backend);
        catalog.retry_every = Duration::from_millis(10);

        let outcome = catalog.refresh(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, CatalogRefresh::Stored(1));
        assert_eq!(updated.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_catalog_gives_up() {
        let router = Router::new()
            .route("/get_hw_list", get(|| async { Json(json!({"hw_list": {}})) }))
            .route("/update_hw_list", get(|| async { "ok" }));
        let backend = MockBackend::spawn(router).await;
        let mut catalog = service(&backend);
        catalog.retry_every = Duration::from_millis(5);

        let outcome = catalog.refresh(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, CatalogRefresh::Exhausted);
        assert!(catalog.cached().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_loop_honours_cancellation() {
        let router = Router::new()
            .route("/get_hw_list", get(|| async { Json(json!({"hw_list": {}})) }))
            .route("/update_hw_list", get(|| async { "ok" }));
        let backend = MockBackend::spawn(router).await;
        let catalog = service(&backend);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = catalog.refresh(&cancel).await.unwrap();
        assert_eq!(outcome, CatalogRefresh::Cancelled);
    }

    #[tokio::test]
    async fn test_error_status_leaves_cache_alone() {
        let router = Router::new().route(
            "/get_hw_list",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let backend = MockBackend::spawn(router).await;
        backend
            .store
            .save(
                StorageKey::HwList,
                &json!({"hw_list": {"router": "ab"}}),
            )
            .unwrap();
        let catalog = service(&backend);

        assert_eq!(
            catalog.refresh(&CancellationToken::new()).await.unwrap(),
            CatalogRefresh::Unavailable
        );
        assert_eq!(catalog.cached().unwrap().unwrap().len(), 1);
        catalog.ensure_loaded(&CancellationToken::new()).await.unwrap();
    }
}
