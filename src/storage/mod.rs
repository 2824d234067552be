// Storage module - two-scope observable key/value store
//
// The volatile scope lives in memory only, so it is empty after every restart
// (auth state, form cache, view filter). The durable scope is mirrored to a
// single JSON document on disk (server profile, device catalog, debug list).
//
// Every write publishes a StorageChange on the event bus. Reads and writes
// take the scope's lock for their whole read-modify-write, so a merge from one
// task can never interleave with a merge from another. A write that fails to
// reach disk is undone in memory and publishes nothing.

use crate::events::{AppEvent, EventBus, StorageChange};
use crate::models::{Scope, StorageKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

/// File name of the durable scope inside the data directory
const DURABLE_FILE: &str = "durable.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored value for '{key}' has an unexpected shape: {source}")]
    Serde {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Observable store shared by every component
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

struct Inner {
    volatile: Mutex<Map<String, Value>>,
    durable: Mutex<Map<String, Value>>,
    /// Where the durable scope is persisted; `None` keeps it in memory
    durable_path: Option<PathBuf>,
    bus: EventBus,
}

impl SessionStore {
    /// Store whose durable scope never touches disk
    pub fn in_memory(bus: EventBus) -> Self {
        Self::with_durable(Map::new(), None, bus)
    }

    /// Open the store, loading the durable scope from `data_dir` if present
    pub fn open(data_dir: &Path, bus: EventBus) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir).map_err(|source| StoreError::Io {
            path: data_dir.to_path_buf(),
            source,
        })?;

        let path = data_dir.join(DURABLE_FILE);
        let durable = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Map<String, Value>>(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    // A corrupt cache is not worth refusing to start over
                    tracing::warn!("Discarding unreadable durable store {:?}: {}", path, e);
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        tracing::debug!(
            "Durable store opened at {:?} ({} keys)",
            path,
            durable.len()
        );
        Ok(Self::with_durable(durable, Some(path), bus))
    }

    fn with_durable(durable: Map<String, Value>, path: Option<PathBuf>, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                volatile: Mutex::new(Map::new()),
                durable: Mutex::new(durable),
                durable_path: path,
                bus,
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    fn area(&self, scope: Scope) -> MutexGuard<'_, Map<String, Value>> {
        let lock = match scope {
            Scope::Volatile => &self.inner.volatile,
            Scope::Durable => &self.inner.durable,
        };
        lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Raw scope operations
    // ─────────────────────────────────────────────────────────────────────

    pub fn get(&self, scope: Scope, key: &str) -> Option<Value> {
        self.area(scope).get(key).cloned()
    }

    /// Atomically replace the value under `key`
    pub fn set(&self, scope: Scope, key: &str, value: Value) -> Result<(), StoreError> {
        let mut area = self.area(scope);
        let old_value = self.write_through(scope, &mut area, key, Some(value.clone()))?;
        drop(area);

        tracing::debug!("Stored {} in {:?} scope", key, scope);
        self.publish(scope, key, old_value, Some(value));
        Ok(())
    }

    /// Shallow-merge the fields of `patch` into the object stored under `key`
    ///
    /// A missing or non-object current value is treated as an empty object.
    /// Returns the merged value.
    pub fn merge(&self, scope: Scope, key: &str, patch: Value) -> Result<Value, StoreError> {
        let mut area = self.area(scope);
        let old_value = area.get(key).cloned();

        let mut merged = match &old_value {
            Some(Value::Object(fields)) => fields.clone(),
            _ => Map::new(),
        };
        match patch {
            Value::Object(fields) => merged.extend(fields),
            other => {
                tracing::warn!("Ignoring non-object merge patch for {}: {}", key, other);
            }
        }

        let merged = Value::Object(merged);
        self.write_through(scope, &mut area, key, Some(merged.clone()))?;
        drop(area);

        self.publish(scope, key, old_value, Some(merged.clone()));
        Ok(merged)
    }

    pub fn remove(&self, scope: Scope, key: &str) -> Result<Option<Value>, StoreError> {
        let mut area = self.area(scope);
        let old_value = if area.contains_key(key) {
            self.write_through(scope, &mut area, key, None)?
        } else {
            None
        };
        drop(area);

        if old_value.is_some() {
            self.publish(scope, key, old_value.clone(), None);
        }
        Ok(old_value)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Typed access by well-known key
    // ─────────────────────────────────────────────────────────────────────

    pub fn load<T: DeserializeOwned>(&self, key: StorageKey) -> Result<Option<T>, StoreError> {
        self.get(key.scope(), key.as_str())
            .map(|value| {
                serde_json::from_value(value).map_err(|source| StoreError::Serde {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    pub fn save<T: Serialize>(&self, key: StorageKey, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Serde {
            key: key.to_string(),
            source,
        })?;
        self.set(key.scope(), key.as_str(), value)
    }

    pub fn merge_key(&self, key: StorageKey, patch: Value) -> Result<Value, StoreError> {
        self.merge(key.scope(), key.as_str(), patch)
    }

    pub fn remove_key(&self, key: StorageKey) -> Result<(), StoreError> {
        self.remove(key.scope(), key.as_str()).map(|_| ())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Change feed
    // ─────────────────────────────────────────────────────────────────────

    /// Stream of storage changes in both scopes, starting now
    ///
    /// Changes missed by a lagging subscriber are skipped, not replayed.
    pub fn changes(&self) -> impl Stream<Item = StorageChange> {
        BroadcastStream::new(self.inner.bus.subscribe()).filter_map(|event| match event {
            Ok(AppEvent::StorageChanged(change)) => Some(change),
            _ => None,
        })
    }

    fn publish(&self, scope: Scope, key: &str, old_value: Option<Value>, new_value: Option<Value>) {
        self.inner
            .bus
            .emit(AppEvent::StorageChanged(StorageChange {
                scope,
                key: key.to_string(),
                old_value,
                new_value,
            }));
    }

    /// Apply one key change and persist it, restoring the previous value if
    /// the disk write fails. Returns the previous value.
    fn write_through(
        &self,
        scope: Scope,
        area: &mut Map<String, Value>,
        key: &str,
        value: Option<Value>,
    ) -> Result<Option<Value>, StoreError> {
        let old_value = match value {
            Some(value) => area.insert(key.to_string(), value),
            None => area.remove(key),
        };

        if let Err(e) = self.persist(scope, area) {
            match &old_value {
                Some(previous) => area.insert(key.to_string(), previous.clone()),
                None => area.remove(key),
            };
            return Err(e);
        }
        Ok(old_value)
    }

    /// Write the durable scope through to disk (temp file + rename)
    fn persist(&self, scope: Scope, area: &Map<String, Value>) -> Result<(), StoreError> {
        let (Scope::Durable, Some(path)) = (scope, &self.inner.durable_path) else {
            return Ok(());
        };

        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(area).map_err(|source| StoreError::Serde {
            key: DURABLE_FILE.to_string(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Auth, Server};
    use serde_json::json;

    #[test]
    fn test_set_get_remove_emit_changes() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let store = SessionStore::in_memory(bus);

        store.set(Scope::Volatile, "viewMy", json!(true)).unwrap();
        assert_eq!(store.get(Scope::Volatile, "viewMy"), Some(json!(true)));
        assert_eq!(store.get(Scope::Durable, "viewMy"), None);

        let removed = store.remove(Scope::Volatile, "viewMy").unwrap();
        assert_eq!(removed, Some(json!(true)));

        match rx.try_recv().unwrap() {
            AppEvent::StorageChanged(change) => {
                assert_eq!(change.key, "viewMy");
                assert_eq!(change.old_value, None);
                assert_eq!(change.new_value, Some(json!(true)));
            }
            other => panic!("unexpected event {:?}", other),
        }
        match rx.try_recv().unwrap() {
            AppEvent::StorageChanged(change) => {
                assert_eq!(change.old_value, Some(json!(true)));
                assert_eq!(change.new_value, None);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_remove_missing_key_is_silent() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let store = SessionStore::in_memory(bus);

        assert_eq!(store.remove(Scope::Volatile, "popupValues").unwrap(), None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_merge_is_shallow_and_keeps_other_fields() {
        let store = SessionStore::in_memory(EventBus::new());
        store.save(StorageKey::Auth, &Auth::initial()).unwrap();

        store
            .merge_key(StorageKey::Auth, Auth::credential_patch(Server::Usa, "u1"))
            .unwrap();
        store
            .merge_key(StorageKey::Auth, Auth::credential_patch(Server::Mts, "m1"))
            .unwrap();

        let auth: Auth = store.load(StorageKey::Auth).unwrap().unwrap();
        assert_eq!(auth.credential(Server::Usa), Some("u1"));
        assert_eq!(auth.credential(Server::Mts), Some("m1"));
        assert_eq!(auth.credential(Server::Sgi), None);
    }

    #[test]
    fn test_merge_into_missing_value_creates_object() {
        let store = SessionStore::in_memory(EventBus::new());
        let merged = store
            .merge(Scope::Volatile, "auth", json!({"status": true}))
            .unwrap();
        assert_eq!(merged, json!({"status": true}));
    }

    #[test]
    fn test_durable_scope_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = SessionStore::open(dir.path(), EventBus::new()).unwrap();
        store.set(Scope::Durable, "server", json!("dev")).unwrap();
        store.set(Scope::Volatile, "viewMy", json!(false)).unwrap();
        drop(store);

        let reopened = SessionStore::open(dir.path(), EventBus::new()).unwrap();
        assert_eq!(reopened.get(Scope::Durable, "server"), Some(json!("dev")));
        assert_eq!(reopened.get(Scope::Volatile, "viewMy"), None);
    }

    #[test]
    fn test_failed_write_leaves_memory_and_feed_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let store = SessionStore::open(dir.path(), bus.clone()).unwrap();
        store.set(Scope::Durable, "server", json!("prod")).unwrap();
        store
            .set(Scope::Durable, "debugs", json!([{"debug_uid": "a"}]))
            .unwrap();

        // a directory where the temp file goes makes every write fail
        fs::create_dir(dir.path().join("durable.json.tmp")).unwrap();
        let mut rx = bus.subscribe();

        assert!(store.set(Scope::Durable, "server", json!("dev")).is_err());
        assert!(store
            .merge(Scope::Durable, "hwList", json!({"hw_list": {}}))
            .is_err());
        assert!(store.remove(Scope::Durable, "debugs").is_err());

        assert_eq!(store.get(Scope::Durable, "server"), Some(json!("prod")));
        assert_eq!(store.get(Scope::Durable, "hwList"), None);
        assert_eq!(
            store.get(Scope::Durable, "debugs"),
            Some(json!([{"debug_uid": "a"}]))
        );
        assert!(rx.try_recv().is_err());

        // volatile writes never touch disk
        store.set(Scope::Volatile, "viewMy", json!(true)).unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_corrupt_durable_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(DURABLE_FILE), b"{not json").unwrap();

        let store = SessionStore::open(dir.path(), EventBus::new()).unwrap();
        assert_eq!(store.get(Scope::Durable, "debugs"), None);
    }

    #[tokio::test]
    async fn test_change_stream_yields_storage_events_only() {
        let store = SessionStore::in_memory(EventBus::new());
        let mut changes = Box::pin(store.changes());

        store
            .bus()
            .notify(crate::events::NoticeLevel::Info, "not a storage change");
        store.set(Scope::Durable, "hwList", json!({"hw_list": {}})).unwrap();

        let change = changes.next().await.unwrap();
        assert_eq!(change.scope, Scope::Durable);
        assert_eq!(change.key, "hwList");
    }
}
