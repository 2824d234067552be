// Create-form cache
//
// Mirrors in-progress form input into the volatile scope so a reopened popup
// can restore it. Keystroke-rate edits are coalesced: each debounced save
// replaces the pending one, and only the last write lands after the quiet
// period.

use crate::models::{FormValues, StorageKey};
use crate::storage::{SessionStore, StoreError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct FormCache {
    store: SessionStore,
    debounce: Duration,
    pending: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl FormCache {
    pub fn new(store: SessionStore, debounce: Duration) -> Self {
        Self {
            store,
            debounce,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Abort the debounced save that has not fired yet, if any
    fn cancel_pending(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = pending.take() {
            task.abort();
        }
    }

    /// Write `values` now, superseding any pending debounced save
    pub fn save(&self, values: &FormValues) -> Result<(), StoreError> {
        self.cancel_pending();
        self.store.save(StorageKey::PopupValues, values)
    }

    /// Write `values` once no further edit arrives within the debounce delay
    pub fn save_debounced(&self, values: FormValues) {
        let store = self.store.clone();
        let delay = self.debounce;

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = pending.take() {
            task.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = store.save(StorageKey::PopupValues, &values) {
                tracing::warn!("Failed to save form values: {}", e);
            }
        }));
    }

    /// Stored values, with defaults for anything missing or blank
    pub fn restore(&self) -> FormValues {
        let stored = match self.store.load::<FormValues>(StorageKey::PopupValues) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Ignoring unreadable form values: {}", e);
                None
            }
        };
        let Some(mut values) = stored else {
            return FormValues::default();
        };

        let defaults = FormValues::default();
        for (field, default) in [
            (&mut values.start, defaults.start),
            (&mut values.stop, defaults.stop),
            (&mut values.server, defaults.server),
        ] {
            if field.is_empty() {
                *field = default;
            }
        }
        values
    }

    /// Forget the cached input (after a successful create)
    pub fn clear(&self) -> Result<(), StoreError> {
        self.cancel_pending();
        self.store.remove_key(StorageKey::PopupValues)
    }
}
