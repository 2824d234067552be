// Observer-driven polling
//
// Polling runs only while someone is looking. The first observer starts one
// shared interval task (its first tick polls immediately); later observers
// get an immediate one-off poll of their own. Dropping the last guard stops
// the interval.

use super::DebugLifecycleReconciler;
use std::sync::PoisonError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub(super) struct ObserverState {
    count: usize,
    cancel: Option<CancellationToken>,
}

/// Keeps the debug list polling while alive
pub struct ObserverGuard {
    reconciler: DebugLifecycleReconciler,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.reconciler.disconnect_observer();
    }
}

impl DebugLifecycleReconciler {
    pub fn connect_observer(&self) -> ObserverGuard {
        let mut state = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.count += 1;

        if state.count == 1 {
            let cancel = CancellationToken::new();
            state.cancel = Some(cancel.clone());
            self.spawn_poll_loop(cancel);
        } else {
            let this = self.clone();
            tokio::spawn(async move { this.poll_logged().await });
        }

        tracing::debug!("Observer connected ({} active)", state.count);
        ObserverGuard {
            reconciler: self.clone(),
        }
    }

    fn disconnect_observer(&self) {
        let mut state = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.count = state.count.saturating_sub(1);

        if state.count == 0 {
            if let Some(cancel) = state.cancel.take() {
                cancel.cancel();
                tracing::debug!("Last observer gone, debug polling stopped");
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .count
    }

    fn spawn_poll_loop(&self, cancel: CancellationToken) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => this.poll_logged().await,
                }
            }
        });
    }
}
