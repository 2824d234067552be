// Events that flow from the session core to the presentation layer
//
// Storage changes, user notices and busy-state toggles all travel over one
// broadcast channel. A presentation adapter subscribes once and re-renders
// from these events; the core never calls into the presentation directly.

use crate::models::Scope;
use serde::Serialize;
use tokio::sync::broadcast;

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_BUFFER: usize = 256;

/// Main event type that flows to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")] // {"type": "storage_changed", ...}
pub enum AppEvent {
    /// A stored value was written, merged or removed
    StorageChanged(StorageChange),

    /// Terminal notification for a user-triggered action
    Notice { level: NoticeLevel, message: String },

    /// Loading affordance for an action target toggled
    Busy { target: BusyTarget, busy: bool },
}

/// `{key, oldValue, newValue}` for one key in one scope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageChange {
    pub scope: Scope,
    pub key: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Warning,
    Info,
}

/// UI element whose loading state an action controls
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "debug_uid", rename_all = "snake_case")]
pub enum BusyTarget {
    Create,
    Finish(String),
    Remove(String),
    DebugList,
}

/// Cloneable handle to the broadcast channel
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; having no subscribers is not an error
    pub fn emit(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }

    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit(AppEvent::Notice {
            level,
            message: message.into(),
        });
    }

    /// Mark `target` busy until the returned guard is dropped
    pub fn busy(&self, target: BusyTarget) -> BusyGuard {
        self.emit(AppEvent::Busy {
            target: target.clone(),
            busy: true,
        });
        BusyGuard {
            bus: self.clone(),
            target,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the busy state on drop, whichever way the action exits
pub struct BusyGuard {
    bus: EventBus,
    target: BusyTarget,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.bus.emit(AppEvent::Busy {
            target: self.target.clone(),
            busy: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_guard_clears_on_drop() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        {
            let _guard = bus.busy(BusyTarget::Remove("easylog_1".to_string()));
        }

        assert_eq!(
            rx.try_recv().unwrap(),
            AppEvent::Busy {
                target: BusyTarget::Remove("easylog_1".to_string()),
                busy: true
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            AppEvent::Busy {
                target: BusyTarget::Remove("easylog_1".to_string()),
                busy: false
            }
        );
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.notify(NoticeLevel::Info, "nobody listening");
    }

    #[test]
    fn test_event_json_shape() {
        let event = AppEvent::Notice {
            level: NoticeLevel::Warning,
            message: "x".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "notice");
        assert_eq!(json["level"], "warning");
    }
}
