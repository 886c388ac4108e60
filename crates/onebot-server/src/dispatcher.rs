//! Listener registry and event fan-out.
//!
//! Listeners are keyed by classification key (`"message.group"`) or by the
//! wildcard [`EventKey::Any`]. Dispatch runs wildcard listeners first, then
//! the listeners for the event's own key, each group in registration order.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use onebot_core::Event;
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Outcome of a single listener invocation.
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives dispatched events.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event) -> ListenerResult;
}

impl<F> EventListener for F
where
    F: Fn(&Event) -> ListenerResult + Send + Sync,
{
    fn on_event(&self, event: &Event) -> ListenerResult {
        self(event)
    }
}

/// Shared listener handle. Unregistration matches on pointer identity.
pub type Listener = Arc<dyn EventListener>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Event) -> ListenerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Registration key.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum EventKey {
    /// Matches every event. Spelled `"*"`.
    Any,
    Specific(String),
}

impl EventKey {
    pub const WILDCARD: &'static str = "*";

    pub fn as_str(&self) -> &str {
        match self {
            Self::Any => Self::WILDCARD,
            Self::Specific(key) => key,
        }
    }
}

impl From<&str> for EventKey {
    fn from(s: &str) -> Self {
        if s == Self::WILDCARD {
            Self::Any
        } else {
            Self::Specific(s.to_owned())
        }
    }
}

impl From<String> for EventKey {
    fn from(s: String) -> Self {
        if s == Self::WILDCARD {
            Self::Any
        } else {
            Self::Specific(s)
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    entries: RwLock<HashMap<EventKey, Vec<Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `listener` under `key`. Registering the same handle twice runs it twice.
    pub fn register(&self, key: impl Into<EventKey>, listener: Listener) {
        let key = key.into();
        debug!(key = %key, "listener registered");
        self.entries.write().entry(key).or_default().push(listener);
    }

    /// Remove `listener` from every key. Returns whether anything was removed.
    pub fn unregister(&self, listener: &Listener) -> bool {
        let mut entries = self.entries.write();
        let mut removed = false;
        entries.retain(|_, listeners| {
            let before = listeners.len();
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
            removed |= listeners.len() != before;
            !listeners.is_empty()
        });
        removed
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of listeners registered under `key`.
    pub fn count(&self, key: &EventKey) -> usize {
        self.entries.read().get(key).map_or(0, Vec::len)
    }

    /// Number of keys with at least one listener.
    pub fn key_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Run every matching listener against `event`. Returns how many ran.
    ///
    /// Works on a snapshot, so listeners may (un)register while running.
    /// An error or panic in one listener is logged and the rest still run.
    pub fn dispatch(&self, event: &Event) -> usize {
        let key = event.key();
        let snapshot: Vec<Listener> = {
            let entries = self.entries.read();
            let wildcard = entries.get(&EventKey::Any).into_iter().flatten();
            let specific = entries
                .get(&EventKey::Specific(key.clone()))
                .into_iter()
                .flatten();
            wildcard.chain(specific).cloned().collect()
        };

        for listener in &snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(key = %key, error = %error, "event listener failed");
                }
                Err(_) => {
                    warn!(key = %key, "event listener panicked");
                }
            }
        }
        snapshot.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn group_message() -> Event {
        Event::from_value(json!({
            "post_type": "message",
            "message_type": "group",
            "group_id": 1,
            "user_id": 2,
            "message": "hi",
        }))
        .unwrap()
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Listener {
        let log = Arc::clone(log);
        listener(move |_event: &Event| {
            log.lock().push(tag);
            Ok(())
        })
    }

    #[test]
    fn wildcard_spelling() {
        assert_eq!(EventKey::from("*"), EventKey::Any);
        assert_eq!(
            EventKey::from("message.group"),
            EventKey::Specific("message.group".into())
        );
        assert_eq!(EventKey::Any.to_string(), "*");
    }

    #[test]
    fn wildcard_runs_before_specific_in_registration_order() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.register("message.group", recorder(&log, "specific-1"));
        registry.register(EventKey::Any, recorder(&log, "any-1"));
        registry.register("message.group", recorder(&log, "specific-2"));
        registry.register("*", recorder(&log, "any-2"));
        registry.register("message.private", recorder(&log, "other"));

        let ran = registry.dispatch(&group_message());
        assert_eq!(ran, 4);
        assert_eq!(
            *log.lock(),
            vec!["any-1", "any-2", "specific-1", "specific-2"]
        );
    }

    #[test]
    fn unregister_removes_from_every_key() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = recorder(&log, "shared");

        registry.register("message.group", Arc::clone(&shared));
        registry.register(EventKey::Any, Arc::clone(&shared));
        registry.register("notice.group_increase", Arc::clone(&shared));
        assert_eq!(registry.key_count(), 3);

        assert!(registry.unregister(&shared));
        assert_eq!(registry.key_count(), 0);
        assert_eq!(registry.dispatch(&group_message()), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn unregister_matches_identity_not_behavior() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = recorder(&log, "same");
        let second = recorder(&log, "same");

        registry.register("message.group", Arc::clone(&first));
        registry.register("message.group", Arc::clone(&second));

        assert!(registry.unregister(&first));
        assert_eq!(registry.count(&EventKey::from("message.group")), 1);
        assert!(!registry.unregister(&first));
    }

    #[test]
    fn failing_listener_does_not_stop_the_rest() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.register(
            EventKey::Any,
            listener(|_event: &Event| Err("boom".into())),
        );
        registry.register(
            EventKey::Any,
            listener(|_event: &Event| panic!("listener panic")),
        );
        registry.register("message.group", recorder(&log, "after"));

        assert_eq!(registry.dispatch(&group_message()), 3);
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[test]
    fn listener_may_unregister_itself_during_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        let slot: Arc<Mutex<Option<Listener>>> = Arc::new(Mutex::new(None));

        let inner_registry = Arc::clone(&registry);
        let inner_slot = Arc::clone(&slot);
        let once = listener(move |_event: &Event| {
            if let Some(me) = inner_slot.lock().take() {
                inner_registry.unregister(&me);
            }
            Ok(())
        });
        *slot.lock() = Some(Arc::clone(&once));
        registry.register(EventKey::Any, once);

        assert_eq!(registry.dispatch(&group_message()), 1);
        assert_eq!(registry.dispatch(&group_message()), 0);
    }

    #[test]
    fn empty_detail_key_is_dispatched() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register("message.", recorder(&log, "bare"));

        let event = Event::from_value(json!({"post_type": "message"})).unwrap();
        assert_eq!(registry.dispatch(&event), 1);
        assert_eq!(*log.lock(), vec!["bare"]);
    }

    #[test]
    fn clear_drops_everything() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(EventKey::Any, recorder(&log, "a"));
        registry.clear();
        assert_eq!(registry.key_count(), 0);
    }
}
