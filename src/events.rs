//! Lifecycle notifications for the embedding application.
//!
//! Listeners implement [`StreamListener`] and register with an
//! [`EventDispatcher`]. Every dispatch is also logged, so an application
//! that only wants logs does not need a listener at all.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Geographic position supplied by the application for overlays and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Receiver of stream lifecycle events.
///
/// Methods run synchronously on the thread that raised the event and must
/// not block.
pub trait StreamListener: Send + Sync {
    fn server_started(&self, _base_url: &str) {}

    fn server_stopped(&self) {}

    fn client_connected(&self, _address: &str) {}

    fn client_disconnected(&self, _address: &str) {}

    fn error_occurred(&self, _description: &str) {}

    /// Current location, if the application tracks one.
    fn location(&self) -> Option<Location> {
        None
    }
}

/// Handle returned by [`EventDispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Fan-out point for [`StreamListener`]s.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn StreamListener>)>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn StreamListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Remove a listener; returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn server_started(&self, base_url: &str) {
        tracing::info!(base_url = %base_url, "Stream server started");
        self.each(|l| l.server_started(base_url));
    }

    pub fn server_stopped(&self) {
        tracing::info!("Stream server stopped");
        self.each(|l| l.server_stopped());
    }

    pub fn client_connected(&self, address: &str) {
        tracing::info!(client = %address, "Client connected");
        self.each(|l| l.client_connected(address));
    }

    pub fn client_disconnected(&self, address: &str) {
        tracing::info!(client = %address, "Client disconnected");
        self.each(|l| l.client_disconnected(address));
    }

    pub fn error_occurred(&self, description: &str) {
        tracing::error!(error = %description, "Stream error");
        self.each(|l| l.error_occurred(description));
    }

    /// First location offered by any listener.
    pub fn location(&self) -> Option<Location> {
        self.snapshot().iter().find_map(|l| l.location())
    }

    // Listeners run on a copy so they may subscribe or unsubscribe from a callback.
    fn each(&self, f: impl Fn(&dyn StreamListener)) {
        for listener in self.snapshot() {
            f(listener.as_ref());
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn StreamListener>> {
        self.listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Listener that records every event as a string.
    #[derive(Default)]
    pub(crate) struct RecordingListener {
        pub(crate) events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        pub(crate) fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.lock())
        }

        pub(crate) fn count(&self, prefix: &str) -> usize {
            self.events
                .lock()
                .iter()
                .filter(|e| e.starts_with(prefix))
                .count()
        }
    }

    impl StreamListener for RecordingListener {
        fn server_started(&self, base_url: &str) {
            self.events.lock().push(format!("started {}", base_url));
        }
        fn server_stopped(&self) {
            self.events.lock().push("stopped".to_string());
        }
        fn client_connected(&self, address: &str) {
            self.events.lock().push(format!("connected {}", address));
        }
        fn client_disconnected(&self, address: &str) {
            self.events.lock().push(format!("disconnected {}", address));
        }
        fn error_occurred(&self, description: &str) {
            self.events.lock().push(format!("error {}", description));
        }
    }

    struct FixedLocation;

    impl StreamListener for FixedLocation {
        fn location(&self) -> Option<Location> {
            Some(Location {
                latitude: 52.37,
                longitude: 4.89,
                altitude: None,
                timestamp: Utc::now(),
            })
        }
    }

    #[test]
    fn test_subscribe_and_dispatch() {
        let dispatcher = EventDispatcher::new();
        let listener = Arc::new(RecordingListener::default());
        dispatcher.subscribe(listener.clone());

        dispatcher.server_started("http://127.0.0.1:8080/abc/");
        dispatcher.client_connected("10.0.0.2");
        dispatcher.error_occurred("boom");

        assert_eq!(
            listener.take(),
            vec![
                "started http://127.0.0.1:8080/abc/",
                "connected 10.0.0.2",
                "error boom"
            ]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let dispatcher = EventDispatcher::new();
        let listener = Arc::new(RecordingListener::default());
        let id = dispatcher.subscribe(listener.clone());
        assert_eq!(dispatcher.len(), 1);

        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));
        assert!(dispatcher.is_empty());

        dispatcher.server_stopped();
        assert!(listener.take().is_empty());
    }

    #[test]
    fn test_location_pull() {
        let dispatcher = EventDispatcher::new();
        assert!(dispatcher.location().is_none());

        dispatcher.subscribe(Arc::new(RecordingListener::default()));
        dispatcher.subscribe(Arc::new(FixedLocation));
        let location = dispatcher.location().unwrap();
        assert_eq!(location.latitude, 52.37);
    }
}
