//! Per-address client tracking for disconnect detection.
//!
//! HLS clients poll; there is no connection to watch. A client is "connected"
//! from its first request until it stays silent longer than the inactivity
//! timeout.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::events::EventDispatcher;

/// A polling client, keyed by address.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSession {
    pub address: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip)]
    pub last_activity: Instant,
    pub requests: u64,
    pub segments_served: u64,
    pub segments_missed: u64,
}

impl ClientSession {
    fn new(address: &str, now: Instant) -> Self {
        let wall = Utc::now();
        Self {
            address: address.to_string(),
            connected_at: wall,
            last_seen: wall,
            last_activity: now,
            requests: 1,
            segments_served: 0,
            segments_missed: 0,
        }
    }

    fn refresh(&mut self, now: Instant) {
        self.last_seen = Utc::now();
        self.last_activity = now;
        self.requests += 1;
    }
}

/// Thread-safe table of active clients.
#[derive(Clone)]
pub struct ClientTracker {
    clients: Arc<DashMap<String, ClientSession>>,
    timeout: Duration,
    events: Arc<EventDispatcher>,
}

impl ClientTracker {
    pub fn new(timeout: Duration, events: Arc<EventDispatcher>) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            timeout,
            events,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a request from `address`. Returns true for a new client.
    pub fn touch(&self, address: &str) -> bool {
        self.touch_at(address, Instant::now())
    }

    pub fn touch_at(&self, address: &str, now: Instant) -> bool {
        let mut is_new = false;
        self.clients
            .entry(address.to_string())
            .and_modify(|client| client.refresh(now))
            .or_insert_with(|| {
                is_new = true;
                ClientSession::new(address, now)
            });

        // Entry guard is released; listeners may call back into the tracker
        if is_new {
            self.events.client_connected(address);
        }
        is_new
    }

    pub fn record_served(&self, address: &str) {
        if let Some(mut client) = self.clients.get_mut(address) {
            client.segments_served += 1;
        }
    }

    pub fn record_missed(&self, address: &str) {
        if let Some(mut client) = self.clients.get_mut(address) {
            client.segments_missed += 1;
        }
    }

    pub fn get(&self, address: &str) -> Option<ClientSession> {
        self.clients.get(address).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<ClientSession> {
        let mut clients: Vec<ClientSession> = self
            .clients
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        clients.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        clients
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Remove clients idle for longer than the timeout.
    ///
    /// Each removed client gets exactly one disconnect notification.
    pub fn sweep_expired(&self) -> Vec<String> {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        self.clients.retain(|address, client| {
            let idle = now.saturating_duration_since(client.last_activity);
            if idle > self.timeout {
                tracing::debug!(
                    client = %address,
                    idle_secs = idle.as_secs(),
                    served = client.segments_served,
                    "Client timed out"
                );
                expired.push(address.clone());
                false
            } else {
                true
            }
        });

        for address in &expired {
            self.events.client_disconnected(address);
        }
        expired
    }

    /// Drop every client, notifying each once.
    pub fn disconnect_all(&self) -> usize {
        let addresses: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        let mut removed = 0;
        for address in addresses {
            if self.clients.remove(&address).is_some() {
                self.events.client_disconnected(&address);
                removed += 1;
            }
        }
        removed
    }
}

/// Start a background task that periodically sweeps idle clients.
pub fn start_sweep_task(tracker: ClientTracker, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            tracker.sweep_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::RecordingListener;

    fn tracker(timeout: Duration) -> (ClientTracker, Arc<RecordingListener>) {
        let events = Arc::new(EventDispatcher::new());
        let listener = Arc::new(RecordingListener::default());
        events.subscribe(listener.clone());
        (ClientTracker::new(timeout, events), listener)
    }

    #[test]
    fn test_touch_connects_once() {
        let (tracker, listener) = tracker(Duration::from_secs(30));
        assert!(tracker.touch("10.0.0.5"));
        assert!(!tracker.touch("10.0.0.5"));
        assert!(tracker.touch("10.0.0.6"));

        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.get("10.0.0.5").unwrap().requests, 2);
        assert_eq!(listener.count("connected"), 2);
    }

    #[test]
    fn test_counters() {
        let (tracker, _) = tracker(Duration::from_secs(30));
        tracker.touch("10.0.0.5");
        tracker.record_served("10.0.0.5");
        tracker.record_served("10.0.0.5");
        tracker.record_missed("10.0.0.5");
        tracker.record_served("unknown");

        let client = tracker.get("10.0.0.5").unwrap();
        assert_eq!(client.segments_served, 2);
        assert_eq!(client.segments_missed, 1);
        assert!(tracker.get("unknown").is_none());
    }

    #[test]
    fn test_inactive_client_disconnects_exactly_once() {
        let (tracker, listener) = tracker(Duration::from_secs(30));
        let start = Instant::now();
        tracker.touch_at("10.0.0.5", start);
        tracker.touch_at("10.0.0.6", start + Duration::from_secs(20));

        assert!(tracker
            .sweep_expired_at(start + Duration::from_secs(29))
            .is_empty());

        let expired = tracker.sweep_expired_at(start + Duration::from_secs(31));
        assert_eq!(expired, vec!["10.0.0.5".to_string()]);
        assert!(tracker
            .sweep_expired_at(start + Duration::from_secs(32))
            .is_empty());

        assert_eq!(listener.count("disconnected 10.0.0.5"), 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_activity_refreshes_timeout() {
        let (tracker, listener) = tracker(Duration::from_secs(30));
        let start = Instant::now();
        tracker.touch_at("10.0.0.5", start);
        tracker.touch_at("10.0.0.5", start + Duration::from_secs(25));

        assert!(tracker
            .sweep_expired_at(start + Duration::from_secs(40))
            .is_empty());
        assert_eq!(listener.count("disconnected"), 0);
    }

    #[test]
    fn test_reconnect_after_timeout_is_new_client() {
        let (tracker, listener) = tracker(Duration::from_secs(1));
        let start = Instant::now();
        tracker.touch_at("10.0.0.5", start);
        tracker.sweep_expired_at(start + Duration::from_secs(5));
        assert!(tracker.touch_at("10.0.0.5", start + Duration::from_secs(6)));
        assert_eq!(listener.count("connected 10.0.0.5"), 2);
    }

    #[test]
    fn test_disconnect_all() {
        let (tracker, listener) = tracker(Duration::from_secs(30));
        tracker.touch("a");
        tracker.touch("b");
        assert_eq!(tracker.disconnect_all(), 2);
        assert!(tracker.is_empty());
        assert_eq!(listener.count("disconnected"), 2);
    }

    #[tokio::test]
    async fn test_sweep_task() {
        let (tracker, listener) = tracker(Duration::from_millis(50));
        tracker.touch("10.0.0.5");

        let handle = start_sweep_task(tracker.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(tracker.is_empty());
        assert_eq!(listener.count("disconnected"), 1);
        handle.abort();
    }
}
