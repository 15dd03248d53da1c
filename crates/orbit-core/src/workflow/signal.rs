use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;

/// Buffered, named signal queues for one run.
///
/// Signals delivered before the workflow awaits them are buffered; waiters
/// are woken in delivery order. The engine side pushes, workflow code pops.
#[derive(Default)]
pub struct SignalHub {
    queues: Mutex<HashMap<String, VecDeque<serde_json::Value>>>,
    notify: Notify,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&self, name: &str, payload: serde_json::Value) {
        self.queues
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(payload);
        self.notify.notify_waiters();
    }

    pub fn try_take(&self, name: &str) -> Option<serde_json::Value> {
        self.queues
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(|q| q.pop_front())
    }

    /// Wait until a signal with this name is available, then take it.
    pub async fn wait(&self, name: &str) -> serde_json::Value {
        loop {
            let notified = self.notify.notified();
            if let Some(payload) = self.try_take(name) {
                return payload;
            }
            notified.await;
        }
    }

    pub fn buffered(&self, name: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(name)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn buffered_signal_is_taken_immediately() {
        let hub = SignalHub::new();
        hub.deliver("user_choice", serde_json::json!("node-20"));
        assert_eq!(hub.buffered("user_choice"), 1);

        let payload = hub.wait("user_choice").await;
        assert_eq!(payload, serde_json::json!("node-20"));
        assert_eq!(hub.buffered("user_choice"), 0);
    }

    #[tokio::test]
    async fn waiter_wakes_on_delivery() {
        let hub = Arc::new(SignalHub::new());
        let waiter = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.wait("approve").await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        hub.deliver("approve", serde_json::json!({"ok": true}));

        let payload = waiter.await.unwrap();
        assert_eq!(payload, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let hub = SignalHub::new();
        hub.deliver("a", serde_json::json!(1));
        assert!(hub.try_take("b").is_none());
        assert!(hub.try_take("a").is_some());
    }
}
