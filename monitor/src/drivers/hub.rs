use crate::fleet::{EndpointStatus, Snapshot, StatusPublisher};
use log::{debug, error};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

pub const REQUEST_UPDATE: &str = "request_update";

#[derive(Serialize)]
struct StatusEvent<'a> {
    event: &'static str,
    endpoints: &'a [EndpointStatus],
}

pub fn status_payload(snapshot: &Snapshot) -> Option<String> {
    let event = StatusEvent {
        event: "status_updated",
        endpoints: snapshot.as_slice(),
    };
    serde_json::to_string(&event)
        .inspect_err(|err| error!("can't serialize fleet status: {}", err))
        .ok()
}

/// Fans each published snapshot out to the websocket subscribers.
pub struct StatusHub {
    id: AtomicUsize,
    subscribers: scc::HashMap<usize, UnboundedSender<String>, ahash::RandomState>,
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHub {
    pub fn new() -> Self {
        Self {
            id: AtomicUsize::new(0),
            subscribers: scc::HashMap::default(),
        }
    }

    pub fn subscribe(&self) -> (usize, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let id = self.id.fetch_add(1, Ordering::Relaxed);
        let _ = self.subscribers.insert(id, tx);
        debug!("status subscriber {} added", id);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: usize) {
        if self.subscribers.remove(&id).is_some() {
            debug!("status subscriber {} removed", id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[async_trait::async_trait]
impl StatusPublisher for StatusHub {
    async fn publish_snapshot(&self, snapshot: Snapshot) {
        let Some(payload) = status_payload(&snapshot) else {
            return;
        };
        // drops subscribers whose connection is gone
        self.subscribers
            .retain_async(|_, tx| tx.send(payload.clone()).is_ok())
            .await;
    }
}
