//! Paced, de-duplicated view-event registration.
//!
//! Serializes "record a view" calls so bursts from scrolling never fan
//! out: one consumer, one call in flight at a time, a fixed pause after
//! each item. A `(kind, id)` pair is registered at most once per session.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::ApiClient;
use crate::config::ViewQueueConfig;

/// One pending view registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewItem {
    pub entity_kind: String,
    pub entity_id: String,
}

impl ViewItem {
    fn seen_key(&self) -> String {
        format!("{}-{}", self.entity_kind, self.entity_id)
    }
}

/// Fire-and-forget queue for view events.
///
/// Items are processed strictly in order by a single consumer task;
/// individual failures are dropped (best-effort telemetry) and never
/// halt the queue.
pub struct ViewQueue {
    tx: mpsc::UnboundedSender<ViewItem>,
    seen: Arc<Mutex<HashSet<String>>>,
    consumer: JoinHandle<()>,
}

impl ViewQueue {
    /// Start the queue. The consumer drains items one at a time through
    /// `client`, sleeping `config.pace` after each call.
    pub fn new(client: ApiClient, config: ViewQueueConfig) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ViewItem>();

        let consumer = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let key = item.seen_key();
                let body = json!({
                    "entity_id": item.entity_id,
                    "entity_kind": item.entity_kind,
                });
                let response = client.post_json(&config.endpoint, body).await;
                if !response.ok {
                    debug!("view registration for {} failed: {:?}", key, response.error);
                }
                tokio::time::sleep(config.pace).await;
            }
        });

        Self {
            tx,
            seen: Arc::new(Mutex::new(HashSet::new())),
            consumer,
        }
    }

    /// Queue a view for `(kind, id)`. A pair already enqueued this
    /// session is a no-op until [`reset`](Self::reset). Returns whether
    /// the item was newly queued.
    pub fn enqueue(&self, entity_kind: &str, entity_id: &str) -> bool {
        let item = ViewItem {
            entity_kind: entity_kind.to_string(),
            entity_id: entity_id.to_string(),
        };

        if !self.seen().insert(item.seen_key()) {
            debug!("view for {} already recorded this session", item.seen_key());
            return false;
        }

        self.tx.send(item).is_ok()
    }

    /// Forget which entities were seen, e.g. when the surrounding page
    /// switches to a different list of items.
    pub fn reset(&self) {
        self.seen().clear();
    }

    /// Stop accepting items and wait for the consumer to drain.
    pub async fn shutdown(self) {
        let ViewQueue { tx, consumer, .. } = self;
        drop(tx);
        let _ = consumer.await;
    }

    fn seen(&self) -> MutexGuard<'_, HashSet<String>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}
