//! In-flight request de-duplication.
//!
//! Maps a canonical request key to the exchange currently running for it.
//! The first caller for a key leads and runs the exchange; everyone else
//! joins and observes the same settlement. The entry is dropped before
//! waiters are woken, so a call issued after settlement starts fresh.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::client::ApiResponse;

/// Outcome of asking the registry about a key.
pub(crate) enum Flight {
    /// This caller leads: run the exchange, then complete the lease.
    Lead(FlightLease),
    /// Same key already pending: await the leader's settlement.
    Join(broadcast::Receiver<ApiResponse>),
}

#[derive(Clone, Default)]
pub(crate) struct InflightRegistry {
    pending: Arc<Mutex<HashMap<String, broadcast::Sender<ApiResponse>>>>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the pending flight for `key`, or become its leader.
    pub fn begin(&self, key: &str) -> Flight {
        let mut pending = self.lock();
        if let Some(tx) = pending.get(key) {
            return Flight::Join(tx.subscribe());
        }
        let (tx, _) = broadcast::channel(1);
        pending.insert(key.to_string(), tx.clone());
        Flight::Lead(FlightLease {
            key: key.to_string(),
            tx,
            registry: self.clone(),
            done: false,
        })
    }

    /// Number of keys currently in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<ApiResponse>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Held by the leading call. Completing it publishes the settlement to
/// all joined callers; dropping it without completing (leader cancelled
/// or panicked) wakes them with a closed channel so one can take over.
pub(crate) struct FlightLease {
    key: String,
    tx: broadcast::Sender<ApiResponse>,
    registry: InflightRegistry,
    done: bool,
}

impl FlightLease {
    /// Publish the settlement. The key leaves the registry before any
    /// waiter observes the result.
    pub fn complete(mut self, response: &ApiResponse) {
        self.unregister();
        let _ = self.tx.send(response.clone());
    }

    fn unregister(&mut self) {
        if !self.done {
            self.done = true;
            self.registry.lock().remove(&self.key);
        }
    }
}

impl Drop for FlightLease {
    fn drop(&mut self) {
        self.unregister();
    }
}
