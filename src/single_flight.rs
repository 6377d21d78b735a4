//! At most one in-flight execution per flow.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Error;
use crate::types::HubId;

/// Flows that must not run concurrently with themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum FlowKey {
    #[display("enter PubHubs")]
    EnterPubHubs,
    #[display("enter hub {_0}")]
    EnterHub(HubId),
}

/// Set of flows currently running.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    running: Arc<Mutex<HashSet<FlowKey>>>,
}

impl SingleFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as running until the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FlowInProgress`] if `key` is already running.
    pub fn acquire(&self, key: FlowKey) -> Result<FlightGuard, Error> {
        if !self.lock().insert(key.clone()) {
            tracing::warn!(flow = %key, "Flow already in progress");
            return Err(Error::FlowInProgress(key));
        }
        Ok(FlightGuard {
            running: Arc::clone(&self.running),
            key,
        })
    }

    #[must_use]
    pub fn is_running(&self, key: &FlowKey) -> bool {
        self.lock().contains(key)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<FlowKey>> {
        // The set stays consistent even if a holder panicked.
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases its flow on drop, including when the flow's future is dropped.
#[derive(Debug)]
pub struct FlightGuard {
    running: Arc<Mutex<HashSet<FlowKey>>>,
    key: FlowKey,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub(id: &str) -> FlowKey {
        FlowKey::EnterHub(HubId::from(id.to_string()))
    }

    #[test]
    fn second_acquire_is_rejected() {
        let flights = SingleFlight::new();
        let _guard = flights.acquire(FlowKey::EnterPubHubs).unwrap();

        let err = flights.acquire(FlowKey::EnterPubHubs).unwrap_err();
        assert!(matches!(err, Error::FlowInProgress(FlowKey::EnterPubHubs)));
    }

    #[test]
    fn keys_are_independent() {
        let flights = SingleFlight::new();
        let _a = flights.acquire(hub("hub1")).unwrap();
        let _b = flights.acquire(hub("hub2")).unwrap();
        let _c = flights.acquire(FlowKey::EnterPubHubs).unwrap();
        assert!(flights.acquire(hub("hub1")).is_err());
    }

    #[test]
    fn dropping_the_guard_releases() {
        let flights = SingleFlight::new();
        let guard = flights.acquire(hub("hub1")).unwrap();
        assert!(flights.is_running(&hub("hub1")));
        drop(guard);
        assert!(!flights.is_running(&hub("hub1")));
        assert!(flights.acquire(hub("hub1")).is_ok());
    }

    #[test]
    fn display() {
        assert_eq!(FlowKey::EnterPubHubs.to_string(), "enter PubHubs");
        assert_eq!(hub("hub1").to_string(), "enter hub hub1");
    }
}
