//! Connectivity gate: a startup barrier released by network events.
//!
//! The gate tracks whether the host is connected and holds a one-slot
//! signal. A Connected event sets the signal, every Disconnected event clears
//! it, and [`ConnectivityGate::wait_for_connection`] suspends until the signal
//! is set and then consumes it. The connectivity flag and the signal share one
//! lock, so a waiter that observes the signal also observes the state write
//! that released it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::info;

use crate::indicator::StatusIndicator;
use crate::netmgmt::{ConnectivityEvent, EventMask, NetworkNotifier, SubscriptionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    Connected,
}

struct GateState {
    connectivity: ConnectivityState,
    /// Binary signal, never a count.
    released: bool,
}

struct GateInner {
    state: Mutex<GateState>,
    notify: Notify,
    indicator: Arc<dyn StatusIndicator>,
}

/// Shared handle to the gate. Clones refer to the same state.
#[derive(Clone)]
pub struct ConnectivityGate {
    inner: Arc<GateInner>,
}

impl ConnectivityGate {
    /// Create a gate in the Disconnected state with the signal unset.
    pub fn new(indicator: Arc<dyn StatusIndicator>) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState {
                    connectivity: ConnectivityState::Disconnected,
                    released: false,
                }),
                notify: Notify::new(),
                indicator,
            }),
        }
    }

    /// Subscribe this gate to the L4 connected / disconnected events.
    pub fn register(&self, notifier: &NetworkNotifier) -> SubscriptionId {
        let gate = self.clone();
        notifier.subscribe(EventMask::L4, move |event| {
            if let Some(event) = event.connectivity() {
                gate.on_network_event(event);
            }
        })
    }

    /// React to a connectivity change.
    pub fn on_network_event(&self, event: ConnectivityEvent) {
        let previous = {
            let mut state = self.lock();
            let previous = state.connectivity;
            match event {
                ConnectivityEvent::Connected => {
                    state.connectivity = ConnectivityState::Connected;
                    state.released = true;
                }
                ConnectivityEvent::Disconnected => {
                    state.connectivity = ConnectivityState::Disconnected;
                    // Re-armed even when the link was never up.
                    state.released = false;
                }
            }
            previous
        };

        // The indicator may block on I/O, so it runs with the lock released.
        match (event, previous) {
            (ConnectivityEvent::Connected, _) => {
                self.inner.indicator.set(true);
                self.inner.notify.notify_one();
                info!("network connected");
            }
            (ConnectivityEvent::Disconnected, ConnectivityState::Disconnected) => {
                info!("waiting for network to be connected");
            }
            (ConnectivityEvent::Disconnected, ConnectivityState::Connected) => {
                self.inner.indicator.set(false);
                info!("network disconnected");
            }
        }
    }

    /// Suspend until the gate is released, then consume the release.
    ///
    /// There is no timeout. A single waiter is assumed.
    pub async fn wait_for_connection(&self) {
        loop {
            if self.take_release() {
                return;
            }
            // `notify_one` stores a permit when nobody is waiting yet, so a
            // release between `take_release` and here is not lost. A stale
            // permit from a later-cleared release only causes one extra loop.
            self.inner.notify.notified().await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connectivity == ConnectivityState::Connected
    }

    /// Whether the signal is currently set (a wait would return immediately).
    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    fn take_release(&self) -> bool {
        std::mem::replace(&mut self.lock().released, false)
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
