//! Network management events and the subscription API that delivers them.
//!
//! The [`NetworkNotifier`] fans each [`NetworkEvent`] out to every subscriber
//! whose [`EventMask`] covers it. Handlers run synchronously on the context
//! that calls [`NetworkNotifier::notify`] (the [`monitor::LinkMonitor`] task in
//! the running binary), so they must be cheap and must not block.

pub mod monitor;

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A network-layer state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    /// The host has an address and a route: transport-layer traffic can flow.
    L4Connected,
    /// Transport-layer connectivity is gone (or was never there).
    L4Disconnected,
    /// A source address became usable.
    AddrAdded(Ipv4Addr),
    /// A previously usable source address went away.
    AddrRemoved(Ipv4Addr),
}

impl NetworkEvent {
    fn mask_bit(&self) -> u32 {
        match self {
            NetworkEvent::L4Connected => EventMask::L4_CONNECTED.0,
            NetworkEvent::L4Disconnected => EventMask::L4_DISCONNECTED.0,
            NetworkEvent::AddrAdded(_) => EventMask::ADDR_ADDED.0,
            NetworkEvent::AddrRemoved(_) => EventMask::ADDR_REMOVED.0,
        }
    }

    /// The connectivity view of this event, if it has one.
    pub fn connectivity(&self) -> Option<ConnectivityEvent> {
        match self {
            NetworkEvent::L4Connected => Some(ConnectivityEvent::Connected),
            NetworkEvent::L4Disconnected => Some(ConnectivityEvent::Disconnected),
            NetworkEvent::AddrAdded(_) | NetworkEvent::AddrRemoved(_) => None,
        }
    }
}

/// The two events the connectivity gate reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Connected,
    Disconnected,
}

/// Set of event kinds a subscriber is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask(u32);

impl EventMask {
    pub const L4_CONNECTED: Self = Self(1 << 0);
    pub const L4_DISCONNECTED: Self = Self(1 << 1);
    pub const ADDR_ADDED: Self = Self(1 << 2);
    pub const ADDR_REMOVED: Self = Self(1 << 3);

    /// Both L4 events.
    pub const L4: Self = Self(Self::L4_CONNECTED.0 | Self::L4_DISCONNECTED.0);
    /// Both address events.
    pub const ADDR: Self = Self(Self::ADDR_ADDED.0 | Self::ADDR_REMOVED.0);
    pub const ALL: Self = Self(Self::L4.0 | Self::ADDR.0);

    pub fn contains(&self, event: &NetworkEvent) -> bool {
        self.0 & event.mask_bit() != 0
    }
}

impl std::ops::BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Identifies a subscription for [`NetworkNotifier::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&NetworkEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    mask: EventMask,
    handler: Handler,
}

/// Delivers network events to masked subscribers. Cheap to clone.
#[derive(Clone, Default)]
pub struct NetworkNotifier {
    inner: Arc<NotifierInner>,
}

#[derive(Default)]
struct NotifierInner {
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl NetworkNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every event covered by `mask`.
    pub fn subscribe<F>(&self, mask: EventMask, handler: F) -> SubscriptionId
    where
        F: Fn(&NetworkEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id,
                mask,
                handler: Arc::new(handler),
            });
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Deliver `event` to every interested subscriber, in subscription order.
    pub fn notify(&self, event: NetworkEvent) {
        // Handlers are called outside the lock so they may (un)subscribe.
        let handlers: Vec<Handler> = self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.mask.contains(&event))
            .map(|s| s.handler.clone())
            .collect();

        trace!(?event, subscribers = handlers.len(), "dispatching network event");
        for handler in handlers {
            handler(&event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(notifier: &NetworkNotifier, mask: EventMask) -> (SubscriptionId, Arc<Mutex<Vec<NetworkEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = notifier.subscribe(mask, move |ev| sink.lock().unwrap().push(*ev));
        (id, seen)
    }

    #[test]
    fn test_mask_filters_events() {
        let notifier = NetworkNotifier::new();
        let (_, l4) = recorder(&notifier, EventMask::L4);
        let (_, addr) = recorder(&notifier, EventMask::ADDR);

        let ip = Ipv4Addr::new(192, 168, 1, 20);
        notifier.notify(NetworkEvent::AddrAdded(ip));
        notifier.notify(NetworkEvent::L4Connected);
        notifier.notify(NetworkEvent::L4Disconnected);

        assert_eq!(
            *l4.lock().unwrap(),
            vec![NetworkEvent::L4Connected, NetworkEvent::L4Disconnected]
        );
        assert_eq!(*addr.lock().unwrap(), vec![NetworkEvent::AddrAdded(ip)]);
    }

    #[test]
    fn test_single_bit_mask() {
        let notifier = NetworkNotifier::new();
        let (_, seen) = recorder(&notifier, EventMask::L4_CONNECTED);

        notifier.notify(NetworkEvent::L4Disconnected);
        notifier.notify(NetworkEvent::L4Connected);

        assert_eq!(*seen.lock().unwrap(), vec![NetworkEvent::L4Connected]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let notifier = NetworkNotifier::new();
        let (id, seen) = recorder(&notifier, EventMask::ALL);

        notifier.notify(NetworkEvent::L4Connected);
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.notify(NetworkEvent::L4Disconnected);

        assert_eq!(*seen.lock().unwrap(), vec![NetworkEvent::L4Connected]);
    }

    #[test]
    fn test_connectivity_view() {
        assert_eq!(
            NetworkEvent::L4Connected.connectivity(),
            Some(ConnectivityEvent::Connected)
        );
        assert_eq!(
            NetworkEvent::L4Disconnected.connectivity(),
            Some(ConnectivityEvent::Disconnected)
        );
        assert_eq!(
            NetworkEvent::AddrRemoved(Ipv4Addr::LOCALHOST).connectivity(),
            None
        );
    }

    #[test]
    fn test_mask_union() {
        let mask = EventMask::L4_CONNECTED | EventMask::ADDR_REMOVED;
        assert!(mask.contains(&NetworkEvent::L4Connected));
        assert!(mask.contains(&NetworkEvent::AddrRemoved(Ipv4Addr::LOCALHOST)));
        assert!(!mask.contains(&NetworkEvent::L4Disconnected));
        assert_eq!(EventMask::L4 | EventMask::ADDR, EventMask::ALL);
    }
}
