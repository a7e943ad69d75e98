//! Link monitor: turns periodic reachability probes into network events.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use super::{NetworkEvent, NetworkNotifier};

/// Answers "can this host currently send IPv4 traffic, and from which address?"
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Returns the local source address when a route exists, `None` otherwise.
    async fn probe(&self) -> Option<Ipv4Addr>;
}

/// Probe that asks the kernel for a route by connecting an unbound UDP socket.
///
/// `connect` on a datagram socket only performs route selection, so no
/// packet leaves the host.
pub struct RouteProbe {
    target: SocketAddrV4,
}

impl RouteProbe {
    pub fn new(target: SocketAddrV4) -> Self {
        Self { target }
    }
}

#[async_trait]
impl ConnectivityProbe for RouteProbe {
    async fn probe(&self) -> Option<Ipv4Addr> {
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, "route probe: bind failed");
                return None;
            }
        };
        if let Err(e) = socket.connect(self.target).await {
            debug!(target = %self.target, error = %e, "route probe: no route");
            return None;
        }
        match socket.local_addr() {
            Ok(SocketAddr::V4(local)) if !local.ip().is_unspecified() => Some(*local.ip()),
            Ok(other) => {
                debug!(local = %other, "route probe: no usable IPv4 source address");
                None
            }
            Err(e) => {
                debug!(error = %e, "route probe: local_addr failed");
                None
            }
        }
    }
}

/// Publishes L4 and address events whenever the probe result changes.
pub struct LinkMonitor<P> {
    probe: P,
    notifier: NetworkNotifier,
    interval: Duration,
    /// `None` until the first probe completes.
    last: Option<Option<Ipv4Addr>>,
}

impl<P: ConnectivityProbe> LinkMonitor<P> {
    pub fn new(probe: P, notifier: NetworkNotifier, interval: Duration) -> Self {
        Self {
            probe,
            notifier,
            interval,
            last: None,
        }
    }

    /// Probe forever at the configured interval.
    pub async fn run(mut self) {
        info!(interval_ms = self.interval.as_millis() as u64, "link monitor started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// Run one probe and publish the resulting events.
    ///
    /// The first result is always published, so subscribers learn about an
    /// initially disconnected link. Later results publish only transitions.
    pub async fn poll_once(&mut self) {
        let current = self.probe.probe().await;
        let previous = self.last.replace(current);

        for event in transition_events(previous, current) {
            debug!(?event, "link state change");
            self.notifier.notify(event);
        }
    }
}

fn transition_events(previous: Option<Option<Ipv4Addr>>, current: Option<Ipv4Addr>) -> Vec<NetworkEvent> {
    match (previous, current) {
        (None, None) => vec![NetworkEvent::L4Disconnected],
        (None | Some(None), Some(addr)) => {
            vec![NetworkEvent::AddrAdded(addr), NetworkEvent::L4Connected]
        }
        (Some(None), None) => Vec::new(),
        (Some(Some(old)), None) => {
            vec![NetworkEvent::AddrRemoved(old), NetworkEvent::L4Disconnected]
        }
        (Some(Some(old)), Some(new)) if old != new => {
            vec![NetworkEvent::AddrRemoved(old), NetworkEvent::AddrAdded(new)]
        }
        (Some(Some(_)), Some(_)) => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
