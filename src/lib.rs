//! linkbench -- connectivity-gated UDP upload benchmark.
//!
//! Waits until the host has network-layer connectivity, then runs a single
//! iperf2-compatible UDP upload against a configured peer and reports the
//! achieved throughput.

pub mod config;
pub mod gate;
pub mod indicator;
pub mod netmgmt;
pub mod sequencer;
pub mod zperf;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::AppConfig;
use crate::gate::ConnectivityGate;
use crate::indicator::{LogIndicator, StatusIndicator, SysfsLed};
use crate::netmgmt::monitor::{LinkMonitor, RouteProbe};
use crate::netmgmt::{EventMask, NetworkEvent, NetworkNotifier};
use crate::sequencer::BenchmarkSequencer;
use crate::zperf::{SessionOutcome, UdpUploadEngine, UploadResults};

/// Run the full sequence: wait for connectivity, run one upload, wait for it
/// to end.
///
/// Startup errors (bad configuration, engine refusing to start) are returned.
/// A session that fails after starting is only logged and yields `Ok(None)`.
pub async fn run(config: AppConfig) -> Result<Option<UploadResults>> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        arch = std::env::consts::ARCH,
        os = std::env::consts::OS,
        cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        "starting linkbench"
    );

    let probe_target = config.monitor.probe_target()?;

    tokio::time::sleep(Duration::from_millis(config.benchmark.startup_delay_ms)).await;

    let indicator: Arc<dyn StatusIndicator> = match &config.indicator.led {
        Some(name) => Arc::new(SysfsLed::new(name)),
        None => Arc::new(LogIndicator),
    };

    let notifier = NetworkNotifier::new();
    let gate = ConnectivityGate::new(indicator);
    gate.register(&notifier);
    notifier.subscribe(EventMask::ADDR, |event| match event {
        NetworkEvent::AddrAdded(addr) => tracing::info!(%addr, "IPv4 address added"),
        NetworkEvent::AddrRemoved(addr) => tracing::info!(%addr, "IPv4 address removed"),
        _ => {}
    });

    let monitor = LinkMonitor::new(
        RouteProbe::new(probe_target),
        notifier.clone(),
        Duration::from_millis(config.monitor.poll_interval_ms.max(1)),
    );
    let monitor_task = tokio::spawn(monitor.run());

    let sequencer = BenchmarkSequencer::new(gate, UdpUploadEngine::new(), config.benchmark);
    let started = sequencer.run().await;
    let outcome = match started {
        Ok(running) => running.finished().await,
        Err(e) => {
            monitor_task.abort();
            return Err(e.into());
        }
    };
    monitor_task.abort();

    Ok(match outcome {
        Some(SessionOutcome::Finished(results)) => Some(results),
        _ => None,
    })
}
