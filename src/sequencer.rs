//! Benchmark sequencer: one upload run, started once connectivity is up.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::BenchmarkConfig;
use crate::gate::ConnectivityGate;
use crate::zperf::report::{bytes_sent, throughput_kbps};
use crate::zperf::{EngineError, SessionOutcome, UploadEngine, UploadParams, UploadSession};

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("invalid IPv4 address {addr:?} (port {port})")]
    InvalidAddressConfig { addr: String, port: u16 },

    #[error("failed to start throughput test: {0}")]
    BenchmarkStartFailure(#[from] EngineError),
}

/// Parse the configured peer into an IPv4 endpoint.
///
/// Only the strict dotted-quad form is accepted, and port 0 is rejected.
pub fn parse_peer_address(addr: &str, port: u16) -> Result<SocketAddrV4, SequencerError> {
    let invalid = || SequencerError::InvalidAddressConfig {
        addr: addr.to_string(),
        port,
    };
    let ip: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
    if port == 0 {
        return Err(invalid());
    }
    Ok(SocketAddrV4::new(ip, port))
}

/// Runs exactly one upload benchmark after the gate releases. [`run`]
/// consumes the sequencer, so a second run cannot be started.
///
/// [`run`]: BenchmarkSequencer::run
pub struct BenchmarkSequencer<E> {
    gate: ConnectivityGate,
    engine: E,
    config: BenchmarkConfig,
}

impl<E: UploadEngine> BenchmarkSequencer<E> {
    pub fn new(gate: ConnectivityGate, engine: E, config: BenchmarkConfig) -> Self {
        Self {
            gate,
            engine,
            config,
        }
    }

    /// Build upload parameters from the configuration.
    pub fn build_params(&self) -> Result<UploadParams, SequencerError> {
        let peer = parse_peer_address(&self.config.peer_ipv4, self.config.peer_port)?;
        Ok(UploadParams {
            packet_size: self.config.packet_size,
            rate_kbps: self.config.rate_kbps,
            duration: Duration::from_millis(self.config.duration_ms),
            peer,
        })
    }

    /// Wait for connectivity, then start the upload.
    ///
    /// Returns as soon as the engine has accepted the session; the outcome
    /// is reported asynchronously through [`on_outcome`].
    pub async fn run(self) -> Result<RunningBenchmark, SequencerError> {
        info!("waiting to connect to the network");
        self.gate.wait_for_connection().await;

        let params = match self.build_params() {
            Ok(p) => p,
            Err(e) => {
                error!(addr = %self.config.peer_ipv4, error = %e, "invalid peer address");
                return Err(e);
            }
        };
        info!(peer = %params.peer, "IPv4 address");

        info!("starting throughput test: zperf client");
        let session = self.engine.start_upload_async(params).map_err(|e| {
            error!(error = %e, "failed to start throughput test");
            SequencerError::BenchmarkStartFailure(e)
        })?;

        Ok(RunningBenchmark::spawn(session))
    }
}

/// Handle to the reporting task of a started benchmark.
#[derive(Debug)]
pub struct RunningBenchmark {
    pub session_id: Uuid,
    reporter: JoinHandle<Option<SessionOutcome>>,
}

impl RunningBenchmark {
    fn spawn(mut session: UploadSession) -> Self {
        let session_id = session.id;
        let span = info_span!("session", id = %session_id);
        let reporter = tokio::spawn(
            async move {
                while let Some(outcome) = session.outcomes.recv().await {
                    on_outcome(&outcome);
                    if outcome.is_terminal() {
                        return Some(outcome);
                    }
                }
                None
            }
            .instrument(span),
        );
        Self {
            session_id,
            reporter,
        }
    }

    /// Wait for the terminal outcome. `None` if the session ended without one.
    pub async fn finished(self) -> Option<SessionOutcome> {
        let outcome = self.reporter.await.ok().flatten();
        if outcome.is_none() {
            debug!(session_id = %self.session_id, "session ended without a terminal outcome");
        }
        outcome
    }
}

/// Report one session notification.
pub fn on_outcome(outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::Started => info!("new UDP session started"),
        SessionOutcome::Finished(results) => {
            info!("throughput test: upload completed");
            info!(
                bytes = bytes_sent(results),
                elapsed_ms = results.elapsed_time_us / 1000,
                "upload results: {} bytes in {} ms",
                bytes_sent(results),
                results.elapsed_time_us / 1000
            );
            info!("{} packets sent", results.packets_sent);
            info!("{} packets lost", results.packets_lost);
            info!("{} packets received", results.packets_received);
            info!("{} kbps throughput", throughput_kbps(results));
        }
        SessionOutcome::Error(reason) => error!(%reason, "UDP session error"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
