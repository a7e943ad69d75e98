//! UDP upload client engine.
//!
//! Sends paced datagrams to an iperf2 UDP server for the configured
//! duration, then performs the end-of-test handshake and turns the server
//! report into [`UploadResults`].

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::wire::{self, ClientHeader, DatagramHeader, ServerReport};
use super::{EngineError, SessionOutcome, UploadEngine, UploadParams, UploadResults, UploadSession};

/// End-of-test datagrams sent before giving up on the server report.
const FIN_ATTEMPTS: u32 = 10;

/// How long to wait for the server report after each end-of-test datagram.
const FIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
enum UploadFailure {
    #[error("send failed after {packets_sent} packets: {source}")]
    Send {
        packets_sent: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("no server report after {attempts} end-of-test datagrams")]
    NoServerReport { attempts: u32 },
}

// ---------------------------------------------------------------------------
// UdpUploadEngine
// ---------------------------------------------------------------------------

/// UDP upload engine. Runs at most one session at a time.
pub struct UdpUploadEngine {
    in_progress: Arc<AtomicBool>,
    fin_attempts: u32,
    fin_timeout: Duration,
}

impl Default for UdpUploadEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl UdpUploadEngine {
    pub fn new() -> Self {
        Self {
            in_progress: Arc::new(AtomicBool::new(false)),
            fin_attempts: FIN_ATTEMPTS,
            fin_timeout: FIN_TIMEOUT,
        }
    }

    /// Override the end-of-test retransmission policy.
    pub fn with_fin_policy(mut self, attempts: u32, timeout: Duration) -> Self {
        self.fin_attempts = attempts.max(1);
        self.fin_timeout = timeout;
        self
    }

    pub fn is_busy(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    fn open_socket(peer: SocketAddrV4) -> Result<UdpSocket, EngineError> {
        let socket_err = |source| EngineError::Socket { peer, source };

        let std_socket = std::net::UdpSocket::bind("0.0.0.0:0").map_err(socket_err)?;
        std_socket.connect(SocketAddr::V4(peer)).map_err(socket_err)?;
        std_socket.set_nonblocking(true).map_err(socket_err)?;
        UdpSocket::from_std(std_socket).map_err(socket_err)
    }
}

/// Clears the in-progress flag when the session task ends.
struct InProgressGuard(Arc<AtomicBool>);

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl UploadEngine for UdpUploadEngine {
    /// Must be called from within a tokio runtime.
    fn start_upload_async(&self, params: UploadParams) -> Result<UploadSession, EngineError> {
        params.validate()?;

        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::Busy);
        }
        let guard = InProgressGuard(self.in_progress.clone());

        let socket = Self::open_socket(params.peer)?;

        let id = Uuid::new_v4();
        let (tx, outcomes) = mpsc::unbounded_channel();
        let fin = (self.fin_attempts, self.fin_timeout);

        info!(
            session_id = %id,
            peer = %params.peer,
            packet_size = params.packet_size,
            rate_kbps = params.rate_kbps,
            duration_ms = params.duration.as_millis() as u64,
            "starting UDP upload session"
        );

        tokio::spawn(async move {
            let _guard = guard;
            // A dropped receiver only means nobody is listening any more.
            let _ = tx.send(SessionOutcome::Started);

            let outcome = match upload(&socket, &params, fin).await {
                Ok(results) => {
                    info!(
                        session_id = %id,
                        packets_sent = results.packets_sent,
                        packets_received = results.packets_received,
                        "UDP upload session finished"
                    );
                    SessionOutcome::Finished(results)
                }
                Err(e) => {
                    warn!(session_id = %id, error = %e, "UDP upload session failed");
                    SessionOutcome::Error(e.to_string())
                }
            };
            let _ = tx.send(outcome);
        });

        Ok(UploadSession { id, outcomes })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

async fn upload(
    socket: &UdpSocket,
    params: &UploadParams,
    (fin_attempts, fin_timeout): (u32, Duration),
) -> Result<UploadResults, UploadFailure> {
    let packet_size = params.packet_size as usize;
    let client_header = ClientHeader::for_upload(
        params.packet_size,
        params.rate_kbps,
        params.duration.as_millis() as u64,
    );

    let mut ticker = tokio::time::interval(params.packet_interval());
    // Sub-millisecond intervals rely on bursts to hold the average rate.
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);

    let mut buf = BytesMut::with_capacity(packet_size);
    let mut packets_sent: u32 = 0;
    let start = tokio::time::Instant::now();

    loop {
        ticker.tick().await;

        let header = DatagramHeader::now(packets_sent.min(i32::MAX as u32) as i32);
        wire::encode_data(&mut buf, &header, &client_header, packet_size);
        socket
            .send(&buf)
            .await
            .map_err(|source| UploadFailure::Send {
                packets_sent,
                source,
            })?;
        packets_sent = packets_sent.saturating_add(1);

        if start.elapsed() >= params.duration {
            break;
        }
    }
    let elapsed_time_us = start.elapsed().as_micros() as u64;
    debug!(packets_sent, elapsed_time_us, "upload phase complete");

    let report = finish(socket, packets_sent, packet_size, fin_attempts, fin_timeout).await?;

    Ok(UploadResults {
        packets_sent,
        packets_lost: report.error_cnt,
        packets_received: report.datagrams,
        packet_size: params.packet_size,
        elapsed_time_us,
        out_of_order: report.outorder_cnt,
        jitter_us: report.jitter_us(),
        server_time_us: report.server_time_us(),
        server_bytes: report.total_len,
    })
}

/// End-of-test handshake: repeat the negated-id datagram until the server
/// answers with its report.
async fn finish(
    socket: &UdpSocket,
    packets_sent: u32,
    packet_size: usize,
    attempts: u32,
    timeout: Duration,
) -> Result<ServerReport, UploadFailure> {
    let mut out = BytesMut::with_capacity(packet_size);
    let mut reply = vec![0u8; packet_size.max(wire::DATAGRAM_HEADER_LEN + wire::SERVER_REPORT_LEN)];

    for attempt in 1..=attempts {
        wire::encode_fin(&mut out, packets_sent, packet_size);
        if let Err(e) = socket.send(&out).await {
            debug!(attempt, error = %e, "end-of-test send failed");
            continue;
        }

        match tokio::time::timeout(timeout, socket.recv(&mut reply)).await {
            Ok(Ok(len)) => match ServerReport::decode(&reply[..len]) {
                Ok(report) => return Ok(report),
                // Late data echoes or garbage; try again.
                Err(e) => debug!(attempt, error = %e, "ignoring non-report datagram"),
            },
            Ok(Err(e)) => debug!(attempt, error = %e, "end-of-test receive failed"),
            Err(_) => debug!(attempt, "server report not received yet"),
        }
    }

    Err(UploadFailure::NoServerReport { attempts })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
