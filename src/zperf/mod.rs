//! UDP upload benchmark engine speaking the iperf2 / zperf datagram format.
//!
//! An [`UploadEngine`] starts a session without blocking and hands back an
//! [`UploadSession`]. The session task pushes [`SessionOutcome`]s onto the
//! session's channel: `Started` first, then exactly one of `Finished` or
//! `Error`, after which the channel closes.

pub mod report;
pub mod udp_upload;
pub mod wire;

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use udp_upload::UdpUploadEngine;

/// Largest UDP payload over IPv4.
pub const MAX_PACKET_SIZE: u32 = 65_507;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("an upload session is already in progress")]
    Busy,

    #[error("invalid upload parameters: {reason}")]
    InvalidParams { reason: String },

    #[error("failed to open UDP socket towards {peer}: {source}")]
    Socket {
        peer: SocketAddrV4,
        #[source]
        source: std::io::Error,
    },
}

/// Parameters of one upload run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadParams {
    /// Datagram size in bytes, protocol headers included.
    pub packet_size: u32,
    /// Target rate in kilobits per second.
    pub rate_kbps: u32,
    pub duration: Duration,
    pub peer: SocketAddrV4,
}

impl UploadParams {
    pub fn validate(&self) -> Result<(), EngineError> {
        let min = wire::MIN_PACKET_SIZE as u32;
        if self.packet_size < min || self.packet_size > MAX_PACKET_SIZE {
            return Err(EngineError::InvalidParams {
                reason: format!(
                    "packet size {} outside {}..={}",
                    self.packet_size, min, MAX_PACKET_SIZE
                ),
            });
        }
        if self.rate_kbps == 0 {
            return Err(EngineError::InvalidParams {
                reason: "rate must be positive".to_string(),
            });
        }
        if self.duration.is_zero() {
            return Err(EngineError::InvalidParams {
                reason: "duration must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Time budget of one datagram at the target rate.
    pub fn packet_interval(&self) -> Duration {
        let micros = u64::from(self.packet_size) * 8 * 1_000_000
            / (u64::from(self.rate_kbps) * 1024);
        Duration::from_micros(micros.max(1))
    }
}

/// Measurements of a finished upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadResults {
    pub packets_sent: u32,
    pub packets_lost: u32,
    pub packets_received: u32,
    pub packet_size: u32,
    /// Client-side send time, first datagram to last.
    pub elapsed_time_us: u64,
    pub out_of_order: u32,
    pub jitter_us: u64,
    /// Receive time as measured by the server.
    pub server_time_us: u64,
    pub server_bytes: u64,
}

/// Lifecycle notification of an upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Started,
    Finished(UploadResults),
    Error(String),
}

impl SessionOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionOutcome::Started)
    }
}

/// Handle to a running session.
#[derive(Debug)]
pub struct UploadSession {
    pub id: Uuid,
    pub outcomes: mpsc::UnboundedReceiver<SessionOutcome>,
}

/// A throughput engine able to run one upload at a time.
pub trait UploadEngine: Send + Sync {
    /// Start an upload without waiting for it to complete.
    fn start_upload_async(&self, params: UploadParams) -> Result<UploadSession, EngineError>;
}

impl<E: UploadEngine + ?Sized> UploadEngine for Arc<E> {
    fn start_upload_async(&self, params: UploadParams) -> Result<UploadSession, EngineError> {
        (**self).start_upload_async(params)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn params(packet_size: u32, rate_kbps: u32, duration_ms: u64) -> UploadParams {
        UploadParams {
            packet_size,
            rate_kbps,
            duration: Duration::from_millis(duration_ms),
            peer: SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 5), 5001),
        }
    }

    #[test]
    fn test_reference_params_are_valid() {
        let p = params(1024, 10_000, 20_000);
        assert!(p.validate().is_ok());
        // 1024 B * 8 bit at 10000 * 1024 bit/s.
        assert_eq!(p.packet_interval(), Duration::from_micros(800));
    }

    #[test]
    fn test_packet_size_bounds() {
        assert!(matches!(
            params(39, 1000, 1000).validate(),
            Err(EngineError::InvalidParams { .. })
        ));
        assert!(params(40, 1000, 1000).validate().is_ok());
        assert!(params(MAX_PACKET_SIZE, 1000, 1000).validate().is_ok());
        assert!(params(MAX_PACKET_SIZE + 1, 1000, 1000).validate().is_err());
    }

    #[test]
    fn test_zero_rate_or_duration_rejected() {
        assert!(params(1024, 0, 1000).validate().is_err());
        assert!(params(1024, 1000, 0).validate().is_err());
    }

    #[test]
    fn test_packet_interval_never_zero() {
        let p = params(40, u32::MAX, 1000);
        assert_eq!(p.packet_interval(), Duration::from_micros(1));
    }

    #[test]
    fn test_terminal_outcomes() {
        assert!(!SessionOutcome::Started.is_terminal());
        assert!(SessionOutcome::Finished(UploadResults::default()).is_terminal());
        assert!(SessionOutcome::Error("boom".into()).is_terminal());
    }
}
