//! iperf2 UDP datagram layout, as used by zperf clients.
//!
//! Every datagram starts with a 16-byte header (`id`, `tv_sec`, `tv_usec`,
//! `id2`). Data datagrams carry the 24-byte client header (v1) right after
//! it and are padded to the packet size. The end of the test is signalled by
//! a datagram whose `id` is the negated packet count; the server answers with
//! the same header followed by a 40-byte report. All fields are big-endian.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

pub const DATAGRAM_HEADER_LEN: usize = 16;
pub const CLIENT_HEADER_LEN: usize = 24;
pub const SERVER_REPORT_LEN: usize = 40;

/// Smallest datagram that fits both headers.
pub const MIN_PACKET_SIZE: usize = DATAGRAM_HEADER_LEN + CLIENT_HEADER_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("server report answers id {id}, expected a negative end-of-test id")]
    NotAReport { id: i32 },
}

/// Per-datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    /// Sequence number; negative for the end-of-test datagram.
    pub id: i32,
    pub tv_sec: u32,
    pub tv_usec: u32,
}

impl DatagramHeader {
    /// Header stamped with the current wall-clock time.
    pub fn now(id: i32) -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            id,
            // Truncation matches the 32-bit wire field.
            tv_sec: since_epoch.as_secs() as u32,
            tv_usec: since_epoch.subsec_micros(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.id);
        buf.put_u32(self.tv_sec);
        buf.put_u32(self.tv_usec);
        // id2: upper half of 64-bit sequence numbers, unused by zperf.
        buf.put_u32(0);
    }

    pub fn decode(mut src: &[u8]) -> Result<Self, WireError> {
        ensure_len(src, DATAGRAM_HEADER_LEN)?;
        let id = src.get_i32();
        let tv_sec = src.get_u32();
        let tv_usec = src.get_u32();
        let _id2 = src.get_u32();
        Ok(Self { id, tv_sec, tv_usec })
    }
}

/// Client header (v1) announcing the test to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHeader {
    pub flags: i32,
    pub num_of_threads: i32,
    pub port: i32,
    pub buffer_len: i32,
    /// Target rate in bits per second.
    pub bandwidth: i32,
    /// Negative values give the test duration in units of 10 ms.
    pub num_of_bytes: i32,
}

impl ClientHeader {
    pub fn for_upload(packet_size: u32, rate_kbps: u32, duration_ms: u64) -> Self {
        let bandwidth = u64::from(rate_kbps) * 1000;
        Self {
            flags: 0,
            num_of_threads: 1,
            port: 0,
            buffer_len: (packet_size as usize).saturating_sub(MIN_PACKET_SIZE) as i32,
            bandwidth: bandwidth.min(i32::MAX as u64) as i32,
            num_of_bytes: -((duration_ms / 10).min(i32::MAX as u64) as i32),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.flags);
        buf.put_i32(self.num_of_threads);
        buf.put_i32(self.port);
        buf.put_i32(self.buffer_len);
        buf.put_i32(self.bandwidth);
        buf.put_i32(self.num_of_bytes);
    }
}

/// Statistics the server returns after the end-of-test datagram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerReport {
    pub flags: i32,
    pub total_len: u64,
    pub stop_sec: u32,
    pub stop_usec: u32,
    pub error_cnt: u32,
    pub outorder_cnt: u32,
    pub datagrams: u32,
    pub jitter_sec: u32,
    pub jitter_usec: u32,
}

impl ServerReport {
    pub fn server_time_us(&self) -> u64 {
        u64::from(self.stop_sec) * 1_000_000 + u64::from(self.stop_usec)
    }

    pub fn jitter_us(&self) -> u64 {
        u64::from(self.jitter_sec) * 1_000_000 + u64::from(self.jitter_usec)
    }

    /// Encode a full reply datagram: `header` followed by the report.
    pub fn encode(&self, header: &DatagramHeader, buf: &mut BytesMut) {
        header.encode(buf);
        buf.put_i32(self.flags);
        buf.put_u32((self.total_len >> 32) as u32);
        buf.put_u32(self.total_len as u32);
        buf.put_u32(self.stop_sec);
        buf.put_u32(self.stop_usec);
        buf.put_u32(self.error_cnt);
        buf.put_u32(self.outorder_cnt);
        buf.put_u32(self.datagrams);
        buf.put_u32(self.jitter_sec);
        buf.put_u32(self.jitter_usec);
    }

    /// Decode a reply datagram, checking that it answers an end-of-test id.
    pub fn decode(src: &[u8]) -> Result<Self, WireError> {
        ensure_len(src, DATAGRAM_HEADER_LEN + SERVER_REPORT_LEN)?;
        let header = DatagramHeader::decode(src)?;
        if header.id >= 0 {
            return Err(WireError::NotAReport { id: header.id });
        }

        let mut body = &src[DATAGRAM_HEADER_LEN..];
        let flags = body.get_i32();
        let total_hi = u64::from(body.get_u32());
        let total_lo = u64::from(body.get_u32());
        Ok(Self {
            flags,
            total_len: (total_hi << 32) | total_lo,
            stop_sec: body.get_u32(),
            stop_usec: body.get_u32(),
            error_cnt: body.get_u32(),
            outorder_cnt: body.get_u32(),
            datagrams: body.get_u32(),
            jitter_sec: body.get_u32(),
            jitter_usec: body.get_u32(),
        })
    }
}

/// Build a data datagram of exactly `packet_size` bytes into `buf`.
///
/// `packet_size` must be at least [`MIN_PACKET_SIZE`].
pub fn encode_data(buf: &mut BytesMut, header: &DatagramHeader, client: &ClientHeader, packet_size: usize) {
    buf.clear();
    header.encode(buf);
    client.encode(buf);
    buf.resize(packet_size, 0);
}

/// Build the end-of-test datagram for `packets_sent` data datagrams.
pub fn encode_fin(buf: &mut BytesMut, packets_sent: u32, packet_size: usize) {
    let id = -(packets_sent.min(i32::MAX as u32) as i32);
    buf.clear();
    DatagramHeader::now(id).encode(buf);
    buf.resize(packet_size.max(DATAGRAM_HEADER_LEN), 0);
}

fn ensure_len(src: &[u8], expected: usize) -> Result<(), WireError> {
    if src.len() < expected {
        return Err(WireError::Truncated {
            expected,
            actual: src.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_datagram_layout() {
        let mut buf = BytesMut::new();
        let header = DatagramHeader {
            id: 7,
            tv_sec: 0x0102_0304,
            tv_usec: 999_999,
        };
        let client = ClientHeader::for_upload(1024, 10_000, 20_000);
        encode_data(&mut buf, &header, &client, 1024);

        assert_eq!(buf.len(), 1024);
        assert_eq!(&buf[0..4], &7i32.to_be_bytes());
        assert_eq!(&buf[4..8], &[1, 2, 3, 4]);
        assert_eq!(&buf[12..16], &[0, 0, 0, 0]);
        // num_of_threads
        assert_eq!(&buf[20..24], &1i32.to_be_bytes());
        // buffer_len
        assert_eq!(&buf[28..32], &984i32.to_be_bytes());
        // bandwidth in bit/s
        assert_eq!(&buf[32..36], &10_000_000i32.to_be_bytes());
        // -2000 * 10 ms
        assert_eq!(&buf[36..40], &(-2000i32).to_be_bytes());
        assert!(buf[40..].iter().all(|b| *b == 0));

        assert_eq!(DatagramHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_fin_carries_negated_count() {
        let mut buf = BytesMut::new();
        encode_fin(&mut buf, 25_000, 1024);
        assert_eq!(buf.len(), 1024);
        assert_eq!(DatagramHeader::decode(&buf).unwrap().id, -25_000);
    }

    #[test]
    fn test_server_report_decode() {
        let report = ServerReport {
            flags: 0,
            total_len: (1u64 << 32) + 5,
            stop_sec: 20,
            stop_usec: 1_500,
            error_cnt: 12,
            outorder_cnt: 1,
            datagrams: 24_988,
            jitter_sec: 0,
            jitter_usec: 350,
        };
        let mut buf = BytesMut::new();
        report.encode(&DatagramHeader::now(-25_000), &mut buf);
        assert_eq!(buf.len(), DATAGRAM_HEADER_LEN + SERVER_REPORT_LEN);

        let decoded = ServerReport::decode(&buf).unwrap();
        assert_eq!(decoded, report);
        assert_eq!(decoded.server_time_us(), 20_001_500);
        assert_eq!(decoded.jitter_us(), 350);
    }

    #[test]
    fn test_server_report_truncated() {
        let err = ServerReport::decode(&[0u8; 30]).unwrap_err();
        assert_eq!(
            err,
            WireError::Truncated {
                expected: 56,
                actual: 30
            }
        );
    }

    #[test]
    fn test_server_report_rejects_data_echo() {
        let mut buf = BytesMut::new();
        ServerReport::default().encode(&DatagramHeader::now(3), &mut buf);
        assert_eq!(
            ServerReport::decode(&buf).unwrap_err(),
            WireError::NotAReport { id: 3 }
        );
    }
}
