//! Upload result arithmetic and formatting.

use super::UploadResults;

/// Client-side throughput in kilobits (1024 bit) per second.
///
/// A zero elapsed time yields exactly 0.
pub fn throughput_kbps(results: &UploadResults) -> u64 {
    if results.elapsed_time_us == 0 {
        return 0;
    }
    let bits = u128::from(results.packets_sent) * u128::from(results.packet_size) * 8;
    let kbps = bits * 1_000_000 / (u128::from(results.elapsed_time_us) * 1024);
    kbps.min(u128::from(u64::MAX)) as u64
}

/// Payload bytes handed to the socket.
pub fn bytes_sent(results: &UploadResults) -> u64 {
    u64::from(results.packets_sent) * u64::from(results.packet_size)
}

/// Format upload results as a one-line human-readable summary.
pub fn format_summary(results: &UploadResults) -> String {
    let kbps = throughput_kbps(results);
    let speed = if kbps >= 1024 {
        format!("{:.2} Mbps", kbps as f64 / 1024.0)
    } else {
        format!("{} kbps", kbps)
    };

    let mut summary = format!(
        "UDP upload: {} ({} bytes in {} ms, {} sent / {} lost / {} received",
        speed,
        bytes_sent(results),
        results.elapsed_time_us / 1000,
        results.packets_sent,
        results.packets_lost,
        results.packets_received,
    );
    if results.jitter_us > 0 {
        summary.push_str(&format!(", jitter: {:.3}ms", results.jitter_us as f64 / 1000.0));
    }
    summary.push(')');
    summary
}
