//! End-to-end run over loopback: network events release the gate, the
//! sequencer starts the real UDP engine, and a local iperf2-style responder
//! answers the end-of-test handshake.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use linkbench::config::BenchmarkConfig;
use linkbench::gate::ConnectivityGate;
use linkbench::indicator::MemoryIndicator;
use linkbench::netmgmt::{NetworkEvent, NetworkNotifier};
use linkbench::sequencer::BenchmarkSequencer;
use linkbench::zperf::report::throughput_kbps;
use linkbench::zperf::wire::{DatagramHeader, ServerReport};
use linkbench::zperf::{SessionOutcome, UdpUploadEngine};
use tokio::net::UdpSocket;

async fn spawn_responder() -> SocketAddrV4 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = match socket.local_addr().unwrap() {
        SocketAddr::V4(a) => a,
        other => panic!("unexpected address {other}"),
    };

    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_536];
        let mut received: u32 = 0;
        loop {
            let (len, from) = socket.recv_from(&mut buf).await.unwrap();
            let header = DatagramHeader::decode(&buf[..len]).unwrap();
            if header.id >= 0 {
                received += 1;
                continue;
            }
            let report = ServerReport {
                datagrams: received,
                error_cnt: header.id.unsigned_abs() - received,
                ..Default::default()
            };
            let mut out = BytesMut::new();
            report.encode(&header, &mut out);
            socket.send_to(&out, from).await.unwrap();
        }
    });

    addr
}

#[tokio::test]
async fn test_gated_upload_over_loopback() {
    let peer = spawn_responder().await;

    let led = Arc::new(MemoryIndicator::default());
    let notifier = NetworkNotifier::new();
    let gate = ConnectivityGate::new(led.clone());
    gate.register(&notifier);

    let config = BenchmarkConfig {
        peer_ipv4: peer.ip().to_string(),
        peer_port: peer.port(),
        packet_size: 512,
        rate_kbps: 4_000,
        duration_ms: 300,
        startup_delay_ms: 0,
    };
    let sequencer = BenchmarkSequencer::new(gate.clone(), UdpUploadEngine::new(), config);

    // Never connected yet: the gate stays closed.
    notifier.notify(NetworkEvent::L4Disconnected);
    assert!(!gate.is_released());

    let events = notifier.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        events.notify(NetworkEvent::L4Connected);
    });

    let running = tokio::time::timeout(Duration::from_secs(2), sequencer.run())
        .await
        .expect("gate should open")
        .expect("upload should start");
    assert!(led.is_on());

    let outcome = tokio::time::timeout(Duration::from_secs(10), running.finished())
        .await
        .expect("session should end");

    match outcome {
        Some(SessionOutcome::Finished(results)) => {
            assert!(results.packets_sent > 0);
            assert_eq!(results.packet_size, 512);
            assert_eq!(
                results.packets_received + results.packets_lost,
                results.packets_sent
            );
            assert!(results.elapsed_time_us >= 300_000);
            assert!(throughput_kbps(&results) > 0);
        }
        other => panic!("expected Finished, got {:?}", other),
    }
}

#[tokio::test]
async fn test_bad_peer_never_reaches_engine() {
    let notifier = NetworkNotifier::new();
    let gate = ConnectivityGate::new(Arc::new(MemoryIndicator::default()));
    gate.register(&notifier);
    notifier.notify(NetworkEvent::L4Connected);

    let engine = UdpUploadEngine::new();
    let config = BenchmarkConfig {
        peer_ipv4: String::new(),
        ..Default::default()
    };
    let sequencer = BenchmarkSequencer::new(gate, engine, config);

    let err = sequencer.run().await.err().expect("empty peer must fail");
    assert!(err.to_string().contains("invalid IPv4 address"));
}
