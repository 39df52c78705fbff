//! # transport
//!
//! UDP multicast boundary. One socket joined to the range group serves both
//! directions:
//!   - the receive loop hands each datagram to [`MessageRouter::handle`] and
//!     waits for it to finish before reading the next one
//!   - the sender task drains a bounded frame queue onto the group
//!
//! Sends are fire-and-forget: a failed send is logged and never retried.
//! UDP errors never stop either loop; only shutdown does.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use range_types::Heartbeat;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::registry::Payload;
use crate::router::MessageRouter;
use crate::state::now_ms;

/// Bind the shared port with SO_REUSEADDR and join the multicast group, so
/// several nodes on one host can listen side by side.
pub fn bind_multicast(config: &NetworkConfig) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_bytes) {
        debug!("Could not size receive buffer to {}: {e}", config.recv_buffer_bytes);
    }

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.udp_port);
    socket.bind(&SocketAddr::V4(bind_addr).into())?;

    socket.join_multicast_v4(&config.multicast_group, &config.interface)?;
    socket.set_multicast_loop_v4(config.multicast_loop)?;
    socket.set_multicast_ttl_v4(config.multicast_ttl)?;
    if !config.interface.is_unspecified() {
        socket.set_multicast_if_v4(&config.interface)?;
    }
    socket.set_nonblocking(true)?;

    let socket = UdpSocket::from_std(socket.into())?;
    info!(
        "Joined multicast {}:{} on interface {}",
        config.multicast_group, config.udp_port, config.interface
    );
    Ok(socket)
}

pub fn group_addr(config: &NetworkConfig) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(config.multicast_group, config.udp_port))
}

// ── Receive ───────────────────────────────────────────────────────────────────

pub async fn run_receive_loop(
    socket: Arc<UdpSocket>,
    router: Arc<MessageRouter>,
    buffer_len: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; buffer_len];
    info!("Receive loop running");

    loop {
        let received = tokio::select! {
            r = socket.recv_from(&mut buf) => r,
            _ = shutdown.changed() => break,
        };
        match received {
            Ok((len, from)) => {
                router.handle(&buf[..len], from).await;
            }
            Err(e) => {
                warn!("UDP recv error: {e}");
            }
        }
    }
    info!("Receive loop stopped");
}

// ── Send ──────────────────────────────────────────────────────────────────────

/// Non-blocking handle onto the outbound frame queue.
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Bytes>,
    dropped: Arc<AtomicU64>,
}

impl OutboundSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let sender = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sender, rx)
    }

    /// Returns false if the frame was dropped.
    pub fn send(&self, frame: Bytes) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Outbound queue full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Outbound queue closed, frame dropped");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Write queued frames to `dest` until shutdown. Frames still queued at
/// shutdown are discarded.
pub async fn run_sender(
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    mut rx: mpsc::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Sender running → {dest}");
    loop {
        let frame = tokio::select! {
            f = rx.recv() => match f {
                Some(f) => f,
                None => break,
            },
            _ = shutdown.changed() => break,
        };
        if let Err(e) = socket.send_to(&frame, dest).await {
            warn!("UDP send to {dest} failed: {e}");
        }
    }
    info!("Sender stopped");
}

// ── Gateway Heartbeat ─────────────────────────────────────────────────────────

/// Announce the gateway on the range at a fixed period.
pub async fn run_heartbeat(
    router: Arc<MessageRouter>,
    source_id: String,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sequence: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let heartbeat = Heartbeat {
            source_id: source_id.clone(),
            sequence,
            sent_at_ms: now_ms(),
        };
        if let Err(e) = router.send_payload(&Payload::Heartbeat(heartbeat)) {
            warn!("Gateway heartbeat could not be framed: {e}");
        }
        sequence = sequence.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use range_types::{type_code, WirePayload};

    use super::*;
    use crate::codec;
    use crate::router::tests::harness;

    async fn loopback() -> Arc<UdpSocket> {
        Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap())
    }

    #[tokio::test]
    async fn test_outbound_sender_drops_when_full() {
        let (sender, mut rx) = OutboundSender::channel(1);
        assert!(sender.send(Bytes::from_static(b"one")));
        assert!(!sender.send(Bytes::from_static(b"two")));
        assert_eq!(sender.dropped(), 1);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn test_sender_writes_frames_to_destination() {
        let socket = loopback().await;
        let peer = loopback().await;
        let dest = peer.local_addr().unwrap();
        let (sender, rx) = OutboundSender::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_sender(socket, dest, rx, shutdown_rx));

        let frame = codec::encode(1, 0x42, b"xyz").unwrap();
        assert!(sender.send(frame.clone()));

        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], &frame[..]);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_loop_dispatches_until_shutdown() {
        let mut h = harness().await;
        let socket = loopback().await;
        let addr = socket.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_receive_loop(socket, h.router.clone(), 2048, shutdown_rx));

        let client = loopback().await;
        client.send_to(b"noise", addr).await.unwrap();
        let hb = Heartbeat { source_id: "SIM-9".into(), sequence: 1, sent_at_ms: 0 };
        let frame = codec::encode(1, type_code::HEARTBEAT, &hb.to_wire().unwrap()).unwrap();
        client.send_to(&frame, addr).await.unwrap();

        let note = tokio::time::timeout(Duration::from_secs(2), h.notes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(note.event_name(), "heartbeat");
        assert_eq!(h.router.stats().frame_errors, 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_task_increments_sequence() {
        let mut h = harness().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_heartbeat(
            h.router.clone(),
            "gateway".into(),
            Duration::from_millis(100),
            shutdown_rx,
        ));

        let mut sequences = Vec::new();
        for _ in 0..3 {
            let frame = h.frames.recv().await.unwrap();
            let envelope = codec::decode(&frame).unwrap();
            assert_eq!(envelope.type_code, type_code::HEARTBEAT);
            sequences.push(Heartbeat::from_wire(envelope.payload).unwrap().sequence);
        }
        assert_eq!(sequences, vec![0, 1, 2]);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
