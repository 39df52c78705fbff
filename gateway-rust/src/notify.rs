//! # notify
//!
//! Pass-through channel from the gateway core to operator panels.
//!
//! Publishing never blocks: notifications go into a bounded queue and are
//! dropped when it is full. A bridge task drains the queue, together with the
//! identity event bus, and emits each item as a Socket.IO event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use range_types::{Heartbeat, PlatformCommand, PlatformStatus};
use serde::Serialize;
use socketioxide::SocketIo;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::identity::IdentityEvent;
use crate::registry::{Payload, PayloadKind};

// ── Notification Payloads ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatNotice {
    pub source_id: String,
    pub sequence: u32,
    pub count: u64,
    pub mean_interval_ms: Option<f64>,
}

impl HeartbeatNotice {
    pub fn new(heartbeat: &Heartbeat, count: u64, mean_interval_ms: Option<f64>) -> Self {
        Self {
            source_id: heartbeat.source_id.clone(),
            sequence: heartbeat.sequence,
            count,
            mean_interval_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationOutcome {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_platform: Option<String>,
    pub waypoint_count: usize,
    /// Waypoints stamped with the configured fallback speed
    pub fallback_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedMessage {
    pub kind: PayloadKind,
    pub from: String,
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Notification {
    Heartbeat(HeartbeatNotice),
    PlatformStatus(PlatformStatus),
    TranslationOutcome(TranslationOutcome),
    Observed(ObservedMessage),
    CommandSent(PlatformCommand),
    #[serde(rename_all = "camelCase")]
    SourceStale { source_id: String, last_seen_ms: u64 },
    #[serde(rename_all = "camelCase")]
    SourceRecovered { source_id: String },
}

impl Notification {
    /// Socket.IO event name the panel listens on.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Heartbeat(_) => "heartbeat",
            Self::PlatformStatus(_) => "platform-status",
            Self::TranslationOutcome(_) => "translation-outcome",
            Self::Observed(_) => "observed-message",
            Self::CommandSent(_) => "command-sent",
            Self::SourceStale { .. } => "source-stale",
            Self::SourceRecovered { .. } => "source-recovered",
        }
    }
}

// ── Notifier ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
    dropped: Arc<AtomicU64>,
}

impl Notifier {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        let notifier = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (notifier, rx)
    }

    /// Fire-and-forget. Returns false if the notification was dropped.
    pub fn publish(&self, notification: Notification) -> bool {
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(n)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Notify: queue full, dropped {}", n.event_name());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ── Panel Bridge ──────────────────────────────────────────────────────────────

/// Forward notifications and identity events to every connected panel until
/// shutdown.
pub async fn run_panel_bridge(
    mut rx: mpsc::Receiver<Notification>,
    mut identity_rx: broadcast::Receiver<IdentityEvent>,
    io: SocketIo,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Panel bridge running");
    loop {
        tokio::select! {
            Some(notification) = rx.recv() => {
                let _ = io.emit(notification.event_name(), &notification);
            }
            event = identity_rx.recv() => match event {
                Ok(event) => {
                    let _ = io.emit(event.event_name(), &event);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Panel bridge: missed {n} identity events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
            else => break,
        }
    }
    info!("Panel bridge stopped");
}
