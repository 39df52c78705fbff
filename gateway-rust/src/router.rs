//! # router
//!
//! Dispatch for every inbound datagram:
//! frame parse → registry lookup → payload decode → one consumer.
//!
//! Nothing here returns an error to the receive loop. Frame and decode
//! failures are logged and counted; unknown type codes are counted only,
//! since unrelated systems share the multicast group. Each delivered payload
//! is also handed to the observer channel without blocking.
//!
//! The group is joined with multicast loopback on, so the gateway hears its
//! own heartbeats and commands. Those echoes are recognised by source id and
//! by recently sent command ids, counted and dropped.
//!
//! The outbound direction lives here too: [`MessageRouter::send_payload`]
//! frames a payload through the same registry and queues it for the sender
//! task.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use range_types::{Heartbeat, PlatformCommand, PlatformStatus, RoutePlan};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::codec;
use crate::error::{RegistryError, TranslateError};
use crate::notify::{HeartbeatNotice, Notification, Notifier, ObservedMessage, TranslationOutcome};
use crate::registry::{MessageRegistry, Payload, PayloadKind};
use crate::state::{now_ms, SharedLiveness, SharedPlatforms};
use crate::translator::RouteTranslator;
use crate::transport::OutboundSender;

/// What happened to one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered(PayloadKind),
    FrameRejected,
    UnknownType(u8),
    DecodeFailed(PayloadKind),
    /// One of this gateway's own frames looped back by the group.
    Echo(PayloadKind),
}

/// Sent command ids remembered for echo suppression.
const RECENT_COMMANDS: usize = 64;

// ── Statistics ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RouterStats {
    received: AtomicU64,
    delivered: AtomicU64,
    frame_errors: AtomicU64,
    unknown_type: AtomicU64,
    decode_errors: AtomicU64,
    echoes: AtomicU64,
    sent: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStatsSnapshot {
    pub received: u64,
    pub delivered: u64,
    pub frame_errors: u64,
    pub unknown_type: u64,
    pub decode_errors: u64,
    pub echoes: u64,
    pub sent: u64,
    pub notifications_dropped: u64,
    pub outbound_dropped: u64,
}

// ── Router ────────────────────────────────────────────────────────────────────

pub struct MessageRouter {
    registry: MessageRegistry,
    liveness: SharedLiveness,
    platforms: SharedPlatforms,
    translator: RouteTranslator,
    notifier: Notifier,
    outbound: OutboundSender,
    revision: u8,
    local_source: Option<String>,
    recent_commands: Mutex<VecDeque<String>>,
    stats: RouterStats,
}

impl MessageRouter {
    pub fn new(
        registry: MessageRegistry,
        liveness: SharedLiveness,
        platforms: SharedPlatforms,
        translator: RouteTranslator,
        notifier: Notifier,
        outbound: OutboundSender,
        revision: u8,
    ) -> Self {
        Self {
            registry,
            liveness,
            platforms,
            translator,
            notifier,
            outbound,
            revision,
            local_source: None,
            recent_commands: Mutex::new(VecDeque::with_capacity(RECENT_COMMANDS)),
            stats: RouterStats::default(),
        }
    }

    /// Source id this gateway uses for its own heartbeats.
    pub fn with_local_source(mut self, source_id: impl Into<String>) -> Self {
        self.local_source = Some(source_id.into());
        self
    }

    pub async fn handle(&self, datagram: &[u8], from: SocketAddr) -> Dispatch {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let envelope = match codec::decode(datagram) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.frame_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Dropped datagram from {from}: {e}");
                return Dispatch::FrameRejected;
            }
        };

        let Some(capability) = self.registry.lookup(envelope.type_code) else {
            self.stats.unknown_type.fetch_add(1, Ordering::Relaxed);
            trace!("Ignored type 0x{:02x} from {from}", envelope.type_code);
            return Dispatch::UnknownType(envelope.type_code);
        };

        let payload = match (capability.decode)(envelope.payload) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Dropped {} payload from {from}: {e}", capability.kind);
                return Dispatch::DecodeFailed(capability.kind);
            }
        };

        let kind = payload.kind();
        if self.is_echo(&payload) {
            self.stats.echoes.fetch_add(1, Ordering::Relaxed);
            trace!("Ignored own {kind} looped back from {from}");
            return Dispatch::Echo(kind);
        }
        match payload {
            Payload::Heartbeat(hb) => self.on_heartbeat(hb).await,
            Payload::PlatformStatus(status) => self.on_platform_status(status).await,
            Payload::RouteUpload(plan) => self.on_route_plan(plan).await,
            Payload::PlatformCommand(_) | Payload::RawTelemetry(_) => self.observe(payload, from),
        }
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        Dispatch::Delivered(kind)
    }

    fn is_echo(&self, payload: &Payload) -> bool {
        match payload {
            Payload::Heartbeat(hb) => self.local_source.as_deref() == Some(hb.source_id.as_str()),
            Payload::PlatformCommand(command) => match self.recent_commands.lock() {
                Ok(recent) => recent.contains(&command.command_id),
                Err(_) => false,
            },
            _ => false,
        }
    }

    fn remember_command(&self, command_id: &str) {
        if let Ok(mut recent) = self.recent_commands.lock() {
            if recent.len() == RECENT_COMMANDS {
                recent.pop_front();
            }
            recent.push_back(command_id.to_string());
        }
    }

    async fn on_heartbeat(&self, heartbeat: Heartbeat) {
        let notice = {
            let mut tracker = self.liveness.write().await;
            let stat = tracker.record(&heartbeat.source_id, now_ms());
            HeartbeatNotice::new(&heartbeat, stat.count, stat.mean_interval_ms())
        };
        self.notifier.publish(Notification::Heartbeat(notice));
    }

    async fn on_platform_status(&self, status: PlatformStatus) {
        self.platforms.write().await.update(&status, now_ms());
        self.notifier.publish(Notification::PlatformStatus(status));
    }

    async fn on_route_plan(&self, plan: RoutePlan) {
        let outcome = match self.translator.handle(&plan).await {
            Ok(translation) => {
                let outcome = translation.outcome();
                if self.send_command(translation.command) {
                    outcome
                } else {
                    outcome.not_sent()
                }
            }
            Err(e) => {
                if !matches!(e, TranslateError::IdentityMismatch { .. }) {
                    debug!("Route plan dropped: {e}");
                }
                TranslationOutcome::rejected(&plan, &e)
            }
        };
        self.notifier.publish(Notification::TranslationOutcome(outcome));
    }

    fn observe(&self, payload: Payload, from: SocketAddr) {
        self.notifier.publish(Notification::Observed(ObservedMessage {
            kind: payload.kind(),
            from: from.to_string(),
            payload,
        }));
    }

    /// Frame a command, queue it and tell observers. Returns whether the
    /// frame was queued.
    pub fn send_command(&self, command: PlatformCommand) -> bool {
        match self.send_payload(&Payload::PlatformCommand(command.clone())) {
            Ok(true) => {
                info!("Command {} queued for {}", command.command_id, command.target_platform);
                self.remember_command(&command.command_id);
                self.notifier.publish(Notification::CommandSent(command));
                true
            }
            Ok(false) => {
                warn!("Command {} dropped: outbound queue unavailable", command.command_id);
                false
            }
            Err(e) => {
                warn!("Command {} could not be framed: {e}", command.command_id);
                false
            }
        }
    }

    /// Frame `payload` and hand it to the outbound queue. `Ok(false)` means
    /// the queue was full or closed and the frame was dropped.
    pub fn send_payload(&self, payload: &Payload) -> Result<bool, RegistryError> {
        let frame = self.registry.frame(self.revision, payload)?;
        let queued = self.outbound.send(frame);
        if queued {
            self.stats.sent.fetch_add(1, Ordering::Relaxed);
        }
        Ok(queued)
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            received: self.stats.received.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            frame_errors: self.stats.frame_errors.load(Ordering::Relaxed),
            unknown_type: self.stats.unknown_type.load(Ordering::Relaxed),
            decode_errors: self.stats.decode_errors.load(Ordering::Relaxed),
            echoes: self.stats.echoes.load(Ordering::Relaxed),
            sent: self.stats.sent.load(Ordering::Relaxed),
            notifications_dropped: self.notifier.dropped(),
            outbound_dropped: self.outbound.dropped(),
        }
    }
}
