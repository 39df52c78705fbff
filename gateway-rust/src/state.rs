use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use range_types::Identity;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::liveness::{HeartbeatStat, LivenessTracker};
use crate::persistence::HistoryEntry;
use crate::platforms::{PlatformRecord, PlatformStateCache};
use crate::router::RouterStatsSnapshot;

// ─── Shared State Types ───────────────────────────────────────────────────────

// Written only by the receive loop; the panel and monitors read concurrently.
pub type SharedLiveness = Arc<RwLock<LivenessTracker>>;
pub type SharedPlatforms = Arc<RwLock<PlatformStateCache>>;

/// Platform currently selected on the operator panel as the route target.
pub type SharedTarget = Arc<RwLock<Option<String>>>;

// ─── Helper: get unix ms ─────────────────────────────────────────────────────

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ─── Panel Snapshot ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySnapshot {
    pub current: Option<Identity>,
    pub auto_generate: bool,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSnapshot {
    #[serde(flatten)]
    pub stat: HeartbeatStat,
    pub stale: bool,
}

/// Everything a freshly connected panel needs to render.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySnapshot {
    pub server_time_ms: u64,
    pub identity: IdentitySnapshot,
    pub selected_target: Option<String>,
    pub sources: Vec<SourceSnapshot>,
    pub platforms: Vec<PlatformRecord>,
    pub router: RouterStatsSnapshot,
}
