use std::sync::Arc;

use range_types::{CommandKind, CommandParams, Identity, PlatformCommand};
use serde::Deserialize;
use serde_json::{json, Value};
use socketioxide::extract::{Data, SocketRef};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::TranslateError;
use crate::identity::{IdentityRegistry, USER_REQUESTED_REASON};
use crate::navigation::NavigationBridge;
use crate::router::MessageRouter;
use crate::state::{
    now_ms, GatewaySnapshot, SharedLiveness, SharedPlatforms, SharedTarget, SourceSnapshot,
};

// ─── Panel Context ────────────────────────────────────────────────────────────

/// Handles shared by every panel connection.
#[derive(Clone)]
pub struct PanelContext {
    pub identity: Arc<IdentityRegistry>,
    pub router: Arc<MessageRouter>,
    pub liveness: SharedLiveness,
    pub platforms: SharedPlatforms,
    pub target: SharedTarget,
    pub navigation: Arc<NavigationBridge>,
    pub stale_threshold_ms: u64,
}

/// Operator-issued command as sent by the panel. Missing target falls back
/// to the selected platform; missing id is generated.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCommand {
    #[serde(default)]
    pub command_id: Option<String>,
    #[serde(default)]
    pub target_platform: Option<String>,
    pub kind: CommandKind,
    #[serde(default)]
    pub params: Option<CommandParams>,
}

impl PanelContext {
    pub async fn snapshot(&self) -> GatewaySnapshot {
        let now = now_ms();
        let sources = {
            let tracker = self.liveness.read().await;
            tracker
                .snapshot()
                .into_iter()
                .map(|stat| SourceSnapshot {
                    stale: tracker.is_stale(&stat.source_id, now, self.stale_threshold_ms),
                    stat,
                })
                .collect()
        };
        let platforms = self.platforms.read().await.snapshot();
        let selected_target = self.target.read().await.clone();

        GatewaySnapshot {
            server_time_ms: now,
            identity: self.identity.snapshot().await,
            selected_target,
            sources,
            platforms,
            router: self.router.stats(),
        }
    }

    pub async fn select_target(&self, platform: Option<String>) -> Option<String> {
        let platform = platform.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        *self.target.write().await = platform.clone();
        match &platform {
            Some(p) => info!("Panel: target platform set to {p}"),
            None => info!("Panel: target platform cleared"),
        }
        platform
    }

    pub async fn build_command(&self, request: IssueCommand) -> Result<PlatformCommand, TranslateError> {
        let target_platform = match request.target_platform.filter(|t| !t.is_empty()) {
            Some(target) => target,
            None => self
                .target
                .read()
                .await
                .clone()
                .ok_or(TranslateError::NoTargetSelected)?,
        };
        Ok(PlatformCommand {
            command_id: request
                .command_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            target_platform,
            kind: request.kind,
            params: request.params.unwrap_or(CommandParams::None),
        })
    }
}

/// Panel identity input: a JSON number or a numeric string. Values too large
/// for `u32` are reported as sent.
fn requested_identity(value: &Value) -> Result<u32, String> {
    let raw = value
        .as_u64()
        .or_else(|| value.as_str().and_then(|v| v.trim().parse().ok()))
        .ok_or_else(|| "value must be a number".to_string())?;
    u32::try_from(raw)
        .map_err(|_| format!("identity {raw} is outside {}..={}", Identity::MIN, Identity::MAX))
}

fn error_body(error: impl std::fmt::Display) -> Value {
    json!({ "error": error.to_string() })
}

// ─── Main Connection Handler ──────────────────────────────────────────────────

pub async fn on_connect(socket: SocketRef, ctx: PanelContext) {
    let socket_id = socket.id.to_string();
    info!("Panel connected: {socket_id}");

    socket.on_disconnect(move |s: SocketRef| async move {
        info!("Panel disconnected: {}", s.id);
    });

    // ── register ──────────────────────────────────────────────────────────────
    {
        let ctx = ctx.clone();
        socket.on("register", move |s: SocketRef, Data::<Value>(data)| {
            let ctx = ctx.clone();
            async move {
                let role = data["type"].as_str().unwrap_or("panel").to_string();
                info!("Panel {}: registered as {role}", s.id);
                let _ = s.join(role);

                let snapshot = ctx.snapshot().await;
                let _ = s.emit("init-state", &snapshot);
            }
        });
    }

    // ── latency-ping ──────────────────────────────────────────────────────────
    socket.on("latency-ping", move |s: SocketRef, Data::<Value>(data)| async move {
        let _ = s.emit("latency-pong", &data);
    });

    // ── request-snapshot ──────────────────────────────────────────────────────
    {
        let ctx = ctx.clone();
        socket.on("request-snapshot", move |s: SocketRef| {
            let ctx = ctx.clone();
            async move {
                let snapshot = ctx.snapshot().await;
                let _ = s.emit("snapshot", &snapshot);
            }
        });
    }

    // ── select-target ─────────────────────────────────────────────────────────
    {
        let ctx = ctx.clone();
        socket.on("select-target", move |s: SocketRef, Data::<Value>(data)| {
            let ctx = ctx.clone();
            async move {
                let requested = data["platform"].as_str().map(str::to_string);
                let selected = ctx.select_target(requested).await;
                let body = json!({ "platform": selected });
                let _ = s.broadcast().emit("target-selected", &body);
                let _ = s.emit("target-selected", &body);
            }
        });
    }

    // ── regenerate-identity ───────────────────────────────────────────────────
    {
        let ctx = ctx.clone();
        socket.on("regenerate-identity", move |s: SocketRef| {
            let ctx = ctx.clone();
            async move {
                // identity-changed reaches every panel through the event bus
                if let Err(e) = ctx.identity.regenerate().await {
                    warn!("Panel {}: regenerate failed: {e}", s.id);
                    let _ = s.emit("identity-error", &error_body(e));
                }
            }
        });
    }

    // ── set-identity ──────────────────────────────────────────────────────────
    {
        let ctx = ctx.clone();
        socket.on("set-identity", move |s: SocketRef, Data::<Value>(data)| {
            let ctx = ctx.clone();
            async move {
                let value = match requested_identity(&data["value"]) {
                    Ok(value) => value,
                    Err(message) => {
                        let _ = s.emit("identity-error", &error_body(message));
                        return;
                    }
                };
                let description = data["description"]
                    .as_str()
                    .filter(|d| !d.is_empty())
                    .unwrap_or(USER_REQUESTED_REASON);

                if let Err(e) = ctx.identity.set_manually(value, description).await {
                    warn!("Panel {}: set-identity {value} failed: {e}", s.id);
                    let _ = s.emit("identity-error", &error_body(e));
                }
            }
        });
    }

    // ── set-auto-generate ─────────────────────────────────────────────────────
    {
        let ctx = ctx.clone();
        socket.on("set-auto-generate", move |s: SocketRef, Data::<Value>(data)| {
            let ctx = ctx.clone();
            async move {
                let Some(enabled) = data["enabled"].as_bool() else {
                    return;
                };
                match ctx.identity.set_auto_generate(enabled).await {
                    Ok(()) => {
                        let body = json!({ "autoGenerate": enabled });
                        let _ = s.broadcast().emit("auto-generate-changed", &body);
                        let _ = s.emit("auto-generate-changed", &body);
                    }
                    Err(e) => {
                        let _ = s.emit("identity-error", &error_body(e));
                    }
                }
            }
        });
    }

    // ── launch-navigation ─────────────────────────────────────────────────────
    {
        let ctx = ctx.clone();
        socket.on("launch-navigation", move |s: SocketRef| {
            let ctx = ctx.clone();
            async move {
                match ctx.navigation.prepare_launch().await {
                    Ok(launch) => {
                        let _ = s.emit("navigation-ready", &launch);
                    }
                    Err(e) => {
                        warn!("Panel {}: navigation launch failed: {e:#}", s.id);
                        let _ = s.emit("navigation-error", &error_body(format!("{e:#}")));
                    }
                }
            }
        });
    }

    // ── issue-command ─────────────────────────────────────────────────────────
    {
        let ctx = ctx.clone();
        socket.on("issue-command", move |s: SocketRef, Data::<Value>(data)| {
            let ctx = ctx.clone();
            async move {
                let request: IssueCommand = match serde_json::from_value(data) {
                    Ok(r) => r,
                    Err(e) => {
                        let _ = s.emit("command-rejected", &error_body(e));
                        return;
                    }
                };
                match ctx.build_command(request).await {
                    // command-sent goes out through the notification channel
                    Ok(command) => {
                        if !ctx.router.send_command(command) {
                            let _ = s.emit("command-rejected", &error_body("outbound queue unavailable"));
                        }
                    }
                    Err(e) => {
                        let _ = s.emit("command-rejected", &error_body(e));
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::router::tests::{harness, Harness};

    fn context(h: &Harness) -> PanelContext {
        PanelContext {
            identity: h.identity.clone(),
            router: h.router.clone(),
            liveness: h.liveness.clone(),
            platforms: h.platforms.clone(),
            target: h.target.clone(),
            navigation: Arc::new(NavigationBridge::new(
                h.identity.clone(),
                h.dir().join("navigation.json"),
                Ipv4Addr::new(239, 255, 0, 1),
                5555,
            )),
            stale_threshold_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn test_snapshot_reflects_gateway_state() {
        let h = harness().await;
        let ctx = context(&h);
        h.liveness.write().await.record("SIM-1", now_ms());
        h.liveness.write().await.record("SIM-OLD", 0);
        ctx.select_target(Some("UAV-1".into())).await;
        let current = h.identity.current().await;

        let snapshot = ctx.snapshot().await;
        assert_eq!(snapshot.identity.current, Some(current));
        assert_eq!(snapshot.selected_target.as_deref(), Some("UAV-1"));
        assert_eq!(snapshot.sources.len(), 2);
        assert!(!snapshot.sources[0].stale);
        assert!(snapshot.sources[1].stale);

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["sources"][0]["sourceId"], "SIM-1");
        assert_eq!(value["identity"]["autoGenerate"], true);
    }

    #[tokio::test]
    async fn test_select_target_trims_and_clears() {
        let h = harness().await;
        let ctx = context(&h);
        assert_eq!(ctx.select_target(Some(" UAV-2 ".into())).await.as_deref(), Some("UAV-2"));
        assert_eq!(h.target.read().await.as_deref(), Some("UAV-2"));
        assert_eq!(ctx.select_target(Some("".into())).await, None);
        assert_eq!(*h.target.read().await, None);
    }

    #[tokio::test]
    async fn test_issue_command_defaults_to_selected_target() {
        let h = harness().await;
        let ctx = context(&h);

        let request: IssueCommand = serde_json::from_value(json!({ "kind": "HOLD" })).unwrap();
        assert!(matches!(
            ctx.build_command(request).await,
            Err(TranslateError::NoTargetSelected)
        ));

        ctx.select_target(Some("GUN-2".into())).await;
        let request: IssueCommand = serde_json::from_value(json!({
            "kind": "SET_SPEED",
            "params": { "type": "SPEED", "speed_mps": 3.5 }
        }))
        .unwrap();
        let command = ctx.build_command(request).await.unwrap();
        assert_eq!(command.target_platform, "GUN-2");
        assert_eq!(command.params, CommandParams::Speed { speed_mps: 3.5 });
        assert!(!command.command_id.is_empty());
    }

    #[tokio::test]
    async fn test_issued_command_reaches_outbound_queue() {
        let mut h = harness().await;
        let ctx = context(&h);
        let request: IssueCommand = serde_json::from_value(json!({
            "commandId": "op-1",
            "targetPlatform": "UAV-3",
            "kind": "RETURN_TO_BASE"
        }))
        .unwrap();

        let command = ctx.build_command(request).await.unwrap();
        assert!(ctx.router.send_command(command));
        assert!(h.frames.try_recv().is_ok());
        assert_eq!(h.notes.try_recv().unwrap().event_name(), "command-sent");
    }

    #[test]
    fn test_requested_identity_parsing() {
        assert_eq!(requested_identity(&json!(4242)), Ok(4242));
        assert_eq!(requested_identity(&json!(" 1234 ")), Ok(1234));
        assert_eq!(requested_identity(&json!(12)), Ok(12));
        assert_eq!(
            requested_identity(&json!(5_000_000_000u64)),
            Err("identity 5000000000 is outside 1000..=9999".to_string())
        );
        assert!(requested_identity(&json!("UAV-1")).is_err());
        assert!(requested_identity(&Value::Null).is_err());
    }

    #[tokio::test]
    async fn test_launch_from_panel_uses_existing_identity() {
        let h = harness().await;
        let ctx = context(&h);
        h.identity.set_manually(4321, "range officer").await.unwrap();

        let launch = ctx.navigation.prepare_launch().await.unwrap();
        assert_eq!(launch.vehicle_id, Identity::new(4321).unwrap());
        assert_eq!(h.identity.current().await, launch.vehicle_id);
    }
}
