mod codec;
mod config;
mod error;
mod handlers;
mod identity;
mod liveness;
mod navigation;
mod notify;
mod persistence;
mod platforms;
mod registry;
mod router;
mod state;
mod translator;
mod transport;

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use socketioxide::extract::SocketRef;
use socketioxide::SocketIo;
use tokio::sync::{watch, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use config::GatewayConfig;
use handlers::{on_connect, PanelContext};
use identity::IdentityRegistry;
use liveness::{run_staleness_monitor, LivenessTracker};
use navigation::NavigationBridge;
use notify::{run_panel_bridge, Notifier};
use persistence::IdentityStore;
use platforms::PlatformStateCache;
use registry::MessageRegistry;
use router::MessageRouter;
use state::{now_ms, SharedLiveness, SharedPlatforms, SharedTarget};
use translator::RouteTranslator;
use transport::OutboundSender;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tactical-gateway", about = "Training range tactical protocol gateway")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,
    /// Multicast group shared by the range
    #[arg(long)]
    group: Option<Ipv4Addr>,
    /// UDP port for the multicast group
    #[arg(long)]
    udp_port: Option<u16>,
    /// Identity store file
    #[arg(long)]
    identity_file: Option<PathBuf>,
    /// Operator panel HTTP/Socket.IO port
    #[arg(long)]
    panel_port: Option<u16>,
}

impl Args {
    fn apply(&self, config: &mut GatewayConfig) {
        if let Some(group) = self.group {
            config.network.multicast_group = group;
        }
        if let Some(port) = self.udp_port {
            config.network.udp_port = port;
        }
        if let Some(path) = &self.identity_file {
            config.identity.store_path = path.clone();
        }
        if let Some(port) = self.panel_port {
            config.panel.port = port;
        }
    }
}

// ─── HTTP Endpoints ───────────────────────────────────────────────────────────

async fn time_sync() -> Json<Value> {
    Json(json!({ "serverTime": now_ms() }))
}

async fn health(State(ctx): State<PanelContext>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "identity": ctx.identity.peek().await,
        "router": ctx.router.stats(),
    }))
}

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tactical_gateway=info,socketioxide=warn".into()),
        )
        .init();

    let args = Args::parse();
    let mut cfg = GatewayConfig::load(&args.config)?;
    args.apply(&mut cfg);
    cfg.validate()?;

    info!("Tactical gateway starting");

    // Identity
    let store = IdentityStore::new(&cfg.identity.store_path);
    let identity = Arc::new(IdentityRegistry::open(store, cfg.identity.history_limit).await);
    match identity.peek().await {
        Some(id) => info!("Session identity {id} restored"),
        None => info!("No session identity yet; one is generated on first use"),
    }

    // Shared state
    let liveness: SharedLiveness = Arc::new(RwLock::new(LivenessTracker::new()));
    let platforms: SharedPlatforms = Arc::new(RwLock::new(PlatformStateCache::new()));
    let target: SharedTarget = Arc::new(RwLock::new(None));

    let (notifier, notes_rx) = Notifier::channel(cfg.notify.queue_capacity);
    let (outbound, frames_rx) = OutboundSender::channel(cfg.notify.outbound_capacity);

    let translator = RouteTranslator::new(
        identity.clone(),
        platforms.clone(),
        target.clone(),
        cfg.translation.fallback_speed_mps,
    );
    let router = Arc::new(MessageRouter::new(
        MessageRegistry::standard(),
        liveness.clone(),
        platforms.clone(),
        translator,
        notifier.clone(),
        outbound,
        cfg.network.protocol_revision,
    )
    .with_local_source(cfg.heartbeat.source_id.clone()));

    let socket = Arc::new(transport::bind_multicast(&cfg.network).with_context(|| {
        format!(
            "failed to join multicast {}:{}",
            cfg.network.multicast_group, cfg.network.udp_port
        )
    })?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Operator panel
    let (socket_layer, io) = SocketIo::builder().build_layer();
    let panel = PanelContext {
        identity: identity.clone(),
        router: router.clone(),
        liveness: liveness.clone(),
        platforms: platforms.clone(),
        target: target.clone(),
        navigation: Arc::new(NavigationBridge::new(
            identity.clone(),
            cfg.navigation.config_path.clone(),
            cfg.network.multicast_group,
            cfg.network.udp_port,
        )),
        stale_threshold_ms: cfg.liveness.stale_threshold_ms,
    };

    let panel_sock = panel.clone();
    io.ns("/", move |socket: SocketRef| {
        let ctx = panel_sock.clone();
        async move {
            on_connect(socket, ctx).await;
        }
    });

    tokio::spawn(run_panel_bridge(
        notes_rx,
        identity.subscribe(),
        io.clone(),
        shutdown_rx.clone(),
    ));

    // Range tasks
    let receive_task = tokio::spawn(transport::run_receive_loop(
        socket.clone(),
        router.clone(),
        cfg.network.recv_buffer_bytes,
        shutdown_rx.clone(),
    ));
    let sender_task = tokio::spawn(transport::run_sender(
        socket.clone(),
        transport::group_addr(&cfg.network),
        frames_rx,
        shutdown_rx.clone(),
    ));
    tokio::spawn(transport::run_heartbeat(
        router.clone(),
        cfg.heartbeat.source_id.clone(),
        Duration::from_millis(cfg.heartbeat.interval_ms),
        shutdown_rx.clone(),
    ));
    tokio::spawn(run_staleness_monitor(
        liveness.clone(),
        notifier,
        cfg.liveness.stale_threshold_ms,
        Duration::from_millis(cfg.liveness.check_interval_ms),
        shutdown_rx.clone(),
    ));

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!("Could not listen for Ctrl-C ({e}); shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    // CORS: panels are served from other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/sync", get(time_sync))
        .route("/health", get(health))
        .with_state(panel)
        .layer(socket_layer)
        .layer(cors);

    let addr = format!("0.0.0.0:{}", cfg.panel.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind panel listener on {addr}"))?;
    info!("Operator panel listening on {addr}");

    let mut http_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = http_shutdown.changed().await;
        })
        .await
        .context("panel server failed")?;

    let _ = receive_task.await;
    let _ = sender_task.await;
    info!("Tactical gateway stopped");
    Ok(())
}
