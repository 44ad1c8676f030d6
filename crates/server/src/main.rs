use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{ws::WebSocket, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use clap::Parser;
use control_api::ControlContext;
use device::{Actuator, VideoPublisher};
use futures::StreamExt;
use shared::domain::DeviceSnapshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod app_state;
mod config;
mod lifecycle;
mod session;

use app_state::AppState;
use config::{load_settings, Cli, Settings};
use lifecycle::{
    actuator_for, advertise_host, video_publisher_for, Lifecycle, ShutdownSignals, Started,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        settings.server_bind = bind;
    }

    let actuator = actuator_for(&settings.device_driver)?;
    let video = video_publisher_for(&settings);
    run(settings, actuator, video).await
}

async fn run(
    settings: Settings,
    actuator: Arc<dyn Actuator>,
    video: Arc<dyn VideoPublisher>,
) -> anyhow::Result<()> {
    let signals = ShutdownSignals::install().context("failed to install signal handlers")?;
    let lifecycle = Lifecycle::new(video, &settings);
    let started = lifecycle.start(actuator, &settings).await?;
    tokio::spawn(lifecycle.clone().watch_signals(signals));
    serve(lifecycle, settings, started).await
}

/// Serves the command channel until a shutdown is requested, then tears
/// everything down. A server error takes the same teardown path.
async fn serve(
    lifecycle: Arc<Lifecycle>,
    settings: Settings,
    started: Started,
) -> anyhow::Result<()> {
    let served = accept_sessions(&lifecycle, &settings, started).await;
    if let Err(error) = &served {
        error!(error = %format!("{error:#}"), "command server stopped unexpectedly");
    }
    lifecycle.shutdown().await;
    served
}

async fn accept_sessions(
    lifecycle: &Arc<Lifecycle>,
    settings: &Settings,
    started: Started,
) -> anyhow::Result<()> {
    let Started { device, listener } = started;
    let local_addr = listener
        .local_addr()
        .context("command listener has no local address")?;
    let host = advertise_host(settings, local_addr);
    info!(url = %format!("ws://{host}:{}/ws", local_addr.port()), "command channel listening");
    info!(
        url = %format!("http://{host}:{}{}", settings.video_port, lifecycle.feed_path()),
        "video feed"
    );

    let state = Arc::new(AppState {
        control: ControlContext::new(device, lifecycle.shutdown_sender()),
        sessions: lifecycle.sessions(),
        shutdown: lifecycle.subscribe(),
    });
    let stop = {
        let lifecycle = lifecycle.clone();
        async move { lifecycle.shutdown_requested().await }
    };
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(stop)
        .await
        .context("command server failed")
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<Arc<AppState>>) -> Json<DeviceSnapshot> {
    Json(state.control.device.snapshot())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let guard = state.sessions.enter();
    ws.on_upgrade(move |socket| async move {
        let _guard = guard;
        ws_connection(state, socket).await;
    })
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let (sender, receiver) = socket.split();
    session::run_session(
        state.control.clone(),
        sender,
        receiver,
        state.shutdown.clone(),
        Uuid::new_v4(),
    )
    .await;
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
