//! Startup and shutdown of the device, the video publisher and the listener.
//!
//! Startup acquires the device, starts the video publisher, then binds the
//! command listener. A failing step tears down whatever already started.
//! Shutdown runs at most once no matter how many triggers fire: the shutdown
//! command, SIGINT/SIGTERM, or a fatal server error.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket},
    sync::{Arc, OnceLock},
    time::Duration,
};

use anyhow::{bail, Context};
use device::{
    Actuator, DeviceHandle, DisabledVideoPublisher, ProcessVideoPublisher, SimulatedActuator,
    VideoPublisher,
};
use shared::domain::IndicatorMode;
use tokio::{
    net::TcpListener,
    sync::{watch, OnceCell},
    time::timeout,
};
use tracing::{debug, error, info, warn};

use crate::{config::Settings, session::SessionTracker};

pub(crate) struct Started {
    pub(crate) device: Arc<DeviceHandle>,
    pub(crate) listener: TcpListener,
}

pub(crate) struct Lifecycle {
    shutdown_tx: watch::Sender<bool>,
    sessions: SessionTracker,
    video: Arc<dyn VideoPublisher>,
    device: OnceLock<Arc<DeviceHandle>>,
    finished: OnceCell<()>,
    drain_timeout: Duration,
    indicator_timeout: Duration,
}

impl Lifecycle {
    pub(crate) fn new(video: Arc<dyn VideoPublisher>, settings: &Settings) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            shutdown_tx,
            sessions: SessionTracker::new(),
            video,
            device: OnceLock::new(),
            finished: OnceCell::new(),
            drain_timeout: settings.drain_timeout,
            indicator_timeout: settings.timeouts.indicator,
        })
    }

    pub(crate) fn sessions(&self) -> SessionTracker {
        self.sessions.clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub(crate) fn feed_path(&self) -> &str {
        self.video.feed_path()
    }

    /// Handed to the control context so the `shutdown` command can raise it.
    pub(crate) fn shutdown_sender(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Runs every startup step, or tears down and returns the first error.
    pub(crate) async fn start(
        &self,
        actuator: Arc<dyn Actuator>,
        settings: &Settings,
    ) -> anyhow::Result<Started> {
        match self.try_start(actuator, settings).await {
            Ok(started) => Ok(started),
            Err(error) => {
                error!(error = %format!("{error:#}"), "startup failed");
                self.shutdown().await;
                Err(error)
            }
        }
    }

    async fn try_start(
        &self,
        actuator: Arc<dyn Actuator>,
        settings: &Settings,
    ) -> anyhow::Result<Started> {
        let device = DeviceHandle::acquire(actuator, settings.device_options())
            .await
            .context("failed to acquire the robot device")?;
        let device = self.device.get_or_init(|| device).clone();
        info!(driver = %settings.device_driver, "device acquired");

        self.video
            .start(settings.video_flip)
            .await
            .context("failed to start video capture")?;
        self.video
            .display(settings.video_port)
            .await
            .context("failed to publish the video stream")?;

        let listener = TcpListener::bind(&settings.server_bind)
            .await
            .with_context(|| format!("failed to bind {}", settings.server_bind))?;

        Ok(Started { device, listener })
    }

    /// Resolves once a shutdown has been requested by any trigger.
    pub(crate) async fn shutdown_requested(&self) {
        let mut shutdown = self.subscribe();
        let _ = shutdown.wait_for(|stop| *stop).await;
    }

    /// Idempotent teardown. Concurrent callers wait for the first one.
    pub(crate) async fn shutdown(&self) {
        self.finished.get_or_init(|| self.teardown()).await;
    }

    async fn teardown(&self) {
        info!("shutting down");
        self.shutdown_tx.send_replace(true);

        if let Some(device) = self.device.get() {
            match timeout(self.indicator_timeout, device.lock()).await {
                Ok(Ok(mut guard)) => {
                    // set_indicator logs its own failure
                    let _ = guard.set_indicator(&IndicatorMode::off()).await;
                }
                Ok(Err(error)) => debug!(%error, "skipping indicator reset"),
                Err(_) => warn!("device still busy; skipping indicator reset"),
            }
            match device.release().await {
                Ok(true) => info!("device released"),
                Ok(false) => debug!("device was already released"),
                Err(error) => error!(%error, "failed to release device"),
            }
        }

        if let Err(error) = self.video.stop().await {
            error!(error = %format!("{error:#}"), "failed to stop video capture");
        }

        if !self.sessions.drained(self.drain_timeout).await {
            warn!(
                open = self.sessions.active(),
                "sessions still open after drain timeout"
            );
        }
        info!("shutdown complete");
    }

    /// Waits for SIGINT or SIGTERM, then shuts down.
    pub(crate) async fn watch_signals(self: Arc<Self>, mut signals: ShutdownSignals) {
        tokio::select! {
            received = signals.recv() => match received {
                Ok(signal) => info!(signal, "signal received"),
                Err(error) => {
                    error!(%error, "failed to listen for signals");
                    return;
                }
            },
            _ = self.shutdown_requested() => return,
        }
        self.shutdown().await;
    }
}

/// Process signals that request a shutdown. Handlers are registered when
/// this is built, so a signal arriving before anyone waits is not lost.
pub(crate) struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    #[cfg(unix)]
    pub(crate) fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub(crate) fn install() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> std::io::Result<&'static str> {
        tokio::select! {
            _ = self.interrupt.recv() => Ok("SIGINT"),
            _ = self.terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> std::io::Result<&'static str> {
        tokio::signal::ctrl_c().await?;
        Ok("Ctrl+C")
    }
}

pub(crate) fn actuator_for(driver: &str) -> anyhow::Result<Arc<dyn Actuator>> {
    match driver {
        "simulated" => Ok(Arc::new(SimulatedActuator::realistic())),
        other => bail!("unknown device driver '{other}'"),
    }
}

pub(crate) fn video_publisher_for(settings: &Settings) -> Arc<dyn VideoPublisher> {
    match settings
        .video_command
        .as_deref()
        .and_then(ProcessVideoPublisher::from_command_line)
    {
        Some(publisher) => Arc::new(publisher),
        None => Arc::new(DisabledVideoPublisher),
    }
}

/// Host clients should use to reach this server.
///
/// A configured host wins. An unspecified bind address is replaced by the
/// outward facing IPv4 address; the UDP "connect" only selects a route and
/// sends nothing.
pub(crate) fn advertise_host(settings: &Settings, local_addr: SocketAddr) -> String {
    if let Some(host) = &settings.advertise_host {
        return host.clone();
    }
    if !local_addr.ip().is_unspecified() {
        return local_addr.ip().to_string();
    }
    outward_ipv4()
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .to_string()
}

fn outward_ipv4() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

#[cfg(test)]
#[path = "tests/lifecycle_tests.rs"]
mod tests;
