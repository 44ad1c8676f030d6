use std::process::Stdio;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::{process::Child, sync::Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct FlipOptions {
    #[serde(default)]
    pub vflip: bool,
    #[serde(default)]
    pub hflip: bool,
}

/// Camera capture and MJPEG streaming, owned by the lifecycle manager.
#[async_trait]
pub trait VideoPublisher: Send + Sync {
    async fn start(&self, flip: FlipOptions) -> anyhow::Result<()>;
    /// Serves the captured stream over HTTP on `port`.
    async fn display(&self, port: u16) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;

    /// HTTP path under which the feed is served.
    fn feed_path(&self) -> &str {
        "/mjpg"
    }
}

/// Used when no capture command is configured.
#[derive(Debug, Default)]
pub struct DisabledVideoPublisher;

#[async_trait]
impl VideoPublisher for DisabledVideoPublisher {
    async fn start(&self, _flip: FlipOptions) -> anyhow::Result<()> {
        info!("video capture disabled");
        Ok(())
    }

    async fn display(&self, _port: u16) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Runs an external streamer (for example `mjpg_streamer`) as a child process.
///
/// Arguments may contain the placeholders `{port}`, `{vflip}` and `{hflip}`,
/// substituted when the stream is displayed.
#[derive(Debug)]
pub struct ProcessVideoPublisher {
    program: String,
    args: Vec<String>,
    flip: Mutex<Option<FlipOptions>>,
    child: Mutex<Option<Child>>,
}

impl ProcessVideoPublisher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            flip: Mutex::new(None),
            child: Mutex::new(None),
        }
    }

    /// Splits a command line on whitespace into program and arguments.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    fn render_args(&self, port: u16, flip: FlipOptions) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{port}", &port.to_string())
                    .replace("{vflip}", &flip.vflip.to_string())
                    .replace("{hflip}", &flip.hflip.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl VideoPublisher for ProcessVideoPublisher {
    async fn start(&self, flip: FlipOptions) -> anyhow::Result<()> {
        *self.flip.lock().await = Some(flip);
        Ok(())
    }

    async fn display(&self, port: u16) -> anyhow::Result<()> {
        let Some(flip) = *self.flip.lock().await else {
            bail!("video stream displayed before it was started");
        };

        let mut child = self.child.lock().await;
        if child.is_some() {
            return Ok(());
        }
        let spawned = tokio::process::Command::new(&self.program)
            .args(self.render_args(port, flip))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to launch video streamer '{}'", self.program))?;
        info!(program = %self.program, pid = spawned.id(), port, "video streamer running");
        *child = Some(spawned);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        if let Err(error) = child.start_kill() {
            warn!(%error, "video streamer already gone");
        }
        let status = child
            .wait()
            .await
            .context("failed to reap video streamer")?;
        info!(%status, "video streamer stopped");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/video_tests.rs"]
mod tests;
