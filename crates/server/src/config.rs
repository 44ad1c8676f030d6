use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use device::{DeviceOptions, DeviceTimeouts, FlipOptions};
use serde::Deserialize;
use shared::domain::HeadLimits;

pub const DEFAULT_CONFIG_PATH: &str = "robot.toml";

#[derive(Debug, Parser)]
#[command(name = "robot-server", about = "Remote control server for a quadruped robot")]
pub struct Cli {
    /// Settings file; `robot.toml` in the working directory when omitted.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
    /// Overrides the command channel bind address.
    #[arg(long)]
    pub bind: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_bind: String,
    pub advertise_host: Option<String>,
    pub video_port: u16,
    pub video_command: Option<String>,
    pub video_flip: FlipOptions,
    pub device_driver: String,
    pub head_speed: u8,
    pub head_pitch_comp: f64,
    pub head_limits: HeadLimits,
    pub timeouts: DeviceTimeouts,
    pub drain_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "0.0.0.0:8765".into(),
            advertise_host: None,
            video_port: 9000,
            video_command: None,
            video_flip: FlipOptions::default(),
            device_driver: "simulated".into(),
            head_speed: 80,
            head_pitch_comp: 0.0,
            head_limits: HeadLimits::default(),
            timeouts: DeviceTimeouts::default(),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl Settings {
    pub fn device_options(&self) -> DeviceOptions {
        DeviceOptions {
            limits: self.head_limits,
            timeouts: self.timeouts,
            pitch_comp: self.head_pitch_comp,
            head_speed: self.head_speed,
        }
    }
}

/// Layout of the settings file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    bind_addr: Option<String>,
    advertise_host: Option<String>,
    video_port: Option<u16>,
    video_command: Option<String>,
    video_flip: Option<FlipOptions>,
    device_driver: Option<String>,
    head_speed: Option<u8>,
    head_pitch_comp: Option<f64>,
    head_limits: Option<HeadLimits>,
    action_timeout_ms: Option<u64>,
    head_timeout_ms: Option<u64>,
    indicator_timeout_ms: Option<u64>,
    speech_timeout_ms: Option<u64>,
    drain_timeout_ms: Option<u64>,
}

/// Defaults, then the settings file, then the process environment.
///
/// A missing default file is fine; a missing file named explicitly is not.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let path = config_path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
    match fs::read_to_string(path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?,
        Err(error) if error.kind() == io::ErrorKind::NotFound && config_path.is_none() => {}
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file: FileSettings = toml::from_str(raw)?;

    if let Some(v) = file.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file.advertise_host {
        settings.advertise_host = Some(v);
    }
    if let Some(v) = file.video_port {
        settings.video_port = v;
    }
    if let Some(v) = file.video_command {
        settings.video_command = Some(v);
    }
    if let Some(v) = file.video_flip {
        settings.video_flip = v;
    }
    if let Some(v) = file.device_driver {
        settings.device_driver = v;
    }
    if let Some(v) = file.head_speed {
        settings.head_speed = v;
    }
    if let Some(v) = file.head_pitch_comp {
        settings.head_pitch_comp = v;
    }
    if let Some(v) = file.head_limits {
        settings.head_limits = v;
    }
    if let Some(v) = file.action_timeout_ms {
        settings.timeouts.action = Duration::from_millis(v);
    }
    if let Some(v) = file.head_timeout_ms {
        settings.timeouts.head = Duration::from_millis(v);
    }
    if let Some(v) = file.indicator_timeout_ms {
        settings.timeouts.indicator = Duration::from_millis(v);
    }
    if let Some(v) = file.speech_timeout_ms {
        settings.timeouts.speech = Duration::from_millis(v);
    }
    if let Some(v) = file.drain_timeout_ms {
        settings.drain_timeout = Duration::from_millis(v);
    }
    Ok(())
}

/// Environment overrides. Unparseable numbers keep the previous value.
fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("ROBOT_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = var("ROBOT_ADVERTISE_HOST") {
        settings.advertise_host = Some(v);
    }

    if let Some(v) = var("ROBOT_VIDEO_PORT") {
        if let Ok(parsed) = v.parse::<u16>() {
            settings.video_port = parsed;
        }
    }
    if let Some(v) = var("ROBOT_VIDEO_COMMAND") {
        settings.video_command = Some(v).filter(|command| !command.trim().is_empty());
    }

    if let Some(v) = var("ROBOT_DEVICE_DRIVER") {
        settings.device_driver = v;
    }

    if let Some(v) = var("ROBOT_HEAD_SPEED") {
        if let Ok(parsed) = v.parse::<u8>() {
            settings.head_speed = parsed;
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
