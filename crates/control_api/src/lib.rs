use std::sync::Arc;

use device::{DeviceError, DeviceHandle};
use shared::{
    domain::ActionName,
    error::{ApiError, ErrorCode},
    protocol::{Command, Response},
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub mod catalog;

pub use catalog::{ActionCatalog, CatalogEntry, Performance, Step};

#[derive(Clone)]
pub struct ControlContext {
    pub device: Arc<DeviceHandle>,
    pub catalog: Arc<ActionCatalog>,
    /// Raised by the `shutdown` command; the lifecycle manager watches it.
    pub shutdown: watch::Sender<bool>,
}

impl ControlContext {
    pub fn new(device: Arc<DeviceHandle>, shutdown: watch::Sender<bool>) -> Self {
        Self {
            device,
            catalog: Arc::new(ActionCatalog::builtin()),
            shutdown,
        }
    }
}

/// Executes one decoded command.
///
/// This is the error boundary for command processing: every failure comes
/// back as an error [`Response`] for request/response commands and is only
/// logged for fire-and-forget ones, which yield `None`.
pub async fn dispatch(ctx: &ControlContext, command: Command) -> Option<Response> {
    let name = command.name().to_string();
    match execute(ctx, command).await {
        Ok(response) => response,
        Err(error) => {
            warn!(command = %name, code = ?error.code, %error, "command failed");
            Some(Response::error(name, error))
        }
    }
}

async fn execute(ctx: &ControlContext, command: Command) -> Result<Option<Response>, ApiError> {
    let name = command.name().to_string();
    let response = match command {
        Command::HeadMove(pose) => {
            match ctx.device.steer_head(pose) {
                Ok(target) => debug!(
                    yaw = target.yaw,
                    pitch = target.pitch,
                    roll = target.roll,
                    "head target queued"
                ),
                Err(error) => debug!(%error, "head move dropped"),
            }
            return Ok(None);
        }
        Command::NamedAction(action) => perform_action(ctx, action).await?,
        Command::Welcome => perform_action(ctx, ActionName::Welcome).await?,
        Command::Action { name } => {
            let action = ActionName::parse(&name).ok_or(DeviceError::UnsupportedAction(name))?;
            perform_action(ctx, action).await?
        }
        Command::VoiceCommand(text) => {
            info!(voice = %text, "voice command received");
            Response::success(name).with_detail(text)
        }
        Command::Indicator(mode) => match ctx.device.lock().await?.set_indicator(&mode).await {
            Ok(()) => Response::success(name),
            Err(DeviceError::Released) => return Err(DeviceError::Released.into()),
            Err(error) => {
                Response::success(name).with_detail(format!("indicator unchanged: {error}"))
            }
        },
        Command::Speak { clip, volume } => {
            ctx.device.lock().await?.speak(&clip, volume).await?;
            Response::success(name)
        }
        Command::Status => {
            let snapshot = ctx.device.snapshot();
            Response::success(name)
                .with_position(snapshot.head)
                .with_state(snapshot)
        }
        Command::Shutdown => {
            info!("shutdown requested over the control channel");
            ctx.shutdown.send_replace(true);
            Response::success(name)
        }
        Command::Unknown { .. } => {
            return Err(ApiError::new(
                ErrorCode::UnsupportedCommand,
                "unsupported command",
            ))
        }
    };
    Ok(Some(response))
}

async fn perform_action(ctx: &ControlContext, action: ActionName) -> Result<Response, ApiError> {
    let entry = ctx
        .catalog
        .get(action)
        .ok_or_else(|| DeviceError::UnsupportedAction(action.as_str().to_string()))?;
    let ceiling = ctx.device.options().timeouts.action;

    let mut guard = ctx.device.lock().await?;
    let performance = catalog::perform(entry, &mut guard, ceiling).await?;
    drop(guard);

    info!(
        action = action.as_str(),
        steps = performance.steps_run,
        failed = performance.failed.len(),
        "action finished"
    );
    let response = Response::success(action.as_str());
    Ok(match performance.summary() {
        Some(summary) => response.with_detail(summary),
        None => response,
    })
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
