use async_trait::async_trait;
use shared::domain::{HeadPose, IndicatorMode};

mod error;
mod handle;
mod simulated;
mod video;

pub use error::DeviceError;
pub use handle::{Completion, DeviceGuard, DeviceHandle, DeviceOptions, DeviceTimeouts};
pub use simulated::{ActuatorCall, SimulatedActuator};
pub use video::{DisabledVideoPublisher, FlipOptions, ProcessVideoPublisher, VideoPublisher};

/// Tuning knobs forwarded verbatim to the gait driver.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActionParams {
    pub speed: Option<u8>,
    pub step_count: Option<u32>,
    pub pitch_comp: Option<f64>,
    pub volume: Option<u8>,
}

impl ActionParams {
    pub const fn speed(speed: u8) -> Self {
        Self {
            speed: Some(speed),
            step_count: None,
            pitch_comp: None,
            volume: None,
        }
    }

    pub const fn with_steps(mut self, step_count: u32) -> Self {
        self.step_count = Some(step_count);
        self
    }
}

/// Low-level motor, light and speaker driver of the robot platform.
///
/// Implementations are not reentrant: callers must go through
/// [`DeviceHandle`], which never issues two calls at once. `do_action` and
/// `run_preset` return once the motion is queued; `wait_all_done` resolves
/// when the queued motion has finished.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn head_move(&self, pose: HeadPose, speed: u8) -> anyhow::Result<()>;
    async fn do_action(&self, name: &str, params: ActionParams) -> anyhow::Result<()>;
    async fn run_preset(&self, name: &str, params: ActionParams) -> anyhow::Result<()>;
    async fn set_indicator(&self, mode: &IndicatorMode) -> anyhow::Result<()>;
    async fn speak(&self, clip: &str, volume: u8) -> anyhow::Result<()>;
    async fn wait_all_done(&self) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;
}
