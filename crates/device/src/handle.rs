use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use chrono::Utc;
use shared::domain::{DeviceSnapshot, HeadLimits, HeadPose, IndicatorMode};
use tokio::{
    sync::{watch, Mutex, MutexGuard},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{ActionParams, Actuator, DeviceError};

/// Ceilings after which a device call is considered complete even though the
/// driver has not reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTimeouts {
    pub action: Duration,
    pub head: Duration,
    pub indicator: Duration,
    pub speech: Duration,
}

impl Default for DeviceTimeouts {
    fn default() -> Self {
        Self {
            action: Duration::from_secs(5),
            head: Duration::from_secs(3),
            indicator: Duration::from_secs(3),
            speech: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceOptions {
    pub limits: HeadLimits,
    pub timeouts: DeviceTimeouts,
    /// Added to every requested pitch before clamping.
    pub pitch_comp: f64,
    pub head_speed: u8,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            limits: HeadLimits::default(),
            timeouts: DeviceTimeouts::default(),
            pitch_comp: 0.0,
            head_speed: 80,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done,
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
struct HeadTarget {
    pose: HeadPose,
    speed: u8,
}

/// Sole owner of the connection to the robot platform.
///
/// Every driver call happens while holding the exclusive lock handed out by
/// [`DeviceHandle::lock`], so two sessions can never interleave calls into
/// the actuator layer. Fire-and-forget head steering goes through
/// [`DeviceHandle::steer_head`]: targets are coalesced (latest wins) and
/// applied by a background task under the same lock.
pub struct DeviceHandle {
    actuator: Arc<dyn Actuator>,
    exclusive: Mutex<()>,
    state: watch::Sender<DeviceSnapshot>,
    steering: watch::Sender<Option<HeadTarget>>,
    released: AtomicBool,
    options: DeviceOptions,
}

impl DeviceHandle {
    /// Takes ownership of the driver and parks the head at the neutral pose.
    pub async fn acquire(
        actuator: Arc<dyn Actuator>,
        options: DeviceOptions,
    ) -> Result<Arc<Self>, DeviceError> {
        let (state, _) = watch::channel(DeviceSnapshot::default());
        let (steering, targets) = watch::channel(None);
        let device = Arc::new(Self {
            actuator,
            exclusive: Mutex::new(()),
            state,
            steering,
            released: AtomicBool::new(false),
            options,
        });

        let parked = match device.lock().await {
            Ok(mut guard) => guard
                .move_head(HeadPose::default(), options.head_speed)
                .await
                .map(|_| ()),
            Err(error) => Err(error),
        };
        if let Err(error) = parked {
            if let Err(close_error) = device.release().await {
                warn!(%close_error, "failed to close driver after failed acquisition");
            }
            return Err(error);
        }

        tokio::spawn(steer_head_loop(Arc::downgrade(&device), targets));
        info!(head_speed = options.head_speed, "device acquired");
        Ok(device)
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    /// Waits for exclusive access to the driver.
    pub async fn lock(&self) -> Result<DeviceGuard<'_>, DeviceError> {
        let exclusive = self.exclusive.lock().await;
        if self.is_released() {
            return Err(DeviceError::Released);
        }
        Ok(DeviceGuard {
            device: self,
            _exclusive: exclusive,
        })
    }

    /// Queues a head target without waiting for the move. Returns the clamped
    /// pose that will be sent to the driver.
    pub fn steer_head(&self, pose: HeadPose) -> Result<HeadPose, DeviceError> {
        if self.is_released() {
            return Err(DeviceError::Released);
        }
        self.steering.send_replace(Some(HeadTarget {
            pose,
            speed: self.options.head_speed,
        }));
        Ok(self.target_pose(pose))
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.state.borrow().clone()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Closes the driver. Only the first call does any work and returns
    /// `true`; later calls return `false`.
    pub async fn release(&self) -> Result<bool, DeviceError> {
        let _exclusive = self.exclusive.lock().await;
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        self.update(|snapshot| {
            snapshot.released = true;
            snapshot.busy = false;
        });
        self.steering.send_replace(None);

        info!("releasing device");
        bounded(
            "close",
            self.options.timeouts.action,
            self.actuator.close(),
        )
        .await?;
        Ok(true)
    }

    fn target_pose(&self, pose: HeadPose) -> HeadPose {
        let compensated = HeadPose {
            pitch: pose.pitch + self.options.pitch_comp,
            ..pose
        };
        self.options.limits.clamp(compensated)
    }

    fn update(&self, change: impl FnOnce(&mut DeviceSnapshot)) {
        self.state.send_modify(|snapshot| {
            change(snapshot);
            snapshot.updated_at = Utc::now();
        });
    }
}

/// Exclusive access to the driver; dropping it lets the next caller in.
pub struct DeviceGuard<'a> {
    device: &'a DeviceHandle,
    _exclusive: MutexGuard<'a, ()>,
}

impl DeviceGuard<'_> {
    /// Clamps the pose to the mechanical range and issues the move.
    pub async fn move_head(
        &mut self,
        pose: HeadPose,
        speed: u8,
    ) -> Result<HeadPose, DeviceError> {
        let target = self.device.target_pose(pose);
        bounded(
            "head_move",
            self.device.options.timeouts.head,
            self.device.actuator.head_move(target, speed),
        )
        .await?;
        self.device.update(|snapshot| snapshot.head = target);
        Ok(target)
    }

    /// Queues a gait action without waiting for it to finish.
    pub async fn start_action(
        &mut self,
        name: &str,
        params: ActionParams,
    ) -> Result<(), DeviceError> {
        self.device.update(|snapshot| snapshot.busy = true);
        let issued = bounded(
            "do_action",
            self.device.options.timeouts.action,
            self.device.actuator.do_action(name, params),
        )
        .await;
        match issued {
            Ok(_) => {
                self.device
                    .update(|snapshot| snapshot.posture = Some(name.to_string()));
                Ok(())
            }
            Err(error) => {
                self.device.update(|snapshot| snapshot.busy = false);
                Err(error)
            }
        }
    }

    /// Runs a gait action to completion; the motion counts as finished once
    /// `limit` elapses.
    pub async fn run_action(
        &mut self,
        name: &str,
        params: ActionParams,
        limit: Duration,
    ) -> Result<Completion, DeviceError> {
        self.start_action(name, params).await?;
        self.wait_idle(limit).await
    }

    /// Starts a preset routine (handshake, pant, ...) without waiting.
    pub async fn run_preset(
        &mut self,
        name: &str,
        params: ActionParams,
    ) -> Result<(), DeviceError> {
        self.device.update(|snapshot| snapshot.busy = true);
        let issued = bounded(
            "run_preset",
            self.device.options.timeouts.action,
            self.device.actuator.run_preset(name, params),
        )
        .await;
        if issued.is_err() {
            self.device.update(|snapshot| snapshot.busy = false);
        }
        issued.map(|_| ())
    }

    /// Waits for queued motion to finish. A driver that never signals
    /// completion is treated as done once `limit` elapses.
    pub async fn wait_idle(&mut self, limit: Duration) -> Result<Completion, DeviceError> {
        let waited = timeout(limit, self.device.actuator.wait_all_done()).await;
        self.device.update(|snapshot| snapshot.busy = false);
        match waited {
            Ok(Ok(())) => Ok(Completion::Done),
            Ok(Err(error)) => Err(DeviceError::driver("wait_all_done", error)),
            Err(_) => {
                debug!(?limit, "no completion signal from driver; treating motion as done");
                Ok(Completion::TimedOut)
            }
        }
    }

    pub async fn set_indicator(&mut self, mode: &IndicatorMode) -> Result<(), DeviceError> {
        let result = bounded(
            "set_indicator",
            self.device.options.timeouts.indicator,
            self.device.actuator.set_indicator(mode),
        )
        .await;
        match result {
            Ok(_) => {
                let mode = mode.clone();
                self.device.update(|snapshot| snapshot.indicator = mode);
                Ok(())
            }
            Err(error) => {
                warn!(%error, style = mode.style.as_str(), "indicator update failed");
                Err(error)
            }
        }
    }

    pub async fn speak(&mut self, clip: &str, volume: u8) -> Result<(), DeviceError> {
        bounded(
            "speak",
            self.device.options.timeouts.speech,
            self.device.actuator.speak(clip, volume),
        )
        .await
        .map(|_| ())
    }

    /// Sleeps while keeping exclusive access.
    pub async fn pause(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

async fn bounded<F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Result<Completion, DeviceError>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match timeout(limit, call).await {
        Ok(Ok(())) => Ok(Completion::Done),
        Ok(Err(error)) => Err(DeviceError::driver(operation, error)),
        Err(_) => {
            warn!(operation, ?limit, "device call hit its ceiling; treating as complete");
            Ok(Completion::TimedOut)
        }
    }
}

async fn steer_head_loop(
    device: Weak<DeviceHandle>,
    mut targets: watch::Receiver<Option<HeadTarget>>,
) {
    while targets.changed().await.is_ok() {
        let Some(device) = device.upgrade() else {
            break;
        };
        if device.is_released() {
            break;
        }
        let Some(target) = *targets.borrow_and_update() else {
            continue;
        };

        let moved = match device.lock().await {
            Ok(mut guard) => guard.move_head(target.pose, target.speed).await,
            Err(error) => Err(error),
        };
        match moved {
            Ok(applied) => debug!(
                yaw = applied.yaw,
                pitch = applied.pitch,
                roll = applied.roll,
                "head steered"
            ),
            Err(DeviceError::Released) => break,
            Err(error) => warn!(%error, "head steering move failed"),
        }
    }
    debug!("head steering stopped");
}

#[cfg(test)]
#[path = "tests/handle_tests.rs"]
mod tests;
