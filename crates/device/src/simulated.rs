//! Hardware-free driver that stands in for the real platform.
//!
//! It records every call, reports how many calls were ever in flight at the
//! same time, and can be told to fail or stall on demand.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use anyhow::bail;
use async_trait::async_trait;
use shared::domain::{HeadPose, IndicatorMode};
use tracing::debug;

use crate::{ActionParams, Actuator};

const GAIT_ACTIONS: &[&str] = &[
    "stand",
    "sit",
    "lie",
    "lie_with_legs_up",
    "half_sit",
    "forward",
    "backward",
    "turn_left",
    "turn_right",
    "trot",
    "stretch",
    "push_up",
    "doze_off",
    "nod_lethargy",
    "shake_head",
    "tilting_head",
    "head_bark",
    "wag_tail",
    "head_up_down",
];

const PRESETS: &[&str] = &["handshake", "high_five", "pant", "body_twisting", "howling"];

#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCall {
    HeadMove { pose: HeadPose, speed: u8 },
    Action { name: String, params: ActionParams },
    Preset { name: String },
    Indicator(IndicatorMode),
    Speak { clip: String, volume: u8 },
    WaitAllDone,
    Close,
}

#[derive(Debug, Default)]
pub struct SimulatedActuator {
    calls: Mutex<Vec<ActuatorCall>>,
    failing: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    call_latency: Duration,
    motion_time: Duration,
    stalled: AtomicBool,
}

impl SimulatedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timings close enough to the real robot for manual testing.
    pub fn realistic() -> Self {
        Self::new()
            .with_latency(Duration::from_millis(20))
            .with_motion_time(Duration::from_millis(800))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.call_latency = latency;
        self
    }

    pub fn with_motion_time(mut self, motion_time: Duration) -> Self {
        self.motion_time = motion_time;
        self
    }

    /// Makes every call whose action, preset or operation name is `name` fail.
    pub fn fail_on(&self, name: &str) {
        lock(&self.failing).insert(name.to_string());
    }

    /// Makes `wait_all_done` never resolve.
    pub fn stall_completion(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        lock(&self.calls).clone()
    }

    pub fn head_moves(&self) -> Vec<HeadPose> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                ActuatorCall::HeadMove { pose, .. } => Some(*pose),
                _ => None,
            })
            .collect()
    }

    /// Gait actions and presets in issue order.
    pub fn motions(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                ActuatorCall::Action { name, .. } | ActuatorCall::Preset { name } => {
                    Some(name.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, ActuatorCall::Close))
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn call(&self, key: &str, call: ActuatorCall) -> anyhow::Result<()> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);
        self.latency().await;
        self.record(key, call)
    }

    async fn latency(&self) {
        if !self.call_latency.is_zero() {
            tokio::time::sleep(self.call_latency).await;
        }
    }

    fn record(&self, key: &str, call: ActuatorCall) -> anyhow::Result<()> {
        debug!(?call, "simulated driver call");
        lock(&self.calls).push(call);
        if lock(&self.failing).contains(key) {
            bail!("simulated failure in {key}");
        }
        Ok(())
    }
}

#[async_trait]
impl Actuator for SimulatedActuator {
    async fn head_move(&self, pose: HeadPose, speed: u8) -> anyhow::Result<()> {
        self.call("head_move", ActuatorCall::HeadMove { pose, speed })
            .await
    }

    async fn do_action(&self, name: &str, params: ActionParams) -> anyhow::Result<()> {
        if !GAIT_ACTIONS.contains(&name) {
            bail!("unsupported action: {name}");
        }
        let call = ActuatorCall::Action {
            name: name.to_string(),
            params,
        };
        self.call(name, call).await
    }

    async fn run_preset(&self, name: &str, _params: ActionParams) -> anyhow::Result<()> {
        if !PRESETS.contains(&name) {
            bail!("unsupported preset: {name}");
        }
        let call = ActuatorCall::Preset {
            name: name.to_string(),
        };
        self.call(name, call).await
    }

    async fn set_indicator(&self, mode: &IndicatorMode) -> anyhow::Result<()> {
        self.call("set_indicator", ActuatorCall::Indicator(mode.clone()))
            .await
    }

    async fn speak(&self, clip: &str, volume: u8) -> anyhow::Result<()> {
        let call = ActuatorCall::Speak {
            clip: clip.to_string(),
            volume,
        };
        self.call("speak", call).await
    }

    async fn wait_all_done(&self) -> anyhow::Result<()> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);
        self.latency().await;
        self.record("wait_all_done", ActuatorCall::WaitAllDone)?;
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.motion_time.is_zero() {
            tokio::time::sleep(self.motion_time).await;
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.call("close", ActuatorCall::Close).await
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, high_water: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        high_water.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
