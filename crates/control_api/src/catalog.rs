//! Static table of named behaviors.
//!
//! An entry is either one device call or a choreography: an ordered list of
//! steps run back to back under a single exclusive lock. Choreography is
//! best-effort, so a failing step is logged and the next one still runs.

use std::{collections::HashMap, time::Duration};

use device::{ActionParams, DeviceError, DeviceGuard};
use shared::domain::{ActionName, Color, HeadPose, IndicatorMode, IndicatorStyle};
use tracing::{debug, warn};

const GREETING_CLIP: &str = "greeting";
const HOWL_CLIP: &str = "howling";

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Queues a gait action. As a single entry it also waits for completion.
    Action {
        name: &'static str,
        params: ActionParams,
    },
    /// Starts a preset routine. As a single entry it also waits for completion.
    Preset {
        name: &'static str,
        params: ActionParams,
    },
    Head {
        pose: HeadPose,
        speed: u8,
    },
    Indicator(IndicatorMode),
    Speak {
        clip: &'static str,
        volume: u8,
    },
    WaitIdle,
    Pause(Duration),
}

impl Step {
    fn label(&self) -> String {
        match self {
            Self::Action { name, .. } | Self::Preset { name, .. } => (*name).to_string(),
            Self::Head { .. } => "head_move".into(),
            Self::Indicator(mode) => format!("indicator:{}", mode.style.as_str()),
            Self::Speak { clip, .. } => format!("speak:{clip}"),
            Self::WaitIdle => "wait_idle".into(),
            Self::Pause(_) => "pause".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEntry {
    Single(Step),
    Sequence(Vec<Step>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub index: usize,
    pub step: String,
    pub error: DeviceError,
}

#[derive(Debug, Default)]
pub struct Performance {
    pub steps_run: usize,
    pub failed: Vec<StepFailure>,
}

impl Performance {
    pub fn summary(&self) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }
        let steps = self
            .failed
            .iter()
            .map(|failure| failure.step.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!(
            "completed with {} failed step(s): {steps}",
            self.failed.len()
        ))
    }
}

#[derive(Debug)]
pub struct ActionCatalog {
    entries: HashMap<ActionName, CatalogEntry>,
}

impl ActionCatalog {
    pub fn builtin() -> Self {
        let mut entries = HashMap::new();
        entries.insert(ActionName::Sit, gait("sit", ActionParams::speed(50)));
        entries.insert(ActionName::Stand, gait("stand", ActionParams::speed(50)));
        entries.insert(ActionName::Lie, gait("lie", ActionParams::speed(50)));
        entries.insert(ActionName::HalfSit, gait("half_sit", ActionParams::speed(50)));
        entries.insert(ActionName::Stretch, gait("stretch", ActionParams::speed(50)));
        entries.insert(
            ActionName::WagTail,
            gait("wag_tail", ActionParams::speed(100).with_steps(5)),
        );
        entries.insert(ActionName::Handshake, preset("handshake", ActionParams::default()));
        entries.insert(ActionName::HighFive, preset("high_five", ActionParams::default()));
        entries.insert(ActionName::Pant, preset("pant", pant_params()));
        entries.insert(
            ActionName::BodyTwist,
            preset("body_twisting", ActionParams::default()),
        );
        entries.insert(ActionName::Welcome, CatalogEntry::Sequence(welcome()));
        entries.insert(ActionName::Howl, CatalogEntry::Sequence(howl()));
        entries.insert(ActionName::WakeUp, CatalogEntry::Sequence(wake_up()));
        Self { entries }
    }

    pub fn get(&self, action: ActionName) -> Option<&CatalogEntry> {
        self.entries.get(&action)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Runs one catalog entry on an already locked device.
///
/// A single entry fails with the device error; a sequence only fails when
/// the device is released mid-way.
pub async fn perform(
    entry: &CatalogEntry,
    guard: &mut DeviceGuard<'_>,
    ceiling: Duration,
) -> Result<Performance, DeviceError> {
    match entry {
        CatalogEntry::Single(step) => {
            run_step(step, guard, ceiling, true).await?;
            Ok(Performance {
                steps_run: 1,
                failed: Vec::new(),
            })
        }
        CatalogEntry::Sequence(steps) => {
            let mut performance = Performance::default();
            for (index, step) in steps.iter().enumerate() {
                performance.steps_run += 1;
                match run_step(step, guard, ceiling, false).await {
                    Ok(()) => debug!(index, step = %step.label(), "choreography step done"),
                    Err(DeviceError::Released) => return Err(DeviceError::Released),
                    Err(error) => {
                        warn!(
                            index,
                            step = %step.label(),
                            %error,
                            "choreography step failed; continuing"
                        );
                        performance.failed.push(StepFailure {
                            index,
                            step: step.label(),
                            error,
                        });
                    }
                }
            }
            Ok(performance)
        }
    }
}

async fn run_step(
    step: &Step,
    guard: &mut DeviceGuard<'_>,
    ceiling: Duration,
    settle: bool,
) -> Result<(), DeviceError> {
    match step {
        Step::Action { name, params } if settle => {
            guard.run_action(name, *params, ceiling).await?;
        }
        Step::Action { name, params } => guard.start_action(name, *params).await?,
        Step::Preset { name, params } => {
            guard.run_preset(name, *params).await?;
            if settle {
                guard.wait_idle(ceiling).await?;
            }
        }
        Step::Head { pose, speed } => {
            guard.move_head(*pose, *speed).await?;
        }
        Step::Indicator(mode) => guard.set_indicator(mode).await?,
        Step::Speak { clip, volume } => guard.speak(clip, *volume).await?,
        Step::WaitIdle => {
            guard.wait_idle(ceiling).await?;
        }
        Step::Pause(duration) => guard.pause(*duration).await,
    }
    Ok(())
}

fn gait(name: &'static str, params: ActionParams) -> CatalogEntry {
    CatalogEntry::Single(Step::Action { name, params })
}

fn preset(name: &'static str, params: ActionParams) -> CatalogEntry {
    CatalogEntry::Single(Step::Preset { name, params })
}

fn pant_params() -> ActionParams {
    ActionParams {
        pitch_comp: Some(-30.0),
        volume: Some(80),
        ..ActionParams::default()
    }
}

fn action(name: &'static str, speed: u8) -> Step {
    Step::Action {
        name,
        params: ActionParams::speed(speed),
    }
}

fn head_pitch(pitch: f64, speed: u8) -> Step {
    Step::Head {
        pose: HeadPose::new(0.0, pitch, 0.0),
        speed,
    }
}

fn breath(color: &str, rate: f64) -> Step {
    Step::Indicator(IndicatorMode::breath(color, rate))
}

fn pause_ms(millis: u64) -> Step {
    Step::Pause(Duration::from_millis(millis))
}

fn welcome() -> Vec<Step> {
    vec![
        action("sit", 80),
        Step::WaitIdle,
        breath("green", 1.0),
        Step::Speak {
            clip: GREETING_CLIP,
            volume: 100,
        },
        pause_ms(1000),
        breath("blue", 1.0),
        Step::Preset {
            name: "handshake",
            params: ActionParams::default(),
        },
        Step::WaitIdle,
        pause_ms(1000),
        breath("red", 1.0),
        Step::Preset {
            name: "high_five",
            params: ActionParams::default(),
        },
        Step::WaitIdle,
        pause_ms(1000),
        breath("yellow", 0.5),
        action("sit", 80),
        Step::WaitIdle,
    ]
}

fn howl() -> Vec<Step> {
    vec![
        action("sit", 80),
        head_pitch(-30.0, 95),
        Step::WaitIdle,
        Step::Indicator(IndicatorMode::new(
            IndicatorStyle::Speak,
            Color::named("cyan"),
            0.6,
            0.8,
        )),
        action("half_sit", 80),
        head_pitch(-60.0, 80),
        Step::WaitIdle,
        Step::Speak {
            clip: HOWL_CLIP,
            volume: 100,
        },
        action("sit", 60),
        head_pitch(10.0, 70),
        Step::WaitIdle,
        action("sit", 60),
        head_pitch(10.0, 80),
        Step::WaitIdle,
        pause_ms(2340),
        action("sit", 80),
        head_pitch(-40.0, 80),
        Step::WaitIdle,
    ]
}

fn wake_up() -> Vec<Step> {
    vec![
        Step::Indicator(IndicatorMode::new(
            IndicatorStyle::Listen,
            Color::named("yellow"),
            0.6,
            0.8,
        )),
        pause_ms(500),
        action("stretch", 50),
        Step::WaitIdle,
        head_pitch(30.0, 80),
        pause_ms(500),
        Step::Preset {
            name: "body_twisting",
            params: ActionParams::default(),
        },
        Step::WaitIdle,
        head_pitch(-30.0, 90),
        action("sit", 25),
        Step::WaitIdle,
        Step::Action {
            name: "wag_tail",
            params: ActionParams::speed(100).with_steps(10),
        },
        Step::WaitIdle,
        Step::Indicator(IndicatorMode::new(
            IndicatorStyle::Breath,
            Color::Rgb([245, 10, 10]),
            2.5,
            0.8,
        )),
        Step::Preset {
            name: "pant",
            params: pant_params(),
        },
        Step::WaitIdle,
        Step::Action {
            name: "wag_tail",
            params: ActionParams::speed(30).with_steps(10),
        },
        Step::WaitIdle,
        breath("pink", 0.5),
    ]
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;
