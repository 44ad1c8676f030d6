use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl HeadPose {
    pub const fn new(yaw: f64, pitch: f64, roll: f64) -> Self {
        Self { yaw, pitch, roll }
    }
}

/// Inclusive mechanical range of one head axis, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleRange {
    pub min: f64,
    pub max: f64,
}

impl AngleRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, angle: f64) -> f64 {
        let angle = if angle.is_nan() { 0.0 } else { angle };
        angle.max(self.min).min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadLimits {
    pub yaw: AngleRange,
    pub pitch: AngleRange,
    pub roll: AngleRange,
}

impl Default for HeadLimits {
    fn default() -> Self {
        Self {
            yaw: AngleRange::new(-90.0, 90.0),
            pitch: AngleRange::new(-45.0, 30.0),
            roll: AngleRange::new(-70.0, 70.0),
        }
    }
}

impl HeadLimits {
    pub fn clamp(&self, pose: HeadPose) -> HeadPose {
        HeadPose {
            yaw: self.yaw.clamp(pose.yaw),
            pitch: self.pitch.clamp(pose.pitch),
            roll: self.roll.clamp(pose.roll),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorStyle {
    #[default]
    Off,
    Monochromatic,
    Breath,
    Boom,
    Bark,
    Speak,
    Listen,
}

impl IndicatorStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Monochromatic => "monochromatic",
            Self::Breath => "breath",
            Self::Boom => "boom",
            Self::Bark => "bark",
            Self::Speak => "speak",
            Self::Listen => "listen",
        }
    }
}

/// Either a color name understood by the light strip or a raw RGB triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Color {
    Rgb([u8; 3]),
    Named(String),
}

impl Color {
    pub fn named(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::named("white")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorMode {
    pub style: IndicatorStyle,
    #[serde(default)]
    pub color: Color,
    /// Blink or breath rate in beats per second.
    #[serde(default = "default_rate")]
    pub rate: f64,
    #[serde(default = "default_brightness")]
    pub brightness: f64,
}

fn default_rate() -> f64 {
    1.0
}

fn default_brightness() -> f64 {
    0.8
}

impl IndicatorMode {
    pub fn new(style: IndicatorStyle, color: Color, rate: f64, brightness: f64) -> Self {
        Self {
            style,
            color,
            rate: rate.max(0.0),
            brightness: brightness.clamp(0.0, 1.0),
        }
    }

    pub fn breath(color: &str, rate: f64) -> Self {
        Self::new(
            IndicatorStyle::Breath,
            Color::named(color),
            rate,
            default_brightness(),
        )
    }

    pub fn off() -> Self {
        Self::new(IndicatorStyle::Off, Color::named("black"), 0.0, 0.0)
    }
}

impl Default for IndicatorMode {
    fn default() -> Self {
        Self::off()
    }
}

/// Every behavior the action catalog knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionName {
    Sit,
    Stand,
    Lie,
    HalfSit,
    Stretch,
    WagTail,
    Handshake,
    HighFive,
    Pant,
    BodyTwist,
    Howl,
    WakeUp,
    Welcome,
}

impl ActionName {
    pub const ALL: [ActionName; 13] = [
        Self::Sit,
        Self::Stand,
        Self::Lie,
        Self::HalfSit,
        Self::Stretch,
        Self::WagTail,
        Self::Handshake,
        Self::HighFive,
        Self::Pant,
        Self::BodyTwist,
        Self::Howl,
        Self::WakeUp,
        Self::Welcome,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sit => "sit",
            Self::Stand => "stand",
            Self::Lie => "lie",
            Self::HalfSit => "half_sit",
            Self::Stretch => "stretch",
            Self::WagTail => "wag_tail",
            Self::Handshake => "handshake",
            Self::HighFive => "high_five",
            Self::Pant => "pant",
            Self::BodyTwist => "body_twist",
            Self::Howl => "howl",
            Self::WakeUp => "wake_up",
            Self::Welcome => "welcome",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub head: HeadPose,
    pub indicator: IndicatorMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posture: Option<String>,
    pub busy: bool,
    pub released: bool,
    pub updated_at: DateTime<Utc>,
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        Self {
            head: HeadPose::default(),
            indicator: IndicatorMode::off(),
            posture: None,
            busy: false,
            released: false,
            updated_at: Utc::now(),
        }
    }
}
