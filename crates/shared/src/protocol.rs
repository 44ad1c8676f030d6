//! JSON command protocol spoken over the control channel.
//!
//! Every inbound frame is one JSON object with a `command` key and an
//! optional `data` object. Decoding never fails outward: a frame that
//! cannot be turned into a [`Command`] yields the error [`Response`] that
//! should be sent back instead.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    domain::{ActionName, Color, DeviceSnapshot, HeadPose, IndicatorMode, IndicatorStyle},
    error::{ApiError, ErrorCode},
};

pub const DEFAULT_SPEAK_VOLUME: u8 = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    HeadMove(HeadPose),
    NamedAction(ActionName),
    Welcome,
    /// `{"command":"action","data":{"name":...}}`; the name is resolved at dispatch.
    Action { name: String },
    VoiceCommand(String),
    Indicator(IndicatorMode),
    Speak { clip: String, volume: u8 },
    Status,
    Shutdown,
    Unknown { name: Option<String> },
}

impl Command {
    /// Name echoed back in the `command` field of the response.
    pub fn name(&self) -> &str {
        match self {
            Self::HeadMove(_) => "head_move",
            Self::NamedAction(action) => action.as_str(),
            Self::Welcome => "welcome",
            Self::Action { name } => name,
            Self::VoiceCommand(_) => "voice_command",
            Self::Indicator(_) => "indicator",
            Self::Speak { .. } => "speak",
            Self::Status => "status",
            Self::Shutdown => "shutdown",
            Self::Unknown { name } => name.as_deref().unwrap_or("unknown"),
        }
    }

    /// Fire-and-forget commands never produce a response.
    pub fn is_fire_and_forget(&self) -> bool {
        matches!(self, Self::HeadMove(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Machine-readable failure class, set on command errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<HeadPose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<DeviceSnapshot>,
}

impl Response {
    pub fn success(command: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            command: Some(command.into()),
            message: None,
            detail: None,
            code: None,
            position: None,
            state: None,
        }
    }

    pub fn error(command: impl Into<String>, error: ApiError) -> Self {
        Self {
            status: Status::Error,
            command: Some(command.into()),
            message: None,
            detail: Some(error.message),
            code: Some(error.code),
            position: None,
            state: None,
        }
    }

    /// Reply for a frame that was not valid JSON; it carries no command echo.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            command: None,
            message: Some(reason.into()),
            detail: None,
            code: None,
            position: None,
            state: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_position(mut self, position: HeadPose) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_state(mut self, state: DeviceSnapshot) -> Self {
        self.state = Some(state);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

#[derive(Debug, Deserialize)]
struct ActionData {
    name: String,
}

#[derive(Debug, Deserialize)]
struct IndicatorData {
    mode: IndicatorStyle,
    #[serde(default)]
    color: Option<Color>,
    #[serde(default, alias = "bps")]
    rate: Option<f64>,
    #[serde(default)]
    brightness: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SpeakData {
    clip: String,
    #[serde(default)]
    volume: Option<f64>,
}

pub fn decode_command(text: &str) -> Result<Command, Response> {
    let value: Value =
        serde_json::from_str(text).map_err(|error| Response::malformed(error.to_string()))?;

    let Some(name) = value.get("command").and_then(Value::as_str) else {
        return Ok(Command::Unknown { name: None });
    };
    let data = value
        .get("data")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let command = match name {
        "head_move" => Command::HeadMove(HeadPose {
            yaw: number_or_zero(&data, "yaw"),
            pitch: number_or_zero(&data, "pitch"),
            roll: number_or_zero(&data, "roll"),
        }),
        "welcome" => Command::Welcome,
        "voice_command" => Command::VoiceCommand(
            data.get("command")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        "action" => {
            let ActionData { name } = payload(name, data)?;
            Command::Action { name }
        }
        "indicator" => {
            let IndicatorData {
                mode,
                color,
                rate,
                brightness,
            } = payload(name, data)?;
            Command::Indicator(IndicatorMode::new(
                mode,
                color.unwrap_or_default(),
                rate.unwrap_or(1.0),
                brightness.unwrap_or(0.8),
            ))
        }
        "speak" => {
            let SpeakData { clip, volume } = payload(name, data)?;
            let volume = volume
                .map(|v| v.clamp(0.0, 100.0).round() as u8)
                .unwrap_or(DEFAULT_SPEAK_VOLUME);
            Command::Speak { clip, volume }
        }
        "status" => Command::Status,
        "shutdown" => Command::Shutdown,
        other => match ActionName::parse(other) {
            Some(ActionName::Welcome) => Command::Welcome,
            Some(action) => Command::NamedAction(action),
            None => Command::Unknown {
                name: Some(other.to_string()),
            },
        },
    };
    Ok(command)
}

pub fn encode_response(response: &Response) -> Result<String, serde_json::Error> {
    serde_json::to_string(response)
}

fn number_or_zero(data: &Map<String, Value>, key: &str) -> f64 {
    data.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn payload<T: serde::de::DeserializeOwned>(
    command: &str,
    data: Map<String, Value>,
) -> Result<T, Response> {
    serde_json::from_value(Value::Object(data)).map_err(|error| {
        Response::error(
            command,
            ApiError::new(ErrorCode::InvalidData, format!("invalid data: {error}")),
        )
    })
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
