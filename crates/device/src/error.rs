use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("device has been released")]
    Released,
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),
    #[error("{operation} failed: {message}")]
    Driver {
        operation: &'static str,
        message: String,
    },
}

impl DeviceError {
    pub(crate) fn driver(operation: &'static str, error: anyhow::Error) -> Self {
        Self::Driver {
            operation,
            message: format!("{error:#}"),
        }
    }
}

impl From<DeviceError> for ApiError {
    fn from(value: DeviceError) -> Self {
        let code = match value {
            DeviceError::Released => ErrorCode::ShuttingDown,
            DeviceError::UnsupportedAction(_) => ErrorCode::UnsupportedAction,
            DeviceError::Driver { .. } => ErrorCode::Device,
        };
        ApiError::new(code, value.to_string())
    }
}
