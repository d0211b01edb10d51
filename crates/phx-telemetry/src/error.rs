//! phx-telemetry エラー型

use phx_session::{ConfigError, SessionError};

use crate::http::HttpFailure;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// HTTP リクエストの再試行を使い切った
    #[error("HTTP upload failed after {attempts} attempts: {last_error}")]
    Upload {
        attempts: u32,
        last_error: HttpFailure,
    },
    /// `/api/v1/time` の応答に `unix_time` が無い
    #[error("Time response missing `unix_time`")]
    InvalidTimeResponse,
}
