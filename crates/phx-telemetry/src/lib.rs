//! # phx-telemetry
//!
//! チャンネルセッションの上に載るテレメトリ送信レイヤー。
//!
//! ## 2 つの送信経路
//!
//! ```text
//! WebSocket (リアルタイム):
//!   センサー値 → ValueFormat で整形 → TelemetryClient::send_value()
//!     → ChannelSession::send() → "new_value_sensor:<id>" イベント
//!
//! HTTP (バッチ):
//!   センサー値 → LogBatch に蓄積 → ログ間隔ごとに LogUploader::flush()
//!     → POST https://<host>/api/v1/log
//! ```
//!
//! どちらの経路も送信は `phx_session::deliver` の即時リトライを通す。
//! センサーの読み取り自体は呼び出し側が行い、このクレートは値を受け取るだけ。

#![no_std]
extern crate alloc;

pub mod client;
pub mod error;
pub mod format;
pub mod http;
pub mod identity;

pub use client::TelemetryClient;
pub use error::TelemetryError;
pub use format::{EventNaming, ValueEncoding, ValueFormat};
pub use http::{
    HttpClient, HttpFailure, HttpResponse, LogBatch, LogUploader, Reading, SensorDescriptor,
    UploaderConfig,
};
pub use identity::DeviceIdentity;

/// HTTP ログ間隔の下限（秒）
pub const MIN_LOG_INTERVAL_S: u32 = 60;

/// HTTP ログ間隔の上限（秒）
pub const MAX_LOG_INTERVAL_S: u32 = 3600;

/// センサー読み取り間隔の下限（秒）
pub const MIN_READ_INTERVAL_S: u32 = 10;

/// センサー読み取り間隔の上限（秒）
pub const MAX_READ_INTERVAL_S: u32 = 1800;
