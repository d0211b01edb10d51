//! # phx-proto
//!
//! Phoenix チャンネルプロトコルの Envelope 定義とエンコード/デコードユーティリティ。
//!
//! ## Envelope の役割
//!
//! Phoenix のチャンネルメッセージは、以下の情報を一つの JSON オブジェクトに格納する：
//! - `topic`: 宛先チャンネル（デバイスチャンネル、またはハートビート用の `phoenix`）
//! - `event`: イベント名（`phx_join` / `phx_reply` / `heartbeat` / アプリ定義イベント）
//! - `ref`: クライアントが割り当てる相関 ID（サーバーはリプライで同じ値を返す）
//! - `payload`: 任意の JSON ドキュメント（空でも `{}` として必ず送る）
//!
//! ## Wire Format
//!
//! ```text
//! {"topic":"devices:42","event":"phx_join","ref":1,"payload":{"token":"..."}}
//! ```

#![no_std]
extern crate alloc;

pub mod envelope;
pub mod error;
pub mod reference;

pub use envelope::Envelope;
pub use error::ProtoError;
pub use reference::{RefGenerator, Reference};

/// チャンネル参加リクエスト
pub const PHX_JOIN: &str = "phx_join";

/// すべてのリクエストに対するリプライ
pub const PHX_REPLY: &str = "phx_reply";

/// キープアライブ（topic は常に [`PHOENIX_TOPIC`]）
pub const HEARTBEAT: &str = "heartbeat";

/// ハートビート専用の予約トピック
pub const PHOENIX_TOPIC: &str = "phoenix";

/// 時刻同期リクエスト（アプリ定義イベント）
pub const TIME_EVENT: &str = "time";

/// デバイスステータスのプッシュ
pub const STATUS_EVENT: &str = "status";

/// センサー値プッシュのイベント名プレフィックス
pub const SENSOR_EVENT_PREFIX: &str = "new_value_sensor:";
