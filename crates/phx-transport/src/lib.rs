//! # phx-transport
//!
//! セッション層が消費するトランスポート能力の定義。
//!
//! WebSocket 本体（接続・TLS・フレーミング・自動再接続）は外部にあり、
//! このクレートはセッションから見た最小限のインターフェースだけを持つ。
//!
//! ## イベントの流れ
//!
//! ```text
//! WebSocket  ──onConnect/onMessage/onDisconnect/onError──▶  TransportEvent キュー
//!                                                              │ poll_event()
//!                                                              ▼
//!                                                        ChannelSession::tick
//! ChannelSession ──send_text()──▶ WebSocket
//! ```
//!
//! コールバックをプロセス全体のシングルトン経由で呼ぶ代わりに、
//! セッションが自分の Transport からイベントを取り出す（pull 型）。

#![no_std]
extern crate alloc;

pub mod error;
pub mod millis;
pub mod queued;

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

pub use error::TransportError;
pub use millis::LocalMillis;
pub use queued::QueuedTransport;

/// トランスポートから届くイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// 接続が確立した（再接続を含む）
    Connected,
    /// 接続が切れた（WebSocket の close code）
    Disconnected { code: u16 },
    /// テキストフレームを受信した（1 フレーム = 1 Envelope）
    Text(String),
    /// バイナリフレームを受信した（プロトコル上は使わない）
    Binary(Vec<u8>),
    /// トランスポート層のエラー
    Error(String),
}

/// 接続先
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
    /// wss を使うか
    #[serde(default)]
    pub secure: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Endpoint {
            host: host.into(),
            port,
            path: path.into(),
            secure: false,
        }
    }

    /// `ws://host:port/path` 形式の URL
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = self.path.trim_start_matches('/');
        format!("{}://{}:{}/{}", scheme, self.host, self.port, path)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::new("localhost", 4000, "/socket/websocket")
    }
}

/// セッションが消費するトランスポート能力
///
/// 実装はシングルスレッドで駆動される前提。イベントは `poll_event` で
/// セッションのループから取り出され、同じスレッド上で処理される。
pub trait Transport {
    /// 接続を開始する（確立は後で `TransportEvent::Connected` として届く）
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError>;

    /// テキストフレームを 1 つ送信する
    fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    /// 現在接続中か
    fn is_connected(&self) -> bool;

    /// 受信・再接続処理を進め、保留中のイベントを 1 つ返す
    fn poll_event(&mut self) -> Option<TransportEvent>;
}
