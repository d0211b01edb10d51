//! キュー型トランスポート
//!
//! 実際のソケットを持たない `Transport` 実装。ホスト側（JS の WebSocket
//! コールバック、テストハーネス）が受信イベントを積み、送信フレームを取り出す。

use alloc::collections::VecDeque;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use tracing::debug;

use crate::{Endpoint, Transport, TransportError, TransportEvent};

/// ホスト駆動のトランスポート
///
/// 接続状態は `poll_event` で払い出したイベントから追跡する。
/// つまりセッションがイベントを処理した順序と接続状態が常に一致する。
#[derive(Debug, Default)]
pub struct QueuedTransport {
    /// セッションに渡す前の受信イベント
    inbound: VecDeque<TransportEvent>,
    /// ホストが取り出す前の送信フレーム
    outbound: Vec<String>,
    /// セッションから見た接続状態
    connected: bool,
    /// 最後に要求された接続先
    requested: Option<Endpoint>,
}

impl QueuedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// ホストから受信イベントを積む
    pub fn push_event(&mut self, event: TransportEvent) {
        self.inbound.push_back(event);
    }

    /// 受信テキストフレームを積む
    pub fn push_text(&mut self, text: impl Into<String>) {
        self.push_event(TransportEvent::Text(text.into()));
    }

    /// 送信フレームをすべて取り出す
    pub fn drain_outbound(&mut self) -> Vec<String> {
        core::mem::take(&mut self.outbound)
    }

    /// 取り出し前の送信フレーム
    pub fn outbound(&self) -> &[String] {
        &self.outbound
    }

    /// 最後に `connect` で要求された接続先
    pub fn requested_endpoint(&self) -> Option<&Endpoint> {
        self.requested.as_ref()
    }

    /// 未処理の受信イベントがあるか
    pub fn has_pending_events(&self) -> bool {
        !self.inbound.is_empty()
    }
}

impl Transport for QueuedTransport {
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        if endpoint.host.is_empty() {
            return Err(TransportError::ConnectFailed("empty host".to_string()));
        }
        debug!(url = %endpoint.url(), "connect requested");
        self.requested = Some(endpoint.clone());
        Ok(())
    }

    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.outbound.push(text.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        let event = self.inbound.pop_front()?;
        match event {
            TransportEvent::Connected => self.connected = true,
            TransportEvent::Disconnected { .. } | TransportEvent::Error(_) => self.connected = false,
            TransportEvent::Text(_) | TransportEvent::Binary(_) => {}
        }
        Some(event)
    }
}
