//! phx-transport エラー型

use alloc::string::String;

/// トランスポート層のエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// 未接続のまま送信しようとした
    #[error("Transport not connected")]
    NotConnected,
    /// 送信に失敗した
    #[error("Send failed: {0}")]
    SendFailed(String),
    /// ソケット側で非同期に発生したエラー（onError）
    #[error("Socket error: {0}")]
    Socket(String),
    /// 接続開始に失敗した
    #[error("Connect failed: {0}")]
    ConnectFailed(String),
}
