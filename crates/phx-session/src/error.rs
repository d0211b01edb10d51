//! phx-session エラー型
//!
//! どのエラーもプロセスを止めない。セッションはログに残してリトライを続ける。

use phx_proto::ProtoError;
use phx_transport::TransportError;

use crate::config::ConfigError;
use crate::retry::DeliveryFailed;

/// セッション層のエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// 接続断・接続拒否・ソケットエラー
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    /// 受信フレームが Envelope として読めない（フレームは破棄される）
    #[error("Envelope parse failed: {0}")]
    Parse(#[from] ProtoError),
    /// 再試行回数を使い切った
    #[error("Delivery failed after {attempts} attempts: {last_error}")]
    DeliveryFailed {
        attempts: u32,
        last_error: TransportError,
    },
    /// チャンネル未参加のまま送信しようとした
    #[error("Channel not joined")]
    NotJoined,
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<DeliveryFailed<TransportError>> for SessionError {
    fn from(failed: DeliveryFailed<TransportError>) -> Self {
        SessionError::DeliveryFailed {
            attempts: failed.attempts,
            last_error: failed.last_error,
        }
    }
}
