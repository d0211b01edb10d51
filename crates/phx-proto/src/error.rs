//! phx-proto エラー型

use alloc::string::String;

/// Envelope デコードのエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtoError {
    /// JSON として不正
    #[error("Malformed envelope: {0}")]
    Malformed(String),
    /// 必須フィールド（topic / event）がない、または文字列でない
    #[error("Envelope field missing or not a string: {0}")]
    MissingField(&'static str),
    /// ref が u32 の数値・数値文字列・null のいずれでもない
    #[error("Invalid ref value: {0}")]
    InvalidRef(String),
}
