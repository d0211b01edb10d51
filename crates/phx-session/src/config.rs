//! セッション設定
//!
//! 接続先・チャンネルトピック・join ペイロードはセッション生成時に固定する。
//! 各種間隔はデフォルトのままで運用する想定だが、テストやホストから JSON で上書きできる。

use alloc::string::{String, ToString};

use phx_transport::Endpoint;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    CLOCK_REANCHOR_MS, HEARTBEAT_INTERVAL_MS, MAX_SEND_RETRIES, REJOIN_INTERVAL_MS,
    RESYNC_INTERVAL_MS,
};

/// `max_send_retries` の上限
pub const MAX_SEND_RETRIES_LIMIT: u32 = 16;

/// 設定エラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// JSON として読めない
    #[error("Invalid config JSON: {0}")]
    Json(String),
    /// フィールドの値が不正
    #[error("Invalid config field `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// セッション設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket の接続先
    pub endpoint: Endpoint,
    /// デバイスチャンネルのトピック（例: `devices:42`）
    pub topic: String,
    /// join 時に送る認証情報とメタデータ
    pub join_payload: Option<Value>,
    pub rejoin_interval_ms: u32,
    pub heartbeat_interval_ms: u32,
    pub resync_interval_ms: u32,
    pub clock_reanchor_ms: u32,
    pub max_send_retries: u32,
}

impl SessionConfig {
    pub fn new(endpoint: Endpoint, topic: impl Into<String>) -> Self {
        SessionConfig {
            endpoint,
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// join ペイロードを設定する
    pub fn with_join_payload(mut self, payload: Value) -> Self {
        self.join_payload = Some(payload);
        self
    }

    /// JSON 文字列から読み込み、検証する
    ///
    /// 省略したフィールドはデフォルト値になる。
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig =
            serde_json::from_str(text).map_err(|e| ConfigError::Json(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.is_empty() {
            return Err(ConfigError::Invalid {
                field: "topic",
                reason: "must not be empty",
            });
        }
        if self.topic == phx_proto::PHOENIX_TOPIC {
            return Err(ConfigError::Invalid {
                field: "topic",
                reason: "reserved for heartbeats",
            });
        }
        if self.endpoint.host.is_empty() {
            return Err(ConfigError::Invalid {
                field: "endpoint.host",
                reason: "must not be empty",
            });
        }
        let intervals = [
            ("rejoin_interval_ms", self.rejoin_interval_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("resync_interval_ms", self.resync_interval_ms),
            ("clock_reanchor_ms", self.clock_reanchor_ms),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero",
                });
            }
        }
        if self.max_send_retries > MAX_SEND_RETRIES_LIMIT {
            return Err(ConfigError::Invalid {
                field: "max_send_retries",
                reason: "must be at most 16",
            });
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            endpoint: Endpoint::default(),
            topic: String::new(),
            join_payload: None,
            rejoin_interval_ms: REJOIN_INTERVAL_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            resync_interval_ms: RESYNC_INTERVAL_MS,
            clock_reanchor_ms: CLOCK_REANCHOR_MS,
            max_send_retries: MAX_SEND_RETRIES,
        }
    }
}
