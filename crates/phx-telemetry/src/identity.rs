//! デバイスの識別情報
//!
//! API キーは `<user_id>_<secret>` の形をしており、先頭のユーザー ID が
//! デバイスチャンネルのトピック `devices:<user_id>` になる。

use alloc::format;
use alloc::string::String;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// デバイスチャンネルのトピックプレフィックス
pub const CHANNEL_PREFIX: &str = "devices:";

pub const DEFAULT_DEVICE_NAME: &str = "ESP32";

pub const DEFAULT_GROUP_NAME: &str = "Default";

/// デバイス識別情報と認証情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: u64,
    pub api_key: String,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_group_name")]
    pub group_name: String,
    #[serde(default)]
    pub firmware: Option<String>,
}

fn default_device_name() -> String {
    DEFAULT_DEVICE_NAME.into()
}

fn default_group_name() -> String {
    DEFAULT_GROUP_NAME.into()
}

/// `phx_join` に載せるペイロード
#[derive(Serialize)]
struct JoinPayload<'a> {
    token: &'a str,
    device_id: u64,
    device_name: &'a str,
    group_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    firmware: Option<&'a str>,
}

impl DeviceIdentity {
    pub fn new(device_id: u64, api_key: impl Into<String>) -> Self {
        DeviceIdentity {
            device_id,
            api_key: api_key.into(),
            device_name: default_device_name(),
            group_name: default_group_name(),
            firmware: None,
        }
    }

    pub fn with_name(mut self, device_name: impl Into<String>) -> Self {
        self.device_name = device_name.into();
        self
    }

    pub fn with_group(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = group_name.into();
        self
    }

    pub fn with_firmware(mut self, firmware: impl Into<String>) -> Self {
        self.firmware = Some(firmware.into());
        self
    }

    /// API キーの `_` より前（`_` が無ければキー全体）
    pub fn user_id(&self) -> &str {
        match self.api_key.find('_') {
            Some(idx) => &self.api_key[..idx],
            None => &self.api_key,
        }
    }

    /// `devices:<user_id>`
    pub fn channel_topic(&self) -> String {
        format!("{}{}", CHANNEL_PREFIX, self.user_id())
    }

    /// HTTP API の `Authorization` ヘッダー値
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    pub fn join_payload(&self) -> Value {
        let payload = JoinPayload {
            token: &self.api_key,
            device_id: self.device_id,
            device_name: &self.device_name,
            group_name: &self.group_name,
            firmware: self.firmware.as_deref(),
        };
        // フィールドはすべて文字列と整数なので失敗しない
        serde_json::to_value(payload).expect("join payload serialization is infallible")
    }
}
