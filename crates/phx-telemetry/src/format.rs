//! センサー値のイベント名とペイロード整形
//!
//! 同じ「値を送る」操作に対して、イベント名の付け方と数値の表現を
//! 組み合わせで選ぶ。
//!
//! | naming     | event                    |
//! |------------|--------------------------|
//! | `Prefixed` | `new_value_sensor:<id>`  |
//! | `Bare`     | `<id>`                   |
//!
//! | encoding            | `value`                                  |
//! |---------------------|------------------------------------------|
//! | `Decimal { 6 }`     | `"21.500000"`                            |
//! | `Base64F64`         | f64 リトルエンディアン 8 バイトの Base64 |

use alloc::format;
use alloc::string::String;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use phx_proto::SENSOR_EVENT_PREFIX;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// イベント名の付け方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventNaming {
    /// `new_value_sensor:<id>`
    Prefixed,
    /// センサー ID をそのままイベント名にする
    Bare,
}

/// 数値の文字列表現
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueEncoding {
    /// 固定小数点の 10 進文字列
    Decimal { precision: usize },
    /// f64 のビット列をそのまま運ぶ（精度を落とさない）
    Base64F64,
}

/// 値送信のフォーマット方針
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueFormat {
    pub naming: EventNaming,
    pub encoding: ValueEncoding,
}

impl ValueFormat {
    /// 標準のセンサー値プッシュ
    pub const SENSOR: ValueFormat = ValueFormat {
        naming: EventNaming::Prefixed,
        encoding: ValueEncoding::Decimal { precision: 6 },
    };

    /// イベント名にプレフィックスを付けない旧形式
    pub const BARE: ValueFormat = ValueFormat {
        naming: EventNaming::Bare,
        encoding: ValueEncoding::Decimal { precision: 6 },
    };

    pub const fn new(naming: EventNaming, encoding: ValueEncoding) -> Self {
        ValueFormat { naming, encoding }
    }

    /// センサー ID からイベント名を作る
    pub fn event_name(&self, sensor_id: &str) -> String {
        match self.naming {
            EventNaming::Prefixed => format!("{}{}", SENSOR_EVENT_PREFIX, sensor_id),
            EventNaming::Bare => String::from(sensor_id),
        }
    }

    /// 値を文字列に整形する
    pub fn render(&self, value: f64) -> String {
        match self.encoding {
            ValueEncoding::Decimal { precision } => format!("{:.*}", precision, value),
            ValueEncoding::Base64F64 => STANDARD.encode(value.to_le_bytes()),
        }
    }

    /// イベントペイロード `{"value": "...", "timestamp": N}` を作る
    ///
    /// `timestamp` が 0（時計未同期）ならフィールドを付けない。
    pub fn payload(&self, value: f64, timestamp: u32) -> Value {
        let mut body = Map::new();
        body.insert("value".into(), Value::String(self.render(value)));
        if timestamp != 0 {
            body.insert("timestamp".into(), Value::from(timestamp));
        }
        Value::Object(body)
    }
}

impl Default for ValueFormat {
    fn default() -> Self {
        ValueFormat::SENSOR
    }
}
