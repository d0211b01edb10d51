//! Envelope のエンコード/デコード
//!
//! ## Wire Format
//! ```text
//! {"topic":T,"event":E,"ref":R,"payload":P}
//! ```
//!
//! - 送信時の `ref` は JSON の数値
//! - 受信時の `ref` は数値・10 進文字列・`null` のいずれも受け付ける
//!   （サーバーはメッセージ種別によって表現が異なり、プッシュは `null`）
//! - `payload` は省略不可。空の場合は `{}` を送る

use alloc::string::{String, ToString};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ProtoError;
use crate::reference::Reference;

/// チャンネルメッセージ
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// 宛先トピック
    pub topic: String,
    /// イベント名
    pub event: String,
    /// 相関 ID（サーバープッシュでは None）
    pub reference: Option<Reference>,
    /// ペイロード（受信時に省略されていた場合は空オブジェクト）
    pub payload: Value,
}

/// フィールド順を固定するための送信用ビュー
#[derive(Serialize)]
struct WireEnvelope<'a> {
    topic: &'a str,
    event: &'a str,
    #[serde(rename = "ref")]
    reference: u32,
    payload: &'a Value,
}

impl Envelope {
    /// 送信用 Envelope を組み立てる
    pub fn new(
        topic: impl Into<String>,
        event: impl Into<String>,
        reference: Reference,
        payload: Option<Value>,
    ) -> Self {
        Envelope {
            topic: topic.into(),
            event: event.into(),
            reference: Some(reference),
            payload: payload.unwrap_or_else(empty_payload),
        }
    }

    /// 1 フレーム分のテキストにエンコードする
    ///
    /// `payload` が None の場合は `{}` を出力する。
    pub fn encode(topic: &str, event: &str, reference: Reference, payload: Option<&Value>) -> String {
        let empty = empty_payload();
        let wire = WireEnvelope {
            topic,
            event,
            reference: reference.raw(),
            payload: payload.unwrap_or(&empty),
        };
        serde_json::to_string(&wire).expect("Envelope encode should not fail")
    }

    /// この Envelope をテキストにエンコードする
    ///
    /// ref を持たない（受信した）Envelope は ref 0 として出力する。
    pub fn to_text(&self) -> String {
        let reference = self.reference.unwrap_or(Reference(0));
        Self::encode(&self.topic, &self.event, reference, Some(&self.payload))
    }

    /// 受信フレームをデコードする
    ///
    /// # エラー
    /// - `ProtoError::Malformed`: JSON オブジェクトでない
    /// - `ProtoError::MissingField`: topic / event がない
    /// - `ProtoError::InvalidRef`: ref が u32 として解釈できない
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| ProtoError::Malformed(e.to_string()))?;

        let mut fields = match value {
            Value::Object(map) => map,
            other => {
                return Err(ProtoError::Malformed(alloc::format!(
                    "expected object, found {}",
                    kind_of(&other)
                )))
            }
        };

        let topic = take_string(&mut fields, "topic")?;
        let event = take_string(&mut fields, "event")?;
        let reference = parse_ref(fields.remove("ref"))?;
        let payload = match fields.remove("payload") {
            None | Some(Value::Null) => empty_payload(),
            Some(payload) => payload,
        };

        Ok(Envelope {
            topic,
            event,
            reference,
            payload,
        })
    }

    /// `payload.response` への参照（リプライ用）
    pub fn response(&self) -> Option<&Value> {
        self.payload.get("response")
    }
}

fn empty_payload() -> Value {
    Value::Object(Map::new())
}

fn take_string(fields: &mut Map<String, Value>, name: &'static str) -> Result<String, ProtoError> {
    match fields.remove(name) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(ProtoError::MissingField(name)),
    }
}

fn parse_ref(raw: Option<Value>) -> Result<Option<Reference>, ProtoError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(|v| Some(Reference(v)))
            .ok_or_else(|| ProtoError::InvalidRef(n.to_string())),
        Some(Value::String(s)) => s
            .parse::<u32>()
            .map(|v| Some(Reference(v)))
            .map_err(|_| ProtoError::InvalidRef(s)),
        Some(other) => Err(ProtoError::InvalidRef(other.to_string())),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
