//! 受信 Envelope の振り分け
//!
//! - `phx_reply` かつ topic が `phoenix` → ハートビートの応答（記録だけして捨てる）
//! - それ以外の `phx_reply` → リクエストへの応答
//! - それ以外 → サーバープッシュ（アプリ層へ渡す）
//!
//! 応答が join 応答か時刻同期応答かは ref ではなくセッション状態で決める
//! （`Joining` 中なら join 応答、`Joined` 中で timestamp を持つなら時刻同期応答）。
//! `PendingRequests` は ref と要求種別の対応を追跡するが、判定には使わない。

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use phx_proto::{Envelope, Reference, PHOENIX_TOPIC, PHX_REPLY};
use serde_json::Value;

/// 受信 Envelope の行き先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    HeartbeatReply,
    Reply,
    Push,
}

/// Envelope を振り分ける
pub fn route(envelope: &Envelope) -> Route {
    if envelope.event != PHX_REPLY {
        Route::Push
    } else if envelope.topic == PHOENIX_TOPIC {
        Route::HeartbeatReply
    } else {
        Route::Reply
    }
}

/// join 応答の解釈結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinReply {
    /// `{"response":{"group_id":N,"sensor_ids":[...]}}`
    Accepted { group_id: u64, sensor_ids: Vec<u64> },
    /// `{"response":{"reason":"invalid token"}}`
    Rejected { reason: String },
    /// フィールドの欠落・型違い（どのフィールドか）
    Malformed(&'static str),
}

/// join 応答ペイロードを解釈する
///
/// `sensor_ids` が無い場合は旧サーバーのキー `sensors_ids` も見る。
pub fn interpret_join_reply(payload: &Value) -> JoinReply {
    let Some(response) = payload.get("response") else {
        return JoinReply::Malformed("response");
    };

    if let Some(reason) = response.get("reason").and_then(Value::as_str) {
        return JoinReply::Rejected {
            reason: reason.to_string(),
        };
    }

    let Some(group_id) = response.get("group_id").and_then(Value::as_u64) else {
        return JoinReply::Malformed("group_id");
    };

    let ids = response
        .get("sensor_ids")
        .or_else(|| response.get("sensors_ids"))
        .and_then(Value::as_array);
    let Some(ids) = ids else {
        return JoinReply::Malformed("sensor_ids");
    };

    let sensor_ids: Option<Vec<u64>> = ids.iter().map(Value::as_u64).collect();
    match sensor_ids {
        Some(sensor_ids) => JoinReply::Accepted {
            group_id,
            sensor_ids,
        },
        None => JoinReply::Malformed("sensor_ids"),
    }
}

/// 時刻同期応答 `{"response":{"timestamp":N}}` からエポック秒を取り出す
pub fn interpret_sync_reply(payload: &Value) -> Option<u32> {
    payload
        .get("response")?
        .get("timestamp")?
        .as_u64()
        .and_then(|ts| u32::try_from(ts).ok())
}

/// 応答待ちリクエストの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Join,
    TimeSync,
}

/// ref → 応答待ちリクエストの表
///
/// 種別ごとに最大 1 件。同じ種別の新しいリクエストは古いものを置き換える。
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: BTreeMap<Reference, PendingKind>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新しいリクエストを登録する。置き換えた古い ref を返す
    pub fn track(&mut self, reference: Reference, kind: PendingKind) -> Option<Reference> {
        let superseded = self
            .entries
            .iter()
            .find(|(_, k)| **k == kind)
            .map(|(r, _)| *r);
        if let Some(old) = superseded {
            self.entries.remove(&old);
        }
        self.entries.insert(reference, kind);
        superseded
    }

    /// 応答の ref に一致するリクエストを取り除いて返す
    pub fn resolve(&mut self, reference: Reference) -> Option<PendingKind> {
        self.entries.remove(&reference)
    }

    /// すべて破棄し、破棄した件数を返す
    pub fn cancel_all(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, kind: PendingKind) -> bool {
        self.entries.values().any(|k| *k == kind)
    }
}
