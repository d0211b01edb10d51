//! DeviceClient wasm-bindgen エクスポート
//!
//! JS ホストが WebSocket を持ち、受信イベントを `on*` で渡し、
//! `tick()` が返すフレームを送信する。セッション本体は `phx-telemetry` 以下にある。

use std::collections::VecDeque;

use js_sys::Array;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use wasm_bindgen::prelude::*;

use phx_session::{ChannelSession, ConfigError, SessionConfig, SessionEvent, SessionState, SessionStats};
use phx_telemetry::{DeviceIdentity, TelemetryClient, TelemetryError, ValueFormat};
use phx_transport::{Endpoint, LocalMillis, QueuedTransport, TransportEvent};

/// `new DeviceClient(configJson)` に渡す設定
///
/// ```json
/// {
///   "endpoint": { "host": "esplogger.tech", "port": 443, "path": "/socket/websocket", "secure": true },
///   "identity": { "device_id": 1234, "api_key": "42_secret", "device_name": "greenhouse" },
///   "format":   { "naming": "prefixed", "encoding": { "decimal": { "precision": 6 } } },
///   "session":  { "rejoin_interval_ms": 5000 }
/// }
/// ```
///
/// `session.topic` と `session.join_payload` を省略すると `identity` から作る。
/// `endpoint` は常に `session.endpoint` より優先する。
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub endpoint: Endpoint,
    pub identity: DeviceIdentity,
    #[serde(default)]
    pub format: ValueFormat,
    #[serde(default)]
    pub session: Option<SessionConfig>,
}

impl DeviceConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Json(e.to_string()))
    }

    /// セッション設定を組み立てる（検証は `ChannelSession::new` が行う）
    pub fn session_config(&self) -> SessionConfig {
        let mut config = self.session.clone().unwrap_or_default();
        config.endpoint = self.endpoint.clone();
        if config.topic.is_empty() {
            config.topic = self.identity.channel_topic();
        }
        if config.join_payload.is_none() {
            config.join_payload = Some(self.identity.join_payload());
        }
        config
    }
}

/// `takeEvents()` が返す JSON 表現
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventView {
    Connected,
    Disconnected { code: u16 },
    JoinAccepted { group_id: u64, sensor_ids: Vec<u64> },
    JoinRejected { reason: String, consecutive: u32 },
    TimeSynced { epoch: u32 },
    Push { topic: String, event: String, payload: Value },
    Error { message: String },
}

impl From<SessionEvent> for EventView {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Connected => EventView::Connected,
            SessionEvent::Disconnected { code } => EventView::Disconnected { code },
            SessionEvent::JoinAccepted {
                group_id,
                sensor_ids,
            } => EventView::JoinAccepted {
                group_id,
                sensor_ids,
            },
            SessionEvent::JoinRejected {
                reason,
                consecutive,
            } => EventView::JoinRejected {
                reason,
                consecutive,
            },
            SessionEvent::TimeSynced { epoch } => EventView::TimeSynced { epoch },
            SessionEvent::Push {
                topic,
                event,
                payload,
            } => EventView::Push {
                topic,
                event,
                payload,
            },
            SessionEvent::Error(err) => EventView::Error {
                message: err.to_string(),
            },
        }
    }
}

#[derive(Serialize)]
struct StatsView<'a> {
    state: SessionState,
    topic: &'a str,
    group_id: Option<u64>,
    last_ref: Option<u32>,
    clock_synchronized: bool,
    session: SessionStats,
}

/// デバイスセッションクライアント
///
/// `TelemetryClient<QueuedTransport>` を包んだ wasm-bindgen エクスポートクラス。
///
/// ## 内部アーキテクチャ
///
/// ```text
/// DeviceClient
///   └── TelemetryClient   (phx-telemetry) - 値フォーマット・join 結果の保持
///         └── ChannelSession (phx-session) - join/heartbeat/時刻同期の状態機械
///               └── QueuedTransport (phx-transport) - JS とのイベント・フレーム受け渡し
/// ```
///
/// ## スレッド安全性
///
/// WASM は シングルスレッドのため、`!Send + !Sync` を満たす。
/// JS からは単一スレッドで呼び出される前提。
#[wasm_bindgen]
pub struct DeviceClient {
    telemetry: TelemetryClient<QueuedTransport>,
    /// `takeEvents()` で取り出されるまで溜める
    events: VecDeque<EventView>,
}

#[wasm_bindgen]
impl DeviceClient {
    /// 設定 JSON からクライアントを初期化する
    ///
    /// # エラー
    /// - JSON として読めない
    /// - トピックが空・予約済み、間隔が 0 など設定が不正
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<DeviceClient, JsError> {
        DeviceClient::from_json(config_json)
            .map_err(|e| JsError::new(&format!("Invalid device config: {}", e)))
    }

    /// JS が開く WebSocket の URL
    #[wasm_bindgen]
    pub fn url(&self) -> String {
        self.endpoint().url()
    }

    #[wasm_bindgen(js_name = "onConnect")]
    pub fn on_connect(&mut self) {
        self.push_event(TransportEvent::Connected);
    }

    #[wasm_bindgen(js_name = "onDisconnect")]
    pub fn on_disconnect(&mut self, code: u16) {
        self.push_event(TransportEvent::Disconnected { code });
    }

    #[wasm_bindgen(js_name = "onMessage")]
    pub fn on_message(&mut self, text: String) {
        self.push_event(TransportEvent::Text(text));
    }

    #[wasm_bindgen(js_name = "onError")]
    pub fn on_error(&mut self, message: String) {
        self.push_event(TransportEvent::Error(message));
    }

    /// 定期タイマー tick
    ///
    /// 受信イベントの処理・ハートビート・join 再試行を行う。
    ///
    /// # 引数
    /// - `now_ms`: 現在時刻（`Date.now()`）
    ///
    /// # 戻り値
    /// WebSocket で送信すべきテキストフレームの配列
    #[wasm_bindgen]
    pub fn tick(&mut self, now_ms: f64) -> Array {
        to_array(self.tick_frames(millis(now_ms)))
    }

    /// 任意のペイロードで join を要求する
    #[wasm_bindgen]
    pub fn join(&mut self, payload_json: &str, now_ms: f64) -> Result<Array, JsError> {
        self.join_frames(payload_json, millis(now_ms))
            .map(to_array)
            .map_err(|e| JsError::new(&format!("Join failed: {}", e)))
    }

    /// センサー値を送る
    ///
    /// # 戻り値
    /// 送信すべきテキストフレームの配列
    ///
    /// # エラー
    /// - チャンネル未参加
    /// - 再試行を使い切った
    #[wasm_bindgen(js_name = "sendValue")]
    pub fn send_value(&mut self, sensor_id: &str, value: f64, now_ms: f64) -> Result<Array, JsError> {
        self.send_value_frames(sensor_id, value, millis(now_ms))
            .map(to_array)
            .map_err(|e| JsError::new(&format!("Send failed: {}", e)))
    }

    /// `status` イベントを送る
    #[wasm_bindgen(js_name = "sendStatus")]
    pub fn send_status(&mut self, payload_json: &str) -> Result<Array, JsError> {
        self.send_status_frames(payload_json)
            .map(to_array)
            .map_err(|e| JsError::new(&format!("Send failed: {}", e)))
    }

    /// 補間したサーバー時刻（Unix 秒）。未同期なら 0
    #[wasm_bindgen]
    pub fn now(&mut self, now_ms: f64) -> u32 {
        self.telemetry.now(millis(now_ms))
    }

    #[wasm_bindgen(js_name = "isJoined")]
    pub fn is_joined(&self) -> bool {
        self.telemetry.is_joined()
    }

    #[wasm_bindgen(js_name = "hasPendingEvents")]
    pub fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// 溜まったイベントを JSON 配列で取り出す
    ///
    /// ```json
    /// [{"type":"join_accepted","group_id":3,"sensor_ids":[10,11]},
    ///  {"type":"time_synced","epoch":1700000000}]
    /// ```
    #[wasm_bindgen(js_name = "takeEvents")]
    pub fn take_events(&mut self) -> String {
        let events: Vec<EventView> = self.events.drain(..).collect();
        serde_json::to_string(&events).unwrap_or_else(|_| String::from("[]"))
    }

    /// セッション統計を JSON 文字列で返す
    ///
    /// # 戻り値
    /// JSON 文字列:
    /// ```json
    /// {
    ///   "state": "Joined",
    ///   "topic": "devices:42",
    ///   "group_id": 3,
    ///   "last_ref": 12,
    ///   "clock_synchronized": true,
    ///   "session": { "join_attempts": 1, "heartbeats_sent": 4, "pending_count": 0, ... }
    /// }
    /// ```
    #[wasm_bindgen(js_name = "getStats")]
    pub fn get_stats(&self) -> String {
        let session = self.telemetry.session();
        let view = StatsView {
            state: session.state(),
            topic: session.topic(),
            group_id: self.telemetry.group(),
            last_ref: session.last_reference().map(|r| r.raw()),
            clock_synchronized: session.clock().is_synchronized(),
            session: session.stats(),
        };
        serde_json::to_string(&view).unwrap_or_else(|_| String::from("{}"))
    }
}

/// native から使う API（テスト・非 JS ホスト用）
impl DeviceClient {
    pub fn from_json(config_json: &str) -> Result<DeviceClient, TelemetryError> {
        let config = DeviceConfig::from_json(config_json)?;
        DeviceClient::from_config(config)
    }

    pub fn from_config(config: DeviceConfig) -> Result<DeviceClient, TelemetryError> {
        let session_config = config.session_config();
        let mut session = ChannelSession::new(QueuedTransport::new(), session_config)?;
        session.connect()?;
        info!(url = %session.config().endpoint.url(), topic = session.topic(), "device client ready");
        Ok(DeviceClient {
            telemetry: TelemetryClient::from_session(session, config.identity, config.format),
            events: VecDeque::new(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.telemetry.session().config().endpoint
    }

    pub fn push_event(&mut self, event: TransportEvent) {
        self.telemetry.session_mut().transport_mut().push_event(event);
    }

    pub fn tick_frames(&mut self, now_ms: u32) -> Vec<String> {
        let events = self.telemetry.tick(now_ms);
        if !events.is_empty() {
            debug!(count = events.len(), "session events queued");
        }
        self.events.extend(events.into_iter().map(EventView::from));
        self.drain_frames()
    }

    pub fn join_frames(&mut self, payload_json: &str, now_ms: u32) -> Result<Vec<String>, TelemetryError> {
        let payload: Value = serde_json::from_str(payload_json)
            .map_err(|e| ConfigError::Json(e.to_string()))?;
        self.telemetry
            .session_mut()
            .join(payload, now_ms)
            .map_err(TelemetryError::from)?;
        Ok(self.drain_frames())
    }

    pub fn send_value_frames(
        &mut self,
        sensor_id: &str,
        value: f64,
        now_ms: u32,
    ) -> Result<Vec<String>, TelemetryError> {
        self.telemetry.send_value(sensor_id, value, now_ms)?;
        Ok(self.drain_frames())
    }

    pub fn send_status_frames(&mut self, payload_json: &str) -> Result<Vec<String>, TelemetryError> {
        let payload: Value = serde_json::from_str(payload_json)
            .map_err(|e| ConfigError::Json(e.to_string()))?;
        self.telemetry.send_status(&payload)?;
        Ok(self.drain_frames())
    }

    pub fn take_event_views(&mut self) -> Vec<EventView> {
        self.events.drain(..).collect()
    }

    pub fn telemetry(&self) -> &TelemetryClient<QueuedTransport> {
        &self.telemetry
    }

    fn drain_frames(&mut self) -> Vec<String> {
        self.telemetry.session_mut().transport_mut().drain_outbound()
    }
}

/// `Date.now()` をデバイスのローカルミリ秒カウンタに畳み込む
fn millis(now_ms: f64) -> u32 {
    LocalMillis::from(now_ms as u64).raw()
}

fn to_array(frames: Vec<String>) -> Array {
    let result = Array::new();
    for frame in frames {
        result.push(&JsValue::from_str(&frame));
    }
    result
}
