//! WebSocket テレメトリクライアント
//!
//! `ChannelSession` にデバイス識別情報と値フォーマットを組み合わせる。
//! join 応答で受け取ったグループ ID とセンサー ID の一覧を保持する。

use alloc::vec::Vec;

use phx_proto::{Reference, STATUS_EVENT};
use phx_session::{
    ChannelSession, ImmediateRetry, RetryPolicy, SessionConfig, SessionEvent, SessionStats,
};
use phx_transport::{Endpoint, Transport};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::TelemetryError;
use crate::format::ValueFormat;
use crate::identity::DeviceIdentity;

pub struct TelemetryClient<T: Transport, P: RetryPolicy = ImmediateRetry> {
    session: ChannelSession<T, P>,
    identity: DeviceIdentity,
    format: ValueFormat,
    group: Option<u64>,
    sensor_ids: Vec<u64>,
}

impl<T: Transport> TelemetryClient<T, ImmediateRetry> {
    /// デバイスチャンネル `devices:<user_id>` に join するクライアントを生成する
    pub fn new(
        transport: T,
        endpoint: Endpoint,
        identity: DeviceIdentity,
        format: ValueFormat,
    ) -> Result<Self, TelemetryError> {
        let config = SessionConfig::new(endpoint, identity.channel_topic())
            .with_join_payload(identity.join_payload());
        let session = ChannelSession::new(transport, config)?;
        Ok(Self::from_session(session, identity, format))
    }
}

impl<T: Transport, P: RetryPolicy> TelemetryClient<T, P> {
    /// 構築済みのセッションを包む
    pub fn from_session(
        session: ChannelSession<T, P>,
        identity: DeviceIdentity,
        format: ValueFormat,
    ) -> Self {
        TelemetryClient {
            session,
            identity,
            format,
            group: None,
            sensor_ids: Vec::new(),
        }
    }

    pub fn connect(&mut self) -> Result<(), TelemetryError> {
        self.session.connect()?;
        Ok(())
    }

    /// セッションを駆動し、イベントをそのまま返す
    ///
    /// join 承認を見たらグループとセンサー一覧を記録する。
    pub fn tick(&mut self, now_ms: u32) -> Vec<SessionEvent> {
        let events = self.session.tick(now_ms);
        for event in &events {
            if let SessionEvent::JoinAccepted {
                group_id,
                sensor_ids,
            } = event
            {
                info!(device_id = self.identity.device_id, group_id, "device registered");
                self.group = Some(*group_id);
                self.sensor_ids = sensor_ids.clone();
            }
        }
        events
    }

    /// センサー値を送る
    ///
    /// 時計が同期済みならペイロードに `timestamp` を付ける。
    /// 未同期なら時刻同期を要求するきっかけにもなる。
    pub fn send_value(
        &mut self,
        sensor_id: &str,
        value: f64,
        now_ms: u32,
    ) -> Result<Reference, TelemetryError> {
        let timestamp = self.session.now(now_ms);
        let event = self.format.event_name(sensor_id);
        let payload = self.format.payload(value, timestamp);
        let reference = self.session.send(&event, Some(&payload))?;
        debug!(sensor_id, value, timestamp, "sensor value sent");
        Ok(reference)
    }

    /// `status` イベントでステータスを送る
    pub fn send_status(&mut self, payload: &Value) -> Result<Reference, TelemetryError> {
        Ok(self.session.send(STATUS_EVENT, Some(payload))?)
    }

    /// join 承認で割り当てられたグループ
    pub fn group(&self) -> Option<u64> {
        self.group
    }

    /// join 承認で通知されたセンサー ID
    pub fn sensor_ids(&self) -> &[u64] {
        &self.sensor_ids
    }

    pub fn is_joined(&self) -> bool {
        self.session.is_joined()
    }

    pub fn now(&mut self, now_ms: u32) -> u32 {
        self.session.now(now_ms)
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn format(&self) -> ValueFormat {
        self.format
    }

    pub fn set_format(&mut self, format: ValueFormat) {
        self.format = format;
    }

    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }

    pub fn session(&self) -> &ChannelSession<T, P> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ChannelSession<T, P> {
        &mut self.session
    }
}
