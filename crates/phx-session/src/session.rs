//! チャンネルセッション状態機械
//!
//! デバイスプロセスに 1 つだけ存在し、Transport・ref カウンタ・論理時計・
//! 応答待ち表を専有する。すべての処理は `tick()` を呼ぶ駆動ループのスレッド上で
//! 行われ、ブロックする操作はない。「応答を待つ」は後の tick での状態遷移として表す。

use alloc::string::String;
use alloc::vec::Vec;

use phx_proto::{
    Envelope, RefGenerator, Reference, HEARTBEAT, PHOENIX_TOPIC, PHX_JOIN, TIME_EVENT,
};
use phx_transport::{LocalMillis, Transport, TransportError, TransportEvent};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::LogicalClock;
use crate::config::{ConfigError, SessionConfig};
use crate::error::SessionError;
use crate::retry::{deliver, ImmediateRetry, RetryPolicy, Throttle};
use crate::router::{self, JoinReply, PendingKind, PendingRequests, Route};

/// セッション状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    ConnectedUnjoined,
    Joining,
    Joined,
}

impl SessionState {
    /// トランスポートが接続中の状態か
    pub fn is_connected(&self) -> bool {
        !matches!(self, SessionState::Disconnected)
    }
}

/// `tick()` がアプリ層へ返すイベント
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// トランスポートが（再）接続した
    Connected,
    /// トランスポートが切断した
    Disconnected { code: u16 },
    /// チャンネル参加が確定した
    JoinAccepted { group_id: u64, sensor_ids: Vec<u64> },
    /// join が拒否された、または応答が不正だった。join 間隔で再試行が続く。
    /// `consecutive` は連続拒否回数（運用側で認証情報の不備を検知するため）
    JoinRejected { reason: String, consecutive: u32 },
    /// 論理時計がサーバー時刻に同期した
    TimeSynced { epoch: u32 },
    /// サーバープッシュ
    Push {
        topic: String,
        event: String,
        payload: Value,
    },
    /// 致命的でないエラー（ログ・観測用）
    Error(SessionError),
}

/// セッション統計
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub join_attempts: u64,
    pub join_rejections: u64,
    /// 直近の連続 join 拒否回数（参加成功で 0 に戻る）
    pub consecutive_rejections: u32,
    pub malformed_replies: u64,
    pub heartbeats_sent: u64,
    pub sync_requests: u64,
    pub parse_errors: u64,
    pub delivery_failures: u64,
    /// 切断で破棄した応答待ちリクエスト数
    pub cancelled_requests: u64,
    /// 現在の応答待ちリクエスト数
    pub pending_count: usize,
}

/// Phoenix チャンネルセッション
pub struct ChannelSession<T: Transport, P: RetryPolicy = ImmediateRetry> {
    transport: T,
    policy: P,
    config: SessionConfig,
    state: SessionState,
    /// 再接続してもリセットしない
    refs: RefGenerator,
    join_payload: Option<Value>,
    /// 切断してもクリアしない
    clock: LogicalClock,
    pending: PendingRequests,
    /// 切断してもリセットしない（再接続直後の join 連打を防ぐ）
    join_throttle: Throttle,
    sync_throttle: Throttle,
    heartbeat: Throttle,
    stats: SessionStats,
    /// 次の tick で返すイベント
    events: Vec<SessionEvent>,
}

impl<T: Transport> ChannelSession<T, ImmediateRetry> {
    /// 設定の再試行回数で即時リトライするセッションを生成する
    pub fn new(transport: T, config: SessionConfig) -> Result<Self, ConfigError> {
        let policy = ImmediateRetry::new(config.max_send_retries);
        Self::with_policy(transport, config, policy)
    }
}

impl<T: Transport, P: RetryPolicy> ChannelSession<T, P> {
    /// 送信リトライポリシーを指定してセッションを生成する
    pub fn with_policy(transport: T, config: SessionConfig, policy: P) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(ChannelSession {
            transport,
            policy,
            join_payload: config.join_payload.clone(),
            clock: LogicalClock::new(config.clock_reanchor_ms),
            join_throttle: Throttle::new(config.rejoin_interval_ms),
            sync_throttle: Throttle::new(config.resync_interval_ms),
            heartbeat: Throttle::new(config.heartbeat_interval_ms),
            config,
            state: SessionState::Disconnected,
            refs: RefGenerator::new(),
            pending: PendingRequests::new(),
            stats: SessionStats::default(),
            events: Vec::new(),
        })
    }

    /// 設定された接続先への接続をトランスポートに依頼する
    pub fn connect(&mut self) -> Result<(), SessionError> {
        info!(url = %self.config.endpoint.url(), topic = %self.config.topic, "connecting");
        self.transport.connect(&self.config.endpoint)?;
        Ok(())
    }

    /// 駆動ループから定期的に呼び出す
    ///
    /// - トランスポートの保留イベントをすべて処理する
    /// - 接続中ならハートビート間隔を評価する
    /// - 未参加なら join スロットルを評価して再試行する
    ///
    /// # 引数
    /// - `now_ms`: デバイスのローカルミリ秒（`millis()`）
    ///
    /// # 戻り値
    /// 前回の tick 以降に発生したイベント
    pub fn tick(&mut self, now_ms: u32) -> Vec<SessionEvent> {
        let now = LocalMillis(now_ms);

        while let Some(event) = self.transport.poll_event() {
            self.handle_transport_event(event, now);
        }

        // 切断イベントが届く前にソケットが落ちていることがある
        let link_up = self.state.is_connected() && self.transport.is_connected();

        if link_up && self.heartbeat.ready(now) {
            self.send_heartbeat(now);
        }

        if link_up
            && matches!(
                self.state,
                SessionState::ConnectedUnjoined | SessionState::Joining
            )
        {
            if let Err(err) = self.attempt_join(now) {
                self.events.push(SessionEvent::Error(err));
            }
        }

        core::mem::take(&mut self.events)
    }

    /// チャンネルへの参加を要求する
    ///
    /// - `ConnectedUnjoined`: ペイロードを保存して即座に join を送る（スロットル内・
    ///   ソケット断なら次の tick）
    /// - `Disconnected`: ペイロードを保存し、接続後の tick で送る
    /// - `Joining` / `Joined`: 何もしない
    pub fn join(&mut self, payload: Value, now_ms: u32) -> Result<(), SessionError> {
        match self.state {
            SessionState::Joining | SessionState::Joined => {
                debug!(state = ?self.state, "join already in progress");
                Ok(())
            }
            SessionState::Disconnected => {
                self.join_payload = Some(payload);
                Ok(())
            }
            SessionState::ConnectedUnjoined => {
                self.join_payload = Some(payload);
                if !self.transport.is_connected() {
                    return Ok(());
                }
                self.attempt_join(LocalMillis(now_ms)).map(|_| ())
            }
        }
    }

    /// 参加済みチャンネルへイベントを送る
    ///
    /// # エラー
    /// - `SessionError::NotJoined`: 未参加
    /// - `SessionError::DeliveryFailed`: 再試行を使い切った
    pub fn send(&mut self, event: &str, payload: Option<&Value>) -> Result<Reference, SessionError> {
        if self.state != SessionState::Joined {
            return Err(SessionError::NotJoined);
        }
        let reference = self.refs.next();
        let frame = Envelope::encode(&self.config.topic, event, reference, payload);
        self.deliver_frame(&frame)?;
        debug!(event, %reference, "event sent");
        Ok(reference)
    }

    /// 時刻同期リクエスト（`time` イベント）を送る。未参加なら何もしない
    ///
    /// # 戻り値
    /// 送信したら true
    pub fn request_sync(&mut self, now_ms: u32) -> Result<bool, SessionError> {
        if self.state != SessionState::Joined {
            return Ok(false);
        }
        self.sync_throttle.mark(LocalMillis(now_ms));
        let reference = self.refs.next();
        let frame = Envelope::encode(&self.config.topic, TIME_EVENT, reference, None);
        self.deliver_frame(&frame)?;
        self.pending.track(reference, PendingKind::TimeSync);
        self.stats.sync_requests += 1;
        debug!(%reference, "time sync requested");
        Ok(true)
    }

    /// 補間したサーバー時刻（Unix 秒）。未同期なら 0
    ///
    /// 未同期かつ参加中なら、`resync_interval_ms` に 1 回まで同期を要求する。
    /// 0 は「時刻不明、まだタイムスタンプを付けない」の意味。
    pub fn now(&mut self, now_ms: u32) -> u32 {
        let now = LocalMillis(now_ms);
        if self.clock.is_synchronized() {
            return self.clock.now(now);
        }
        if self.state == SessionState::Joined && self.sync_throttle.ready(now) {
            if let Err(err) = self.request_sync(now_ms) {
                self.events.push(SessionEvent::Error(err));
            }
        }
        0
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_joined(&self) -> bool {
        self.state == SessionState::Joined
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    /// 最後に発行した ref
    pub fn last_reference(&self) -> Option<Reference> {
        self.refs.last()
    }

    /// セッション統計を返す
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            pending_count: self.pending.len(),
            ..self.stats.clone()
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// ホストがイベントを積む・送信フレームを取り出すためのアクセス
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ===== Private メソッド =====

    fn handle_transport_event(&mut self, event: TransportEvent, now: LocalMillis) {
        match event {
            TransportEvent::Connected => {
                if self.state.is_connected() {
                    // 切断通知なしの再接続。サーバー側の join は失われている
                    self.cancel_pending();
                }
                info!(topic = %self.config.topic, "transport connected");
                self.state = SessionState::ConnectedUnjoined;
                self.heartbeat.mark(now);
                self.events.push(SessionEvent::Connected);
            }
            TransportEvent::Disconnected { code } => {
                info!(code, state = ?self.state, "transport disconnected");
                self.enter_disconnected();
                self.events.push(SessionEvent::Disconnected { code });
            }
            TransportEvent::Error(message) => {
                warn!(error = %message, state = ?self.state, "transport error");
                self.enter_disconnected();
                self.events.push(SessionEvent::Error(SessionError::Transport(
                    TransportError::Socket(message),
                )));
            }
            TransportEvent::Text(text) => self.handle_frame(text.as_bytes(), now),
            TransportEvent::Binary(bytes) => {
                debug!(len = bytes.len(), "binary frame ignored");
            }
        }
    }

    /// 切断状態へ遷移する。論理時計と join スロットルは保持する
    fn enter_disconnected(&mut self) {
        self.state = SessionState::Disconnected;
        self.cancel_pending();
        self.heartbeat.reset();
        self.sync_throttle.reset();
    }

    fn cancel_pending(&mut self) {
        let cancelled = self.pending.cancel_all();
        if cancelled > 0 {
            debug!(cancelled, "pending requests cancelled");
            self.stats.cancelled_requests += cancelled as u64;
        }
    }

    fn handle_frame(&mut self, bytes: &[u8], now: LocalMillis) {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "dropping undecodable frame");
                self.stats.parse_errors += 1;
                self.events.push(SessionEvent::Error(SessionError::Parse(err)));
                return;
            }
        };

        match router::route(&envelope) {
            Route::HeartbeatReply => {
                debug!(reference = ?envelope.reference, "heartbeat acknowledged");
            }
            Route::Reply => self.handle_reply(envelope, now),
            Route::Push => {
                debug!(topic = %envelope.topic, event = %envelope.event, "push received");
                self.events.push(SessionEvent::Push {
                    topic: envelope.topic,
                    event: envelope.event,
                    payload: envelope.payload,
                });
            }
        }
    }

    fn handle_reply(&mut self, envelope: Envelope, now: LocalMillis) {
        if envelope.topic != self.config.topic {
            debug!(topic = %envelope.topic, "reply for unknown topic ignored");
            return;
        }

        let matched = envelope.reference.and_then(|r| self.pending.resolve(r));
        if matched.is_none() {
            debug!(reference = ?envelope.reference, "reply matches no pending request");
        }

        match self.state {
            SessionState::Joining => self.handle_join_reply(&envelope.payload, now),
            SessionState::Joined => match router::interpret_sync_reply(&envelope.payload) {
                Some(epoch) => {
                    self.clock.synchronize(epoch, now);
                    info!(epoch, "time synchronized");
                    self.events.push(SessionEvent::TimeSynced { epoch });
                }
                None => debug!(matched = ?matched, "reply without timestamp ignored"),
            },
            SessionState::Disconnected | SessionState::ConnectedUnjoined => {
                debug!(state = ?self.state, "reply ignored");
            }
        }
    }

    fn handle_join_reply(&mut self, payload: &Value, now: LocalMillis) {
        let reason = match router::interpret_join_reply(payload) {
            JoinReply::Accepted {
                group_id,
                sensor_ids,
            } => {
                self.state = SessionState::Joined;
                self.stats.consecutive_rejections = 0;
                info!(topic = %self.config.topic, group_id, sensors = sensor_ids.len(), "channel joined");
                self.events.push(SessionEvent::JoinAccepted {
                    group_id,
                    sensor_ids,
                });
                if let Err(err) = self.request_sync(now.raw()) {
                    self.events.push(SessionEvent::Error(err));
                }
                return;
            }
            JoinReply::Rejected { reason } => reason,
            JoinReply::Malformed(field) => {
                self.stats.malformed_replies += 1;
                alloc::format!("malformed join reply: {}", field)
            }
        };

        self.stats.join_rejections += 1;
        self.stats.consecutive_rejections += 1;
        let consecutive = self.stats.consecutive_rejections;
        warn!(
            topic = %self.config.topic,
            reason = %reason,
            consecutive,
            "join not accepted; retrying at join interval"
        );
        self.events
            .push(SessionEvent::JoinRejected { reason, consecutive });
    }

    /// join スロットルが許せば `phx_join` を送る
    ///
    /// 送信失敗でも試行時刻は記録する（スロットルは試行回数を制限する）。
    fn attempt_join(&mut self, now: LocalMillis) -> Result<bool, SessionError> {
        let Some(payload) = self.join_payload.as_ref() else {
            return Ok(false);
        };
        if !self.join_throttle.ready(now) {
            return Ok(false);
        }
        self.join_throttle.mark(now);
        self.stats.join_attempts += 1;

        let reference = self.refs.next();
        let frame = Envelope::encode(&self.config.topic, PHX_JOIN, reference, Some(payload));
        self.deliver_frame(&frame)?;

        if let Some(superseded) = self.pending.track(reference, PendingKind::Join) {
            debug!(%superseded, "previous join attempt superseded");
        }
        self.state = SessionState::Joining;
        info!(topic = %self.config.topic, %reference, attempt = self.stats.join_attempts, "joining channel");
        Ok(true)
    }

    fn send_heartbeat(&mut self, now: LocalMillis) {
        self.heartbeat.mark(now);
        let reference = self.refs.next();
        let frame = Envelope::encode(PHOENIX_TOPIC, HEARTBEAT, reference, None);
        match self.deliver_frame(&frame) {
            Ok(()) => {
                self.stats.heartbeats_sent += 1;
                debug!(%reference, "heartbeat sent");
            }
            Err(err) => self.events.push(SessionEvent::Error(err)),
        }
    }

    /// 1 フレームをリトライポリシーに従って送る
    fn deliver_frame(&mut self, frame: &str) -> Result<(), SessionError> {
        let transport = &mut self.transport;
        match deliver(&self.policy, |_| transport.send_text(frame)) {
            Ok(()) => Ok(()),
            Err(failed) => {
                self.stats.delivery_failures += 1;
                warn!(attempts = failed.attempts, error = %failed.last_error, "frame delivery failed");
                Err(failed.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use phx_transport::{Endpoint, QueuedTransport};
    use serde_json::json;

    const TOPIC: &str = "devices:42";

    fn config() -> SessionConfig {
        SessionConfig::new(Endpoint::new("esplogger.tech", 4000, "/socket/websocket"), TOPIC)
            .with_join_payload(json!({"token": "secret"}))
    }

    fn session() -> ChannelSession<QueuedTransport> {
        ChannelSession::new(QueuedTransport::new(), config()).unwrap()
    }

    /// 接続イベントを流して最初の join まで進めたセッション
    fn connected_session(now_ms: u32) -> ChannelSession<QueuedTransport> {
        let mut s = session();
        s.transport_mut().push_event(TransportEvent::Connected);
        s.tick(now_ms);
        s
    }

    fn sent(s: &mut ChannelSession<QueuedTransport>) -> Vec<Envelope> {
        s.transport_mut()
            .drain_outbound()
            .iter()
            .map(|f| Envelope::decode(f.as_bytes()).unwrap())
            .collect()
    }

    fn count_event(frames: &[Envelope], event: &str) -> usize {
        frames.iter().filter(|f| f.event == event).count()
    }

    fn reply(reference: Option<Reference>, response: Value) -> String {
        let r = reference.map(|r| r.to_string()).unwrap_or_default();
        alloc::format!(
            r#"{{"topic":"{}","event":"phx_reply","ref":"{}","payload":{{"status":"ok","response":{}}}}}"#,
            TOPIC, r, response
        )
    }

    fn joined_session(now_ms: u32) -> ChannelSession<QueuedTransport> {
        let mut s = connected_session(now_ms);
        let join_ref = sent(&mut s)
            .into_iter()
            .find(|f| f.event == PHX_JOIN)
            .and_then(|f| f.reference);
        s.transport_mut()
            .push_text(reply(join_ref, json!({"group_id": 7, "sensor_ids": [1, 2, 3]})));
        s.tick(now_ms);
        assert!(s.is_joined());
        s
    }

    /// 常に送信に失敗するトランスポート
    struct DeadTransport {
        inbound: Vec<TransportEvent>,
        attempts: u32,
    }

    impl Transport for DeadTransport {
        fn connect(&mut self, _endpoint: &Endpoint) -> Result<(), TransportError> {
            Ok(())
        }
        fn send_text(&mut self, _text: &str) -> Result<(), TransportError> {
            self.attempts += 1;
            Err(TransportError::SendFailed("buffer full".into()))
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn poll_event(&mut self) -> Option<TransportEvent> {
            if self.inbound.is_empty() {
                None
            } else {
                Some(self.inbound.remove(0))
            }
        }
    }

    /// 接続イベントの後、切断通知なしに落ちたトランスポート
    struct SilentlyDroppedTransport {
        inbound: Vec<TransportEvent>,
        sends: u32,
    }

    impl Transport for SilentlyDroppedTransport {
        fn connect(&mut self, _endpoint: &Endpoint) -> Result<(), TransportError> {
            Ok(())
        }
        fn send_text(&mut self, _text: &str) -> Result<(), TransportError> {
            self.sends += 1;
            Err(TransportError::NotConnected)
        }
        fn is_connected(&self) -> bool {
            false
        }
        fn poll_event(&mut self) -> Option<TransportEvent> {
            if self.inbound.is_empty() {
                None
            } else {
                Some(self.inbound.remove(0))
            }
        }
    }

    #[test]
    fn test_new_session_is_disconnected() {
        let s = session();
        assert_eq!(s.state(), SessionState::Disconnected);
        assert!(!s.is_joined());
        assert_eq!(s.topic(), TOPIC);
        assert_eq!(s.stats(), SessionStats::default());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let bad = SessionConfig::new(Endpoint::default(), "");
        assert!(ChannelSession::new(QueuedTransport::new(), bad).is_err());
    }

    #[test]
    fn test_connect_uses_configured_endpoint() {
        let mut s = session();
        s.connect().unwrap();
        assert_eq!(s.transport().requested_endpoint(), Some(&config().endpoint));
    }

    #[test]
    fn test_connect_sends_join_immediately() {
        let mut s = session();
        s.transport_mut().push_event(TransportEvent::Connected);
        let events = s.tick(1000);

        assert_eq!(events, alloc::vec![SessionEvent::Connected]);
        assert_eq!(s.state(), SessionState::Joining);
        let frames = sent(&mut s);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, PHX_JOIN);
        assert_eq!(frames[0].topic, TOPIC);
        assert_eq!(frames[0].payload, json!({"token": "secret"}));
        assert_eq!(frames[0].reference, Some(Reference(1)));
    }

    #[test]
    fn test_join_attempts_throttled_to_interval() {
        let mut s = connected_session(0);
        let mut attempt_times = alloc::vec![0u32];
        let _ = sent(&mut s);

        // 応答が来ないまま 100ms ごとに 60 秒 tick し続ける
        for now in (100..=60_000).step_by(100) {
            s.tick(now);
            if count_event(&sent(&mut s), PHX_JOIN) > 0 {
                attempt_times.push(now);
            }
        }

        assert_eq!(attempt_times.len(), 13);
        for pair in attempt_times.windows(2) {
            assert!(pair[1] - pair[0] >= crate::REJOIN_INTERVAL_MS);
        }
        assert_eq!(s.state(), SessionState::Joining);
        // 古い join は置き換えられ、応答待ちは常に 1 件
        assert_eq!(s.stats().pending_count, 1);
    }

    #[test]
    fn test_join_ack_joins_and_requests_sync_once() {
        let mut s = connected_session(0);
        let join_ref = sent(&mut s)[0].reference;

        s.transport_mut()
            .push_text(reply(join_ref, json!({"group_id": 7, "sensor_ids": [1, 2, 3]})));
        let events = s.tick(200);

        assert!(s.is_joined());
        assert_eq!(
            events,
            alloc::vec![SessionEvent::JoinAccepted {
                group_id: 7,
                sensor_ids: alloc::vec![1, 2, 3]
            }]
        );
        let frames = sent(&mut s);
        assert_eq!(count_event(&frames, TIME_EVENT), 1);
        assert_eq!(frames.len(), 1);

        // 参加後はそれ以上 join も time も送らない（時刻を問い合わせない限り）
        s.tick(10_000);
        let later = sent(&mut s);
        assert_eq!(count_event(&later, PHX_JOIN), 0);
        assert_eq!(count_event(&later, TIME_EVENT), 0);
    }

    #[test]
    fn test_rejection_keeps_retrying_at_interval() {
        let mut s = connected_session(0);
        let _ = sent(&mut s);

        s.transport_mut()
            .push_text(reply(Some(Reference(1)), json!({"reason": "invalid token"})));
        let events = s.tick(100);
        assert_eq!(
            events,
            alloc::vec![SessionEvent::JoinRejected {
                reason: "invalid token".into(),
                consecutive: 1
            }]
        );
        assert_eq!(s.state(), SessionState::Joining);

        // スロットル内では再試行しない
        s.tick(4_999);
        assert_eq!(count_event(&sent(&mut s), PHX_JOIN), 0);

        s.tick(5_000);
        let frames = sent(&mut s);
        assert_eq!(count_event(&frames, PHX_JOIN), 1);

        s.transport_mut()
            .push_text(reply(frames[0].reference, json!({"reason": "invalid token"})));
        let events = s.tick(5_100);
        assert_eq!(
            events,
            alloc::vec![SessionEvent::JoinRejected {
                reason: "invalid token".into(),
                consecutive: 2
            }]
        );
        assert!(!s.is_joined());
        assert_eq!(s.stats().join_rejections, 2);
    }

    #[test]
    fn test_malformed_ack_is_silent_non_join() {
        let mut s = connected_session(0);
        let _ = sent(&mut s);

        s.transport_mut()
            .push_text(reply(Some(Reference(1)), json!({"group_id": "seven"})));
        let events = s.tick(100);

        assert_eq!(s.state(), SessionState::Joining);
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::JoinRejected { consecutive: 1, .. }]
        ));
        assert_eq!(s.stats().malformed_replies, 1);
    }

    #[test]
    fn test_join_is_noop_while_joining() {
        let mut s = connected_session(0);
        let _ = sent(&mut s);

        s.join(json!({"token": "other"}), 10_000).unwrap();
        assert!(sent(&mut s).is_empty());
        assert_eq!(s.stats().join_attempts, 1);
    }

    #[test]
    fn test_join_is_noop_while_joined() {
        let mut s = joined_session(0);
        let _ = sent(&mut s);

        s.join(json!({"token": "other"}), 10_000).unwrap();
        s.tick(10_000);
        assert_eq!(count_event(&sent(&mut s), PHX_JOIN), 0);
        assert_eq!(s.stats().join_attempts, 1);
        assert_eq!(s.state(), SessionState::Joined);
    }

    #[test]
    fn test_explicit_join_from_connected_unjoined() {
        let mut cfg = config();
        cfg.join_payload = None;
        let mut s = ChannelSession::new(QueuedTransport::new(), cfg).unwrap();

        s.transport_mut().push_event(TransportEvent::Connected);
        s.tick(0);
        assert_eq!(s.state(), SessionState::ConnectedUnjoined);
        assert!(sent(&mut s).is_empty());

        s.join(json!({"token": "late"}), 10).unwrap();
        assert_eq!(s.state(), SessionState::Joining);
        let frames = sent(&mut s);
        assert_eq!(frames[0].payload["token"], "late");
    }

    #[test]
    fn test_join_while_disconnected_waits_for_connect() {
        let mut cfg = config();
        cfg.join_payload = None;
        let mut s = ChannelSession::new(QueuedTransport::new(), cfg).unwrap();

        s.join(json!({"token": "queued"}), 0).unwrap();
        assert_eq!(s.state(), SessionState::Disconnected);

        s.transport_mut().push_event(TransportEvent::Connected);
        s.tick(50);
        let frames = sent(&mut s);
        assert_eq!(frames[0].event, PHX_JOIN);
        assert_eq!(frames[0].payload["token"], "queued");
    }

    #[test]
    fn test_now_before_sync_is_zero_then_interpolates() {
        let mut s = joined_session(1_000);
        assert_eq!(s.now(1_000), 0);

        let time_ref = sent(&mut s)
            .into_iter()
            .find(|f| f.event == TIME_EVENT)
            .and_then(|f| f.reference);
        s.transport_mut()
            .push_text(reply(time_ref, json!({"timestamp": 1000})));
        let events = s.tick(2_000);

        assert_eq!(events, alloc::vec![SessionEvent::TimeSynced { epoch: 1000 }]);
        assert_eq!(s.now(7_000), 1005);
        assert_eq!(s.stats().pending_count, 0);
    }

    #[test]
    fn test_lazy_resync_throttled() {
        let mut s = joined_session(0);
        // 参加直後の time 要求
        assert_eq!(count_event(&sent(&mut s), TIME_EVENT), 1);

        assert_eq!(s.now(500), 0);
        assert_eq!(count_event(&sent(&mut s), TIME_EVENT), 0);

        assert_eq!(s.now(1_000), 0);
        assert_eq!(count_event(&sent(&mut s), TIME_EVENT), 1);

        assert_eq!(s.now(1_500), 0);
        assert_eq!(count_event(&sent(&mut s), TIME_EVENT), 0);
        assert_eq!(s.stats().sync_requests, 2);
    }

    #[test]
    fn test_now_unjoined_does_not_request_sync() {
        let mut s = connected_session(0);
        let _ = sent(&mut s);
        assert_eq!(s.now(5_000), 0);
        assert_eq!(count_event(&sent(&mut s), TIME_EVENT), 0);
        assert_eq!(s.request_sync(5_000), Ok(false));
    }

    #[test]
    fn test_disconnect_keeps_clock_and_cancels_pending() {
        let mut s = joined_session(0);
        let time_ref = sent(&mut s)[0].reference;
        s.transport_mut()
            .push_text(reply(time_ref, json!({"timestamp": 1000})));
        s.tick(0);

        // もう一度同期要求を出して応答待ちを残す
        s.request_sync(10).unwrap();
        assert_eq!(s.stats().pending_count, 1);

        s.transport_mut()
            .push_event(TransportEvent::Disconnected { code: 1006 });
        let events = s.tick(1_000);

        assert_eq!(events, alloc::vec![SessionEvent::Disconnected { code: 1006 }]);
        assert_eq!(s.state(), SessionState::Disconnected);
        assert_eq!(s.stats().pending_count, 0);
        assert_eq!(s.stats().cancelled_requests, 1);
        assert_eq!(s.now(61_000), 1061);
    }

    #[test]
    fn test_rejoin_after_reconnect_respects_interval() {
        let mut s = joined_session(0);
        let _ = sent(&mut s);

        s.transport_mut()
            .push_event(TransportEvent::Disconnected { code: 1000 });
        s.transport_mut().push_event(TransportEvent::Connected);
        s.tick(2_000);
        assert_eq!(s.state(), SessionState::ConnectedUnjoined);
        assert_eq!(count_event(&sent(&mut s), PHX_JOIN), 0);

        s.tick(5_000);
        assert_eq!(s.state(), SessionState::Joining);
        let frames = sent(&mut s);
        assert_eq!(count_event(&frames, PHX_JOIN), 1);
        // ref は再接続でリセットされない
        assert!(frames[0].reference.unwrap().raw() > 2);
    }

    #[test]
    fn test_heartbeat_cadence_regardless_of_join() {
        let mut cfg = config();
        cfg.join_payload = None;
        let mut s = ChannelSession::new(QueuedTransport::new(), cfg).unwrap();
        s.transport_mut().push_event(TransportEvent::Connected);
        s.tick(0);

        let mut beats = Vec::new();
        for now in (1_000..=95_000).step_by(1_000) {
            s.tick(now);
            for frame in sent(&mut s) {
                if frame.event == HEARTBEAT {
                    assert_eq!(frame.topic, PHOENIX_TOPIC);
                    assert_eq!(frame.payload, json!({}));
                    beats.push(now);
                }
            }
        }

        assert_eq!(beats, alloc::vec![30_000, 60_000, 90_000]);
        assert_eq!(s.state(), SessionState::ConnectedUnjoined);
        assert_eq!(s.stats().heartbeats_sent, 3);
    }

    #[test]
    fn test_no_heartbeat_while_disconnected() {
        let mut s = session();
        s.tick(0);
        s.tick(120_000);
        assert!(s.transport().outbound().is_empty());
        assert_eq!(s.stats().heartbeats_sent, 0);
    }

    #[test]
    fn test_heartbeat_reply_ignored() {
        let mut s = joined_session(0);
        let _ = sent(&mut s);
        s.transport_mut().push_text(
            r#"{"topic":"phoenix","event":"phx_reply","ref":"5","payload":{"status":"ok","response":{}}}"#,
        );
        let events = s.tick(100);
        assert!(events.is_empty());
        assert!(s.is_joined());
    }

    #[test]
    fn test_push_event_forwarded() {
        let mut s = joined_session(0);
        s.transport_mut().push_text(
            r#"{"topic":"devices:42","event":"update_interval","ref":null,"payload":{"interval":120}}"#,
        );
        let events = s.tick(100);
        assert_eq!(
            events,
            alloc::vec![SessionEvent::Push {
                topic: TOPIC.into(),
                event: "update_interval".into(),
                payload: json!({"interval": 120}),
            }]
        );
    }

    #[test]
    fn test_parse_error_does_not_change_state() {
        let mut s = connected_session(0);
        s.transport_mut().push_text("{not json");
        let events = s.tick(100);

        assert_eq!(s.state(), SessionState::Joining);
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Error(SessionError::Parse(_))]
        ));
        assert_eq!(s.stats().parse_errors, 1);
    }

    #[test]
    fn test_reply_for_other_topic_ignored() {
        let mut s = connected_session(0);
        s.transport_mut().push_text(
            r#"{"topic":"devices:99","event":"phx_reply","ref":"1","payload":{"response":{"group_id":1,"sensor_ids":[]}}}"#,
        );
        s.tick(100);
        assert_eq!(s.state(), SessionState::Joining);
    }

    #[test]
    fn test_send_requires_join() {
        let mut s = connected_session(0);
        assert_eq!(s.send("status", None), Err(SessionError::NotJoined));

        let mut joined = joined_session(0);
        let _ = sent(&mut joined);
        let reference = joined.send("status", Some(&json!({"rssi": -70}))).unwrap();
        let frames = sent(&mut joined);
        assert_eq!(frames[0].reference, Some(reference));
        assert_eq!(frames[0].payload["rssi"], -70);
    }

    #[test]
    fn test_transport_error_disconnects() {
        let mut s = joined_session(0);
        s.transport_mut()
            .push_event(TransportEvent::Error("connection reset".into()));
        let events = s.tick(100);

        assert_eq!(s.state(), SessionState::Disconnected);
        assert_eq!(
            events,
            alloc::vec![SessionEvent::Error(SessionError::Transport(
                TransportError::Socket("connection reset".into())
            ))]
        );
    }

    #[test]
    fn test_delivery_failure_after_retries() {
        let transport = DeadTransport {
            inbound: alloc::vec![TransportEvent::Connected],
            attempts: 0,
        };
        let mut s = ChannelSession::new(transport, config()).unwrap();
        let events = s.tick(0);

        assert_eq!(s.transport().attempts, 4);
        assert_eq!(s.state(), SessionState::ConnectedUnjoined);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::Error(SessionError::DeliveryFailed { attempts: 4, .. })
        )));
        assert_eq!(s.stats().delivery_failures, 1);

        // 失敗した試行もスロットル対象
        s.tick(1_000);
        assert_eq!(s.transport().attempts, 4);
        s.tick(5_000);
        assert_eq!(s.transport().attempts, 8);
    }

    #[test]
    fn test_nothing_sent_while_transport_reports_down() {
        let transport = SilentlyDroppedTransport {
            inbound: alloc::vec![TransportEvent::Connected],
            sends: 0,
        };
        let mut s = ChannelSession::new(transport, config()).unwrap();

        for now in (0..=60_000).step_by(1_000) {
            s.tick(now);
        }
        s.join(json!({"token": "again"}), 60_000).unwrap();

        assert_eq!(s.transport().sends, 0);
        assert_eq!(s.state(), SessionState::ConnectedUnjoined);
        let stats = s.stats();
        assert_eq!(stats.join_attempts, 0);
        assert_eq!(stats.heartbeats_sent, 0);
        assert_eq!(stats.delivery_failures, 0);
    }
}
