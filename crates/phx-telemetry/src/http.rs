//! HTTP によるバッチ送信経路
//!
//! WebSocket とは独立に、一定間隔で読み取ったセンサー値を溜めて
//! REST API にまとめて POST する。
//!
//! ```text
//! GET  <scheme>://<host>/api/v1/time   → 200 {"unix_time": N}
//! POST <scheme>://<host>/api/v1/log    → 201
//!      Authorization: Bearer <api_key>
//!      Content-Type: application/json
//! ```
//!
//! ## タイミング
//!
//! 時刻が未同期の間は `tick()` のたびに時刻取得だけを試みる。
//! 同期後は読み取り間隔ごとに全センサーを読み、ログ間隔ごとに POST する。
//! 読み取りが遅れた分は次の間隔から最大 5 秒差し引いて取り戻す。

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use phx_session::{deliver, ImmediateRetry, LogicalClock, RetryPolicy};
use phx_transport::LocalMillis;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TelemetryError;
use crate::identity::DeviceIdentity;
use crate::{MAX_LOG_INTERVAL_S, MAX_READ_INTERVAL_S, MIN_LOG_INTERVAL_S, MIN_READ_INTERVAL_S};

pub const LOG_PATH: &str = "/api/v1/log";
pub const TIME_PATH: &str = "/api/v1/time";
pub const DEFAULT_HOST: &str = "esplogger.tech";

/// POST 成功時のステータス
pub const LOG_CREATED: u16 = 201;
/// GET 成功時のステータス
pub const TIME_OK: u16 = 200;

/// 読み取り遅れを取り戻す最大秒数
const MAX_READ_CATCH_UP_S: u32 = 5;

/// 時刻同期後、この時間が過ぎたら POST 成功時に取り直す
const TIME_RESYNC_AFTER_MS: u32 = 86_400_000;

/// HTTP 応答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// 1 回の HTTP 試行の失敗
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpFailure {
    /// 期待と違うステータスコード
    #[error("unexpected status {0}")]
    Status(u16),
    /// 接続・送受信の失敗
    #[error("request failed: {0}")]
    Request(String),
}

/// 同期 HTTP クライアント
///
/// ヘッダーは `(name, value)` の組で渡す。
pub trait HttpClient {
    fn get(&mut self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, HttpFailure>;

    fn post(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
        body: &str,
    ) -> Result<HttpResponse, HttpFailure>;
}

/// センサーの静的な情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub name: String,
    pub unit: String,
    pub sensor_type: String,
}

impl SensorDescriptor {
    pub fn new(
        name: impl Into<String>,
        unit: impl Into<String>,
        sensor_type: impl Into<String>,
    ) -> Self {
        SensorDescriptor {
            name: name.into(),
            unit: unit.into(),
            sensor_type: sensor_type.into(),
        }
    }
}

/// 1 回の読み取り値
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub value: f64,
    pub timestamp: u32,
}

struct SensorLog {
    descriptor: SensorDescriptor,
    readings: Vec<Reading>,
}

/// センサーごとの読み取り値バッファ
pub struct LogBatch {
    sensors: Vec<SensorLog>,
    capacity: usize,
}

#[derive(Serialize)]
struct SensorDocument<'a> {
    name: &'a str,
    unit: &'a str,
    sensor_type: &'a str,
    sensor_values: &'a [Reading],
}

#[derive(Serialize)]
struct DeviceDocument<'a> {
    device_id: u64,
    device_name: &'a str,
    group_name: &'a str,
    sensors: Vec<SensorDocument<'a>>,
}

impl LogBatch {
    /// 最大 `capacity` 個のセンサーを登録できるバッファ
    pub fn with_capacity(capacity: usize) -> Self {
        LogBatch {
            sensors: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// センサーを登録する。満杯なら false
    pub fn add_sensor(&mut self, descriptor: SensorDescriptor) -> bool {
        if self.sensors.len() >= self.capacity {
            return false;
        }
        self.sensors.push(SensorLog {
            descriptor,
            readings: Vec::new(),
        });
        true
    }

    /// 登録済みの全センサーを `read` で読み、`timestamp` を付けて記録する
    pub fn record_all<F>(&mut self, timestamp: u32, mut read: F)
    where
        F: FnMut(&SensorDescriptor) -> f64,
    {
        for sensor in &mut self.sensors {
            let value = read(&sensor.descriptor);
            sensor.readings.push(Reading { value, timestamp });
        }
    }

    /// デバイスドキュメント（POST ボディ）を作る
    pub fn to_document(&self, identity: &DeviceIdentity) -> String {
        let document = DeviceDocument {
            device_id: identity.device_id,
            device_name: &identity.device_name,
            group_name: &identity.group_name,
            sensors: self
                .sensors
                .iter()
                .map(|s| SensorDocument {
                    name: &s.descriptor.name,
                    unit: &s.descriptor.unit,
                    sensor_type: &s.descriptor.sensor_type,
                    sensor_values: &s.readings,
                })
                .collect(),
        };
        serde_json::to_string(&document).expect("device document serialization is infallible")
    }

    /// 読み取り値だけを捨てる（センサー登録は残す）
    pub fn clear(&mut self) {
        for sensor in &mut self.sensors {
            sensor.readings.clear();
        }
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    pub fn reading_count(&self) -> usize {
        self.sensors.iter().map(|s| s.readings.len()).sum()
    }

    pub fn readings(&self, name: &str) -> Option<&[Reading]> {
        self.sensors
            .iter()
            .find(|s| s.descriptor.name == name)
            .map(|s| s.readings.as_slice())
    }
}

/// HTTP アップローダー設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    pub host: String,
    /// https を使うか
    pub secure: bool,
    /// ログ送信間隔（秒、60〜3600 に丸める）
    pub log_interval_s: u32,
    /// センサー読み取り間隔（秒、10〜1800 に丸める）
    pub read_interval_s: u32,
    /// 登録できるセンサー数
    pub max_sensors: usize,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        UploaderConfig {
            host: DEFAULT_HOST.into(),
            secure: true,
            log_interval_s: 60,
            read_interval_s: 30,
            max_sensors: 8,
        }
    }
}

/// `/api/v1/time` の応答ボディ
#[derive(Deserialize)]
struct TimeResponse {
    unix_time: u32,
}

/// HTTP ログアップローダー
pub struct LogUploader<H: HttpClient, P: RetryPolicy = ImmediateRetry> {
    client: H,
    policy: P,
    identity: DeviceIdentity,
    authorization: String,
    log_url: String,
    time_url: String,
    batch: LogBatch,
    clock: LogicalClock,
    last_time_sync: Option<LocalMillis>,
    log_interval_s: u32,
    read_interval_s: u32,
    /// Unix 秒
    last_log: u32,
    last_read: u32,
    last_read_timestamp: u32,
    read_catch_up_s: u32,
    transmitting: bool,
}

impl<H: HttpClient> LogUploader<H, ImmediateRetry> {
    pub fn new(client: H, identity: DeviceIdentity, config: &UploaderConfig) -> Self {
        Self::with_policy(client, identity, config, ImmediateRetry::default())
    }
}

impl<H: HttpClient, P: RetryPolicy> LogUploader<H, P> {
    pub fn with_policy(
        client: H,
        identity: DeviceIdentity,
        config: &UploaderConfig,
        policy: P,
    ) -> Self {
        let scheme = if config.secure { "https" } else { "http" };
        let mut uploader = LogUploader {
            client,
            policy,
            authorization: identity.bearer(),
            identity,
            log_url: format!("{}://{}{}", scheme, config.host, LOG_PATH),
            time_url: format!("{}://{}{}", scheme, config.host, TIME_PATH),
            batch: LogBatch::with_capacity(config.max_sensors),
            clock: LogicalClock::default(),
            last_time_sync: None,
            log_interval_s: MIN_LOG_INTERVAL_S,
            read_interval_s: MIN_READ_INTERVAL_S,
            last_log: 0,
            last_read: 0,
            last_read_timestamp: 0,
            read_catch_up_s: 0,
            transmitting: false,
        };
        uploader.set_log_interval(config.log_interval_s);
        uploader.set_read_interval(config.read_interval_s);
        uploader
    }

    pub fn add_sensor(&mut self, descriptor: SensorDescriptor) -> bool {
        self.batch.add_sensor(descriptor)
    }

    pub fn set_log_interval(&mut self, seconds: u32) {
        self.log_interval_s = seconds.clamp(MIN_LOG_INTERVAL_S, MAX_LOG_INTERVAL_S);
    }

    pub fn set_read_interval(&mut self, seconds: u32) {
        self.read_interval_s = seconds.clamp(MIN_READ_INTERVAL_S, MAX_READ_INTERVAL_S);
    }

    pub fn log_interval(&self) -> u32 {
        self.log_interval_s
    }

    pub fn read_interval(&self) -> u32 {
        self.read_interval_s
    }

    pub fn log_url(&self) -> &str {
        &self.log_url
    }

    pub fn time_url(&self) -> &str {
        &self.time_url
    }

    pub fn batch(&self) -> &LogBatch {
        &self.batch
    }

    pub fn client(&self) -> &H {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut H {
        &mut self.client
    }

    pub fn is_transmitting(&self) -> bool {
        self.transmitting
    }

    /// 補間した Unix 秒。未同期なら 0
    pub fn now(&mut self, now_ms: u32) -> u32 {
        self.clock.now(LocalMillis(now_ms))
    }

    /// 送信を開始する。間隔の起点を現在時刻に置く
    pub fn start(&mut self, now_ms: u32) {
        let unix = self.now(now_ms);
        self.last_log = unix;
        self.last_read = unix;
        self.transmitting = true;
    }

    pub fn stop(&mut self) {
        self.transmitting = false;
    }

    /// `/api/v1/time` から時刻を取得して時計を合わせる
    pub fn sync_time(&mut self, now_ms: u32) -> Result<u32, TelemetryError> {
        let headers = [
            ("Content-Type", "application/json"),
            ("Authorization", self.authorization.as_str()),
        ];
        let client = &mut self.client;
        let time_url = self.time_url.as_str();
        let response = deliver(&self.policy, |_| -> Result<HttpResponse, HttpFailure> {
            let response = client.get(time_url, &headers)?;
            if response.status == TIME_OK {
                Ok(response)
            } else {
                Err(HttpFailure::Status(response.status))
            }
        })
        .map_err(|failed| {
            warn!(attempts = failed.attempts, error = %failed.last_error, "time sync failed");
            TelemetryError::Upload {
                attempts: failed.attempts,
                last_error: failed.last_error,
            }
        })?;

        let time: TimeResponse = serde_json::from_str(&response.body)
            .map_err(|_| TelemetryError::InvalidTimeResponse)?;
        let now = LocalMillis(now_ms);
        self.clock.synchronize(time.unix_time, now);
        self.last_time_sync = Some(now);
        self.last_log = time.unix_time;
        self.last_read = time.unix_time;
        info!(unix_time = time.unix_time, "time synchronized over HTTP");
        Ok(time.unix_time)
    }

    /// 駆動ループから呼ぶ。POST に成功したら true
    ///
    /// `read` は読み取り間隔が来たときにセンサーごとに呼ばれる。
    pub fn tick<F>(&mut self, now_ms: u32, read: F) -> Result<bool, TelemetryError>
    where
        F: FnMut(&SensorDescriptor) -> f64,
    {
        if !self.transmitting {
            return Ok(false);
        }
        let unix = self.now(now_ms);
        if unix == 0 {
            self.sync_time(now_ms)?;
            return Ok(false);
        }

        self.read_sensors(unix, read);

        if unix.saturating_sub(self.last_log) > self.log_interval_s {
            self.last_log = unix;
            self.flush(now_ms)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// 溜まった読み取り値を POST する
    ///
    /// 成否にかかわらずバッファは空になる。
    pub fn flush(&mut self, now_ms: u32) -> Result<(), TelemetryError> {
        let body = self.batch.to_document(&self.identity);
        let readings = self.batch.reading_count();
        self.batch.clear();

        let headers = [
            ("Content-Type", "application/json"),
            ("Authorization", self.authorization.as_str()),
        ];
        let client = &mut self.client;
        let log_url = self.log_url.as_str();
        let result = deliver(&self.policy, |_| -> Result<(), HttpFailure> {
            let response = client.post(log_url, &headers, &body)?;
            if response.status == LOG_CREATED {
                Ok(())
            } else {
                Err(HttpFailure::Status(response.status))
            }
        });

        match result {
            Ok(()) => {
                debug!(readings, "log batch uploaded");
                let stale = self
                    .last_time_sync
                    .map(|at| LocalMillis(now_ms).elapsed_since(at) > TIME_RESYNC_AFTER_MS)
                    .unwrap_or(true);
                if stale {
                    // 失敗しても時計は補間を続けられる
                    if let Err(err) = self.sync_time(now_ms) {
                        debug!(error = %err, "periodic time resync failed");
                    }
                }
                Ok(())
            }
            Err(failed) => {
                warn!(attempts = failed.attempts, error = %failed.last_error, readings, "log upload failed");
                Err(TelemetryError::Upload {
                    attempts: failed.attempts,
                    last_error: failed.last_error,
                })
            }
        }
    }

    fn read_sensors<F>(&mut self, unix: u32, read: F)
    where
        F: FnMut(&SensorDescriptor) -> f64,
    {
        let due = self.read_interval_s.saturating_sub(self.read_catch_up_s);
        if unix.saturating_sub(self.last_read) <= due {
            return;
        }

        if self.last_read_timestamp != 0 {
            // 予定どおりなら前回の差し引きを引き継ぐ。早すぎた読み取りは 0 に戻す
            let late = i64::from(unix)
                - i64::from(self.last_read_timestamp)
                - i64::from(self.read_interval_s);
            if late != 0 {
                self.read_catch_up_s = late.clamp(0, i64::from(MAX_READ_CATCH_UP_S)) as u32;
            }
        }

        debug!(timestamp = unix, sensors = self.batch.sensor_count(), "reading sensors");
        self.batch.record_all(unix, read);
        self.last_read_timestamp = unix;
        self.last_read = unix;
    }
}
