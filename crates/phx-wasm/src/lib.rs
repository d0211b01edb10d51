//! # phx-wasm
//!
//! wasm-bindgen エクスポート：WebSocket を持つ JS ホストから呼び出す公開 API。
//!
//! ## 使用方法（TypeScript）
//!
//! ```typescript
//! import { DeviceClient, init_panic_hook } from '../phx-wasm-pkg/phx_wasm';
//!
//! // パニック時のスタックトレースを有効化（開発時）
//! init_panic_hook();
//!
//! const client = new DeviceClient(JSON.stringify({
//!     endpoint: { host: "esplogger.tech", port: 443, path: "/socket/websocket", secure: true },
//!     identity: { device_id: 1234, api_key: "42_secret" },
//! }));
//!
//! const ws = new WebSocket(client.url());
//! ws.onopen    = ()  => client.onConnect();
//! ws.onclose   = (e) => client.onDisconnect(e.code);
//! ws.onerror   = ()  => client.onError("websocket error");
//! ws.onmessage = (e) => client.onMessage(e.data);
//!
//! // 定期タイマー（100ms ごと）
//! setInterval(() => {
//!     for (const frame of client.tick(Date.now())) ws.send(frame);
//!     if (client.hasPendingEvents()) handle(JSON.parse(client.takeEvents()));
//! }, 100);
//!
//! // センサー値
//! for (const frame of client.sendValue("17", 21.5, Date.now())) ws.send(frame);
//! ```

use wasm_bindgen::prelude::*;

pub mod client;

pub use client::{DeviceClient, DeviceConfig, EventView};

/// パニック時にブラウザコンソールにスタックトレースを出力する
///
/// 開発時に必ず呼び出すこと。本番ビルドでは feature flag で無効化可能。
#[wasm_bindgen]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// API キーからデバイスチャンネルのトピックを求めるユーティリティ
///
/// テスト・デバッグ用。`DeviceClient` は内部で同じ規則を使う。
#[wasm_bindgen(js_name = "channelTopic")]
pub fn channel_topic(api_key: &str) -> String {
    phx_telemetry::DeviceIdentity::new(0, api_key).channel_topic()
}
