//! # phx-session
//!
//! Phoenix チャンネルセッションのコア状態機械。
//!
//! ## 概要
//!
//! 再接続を繰り返す不安定なトランスポートの上で、単一のデバイスチャンネルに対する
//! 論理セッションを維持する。
//!
//! ### キーコンセプト
//!
//! - **Join**: 認証情報付きの `phx_join` を送り、リプライで参加を確定する
//! - **Rejoin スロットル**: join の試行は 5000ms に 1 回まで（tick ごとに呼ばれても）
//! - **ハートビート**: 接続中は 30000ms ごとに `phoenix` トピックへ送る
//! - **リプライ振り分け**: セッション状態で join 応答か時刻同期応答かを判断する
//! - **論理時計**: サーバーのエポック秒をローカルのミリ秒カウンタで補間する
//! - **送信リトライ**: 送信失敗は即時に最大 3 回まで再試行する
//!
//! ## セッションの状態遷移
//!
//! ```text
//! Disconnected ──connect──▶ ConnectedUnjoined ──join──▶ Joining ──ack──▶ Joined
//!      ▲                                                 │  ▲               │
//!      │                                       reject/不正 └──┘               │
//!      └──────────────────── disconnect / transport error ◀──────────────────┘
//! ```

#![no_std]
extern crate alloc;

pub mod clock;
pub mod config;
pub mod error;
pub mod retry;
pub mod router;
pub mod session;

pub use clock::LogicalClock;
pub use config::{ConfigError, SessionConfig, MAX_SEND_RETRIES_LIMIT};
pub use error::SessionError;
pub use retry::{deliver, DeliveryFailed, ImmediateRetry, RetryPolicy, Throttle};
pub use router::{JoinReply, PendingKind, PendingRequests, Route};
pub use session::{ChannelSession, SessionEvent, SessionState, SessionStats};

/// join 試行の最小間隔（ミリ秒）
pub const REJOIN_INTERVAL_MS: u32 = 5000;

/// ハートビート間隔（ミリ秒）
pub const HEARTBEAT_INTERVAL_MS: u32 = 30_000;

/// 未同期時の時刻同期リクエストの最小間隔（ミリ秒）
pub const RESYNC_INTERVAL_MS: u32 = 1000;

/// 論理時計を再アンカーする経過時間（ミリ秒、24 時間）
pub const CLOCK_REANCHOR_MS: u32 = 86_400_000;

/// 送信失敗時の再試行回数（初回送信を含まない）
pub const MAX_SEND_RETRIES: u32 = 3;
