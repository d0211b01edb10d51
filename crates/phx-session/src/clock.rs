//! 論理時計
//!
//! サーバーから受け取ったエポック秒を、受信時のローカルミリ秒と組にして保持する
//! （アンカー）。現在時刻はアンカーからの経過ミリ秒で補間する。
//!
//! ```text
//! now() = epoch + (local_now - captured_at) / 1000
//! ```
//!
//! 経過時間が `reanchor_after_ms`（24 時間）を超えたら、経過分をエポックに
//! 繰り入れてアンカーを進める。u32 のミリ秒カウンタが一周する前に差分を
//! 小さく保つため。1 秒未満の端数はアンカー側に残す。

use phx_transport::LocalMillis;

use crate::CLOCK_REANCHOR_MS;

/// エポック秒とローカル時刻の対応
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    /// サーバー時刻（Unix 秒）
    pub epoch: u32,
    /// `epoch` を受け取ったときのローカルミリ秒
    pub captured_at: LocalMillis,
}

/// サーバー時刻に同期する論理時計
#[derive(Debug, Clone)]
pub struct LogicalClock {
    anchor: Option<Anchor>,
    reanchor_after_ms: u32,
}

impl LogicalClock {
    pub fn new(reanchor_after_ms: u32) -> Self {
        LogicalClock {
            anchor: None,
            reanchor_after_ms,
        }
    }

    /// サーバー時刻を受け取り、アンカーを置き直す
    pub fn synchronize(&mut self, epoch: u32, now: LocalMillis) {
        self.anchor = Some(Anchor {
            epoch,
            captured_at: now,
        });
    }

    /// 補間した現在のエポック秒。未同期なら 0（「時刻不明」）
    pub fn now(&mut self, now: LocalMillis) -> u32 {
        let reanchor_after_ms = self.reanchor_after_ms;
        let Some(anchor) = self.anchor.as_mut() else {
            return 0;
        };

        let elapsed = now.elapsed_since(anchor.captured_at);
        if elapsed > reanchor_after_ms {
            anchor.epoch = anchor.epoch.saturating_add(elapsed / 1000);
            anchor.captured_at = now.sub_ms(elapsed % 1000);
        }

        let elapsed_secs = now.elapsed_since(anchor.captured_at) / 1000;
        anchor.epoch.saturating_add(elapsed_secs)
    }

    pub fn is_synchronized(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn anchor(&self) -> Option<Anchor> {
        self.anchor
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        LogicalClock::new(CLOCK_REANCHOR_MS)
    }
}
