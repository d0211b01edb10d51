//! 相関 ID（ref）の生成
//!
//! Phoenix サーバーはリプライにリクエストの `ref` をそのまま返す。
//! クライアントはプロセス寿命の間、同じ値を二度と発行しない。

use core::fmt;

/// クライアントが割り当てる相関 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference(pub u32);

impl Reference {
    /// 生の u32 値を返す
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Reference {
    fn from(val: u32) -> Self {
        Reference(val)
    }
}

/// 単調増加する ref カウンタ
///
/// 1 始まり。再接続でもリセットしない（再接続後に届いた古い ref のリプライは
/// 単に一致しないだけで害はない）。ラップアラウンドはデバイスの稼働時間上
/// 到達しないため扱わない。
#[derive(Debug, Default)]
pub struct RefGenerator {
    last: u32,
}

impl RefGenerator {
    pub fn new() -> Self {
        RefGenerator { last: 0 }
    }

    /// カウンタを進めて新しい ref を返す
    pub fn next(&mut self) -> Reference {
        self.last += 1;
        Reference(self.last)
    }

    /// 最後に発行した ref（未発行なら None）
    pub fn last(&self) -> Option<Reference> {
        if self.last == 0 {
            None
        } else {
            Some(Reference(self.last))
        }
    }
}
