//! デバイスのローカル時刻（32 ビット、ミリ秒）
//!
//! マイコンの `millis()` は起動からのミリ秒を u32 で返し、約 49.7 日で一周する。
//! 経過時間の計算はすべて mod 2^32 の差分で行う。

/// 起動からのミリ秒（u32、ラップアラウンドあり）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalMillis(pub u32);

impl LocalMillis {
    /// `earlier` からの経過ミリ秒
    ///
    /// 一周をまたいでも正しい差分になる（差が 2^32 ms 未満である限り）。
    pub fn elapsed_since(self, earlier: LocalMillis) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// `ms` 前の時刻
    pub fn sub_ms(self, ms: u32) -> LocalMillis {
        LocalMillis(self.0.wrapping_sub(ms))
    }

    /// 生の u32 値を返す
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl From<u32> for LocalMillis {
    fn from(val: u32) -> Self {
        LocalMillis(val)
    }
}

/// ホストの 64 ビット時刻（JS の Date.now() など）から下位 32 ビットを取る
impl From<u64> for LocalMillis {
    fn from(val: u64) -> Self {
        LocalMillis(val as u32)
    }
}
