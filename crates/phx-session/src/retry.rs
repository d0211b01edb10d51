//! 送信リトライポリシーと試行スロットル
//!
//! - `RetryPolicy`: 失敗した送信をもう一度試すかを決める。現在の実装は
//!   遅延なしの即時再試行のみ（`ImmediateRetry`）。バックオフが必要になったら
//!   このトレイトの別実装を差し込む。
//! - `Throttle`: 「前回から interval 経過したか」だけを見る時間ゲート。
//!   join・時刻同期・ハートビートの各間隔に使う。

use core::fmt;

use phx_transport::LocalMillis;

use crate::MAX_SEND_RETRIES;

/// 失敗後の再試行判定
pub trait RetryPolicy {
    /// `failures` 回失敗した時点で、もう一度試すか
    fn should_retry(&self, failures: u32) -> bool;
}

/// 遅延なしで最大 `max_retries` 回再試行する
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImmediateRetry {
    pub max_retries: u32,
}

impl ImmediateRetry {
    pub const fn new(max_retries: u32) -> Self {
        ImmediateRetry { max_retries }
    }
}

impl Default for ImmediateRetry {
    fn default() -> Self {
        ImmediateRetry::new(MAX_SEND_RETRIES)
    }
}

impl RetryPolicy for ImmediateRetry {
    fn should_retry(&self, failures: u32) -> bool {
        failures <= self.max_retries
    }
}

/// 再試行を使い切った送信
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailed<E> {
    /// 初回を含む試行回数
    pub attempts: u32,
    /// 最後の試行のエラー
    pub last_error: E,
}

impl<E: fmt::Display> fmt::Display for DeliveryFailed<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Delivery failed after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

impl<E: fmt::Debug + fmt::Display> core::error::Error for DeliveryFailed<E> {}

/// `op` をポリシーが許す限り再試行する
///
/// `op` には直前までの失敗回数が渡される。失敗カウンタは 1 回の配送ごとに
/// 0 から始まるので、使い切った後の次の配送にはフルの予算がある。
pub fn deliver<P, T, E, F>(policy: &P, mut op: F) -> Result<T, DeliveryFailed<E>>
where
    P: RetryPolicy + ?Sized,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut failures = 0u32;
    loop {
        match op(failures) {
            Ok(value) => return Ok(value),
            Err(err) => {
                failures += 1;
                if !policy.should_retry(failures) {
                    return Err(DeliveryFailed {
                        attempts: failures,
                        last_error: err,
                    });
                }
            }
        }
    }
}

/// 最小間隔ゲート
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    interval_ms: u32,
    last: Option<LocalMillis>,
}

impl Throttle {
    pub const fn new(interval_ms: u32) -> Self {
        Throttle {
            interval_ms,
            last: None,
        }
    }

    /// 一度も発火していないか、前回から interval 以上経過しているか
    pub fn ready(&self, now: LocalMillis) -> bool {
        match self.last {
            None => true,
            Some(last) => now.elapsed_since(last) >= self.interval_ms,
        }
    }

    /// 発火時刻を記録する
    pub fn mark(&mut self, now: LocalMillis) {
        self.last = Some(now);
    }

    /// ready なら記録して true を返す
    pub fn try_fire(&mut self, now: LocalMillis) -> bool {
        if self.ready(now) {
            self.mark(now);
            true
        } else {
            false
        }
    }

    /// 記録を消す（次の `ready` は即 true）
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn last(&self) -> Option<LocalMillis> {
        self.last
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_succeeds_first_try() {
        let mut calls = 0;
        let result: Result<u32, DeliveryFailed<&str>> = deliver(&ImmediateRetry::default(), |_| {
            calls += 1;
            Ok(7)
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_deliver_retries_three_times_then_fails() {
        let mut calls = 0;
        let result: Result<(), _> = deliver(&ImmediateRetry::default(), |_| {
            calls += 1;
            Err("down")
        });
        // 初回 + 再試行 3 回
        assert_eq!(calls, 4);
        assert_eq!(
            result,
            Err(DeliveryFailed {
                attempts: 4,
                last_error: "down"
            })
        );
    }

    #[test]
    fn test_deliver_recovers_on_retry() {
        let result = deliver(&ImmediateRetry::default(), |failures| {
            if failures < 2 {
                Err("flaky")
            } else {
                Ok(failures)
            }
        });
        assert_eq!(result, Ok(2));
    }

    #[test]
    fn test_retry_counter_resets_between_deliveries() {
        let policy = ImmediateRetry::new(1);
        let first: Result<(), _> = deliver(&policy, |_| Err(()));
        assert_eq!(first.unwrap_err().attempts, 2);

        let mut seen = alloc::vec::Vec::new();
        let _ = deliver(&policy, |failures| {
            seen.push(failures);
            Err::<(), ()>(())
        });
        assert_eq!(seen, alloc::vec![0, 1]);
    }

    #[test]
    fn test_delivery_failed_display() {
        let failed = DeliveryFailed {
            attempts: 4,
            last_error: "timeout",
        };
        assert_eq!(
            alloc::format!("{}", failed),
            "Delivery failed after 4 attempts: timeout"
        );
    }

    #[test]
    fn test_throttle_interval() {
        let mut throttle = Throttle::new(5000);
        assert!(throttle.try_fire(LocalMillis(100)));
        assert!(!throttle.try_fire(LocalMillis(5099)));
        assert!(throttle.try_fire(LocalMillis(5100)));

        throttle.reset();
        assert!(throttle.ready(LocalMillis(5101)));
        assert_eq!(throttle.last(), None);
    }

    #[test]
    fn test_throttle_across_millis_wraparound() {
        let mut throttle = Throttle::new(1000);
        throttle.mark(LocalMillis(u32::MAX - 499));
        assert!(!throttle.ready(LocalMillis(499)));
        assert!(throttle.ready(LocalMillis(500)));
    }
}
