//! 呼び出し単位のキャンセルスコープ
//!
//! 1 回の呼び出しにつき 1 つの [`CallDeadline`] を生成し、そのタイマーだけが
//! キャンセルの契機になります。`run` で包んだ Future は期限切れで破棄されるため、
//! HTTP 通信の中断とタイマーの解放はどの終了経路でも一度だけ行われます。

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, error::Elapsed};

/// タイマーに設定できる最長の制限時間（約 30 年）
///
/// これを超える制限時間は `Instant` の加算が溢れないようにこの値で打ち切ります。
const MAX_TIMER: Duration = Duration::from_secs(86_400 * 365 * 30);

/// 呼び出しの期限
#[derive(Debug, Clone, Copy)]
pub struct CallDeadline {
    started: Instant,
    expires_at: Instant,
    limit: Duration,
}

impl CallDeadline {
    /// 現在時刻からタイマーを開始
    ///
    /// `limit` は報告用にそのまま保持し、タイマーには `MAX_TIMER` で打ち切った値を使います。
    pub fn start(limit: Duration) -> Self {
        let started = Instant::now();
        let expires_at = started
            .checked_add(limit.min(MAX_TIMER))
            .unwrap_or(started);
        Self {
            started,
            expires_at,
            limit,
        }
    }

    /// 設定された制限時間
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// 開始からの経過時間（ミリ秒）
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// 期限に達すると完了する Future
    pub async fn expired(&self) {
        tokio::time::sleep_until(self.expires_at).await;
    }

    /// Future を期限付きで実行
    ///
    /// 期限切れの場合、Future は完了を待たずに破棄されます。
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, Elapsed> {
        tokio::time::timeout_at(self.expires_at, future).await
    }
}
