//! Sleeper port - 時間待ちの抽象化
//!
//! バックオフ待ちとループ間隔の待ちはここを通すので、
//! テストでは実時間を使わずに「何秒待とうとしたか」を検証できます。

use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
