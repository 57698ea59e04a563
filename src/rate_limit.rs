use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

type GovernorRateLimiter<C> =
    RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// 上流APIへのリクエスト数の既定値
pub mod defaults {
    /// 持続レート（リクエスト/秒）
    pub const RATE_PER_SECOND: u32 = 20;
    /// バースト許容量
    pub const BURST: u32 = 5;
}

/// 拒否された後、次に確認するまでの最短の待ち時間
const MIN_RECHECK_DELAY: Duration = Duration::from_millis(1);

/// 持続レートとバーストからトークンバケットのQuotaを作る
pub fn quota(rate_per_second: u32, burst: u32) -> Result<Quota> {
    let rate = NonZeroU32::new(rate_per_second).ok_or_else(|| {
        Error::InvalidConfiguration("rate limit must be greater than zero".to_string())
    })?;
    let burst = NonZeroU32::new(burst).ok_or_else(|| {
        Error::InvalidConfiguration("rate burst must be greater than zero".to_string())
    })?;
    Ok(Quota::per_second(rate).allow_burst(burst))
}

/// 全タスクで共有するトークンバケット
///
/// 時計は差し替え可能で、テストでは `FakeRelativeClock` を渡す。
#[derive(Clone)]
pub struct SharedRateLimiter<C: Clock = DefaultClock> {
    inner: Arc<GovernorRateLimiter<C>>,
    clock: C,
}

impl SharedRateLimiter {
    pub fn new(rate_per_second: u32, burst: u32) -> Result<Self> {
        Self::with_clock(rate_per_second, burst, DefaultClock::default())
    }
}

impl<C: Clock> SharedRateLimiter<C> {
    pub fn with_clock(rate_per_second: u32, burst: u32, clock: C) -> Result<Self> {
        let quota = quota(rate_per_second, burst)?;
        Ok(Self {
            inner: Arc::new(RateLimiter::direct_with_clock(quota, &clock)),
            clock,
        })
    }

    /// トークンを待つ（キャンセルされたら `Error::Cancelled`）
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let wait = match self.inner.check() {
                Ok(()) => return Ok(()),
                Err(not_until) => not_until.wait_time_from(self.clock.now()),
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(wait.max(MIN_RECHECK_DELAY)) => {}
            }
        }
    }
}

impl<C: Clock> std::fmt::Debug for SharedRateLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRateLimiter").finish_non_exhaustive()
    }
}
