//! 后台任务：对象过期调度与限流记录清理。

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::QUOTA_PRUNE_INTERVAL_SECS;
use crate::expiry::ExpiryScheduler;
use crate::ratelimit::RateLimiter;

/// 启动后台任务（过期调度与限流窗口清理）。
pub fn spawn_background_tasks(scheduler: ExpiryScheduler, limiter: Arc<RateLimiter>) {
    tokio::spawn(scheduler.run());

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(QUOTA_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let pruned = limiter.prune_expired().await;
            if pruned > 0 {
                debug!(pruned, "pruned stale upload quotas");
            }
        }
    });
}
