//! 按客户端 IP 的上传配额：固定窗口内计数，窗口过期后重新计数。

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::expiry::deadline_after;

#[derive(Debug)]
pub struct ClientQuota {
    pub uses: u32,
    pub window_expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { uses: u32 },
    Limited { retry_after: Duration },
}

#[derive(Debug)]
pub struct RateLimiter {
    clients: Mutex<HashMap<IpAddr, ClientQuota>>,
    max_uses: u32,
    window: Duration,
}

impl RateLimiter {
    /// `max_uses` 为 0 时不限流。
    pub fn new(max_uses: u32, window: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            max_uses,
            window,
        }
    }

    pub async fn admit(&self, client: IpAddr) -> Admission {
        self.admit_at(client, Instant::now()).await
    }

    /// 查询、判定与计数在同一把锁内完成。
    pub async fn admit_at(&self, client: IpAddr, now: Instant) -> Admission {
        if self.max_uses == 0 {
            return Admission::Allowed { uses: 0 };
        }

        let mut clients = self.clients.lock().await;
        let quota = clients.entry(client).or_insert(ClientQuota {
            uses: 0,
            window_expires_at: deadline_after(now, self.window),
        });

        if now >= quota.window_expires_at {
            quota.uses = 0;
            quota.window_expires_at = deadline_after(now, self.window);
        }

        if quota.uses >= self.max_uses {
            let retry_after = quota.window_expires_at.saturating_duration_since(now);
            warn!(
                client_ip = %client,
                uses = quota.uses,
                retry_after_secs = retry_after.as_secs(),
                "upload rate limited"
            );
            return Admission::Limited { retry_after };
        }

        quota.uses += 1;
        Admission::Allowed { uses: quota.uses }
    }

    /// 清理窗口已过期的记录。
    pub async fn prune_expired(&self) -> usize {
        self.prune_expired_at(Instant::now()).await
    }

    pub async fn prune_expired_at(&self, now: Instant) -> usize {
        let mut clients = self.clients.lock().await;
        let before = clients.len();
        clients.retain(|_, quota| quota.window_expires_at > now);
        before - clients.len()
    }

    #[cfg(test)]
    async fn tracked_clients(&self) -> usize {
        self.clients.lock().await.len()
    }
}
