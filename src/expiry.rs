//! 过期调度：单个任务维护截止时间最小堆，到期后调用注册表删除对象。

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::config::MAX_SPAN_SECS;
use crate::registry::ObjectRegistry;

/// `now + span`，溢出时退回到上限时长，不会 panic。
pub fn deadline_after(now: Instant, span: Duration) -> Instant {
    now.checked_add(span)
        .or_else(|| now.checked_add(Duration::from_secs(MAX_SPAN_SECS)))
        .unwrap_or(now)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    pub at: Instant,
    pub id: String,
}

pub struct ExpiryScheduler {
    registry: Weak<ObjectRegistry>,
    incoming: UnboundedReceiver<Deadline>,
    queue: BinaryHeap<Reverse<Deadline>>,
}

impl ExpiryScheduler {
    pub fn new(registry: Weak<ObjectRegistry>, incoming: UnboundedReceiver<Deadline>) -> Self {
        Self {
            registry,
            incoming,
            queue: BinaryHeap::new(),
        }
    }

    /// 运行直到注册表被释放。
    pub async fn run(mut self) {
        let mut open = true;
        loop {
            let next = self.queue.peek().map(|Reverse(deadline)| deadline.at);
            if !open && next.is_none() {
                break;
            }

            tokio::select! {
                received = self.incoming.recv(), if open => match received {
                    Some(deadline) => self.queue.push(Reverse(deadline)),
                    None => open = false,
                },
                _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                    if !self.fire_due(Instant::now()).await {
                        break;
                    }
                }
            }
        }
        debug!(pending = self.queue.len(), "expiry scheduler stopped");
    }

    async fn fire_due(&mut self, now: Instant) -> bool {
        while let Some(Reverse(deadline)) = self.queue.peek() {
            if deadline.at > now {
                break;
            }
            let Some(Reverse(deadline)) = self.queue.pop() else {
                break;
            };
            let Some(registry) = self.registry.upgrade() else {
                return false;
            };
            registry.expire(&deadline.id).await;
        }
        true
    }
}
