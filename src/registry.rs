//! 内存对象注册表：ID 到对象元数据的映射、下载查询与到期删除。

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::expiry::{Deadline, ExpiryScheduler};
use crate::ident::generate_id;
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub id: String,
    pub display_name: String,
    pub size: u64,
    pub expires_at: Instant,
}

impl StoredObject {
    pub fn is_live_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// ID 槽位。Reserved 与 Expiring 期间 ID 不可复用，也不可下载。
#[derive(Debug)]
enum Slot {
    Reserved,
    Live(StoredObject),
    Expiring,
}

#[derive(Debug)]
pub struct ObjectRegistry {
    objects: RwLock<HashMap<String, Slot>>,
    storage: Arc<Storage>,
    deadlines: UnboundedSender<Deadline>,
}

impl ObjectRegistry {
    /// 创建注册表及其过期调度器，调度器需由调用方 spawn。
    pub fn new(storage: Arc<Storage>) -> (Arc<Self>, ExpiryScheduler) {
        let (deadlines, incoming) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            objects: RwLock::new(HashMap::new()),
            storage,
            deadlines,
        });
        let scheduler = ExpiryScheduler::new(Arc::downgrade(&registry), incoming);
        (registry, scheduler)
    }

    /// 生成一个当前未被占用的 ID 并预留。
    pub async fn allocate_id(&self) -> String {
        let mut objects = self.objects.write().await;
        loop {
            let id = generate_id();
            if let Entry::Vacant(slot) = objects.entry(id.clone()) {
                slot.insert(Slot::Reserved);
                return id;
            }
            debug!(id, "object id collision, regenerating");
        }
    }

    /// 上传失败时释放预留的 ID。
    pub async fn release(&self, id: &str) {
        let mut objects = self.objects.write().await;
        if matches!(objects.get(id), Some(Slot::Reserved)) {
            objects.remove(id);
        }
    }

    /// 登记已落盘的对象并排入过期队列。
    pub async fn register(&self, object: StoredObject) {
        let deadline = Deadline {
            at: object.expires_at,
            id: object.id.clone(),
        };
        {
            let mut objects = self.objects.write().await;
            if let Some(Slot::Live(previous)) = objects.get(&object.id) {
                warn!(id = previous.id, "replacing live object with the same id");
            }
            objects.insert(object.id.clone(), Slot::Live(object));
        }
        if self.deadlines.send(deadline).is_err() {
            error!("expiry scheduler is gone, object will not be deleted on time");
        }
    }

    pub async fn lookup(&self, id: &str) -> Option<StoredObject> {
        self.lookup_at(id, Instant::now()).await
    }

    /// 过期判定在查询时即时生效，不依赖物理删除是否已执行。
    pub async fn lookup_at(&self, id: &str, now: Instant) -> Option<StoredObject> {
        let objects = self.objects.read().await;
        match objects.get(id) {
            Some(Slot::Live(object)) if object.is_live_at(now) => Some(object.clone()),
            _ => None,
        }
    }

    /// 先删除磁盘文件再移除元数据；重复调用为空操作。
    pub async fn expire(&self, id: &str) -> bool {
        let object = {
            let mut objects = self.objects.write().await;
            let Some(slot) = objects.get_mut(id) else {
                return false;
            };
            if !matches!(slot, Slot::Live(_)) {
                return false;
            }
            let Slot::Live(object) = std::mem::replace(slot, Slot::Expiring) else {
                return false;
            };
            object
        };

        match self.storage.delete_object(id).await {
            Ok(true) => {}
            Ok(false) => warn!(id, "object bytes were already missing at expiry"),
            Err(err) => warn!(id, error = %err, "failed to delete expired object bytes"),
        }

        self.objects.write().await.remove(id);
        info!(id, name = object.display_name, "object expired");
        true
    }

    #[cfg(test)]
    pub async fn live_count(&self) -> usize {
        let objects = self.objects.read().await;
        objects
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }
}
