//! 事件处理模块
//!
//! 该模块把 Service 与 Ingress 缓存的变化事件转换为工作队列中的 key。
//! 事件处理器只向队列写入 key，从不直接访问 Kubernetes API。

use ingress_manager_common::{Error, Result};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::Resource as _;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::informer::ResourceEvent;
use crate::key::{join_key, object_key};
use crate::workqueue::WorkQueue;

/// 事件处理器
#[derive(Clone)]
pub struct EventHandler {
    /// 工作队列
    queue: WorkQueue,
}

impl EventHandler {
    /// 创建新的事件处理器
    pub fn new(queue: WorkQueue) -> Self {
        Self { queue }
    }

    /// 处理 Service 事件，返回是否加入了队列
    pub fn on_service_event(&self, event: ResourceEvent<Service>) -> bool {
        match event {
            ResourceEvent::Added(service) => self.enqueue(&*service),
            ResourceEvent::Updated { old, new } => {
                // 重新列举产生的更新事件前后快照完全一致，无需处理
                if old == new {
                    trace!("忽略未变化的 Service 更新事件");
                    return false;
                }
                self.enqueue(&*new)
            }
            // Service 删除后 Ingress 由 owner reference 级联回收
            ResourceEvent::Deleted(_) => false,
        }
    }

    /// 处理 Ingress 事件，返回是否加入了队列
    ///
    /// 只关心删除事件：被删除的 Ingress 如果属于某个 Service，
    /// 就把该 Service 重新加入队列，以便在仍然需要时重建。
    pub fn on_ingress_event(&self, event: ResourceEvent<Ingress>) -> bool {
        let ResourceEvent::Deleted(ingress) = event else {
            return false;
        };

        match owner_service_key(&ingress) {
            Ok(Some(key)) => {
                debug!("Ingress 被删除，重新协调 Service {}", key);
                self.queue.add(key);
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!("无法解析被删除的 Ingress: {}", e);
                false
            }
        }
    }

    fn enqueue(&self, service: &Service) -> bool {
        match object_key(service) {
            Ok(key) => {
                self.queue.add(key);
                true
            }
            Err(e) => {
                error!("无法计算 Service 的 key: {}", e);
                false
            }
        }
    }

    /// 持续消费两种资源的事件，直到两个通道都关闭
    pub async fn run(
        self,
        mut services: mpsc::Receiver<ResourceEvent<Service>>,
        mut ingresses: mpsc::Receiver<ResourceEvent<Ingress>>,
    ) {
        info!("启动事件处理器");

        loop {
            tokio::select! {
                Some(event) = services.recv() => {
                    self.on_service_event(event);
                }
                Some(event) = ingresses.recv() => {
                    self.on_ingress_event(event);
                }
                else => break,
            }
        }

        info!("事件处理器已退出");
    }
}

/// 返回 Ingress 的 controller owner reference
pub fn controller_of(ingress: &Ingress) -> Option<&OwnerReference> {
    ingress
        .metadata
        .owner_references
        .as_deref()?
        .iter()
        .find(|owner| owner.controller == Some(true))
}

/// 被 Service 控制的 Ingress 对应的 Service key
fn owner_service_key(ingress: &Ingress) -> Result<Option<String>> {
    let Some(owner) = controller_of(ingress) else {
        return Ok(None);
    };
    if owner.kind != Service::KIND {
        return Ok(None);
    }

    let namespace = ingress
        .metadata
        .namespace
        .as_deref()
        .filter(|namespace| !namespace.is_empty())
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

    Ok(Some(join_key(namespace, &owner.name)))
}
