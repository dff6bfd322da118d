//! 资源协调模块
//!
//! 该模块实现幂等的协调函数 `sync`：每次都从本地缓存重新读取 Service 与 Ingress，
//! 比较期望状态（Service 是否带有指定注解）与观察到的状态（Ingress 是否存在），
//! 最多发出一次创建或删除请求。
//!
//! | 期望 | 观察 | 动作 |
//! |------|------|------|
//! | 有   | 无   | 创建 Ingress |
//! | 无   | 有   | 删除 Ingress |
//! | 有   | 有   | 无 |
//! | 无   | 无   | 无 |

use ingress_manager_common::{ControllerConfig, IngressConfig, Result};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::IngressClient;
use crate::informer::ObjectIndex;
use crate::ingress::build_ingress;
use crate::key::split_key;

/// 一次协调的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// 创建了 Ingress
    Created,
    /// 删除了 Ingress
    Deleted,
    /// 已经收敛，无需操作
    Unchanged,
    /// Service 已不存在
    ServiceGone,
}

/// 协调器
pub struct Reconciler {
    /// Service 缓存
    services: Arc<dyn ObjectIndex<Service>>,
    /// Ingress 缓存
    ingresses: Arc<dyn ObjectIndex<Ingress>>,
    /// Ingress 写操作客户端
    client: Arc<dyn IngressClient>,
    /// 期望状态注解
    annotation_key: String,
    /// Ingress 模板
    template: IngressConfig,
}

impl Reconciler {
    /// 创建新的协调器
    pub fn new(
        services: Arc<dyn ObjectIndex<Service>>,
        ingresses: Arc<dyn ObjectIndex<Ingress>>,
        client: Arc<dyn IngressClient>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            services,
            ingresses,
            client,
            annotation_key: config.annotation_key.clone(),
            template: config.ingress.clone(),
        }
    }

    /// Service 是否需要 Ingress：只看注解 key 是否存在，不关心取值
    pub fn is_desired(&self, service: &Service) -> bool {
        service
            .metadata
            .annotations
            .as_ref()
            .map_or(false, |annotations| annotations.contains_key(&self.annotation_key))
    }

    /// 协调 key 对应的 Service
    ///
    /// key 格式错误时返回不可重试的错误，API 错误原样返回给调用方。
    pub async fn sync(&self, key: &str) -> Result<SyncOutcome> {
        let (namespace, name) = split_key(key)?;

        let Some(service) = self.services.get(namespace, name)? else {
            debug!("Service {} 已不存在，跳过", key);
            return Ok(SyncOutcome::ServiceGone);
        };

        let desired = self.is_desired(&service);
        let observed = self.ingresses.get(namespace, name)?.is_some();

        match (desired, observed) {
            (true, false) => {
                let ingress = build_ingress(&service, &self.template)?;
                self.client.create(namespace, &ingress).await?;
                info!("已为 Service {} 创建 Ingress", key);
                Ok(SyncOutcome::Created)
            }
            (false, true) => match self.client.delete(namespace, name).await {
                Ok(()) => {
                    info!("已删除 Service {} 的 Ingress", key);
                    Ok(SyncOutcome::Deleted)
                }
                Err(e) if e.is_not_found() => {
                    debug!("Ingress {} 已被删除", key);
                    Ok(SyncOutcome::Unchanged)
                }
                Err(e) => Err(e),
            },
            _ => {
                debug!("Service {} 已收敛 (desired={})", key, desired);
                Ok(SyncOutcome::Unchanged)
            }
        }
    }
}
