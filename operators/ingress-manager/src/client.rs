//! Ingress 写操作客户端
//!
//! 协调器只通过 `IngressClient` 修改集群状态，生产环境使用基于 kube-rs 的实现，
//! 测试中可以替换为内存实现或 mock。

use async_trait::async_trait;
use ingress_manager_common::{Error, Result};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

use crate::key::join_key;

#[cfg(test)]
use mockall::automock;

/// Ingress 写操作
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IngressClient: Send + Sync {
    /// 在指定命名空间中创建 Ingress
    async fn create(&self, namespace: &str, ingress: &Ingress) -> Result<()>;

    /// 删除指定 Ingress，不存在时返回 `Error::NotFound`
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// 基于 kube-rs 的 Ingress 客户端
#[derive(Clone)]
pub struct KubeIngressClient {
    /// Kubernetes 客户端
    client: Client,
}

impl KubeIngressClient {
    /// 创建新的客户端
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl IngressClient for KubeIngressClient {
    async fn create(&self, namespace: &str, ingress: &Ingress) -> Result<()> {
        let created = self.api(namespace).create(&PostParams::default(), ingress).await?;
        debug!("Ingress {}/{} 已创建", namespace, created.name_any());
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!("Ingress {}/{} 已删除", namespace, name);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(Error::NotFound {
                kind: "Ingress",
                key: join_key(namespace, name),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
