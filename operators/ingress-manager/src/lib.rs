//! Ingress Manager - 根据 Service 注解自动管理 Ingress 的 Kubernetes Operator
//!
//! 带有指定注解的 Service 会得到一个同名 Ingress，注解移除后 Ingress 被删除。
//! 控制器是水平触发的：每次协调都重新读取完整的当前状态，
//! 因此重复、乱序或丢失的事件都不会影响最终收敛。

pub mod client;
pub mod controller;
pub mod event_handler;
pub mod informer;
pub mod ingress;
pub mod key;
pub mod reconcile;
pub mod workqueue;

use anyhow::{Context, Result};
use ingress_manager_common::ControllerConfig;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::client::KubeIngressClient;
use crate::controller::Controller;
use crate::event_handler::EventHandler;
use crate::informer::Informer;
use crate::reconcile::Reconciler;
use crate::workqueue::WorkQueue;

/// Operator 主结构体
pub struct IngressManager {
    /// Kubernetes 客户端
    client: Client,
    /// Service 监听器
    services: Arc<Informer<Service>>,
    /// Ingress 监听器
    ingresses: Arc<Informer<Ingress>>,
    /// 事件处理器
    event_handler: EventHandler,
    /// 控制器
    controller: Arc<Controller>,
}

impl IngressManager {
    /// 创建新的 Operator 实例，配置不合法时返回错误
    pub fn new(client: Client, config: &ControllerConfig) -> Result<Self> {
        config.validate().context("控制器配置不合法")?;

        // 创建 Service 与 Ingress 监听器
        let services = Arc::new(Informer::<Service>::new());
        let ingresses = Arc::new(Informer::<Ingress>::new());

        // 创建工作队列
        let queue = WorkQueue::from_config(&config.workers);

        // 创建协调器和控制器
        let reconciler = Arc::new(Reconciler::new(
            services.clone(),
            ingresses.clone(),
            Arc::new(KubeIngressClient::new(client.clone())),
            config,
        ));
        let controller = Arc::new(Controller::new(reconciler, queue.clone(), &config.workers));

        Ok(Self {
            client,
            services,
            ingresses,
            event_handler: EventHandler::new(queue),
            controller,
        })
    }

    /// 运行 Operator，直到 `stop` 完成
    ///
    /// 先启动两个监听器并等待缓存完成初始同步，再启动 worker 池。
    pub async fn run<F>(self, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        // 必须在监听器启动前订阅，才能收到初始列举产生的事件
        let service_events = self.services.subscribe();
        let ingress_events = self.ingresses.subscribe();

        // 启动监听器
        let watchers = [
            tokio::spawn(self.services.clone().run(Api::all(self.client.clone()))),
            tokio::spawn(self.ingresses.clone().run(Api::all(self.client.clone()))),
        ];
        // 启动事件处理器
        let event_handler = tokio::spawn(self.event_handler.run(service_events, ingress_events));

        tokio::pin!(stop);

        info!("等待 Service 与 Ingress 缓存同步");
        let synced = tokio::select! {
            _ = async {
                self.services.wait_for_sync().await;
                self.ingresses.wait_for_sync().await;
            } => true,
            _ = &mut stop => false,
        };

        if synced {
            info!(
                services = self.services.len(),
                ingresses = self.ingresses.len(),
                "缓存同步完成"
            );
            // 启动控制器
            self.controller.run(stop).await;
        } else {
            info!("缓存同步完成前收到停止信号");
        }

        // 停止监听器和事件处理器
        for watcher in watchers {
            watcher.abort();
        }
        event_handler.abort();

        info!("Ingress Manager 已停止");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        let config = kube::Config::new("http://127.0.0.1:6443".parse().unwrap());
        Client::try_from(config).unwrap()
    }

    #[tokio::test]
    async fn test_new_accepts_default_config() {
        assert!(IngressManager::new(client(), &ControllerConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let mut config = ControllerConfig::default();
        config.workers.count = 0;
        assert!(IngressManager::new(client(), &config).is_err());
    }
}
