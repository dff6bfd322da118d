//! 资源监听与本地缓存模块
//!
//! `Informer` 通过 kube watcher 持续监听一种资源，在本地维护按 key 索引的缓存，
//! 并把缓存的变化以 `ResourceEvent` 消息的形式发送给订阅者。
//! 监听重启（全量重新列举）时，新列表会与缓存做差异比较，
//! 从而得到新增、更新和删除事件。

use futures::StreamExt;
use ingress_manager_common::{Error, Result};
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Resource;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::key::{join_key, object_key};
use crate::workqueue::lock;

/// 订阅通道缓冲区大小
const EVENT_BUFFER: usize = 100;

/// 可被监听并缓存的资源类型
pub trait WatchedResource:
    Resource<DynamicType = ()> + k8s_openapi::Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}

impl<K> WatchedResource for K where
    K: Resource<DynamicType = ()>
        + k8s_openapi::Resource
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static
{
}

/// 本地缓存的只读视图
pub trait ObjectIndex<K>: Send + Sync {
    /// 按命名空间和名称查询对象，不存在时返回 `Ok(None)`
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<K>>>;
}

/// 缓存变化事件
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    /// 新增对象
    Added(Arc<K>),
    /// 对象更新，携带更新前后的快照
    Updated {
        /// 更新前的快照
        old: Arc<K>,
        /// 更新后的快照
        new: Arc<K>,
    },
    /// 对象被删除，携带最后一次观察到的状态
    Deleted(Arc<K>),
}

/// 单种资源的监听器与缓存
pub struct Informer<K> {
    /// 缓存数据
    cache: RwLock<HashMap<String, Arc<K>>>,
    /// 是否已完成初始列举
    synced: watch::Sender<bool>,
    /// 事件订阅者
    subscribers: Mutex<Vec<mpsc::Sender<ResourceEvent<K>>>>,
}

impl<K: WatchedResource> Informer<K> {
    /// 创建新的监听器
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            cache: RwLock::new(HashMap::new()),
            synced,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// 资源类型名称
    pub fn kind(&self) -> &'static str {
        <K as k8s_openapi::Resource>::KIND
    }

    /// 订阅缓存变化事件，需要在 `run` 之前调用才能收到初始列举产生的事件
    pub fn subscribe(&self) -> mpsc::Receiver<ResourceEvent<K>> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        lock(&self.subscribers).push(tx);
        rx
    }

    /// 是否已完成初始列举
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// 等待初始列举完成
    pub async fn wait_for_sync(&self) {
        let mut synced = self.synced.subscribe();
        while !*synced.borrow_and_update() {
            if synced.changed().await.is_err() {
                return;
            }
        }
    }

    /// 缓存中的对象数量
    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 缓存是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 持续监听资源，直到监听流结束
    pub async fn run(self: Arc<Self>, api: Api<K>) {
        let kind = self.kind();
        // 创建带默认退避的监听流
        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();

        info!("启动 {} 监听器", kind);

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    // 先更新缓存，再通知订阅者
                    let notifications = self.apply(event);
                    self.dispatch(notifications).await;
                }
                Err(e) => warn!("{} 监听器错误: {}", kind, e),
            }
        }

        warn!("{} 监听器已退出", kind);
    }

    /// 将监听事件应用到缓存，返回需要通知订阅者的事件
    fn apply(&self, event: watcher::Event<K>) -> Vec<ResourceEvent<K>> {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());

        match event {
            watcher::Event::Applied(obj) => {
                let Some(key) = self.key_of(&obj) else {
                    return Vec::new();
                };
                let new = Arc::new(obj);
                match cache.insert(key, new.clone()) {
                    Some(old) => vec![ResourceEvent::Updated { old, new }],
                    None => vec![ResourceEvent::Added(new)],
                }
            }
            watcher::Event::Deleted(obj) => {
                if let Some(key) = self.key_of(&obj) {
                    cache.remove(&key);
                }
                vec![ResourceEvent::Deleted(Arc::new(obj))]
            }
            watcher::Event::Restarted(objs) => {
                // 用新列表重建缓存，同时与旧缓存比较
                let mut previous = std::mem::take(&mut *cache);
                let mut notifications = Vec::with_capacity(objs.len());

                for obj in objs {
                    let Some(key) = self.key_of(&obj) else {
                        continue;
                    };
                    let new = Arc::new(obj);
                    match previous.remove(&key) {
                        Some(old) => notifications.push(ResourceEvent::Updated { old, new: new.clone() }),
                        None => notifications.push(ResourceEvent::Added(new.clone())),
                    }
                    cache.insert(key, new);
                }

                // 重新列举后不再存在的对象视为已删除
                notifications.extend(previous.into_values().map(ResourceEvent::Deleted));

                debug!("{} 缓存重新列举完成，当前对象数: {}", self.kind(), cache.len());
                // 标记初始列举已完成
                self.synced.send_replace(true);
                notifications
            }
        }
    }

    fn key_of(&self, obj: &K) -> Option<String> {
        match object_key(obj) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("忽略无法计算 key 的 {} 对象: {}", self.kind(), e);
                None
            }
        }
    }

    /// 把事件发送给所有订阅者，已关闭的订阅会被移除
    async fn dispatch(&self, notifications: Vec<ResourceEvent<K>>) {
        if notifications.is_empty() {
            return;
        }

        let subscribers = lock(&self.subscribers).clone();
        let mut closed = false;
        for notification in notifications {
            for subscriber in &subscribers {
                closed |= subscriber.send(notification.clone()).await.is_err();
            }
        }

        if closed {
            lock(&self.subscribers).retain(|subscriber| !subscriber.is_closed());
        }
    }
}

impl<K: WatchedResource> Default for Informer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: WatchedResource> ObjectIndex<K> for Informer<K> {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<K>>> {
        if !self.has_synced() {
            return Err(Error::CacheNotSynced(self.kind()));
        }

        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        Ok(cache.get(&join_key(namespace, name)).cloned())
    }
}
