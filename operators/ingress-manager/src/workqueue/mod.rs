//! 工作队列模块
//!
//! 去重、限速、至少投递一次的工作队列。队列中的元素是 `namespace/name`
//! 形式的 key，同一个 key 在队列中最多只有一个待处理副本；
//! 正在处理中的 key 再次加入时会被推迟到 `done` 之后，
//! 因此同一个 key 永远不会被两个 worker 同时处理。

mod rate_limiter;

pub use rate_limiter::ExponentialBackoff;

use ingress_manager_common::WorkerConfig;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// 获取互斥锁，锁中毒时继续使用内部数据
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 队列内部状态
#[derive(Debug, Default)]
struct QueueState {
    /// 等待处理的 key，按加入顺序排列
    queue: VecDeque<String>,
    /// 需要处理的 key（包括已在 `queue` 中的和等待 `done` 后重新入队的）
    dirty: HashSet<String>,
    /// 正在被 worker 处理的 key
    processing: HashSet<String>,
    /// 队列是否已关闭
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    limiter: ExponentialBackoff,
}

/// 限速工作队列
///
/// 克隆开销很小，所有克隆共享同一个队列。
#[derive(Debug, Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    /// 创建新的工作队列
    pub fn new(name: impl Into<String>, limiter: ExponentialBackoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                limiter,
            }),
        }
    }

    /// 根据 worker 配置创建工作队列
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.queue_name.clone(),
            ExponentialBackoff::new(config.base_delay(), config.max_delay()),
        )
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        lock(&self.inner.state)
    }

    /// 队列名称
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 加入 key，已在等待中的 key 不会重复加入
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }

        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(queue = %self.inner.name, key = %key, "key 正在处理中，推迟入队");
            return;
        }

        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// 取出下一个 key
    ///
    /// 队列为空时等待，队列关闭后返回 `None`。
    /// 返回的 key 被标记为处理中，处理完成后必须调用 [`WorkQueue::done`]。
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);

            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                // 在持锁期间注册为等待者，每次 add 都能唤醒一个独立的 get
                notified.as_mut().enable();
            }

            notified.await;
        }
    }

    /// 标记 key 处理完成，处理期间再次加入的 key 在此时重新入队
    pub fn done(&self, key: &str) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.shutting_down || !state.dirty.contains(key) {
            return;
        }

        state.queue.push_back(key.to_string());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// 延迟一段时间后加入 key
    pub fn add_after(&self, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// 按指数退避延迟后重新加入 key
    pub fn add_rate_limited(&self, key: impl Into<String>) {
        let key = key.into();
        let delay = self.inner.limiter.when(&key);
        debug!(queue = %self.inner.name, key = %key, ?delay, "延迟重新入队");
        self.add_after(key, delay);
    }

    /// 清除 key 的重试记录
    pub fn forget(&self, key: &str) {
        self.inner.limiter.forget(key);
    }

    /// key 的连续失败次数
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// 关闭队列，所有等待中的 `get` 返回 `None`
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    /// 队列是否已关闭
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// 等待处理的 key 数量
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    /// 是否没有等待处理的 key
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
