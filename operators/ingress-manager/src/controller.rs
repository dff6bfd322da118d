//! 控制器模块
//!
//! 该模块实现 worker 池：每个 worker 循环地从工作队列取出 key、调用协调器、
//! 根据结果决定清除重试记录还是延迟重试。每个 worker 由一个监督任务托管，
//! worker 异常退出后会在重启间隔之后被重新拉起。

use ingress_manager_common::{Result, WorkerConfig};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::reconcile::{Reconciler, SyncOutcome};
use crate::workqueue::WorkQueue;

/// 正在处理的 key
///
/// 正常结束时通过 `release` 标记完成；如果处理过程因 panic 或取消而中断，
/// drop 时会释放 key，并与普通失败一样按重试上限决定重新入队还是放弃。
struct InFlight<'a> {
    queue: &'a WorkQueue,
    key: String,
    max_retries: u32,
    released: bool,
}

impl<'a> InFlight<'a> {
    fn new(queue: &'a WorkQueue, key: String, max_retries: u32) -> Self {
        Self {
            queue,
            key,
            max_retries,
            released: false,
        }
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn release(mut self) -> String {
        self.released = true;
        self.queue.done(&self.key);
        std::mem::take(&mut self.key)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let requeues = self.queue.num_requeues(&self.key);
        if requeues <= self.max_retries {
            warn!(key = %self.key, requeues, "协调过程被中断，稍后重试");
            self.queue.add_rate_limited(self.key.clone());
        } else {
            error!(key = %self.key, requeues, "协调过程多次被中断，放弃");
            self.queue.forget(&self.key);
        }
        self.queue.done(&self.key);
    }
}

/// 控制器结构体
pub struct Controller {
    /// 协调器
    reconciler: Arc<Reconciler>,
    /// 工作队列
    queue: WorkQueue,
    /// worker 数量
    workers: usize,
    /// 最大重试次数
    max_retries: u32,
    /// worker 重启间隔
    restart_interval: Duration,
}

impl Controller {
    /// 创建新的控制器
    pub fn new(reconciler: Arc<Reconciler>, queue: WorkQueue, config: &WorkerConfig) -> Self {
        Self {
            reconciler,
            queue,
            workers: config.count,
            max_retries: config.max_retries,
            restart_interval: config.restart_interval(),
        }
    }

    /// 工作队列
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// 启动 worker 池，直到 `stop` 完成
    ///
    /// 停止时先关闭工作队列，再等待所有 worker 处理完手上的 key。
    pub async fn run<F>(self: Arc<Self>, stop: F)
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // 为每个 worker 启动监督任务
        let supervisors: Vec<_> = (0..self.workers)
            .map(|id| tokio::spawn(self.clone().supervise(id, shutdown_rx.clone())))
            .collect();

        info!(
            queue = self.queue.name(),
            workers = self.workers,
            "控制器已启动"
        );

        // 等待停止信号
        stop.await;

        info!("收到停止信号，关闭工作队列");
        shutdown_tx.send_replace(true);
        self.queue.shut_down();

        // 等待所有 worker 处理完手上的 key
        for supervisor in supervisors {
            if let Err(e) = supervisor.await {
                error!("worker 监督任务异常退出: {}", e);
            }
        }

        info!("控制器已停止");
    }

    /// 托管一个 worker，异常退出后重新启动
    async fn supervise(self: Arc<Self>, id: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            match tokio::spawn(self.clone().worker(id)).await {
                Ok(()) => debug!(worker = id, "worker 已退出"),
                Err(e) => error!(worker = id, "worker 异常退出: {}", e),
            }

            if self.queue.is_shutting_down() {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.restart_interval) => {}
                _ = shutdown.changed() => {}
            }

            if self.queue.is_shutting_down() {
                return;
            }
            info!(worker = id, "重新启动 worker");
        }
    }

    async fn worker(self: Arc<Self>, id: usize) {
        debug!(worker = id, "worker 已启动");
        while self.process_next_item().await {}
    }

    /// 处理队列中的下一个 key，队列关闭时返回 `false`
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        // 协调期间 key 处于处理中状态
        let in_flight = InFlight::new(&self.queue, key, self.max_retries);
        let result = self.reconciler.sync(in_flight.key()).await;
        let key = in_flight.release();

        self.handle_result(&key, result);
        true
    }

    /// 根据协调结果清除重试记录或延迟重试
    fn handle_result(&self, key: &str, result: Result<SyncOutcome>) {
        match result {
            Ok(outcome) => {
                debug!(key, ?outcome, "协调成功");
                self.queue.forget(key);
            }
            Err(e) if !e.is_retriable() => {
                error!(key, "协调失败且无法重试，丢弃: {}", e);
                self.queue.forget(key);
            }
            Err(e) => {
                let requeues = self.queue.num_requeues(key);
                if requeues <= self.max_retries {
                    warn!(key, requeues, "协调失败，稍后重试: {}", e);
                    self.queue.add_rate_limited(key);
                } else {
                    error!(key, requeues, "协调失败次数超过上限，放弃: {}", e);
                    self.queue.forget(key);
                }
            }
        }
    }
}
