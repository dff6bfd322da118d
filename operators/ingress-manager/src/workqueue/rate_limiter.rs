//! 按工作项计算的指数退避限速器
//!
//! 每个 key 独立记录连续失败次数，第 n 次失败后的延迟为 `base * 2^n`，
//! 不超过 `max`。成功后调用 `forget` 清零。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::lock;

/// 指数退避限速器
#[derive(Debug)]
pub struct ExponentialBackoff {
    /// 初始延迟
    base_delay: Duration,
    /// 最大延迟
    max_delay: Duration,
    /// 每个 key 的连续失败次数
    failures: Mutex<HashMap<String, u32>>,
}

impl ExponentialBackoff {
    /// 创建新的限速器
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// 记录一次失败并返回本次应等待的延迟
    pub fn when(&self, key: &str) -> Duration {
        let mut failures = lock(&self.failures);
        let attempts = failures.entry(key.to_string()).or_insert(0);
        let exponent = *attempts;
        *attempts = attempts.saturating_add(1);
        self.delay_for(exponent)
    }

    fn delay_for(&self, exponent: u32) -> Duration {
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// 当前连续失败次数
    pub fn num_requeues(&self, key: &str) -> u32 {
        lock(&self.failures).get(key).copied().unwrap_or(0)
    }

    /// 清除 key 的失败记录
    pub fn forget(&self, key: &str) {
        lock(&self.failures).remove(key);
    }
}
