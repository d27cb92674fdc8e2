//! 重试策略与执行器
//!
//! 指数退避的有界重试循环。服务端给出 Retry-After 时以它为退避基数，
//! 不可重试的错误（404、解析失败）直接返回。

use crate::error::FetchError;
use coloring_shared::config::RetryConfig;
use coloring_shared::observability::metrics;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// 可由重试循环判断的错误
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// 服务端建议的重试间隔
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// 用于指标标签的原因
    fn reason(&self) -> &'static str {
        "error"
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        FetchError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        FetchError::retry_after(self)
    }

    fn reason(&self) -> &'static str {
        self.status_label()
    }
}

/// 重试策略配置
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// 退避时间上限
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 默认策略：最多尝试 3 次，基数 1 秒，上限 30 秒，倍数 2.0
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
        }
    }

    /// 第 attempt 次失败后的等待时间（attempt 从 0 开始）
    ///
    /// 公式: (hint 或 base_delay) * multiplier^attempt，不超过 max_delay。
    pub fn delay_for_attempt(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let base_ms = hint.unwrap_or(self.base_delay).as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms.max(0.0) as u64)
    }

    /// 第 attempt 次（从 0 开始）失败后是否还能再试
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}

/// 带重试的异步执行器
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempt, "操作在重试后成功");
                }
                return Ok(value);
            }
            Err(err) => {
                if !err.is_retryable() {
                    warn!(
                        operation = operation_name,
                        error = %err,
                        "操作失败且不可重试，直接返回错误"
                    );
                    return Err(err);
                }

                if !policy.should_retry(attempt) {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %err,
                        "已达最大尝试次数，放弃重试"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt, err.retry_after());
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "操作失败，将在退避后重试"
                );
                metrics::record_fetch_retry(err.reason());

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
