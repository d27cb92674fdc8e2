//! 令牌桶限流器
//!
//! 进程内唯一实例，显式构造后以 `Arc` 传给客户端。令牌惰性补充：
//! 每次 acquire 时按距上次补充的时间差累加，不需要后台定时器。
//!
//! 等待期间不预留令牌，并发的 acquire 可能先拿走令牌，
//! 所以醒来后要重新检查。

use crate::error::LimiterError;
use coloring_shared::config::RateLimitConfig;
use coloring_shared::observability::metrics;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// 浮点累加误差容忍度
const TOKEN_EPSILON: f64 = 1e-9;

/// 受锁保护的桶状态
#[derive(Debug)]
struct BucketState {
    available_tokens: f64,
    last_refill: Instant,
}

/// 令牌桶
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    /// 每秒补充的令牌数
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// 创建满桶
    pub fn new(requests_per_second: f64, burst: u32) -> Result<Self, LimiterError> {
        if !(requests_per_second.is_finite() && requests_per_second > 0.0) {
            return Err(LimiterError::InvalidParameters(format!(
                "requests_per_second 必须为正数，当前 {}",
                requests_per_second
            )));
        }
        if burst == 0 {
            return Err(LimiterError::InvalidParameters(
                "burst 不能为 0".to_string(),
            ));
        }

        Ok(Self {
            capacity: burst,
            refill_rate: requests_per_second,
            state: Mutex::new(BucketState {
                available_tokens: f64::from(burst),
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self, LimiterError> {
        Self::new(config.requests_per_second, config.burst)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// 获取一个令牌
    pub async fn acquire(&self) -> Result<(), LimiterError> {
        self.acquire_cost(1).await
    }

    /// 获取 cost 个令牌，不足时挂起直到补足
    ///
    /// cost 超过容量时立即返回错误。
    pub async fn acquire_cost(&self, cost: u32) -> Result<(), LimiterError> {
        if cost > self.capacity {
            return Err(LimiterError::CostExceedsCapacity {
                cost,
                capacity: self.capacity,
            });
        }

        let started = Instant::now();
        let mut waited = false;

        loop {
            match self.try_debit(cost) {
                None => {
                    if waited {
                        metrics::record_limiter_wait(started.elapsed().as_secs_f64());
                    }
                    return Ok(());
                }
                Some(wait) => {
                    trace!(cost, wait_ms = wait.as_millis() as u64, "令牌不足，等待补充");
                    // 睡眠时不持有锁
                    tokio::time::sleep(wait).await;
                    waited = true;
                }
            }
        }
    }

    /// 不等待的获取，成功返回 true
    pub fn try_acquire(&self, cost: u32) -> bool {
        cost <= self.capacity && self.try_debit(cost).is_none()
    }

    /// 当前可用令牌数（会先做一次补充）
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.available_tokens
    }

    /// 补充后尝试扣减，成功返回 None，否则返回补足缺口所需的等待时间
    fn try_debit(&self, cost: u32) -> Option<Duration> {
        let cost = f64::from(cost);
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());

        if state.available_tokens + TOKEN_EPSILON >= cost {
            state.available_tokens = (state.available_tokens - cost).max(0.0);
            None
        } else {
            let shortfall = cost - state.available_tokens;
            Some(Duration::from_secs_f64(shortfall / self.refill_rate))
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.available_tokens = (state.available_tokens + elapsed.as_secs_f64() * self.refill_rate)
            .min(f64::from(self.capacity));
        state.last_refill = now;
    }
}
