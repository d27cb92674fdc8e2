//! CRM 客户端错误类型

use std::time::Duration;
use thiserror::Error;

/// 限流器契约错误
///
/// 请求的令牌数超过桶容量，永远无法满足，属于调用方的配置错误。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimiterError {
    #[error("请求令牌数 {cost} 超过桶容量 {capacity}")]
    CostExceedsCapacity { cost: u32, capacity: u32 },

    #[error("限流参数无效: {0}")]
    InvalidParameters(String),
}

/// 单条线索抓取失败
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("网络传输错误: {0}")]
    Transport(String),

    #[error("请求超时 ({0:?})")]
    Timeout(Duration),

    #[error("CRM 限流 (retry_after: {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    #[error("CRM 服务端错误: HTTP {status}")]
    Server { status: u16 },

    #[error("资源不存在")]
    NotFound,

    #[error("非预期的响应状态: HTTP {status}")]
    Unexpected { status: u16 },

    #[error("响应解析失败: {0}")]
    Decode(String),

    #[error(transparent)]
    Limiter(#[from] LimiterError),
}

impl FetchError {
    /// 是否为可重试的瞬时错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::Throttled { .. } | Self::Server { .. }
        )
    }

    /// 服务端给出的重试间隔
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// 用于指标标签的状态名
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::Throttled { .. } => "throttled",
            Self::Server { .. } => "server_error",
            Self::NotFound => "not_found",
            Self::Unexpected { .. } => "unexpected",
            Self::Decode(_) => "decode",
            Self::Limiter(_) => "limiter",
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
