//! 着色服务错误类型

use crm_client::FetchError;
use rule_engine::RuleError;
use thiserror::Error;

/// 请求级错误
///
/// 单条线索抓取失败不会走到这里，而是记入响应的 failed_lead_ids。
#[derive(Debug, Error)]
pub enum ColoringError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("请求格式错误: {0}")]
    InvalidRequest(String),

    #[error("请求的线索数 {count} 超过上限 {max}")]
    TooManyLeads { count: usize, max: usize },

    #[error("CRM 调用失败: {0}")]
    Crm(#[from] FetchError),

    #[error("配置错误: {0}")]
    Config(String),
}

impl ColoringError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rule(_) | Self::TooManyLeads { .. } => "VALIDATION_ERROR",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Crm(_) => "CRM_ERROR",
            Self::Config(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for ColoringError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ColoringError>;
