//! 规则引擎错误类型

use crate::operators::{FieldType, Operator};
use serde::Serialize;
use thiserror::Error;

/// 规则加载/校验阶段的错误
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则校验失败 ({path}): {message}")]
    Validation { path: String, message: String },

    #[error("字段类型 {field_type} 不支持操作符 {operator} ({path})")]
    UnsupportedOperator {
        path: String,
        field_type: FieldType,
        operator: Operator,
    },

    #[error("条件树深度超过上限 {max_depth} ({path})")]
    DepthExceeded { path: String, max_depth: usize },

    #[error("last_n_days 的天数不能为负数: {days} ({path})")]
    NegativeDayCount { path: String, days: i64 },
}

impl RuleError {
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::UnsupportedOperator { .. } => "UNSUPPORTED_OPERATOR",
            Self::DepthExceeded { .. } => "DEPTH_EXCEEDED",
            Self::NegativeDayCount { .. } => "NEGATIVE_DAY_COUNT",
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;

/// 评估阶段的异常
///
/// 通过校验的规则本不应出现这些情况。出现时对应叶子按 false 处理，
/// 异常随评估结果返回给调用方，不会中断整棵树的评估。
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluatorError {
    #[error("字段类型 {field_type} 不支持操作符 {operator} ({path})")]
    UnsupportedOperator {
        path: String,
        field_type: FieldType,
        operator: Operator,
    },

    #[error("操作符 {operator} 的比较值无效 ({path}): {message}")]
    InvalidValue {
        path: String,
        operator: Operator,
        message: String,
    },

    #[error("条件树深度超过上限 {max_depth} ({path})")]
    DepthExceeded { path: String, max_depth: usize },
}

impl EvaluatorError {
    /// 用于指标标签的异常类别
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedOperator { .. } => "unsupported_operator",
            Self::InvalidValue { .. } => "invalid_value",
            Self::DepthExceeded { .. } => "depth_exceeded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = RuleError::validation("root", "规则名称不能为空");
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(err.to_string(), "规则校验失败 (root): 规则名称不能为空");

        let err = RuleError::NegativeDayCount {
            path: "root".to_string(),
            days: -3,
        };
        assert_eq!(err.code(), "NEGATIVE_DAY_COUNT");
    }

    #[test]
    fn test_evaluator_error_kind_and_display() {
        let err = EvaluatorError::UnsupportedOperator {
            path: "root.children[1]".to_string(),
            field_type: FieldType::Text,
            operator: Operator::Between,
        };
        assert_eq!(err.kind(), "unsupported_operator");
        assert_eq!(
            err.to_string(),
            "字段类型 TEXT 不支持操作符 between (root.children[1])"
        );

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "unsupported_operator");
        assert_eq!(json["operator"], "between");
    }
}
