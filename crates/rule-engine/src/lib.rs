//! 线索着色规则引擎
//!
//! 提供纯同步的规则评估能力：
//! - 带字段类型的条件树定义（AND/OR 组 + 字段/操作符/值 叶子）
//! - 按字段类型区分语义的操作符评估
//! - 规则加载时的结构与取值校验
//! - 按优先级决议出每条线索的唯一样式

pub mod error;
pub mod evaluator;
pub mod models;
pub mod operators;
pub mod resolver;
pub mod validator;

pub use error::{EvaluatorError, Result, RuleError};
pub use evaluator::{ConditionEvaluator, EvaluationOutcome, EvaluationSettings};
pub use models::{
    Condition, ConditionNode, FieldValue, LeadFieldSnapshot, LeadId, LogicalGroup, Rule, RuleId,
    Style,
};
pub use operators::{Combinator, FieldType, Operator};
pub use resolver::{MatchedRule, Resolution, RuleAnomaly, RuleResolver, RuleTestResult};
pub use validator::{RuleValidator, DEFAULT_MAX_CONDITION_DEPTH};
