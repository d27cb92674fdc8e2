//! 规则校验器
//!
//! 在评估之前拒绝结构错误的规则：空名称、空组、超深的树、
//! 字段类型不支持的操作符以及形状不对的比较值。

use crate::error::{Result, RuleError};
use crate::evaluator::{date_from_timestamp, parse_date_str};
use crate::models::{Condition, ConditionNode, Rule, Style};
use crate::operators::{FieldType, Operator};
use chrono::{Offset, Utc};
use serde_json::Value;

/// 条件树默认最大深度
pub const DEFAULT_MAX_CONDITION_DEPTH: usize = 16;

/// 规则校验器
#[derive(Debug, Clone, Copy)]
pub struct RuleValidator {
    max_depth: usize,
}

impl Default for RuleValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONDITION_DEPTH)
    }
}

impl RuleValidator {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// 校验单条规则
    pub fn validate_rule(&self, rule: &Rule) -> Result<()> {
        if rule.name.trim().is_empty() {
            return Err(RuleError::validation(
                format!("rule[{}]", rule.id),
                "规则名称不能为空",
            ));
        }

        self.validate_style(&rule.style)?;
        self.validate_conditions(&rule.conditions)
    }

    /// 校验规则集合，遇到第一个错误即返回
    pub fn validate_rules(&self, rules: &[Rule]) -> Result<()> {
        rules.iter().try_for_each(|rule| self.validate_rule(rule))
    }

    pub fn validate_style(&self, style: &Style) -> Result<()> {
        if style.text_color.trim().is_empty() {
            return Err(RuleError::validation("style.text_color", "文字颜色不能为空"));
        }
        if style.background_color.trim().is_empty() {
            return Err(RuleError::validation(
                "style.background_color",
                "背景颜色不能为空",
            ));
        }
        Ok(())
    }

    /// 校验条件树（测试模式下规则尚未持久化，只有条件树）
    pub fn validate_conditions(&self, root: &ConditionNode) -> Result<()> {
        self.validate_node(root, "root", 1)
    }

    fn validate_node(&self, node: &ConditionNode, path: &str, depth: usize) -> Result<()> {
        if depth > self.max_depth {
            return Err(RuleError::DepthExceeded {
                path: path.to_string(),
                max_depth: self.max_depth,
            });
        }

        match node {
            ConditionNode::Leaf(cond) => self.validate_condition(cond, path),
            ConditionNode::Group(group) => {
                if group.children.is_empty() {
                    return Err(RuleError::validation(path, "逻辑组至少需要一个子条件"));
                }

                for (i, child) in group.children.iter().enumerate() {
                    let child_path = format!("{}.children[{}]", path, i);
                    self.validate_node(child, &child_path, depth + 1)?;
                }
                Ok(())
            }
        }
    }

    fn validate_condition(&self, cond: &Condition, path: &str) -> Result<()> {
        if cond.field.trim().is_empty() {
            return Err(RuleError::validation(path, "条件字段不能为空"));
        }

        if !cond.field_type.supports(cond.operator) {
            return Err(RuleError::UnsupportedOperator {
                path: path.to_string(),
                field_type: cond.field_type,
                operator: cond.operator,
            });
        }

        self.validate_value(cond, path)
    }

    /// 验证操作符和值的兼容性
    fn validate_value(&self, cond: &Condition, path: &str) -> Result<()> {
        let value = &cond.value;

        if !cond.operator.takes_value() {
            // 前端对无值操作符可能传空串
            return match value {
                Value::Null => Ok(()),
                Value::String(s) if s.is_empty() => Ok(()),
                _ => Err(RuleError::validation(
                    path,
                    format!("{} 操作符不接受比较值", cond.operator),
                )),
            };
        }

        match (cond.field_type, cond.operator) {
            (FieldType::Number, Operator::Between) => {
                let Some([low, high]) = value.as_array().map(Vec::as_slice) else {
                    return Err(RuleError::validation(
                        path,
                        "between 操作符需要 [low, high] 数组",
                    ));
                };
                match (as_number(low), as_number(high)) {
                    (Some(low), Some(high)) if low <= high => Ok(()),
                    (Some(low), Some(high)) => Err(RuleError::validation(
                        path,
                        format!("between 的下界 {} 大于上界 {}", low, high),
                    )),
                    _ => Err(RuleError::validation(path, "between 的上下界必须是数值")),
                }
            }
            (FieldType::Number, _) => {
                if as_number(value).is_none() {
                    return Err(RuleError::validation(
                        path,
                        format!("{} 操作符需要数值，实际为 {}", cond.operator, value),
                    ));
                }
                Ok(())
            }
            (FieldType::Date, Operator::LastNDays) => {
                let days = match value {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                match days {
                    Some(days) if days < 0 => Err(RuleError::NegativeDayCount {
                        path: path.to_string(),
                        days,
                    }),
                    Some(_) => Ok(()),
                    None => Err(RuleError::validation(
                        path,
                        format!("last_n_days 需要整数天数，实际为 {}", value),
                    )),
                }
            }
            (FieldType::Date, _) => {
                if !is_date_literal(value) {
                    return Err(RuleError::validation(
                        path,
                        format!("无法解析日期: {}", value),
                    ));
                }
                Ok(())
            }
            (FieldType::List, _) => {
                let valid = match value {
                    Value::Array(items) => !items.is_empty() && items.iter().all(is_scalar),
                    other => is_scalar(other),
                };
                if !valid {
                    return Err(RuleError::validation(
                        path,
                        format!("{} 操作符需要文本或非空文本数组", cond.operator),
                    ));
                }
                Ok(())
            }
            (FieldType::Text, _) => {
                if !is_scalar(value) {
                    return Err(RuleError::validation(
                        path,
                        format!("{} 操作符需要文本值", cond.operator),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// 日期字面量是否可解析（与时区无关，只判断格式）
fn is_date_literal(value: &Value) -> bool {
    let utc = Utc.fix();
    match value {
        Value::String(s) => parse_date_str(s, &utc).is_some(),
        Value::Number(n) => n
            .as_f64()
            .and_then(|secs| date_from_timestamp(secs, &utc))
            .is_some(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(field_type: FieldType, operator: Operator, value: Value) -> ConditionNode {
        ConditionNode::leaf(Condition::new("f", field_type, operator, value))
    }

    fn rule(conditions: ConditionNode) -> Rule {
        Rule::new(1, "rule", conditions, Style::new("#000000", "#FFFFFF"))
    }

    #[test]
    fn test_valid_rule() {
        let validator = RuleValidator::default();
        let conditions = ConditionNode::and(vec![
            leaf(FieldType::Number, Operator::GreaterThan, json!(1000)),
            ConditionNode::or(vec![
                leaf(FieldType::Text, Operator::Contains, json!("vip")),
                leaf(FieldType::Date, Operator::LastNDays, json!(7)),
                leaf(FieldType::List, Operator::InList, json!(["a", "b"])),
                ConditionNode::leaf(Condition::unary("f", FieldType::Date, Operator::ThisWeek)),
            ]),
        ]);
        assert!(validator.validate_rule(&rule(conditions)).is_ok());
    }

    #[test]
    fn test_empty_name_and_colors_rejected() {
        let validator = RuleValidator::default();
        let mut r = rule(leaf(FieldType::Number, Operator::Equals, json!(1)));
        r.name = " ".to_string();
        assert_eq!(validator.validate_rule(&r).unwrap_err().code(), "VALIDATION_ERROR");

        let mut r = rule(leaf(FieldType::Number, Operator::Equals, json!(1)));
        r.style.background_color = String::new();
        assert!(validator.validate_rule(&r).is_err());
    }

    #[test]
    fn test_empty_group_rejected_with_path() {
        let validator = RuleValidator::default();
        let conditions = ConditionNode::and(vec![
            leaf(FieldType::Number, Operator::Equals, json!(1)),
            ConditionNode::or(vec![]),
        ]);
        match validator.validate_conditions(&conditions).unwrap_err() {
            RuleError::Validation { path, .. } => assert_eq!(path, "root.children[1]"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_operator_rejected() {
        let validator = RuleValidator::default();
        let conditions = ConditionNode::and(vec![
            leaf(FieldType::Number, Operator::Equals, json!(1)),
            leaf(FieldType::Text, Operator::Between, json!([1, 2])),
        ]);
        let err = validator.validate_conditions(&conditions).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_OPERATOR");
        assert!(err.to_string().contains("root.children[1]"));
    }

    #[test]
    fn test_between_shape() {
        let validator = RuleValidator::default();
        assert!(validator
            .validate_conditions(&leaf(FieldType::Number, Operator::Between, json!([100, 200])))
            .is_ok());
        assert!(validator
            .validate_conditions(&leaf(FieldType::Number, Operator::Between, json!([200, 100])))
            .is_err());
        assert!(validator
            .validate_conditions(&leaf(FieldType::Number, Operator::Between, json!([1])))
            .is_err());
        assert!(validator
            .validate_conditions(&leaf(FieldType::Number, Operator::Between, json!(5)))
            .is_err());
    }

    #[test]
    fn test_negative_last_n_days_rejected() {
        let validator = RuleValidator::default();
        let err = validator
            .validate_conditions(&leaf(FieldType::Date, Operator::LastNDays, json!(-2)))
            .unwrap_err();
        assert_eq!(err.code(), "NEGATIVE_DAY_COUNT");

        assert!(validator
            .validate_conditions(&leaf(FieldType::Date, Operator::LastNDays, json!(0)))
            .is_ok());
        assert!(validator
            .validate_conditions(&leaf(FieldType::Date, Operator::LastNDays, json!("three")))
            .is_err());
    }

    #[test]
    fn test_relative_date_takes_no_value() {
        let validator = RuleValidator::default();
        assert!(validator
            .validate_conditions(&leaf(FieldType::Date, Operator::Today, json!("2024-01-01")))
            .is_err());
        assert!(validator
            .validate_conditions(&leaf(FieldType::Text, Operator::IsEmpty, json!("")))
            .is_ok());
    }

    #[test]
    fn test_date_comparison_value_must_parse() {
        let validator = RuleValidator::default();
        assert!(validator
            .validate_conditions(&leaf(FieldType::Date, Operator::After, json!("2024-05-01")))
            .is_ok());
        assert!(validator
            .validate_conditions(&leaf(FieldType::Date, Operator::After, json!("next tuesday")))
            .is_err());
    }

    #[test]
    fn test_depth_limit() {
        let validator = RuleValidator::new(3);
        let mut node = leaf(FieldType::Number, Operator::Equals, json!(1));
        node = ConditionNode::and(vec![ConditionNode::and(vec![node])]);
        assert!(validator.validate_conditions(&node).is_ok());

        let deeper = ConditionNode::or(vec![node]);
        let err = validator.validate_conditions(&deeper).unwrap_err();
        assert_eq!(err.code(), "DEPTH_EXCEEDED");
    }

    #[test]
    fn test_validate_rules_stops_at_first_error() {
        let validator = RuleValidator::default();
        let good = rule(leaf(FieldType::Number, Operator::Equals, json!(1)));
        let mut bad = rule(leaf(FieldType::Text, Operator::Equals, json!({"x": 1})));
        bad.id = 2;
        assert!(validator.validate_rules(&[good.clone()]).is_ok());
        assert!(validator.validate_rules(&[good, bad]).is_err());
    }
}
