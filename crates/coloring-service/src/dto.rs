//! 请求与响应结构

use crate::error::{ColoringError, Result};
use crm_client::FieldDescriptor;
use rule_engine::{ConditionNode, EvaluatorError, LeadId, MatchedRule, Rule, Style};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ==================== 请求 ====================

/// 待测试的规则（尚未持久化，只有条件树和可选样式）
#[derive(Debug, Clone, Deserialize)]
pub struct DraftRule {
    pub conditions: ConditionNode,
    #[serde(default)]
    pub style: Option<Style>,
}

/// 测试模式：用一条规则评估一条线索
#[derive(Debug, Clone, Deserialize)]
pub struct TestRuleRequest {
    pub rule: DraftRule,
    #[serde(default)]
    pub lead_id: Option<LeadId>,
    /// 直接提交的线索 JSON，优先于 lead_id
    #[serde(default)]
    pub lead_data: Option<Value>,
}

/// 着色模式：为一批线索决议样式
#[derive(Debug, Clone, Deserialize)]
pub struct ApplyRequest {
    pub lead_ids: Vec<LeadId>,
    pub rules: Vec<Rule>,
    /// 整体截止时间（毫秒），未指定时使用配置值
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

/// 请求的两种形态
#[derive(Debug, Clone)]
pub enum ColoringRequest {
    TestRule(TestRuleRequest),
    Apply(ApplyRequest),
}

impl ColoringRequest {
    /// 按字段判断请求形态：有 `rule` 为测试模式，有 `lead_ids` 为着色模式
    pub fn from_value(value: Value) -> Result<Self> {
        let Some(object) = value.as_object() else {
            return Err(ColoringError::InvalidRequest("请求必须是 JSON 对象".to_string()));
        };

        if object.contains_key("rule") {
            Ok(Self::TestRule(serde_json::from_value(value)?))
        } else if object.contains_key("lead_ids") {
            Ok(Self::Apply(serde_json::from_value(value)?))
        } else {
            Err(ColoringError::InvalidRequest(
                "请求需要包含 rule（测试模式）或 lead_ids（着色模式）".to_string(),
            ))
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::TestRule(_) => "test",
            Self::Apply(_) => "apply",
        }
    }
}

// ==================== 响应 ====================

/// 单条线索的样式
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadStyle {
    pub text_color: String,
    pub background_color: String,
    pub matched_rule_id: i64,
    pub matched_rule_name: String,
}

impl From<MatchedRule> for LeadStyle {
    fn from(matched: MatchedRule) -> Self {
        Self {
            text_color: matched.style.text_color,
            background_color: matched.style.background_color,
            matched_rule_id: matched.rule_id,
            matched_rule_name: matched.rule_name,
        }
    }
}

/// 着色模式响应；没有规则命中的线索对应 null
#[derive(Debug, Clone, Serialize)]
pub struct ApplyResponse {
    pub success: bool,
    pub data: BTreeMap<LeadId, Option<LeadStyle>>,
    pub failed_lead_ids: Vec<LeadId>,
}

/// 测试模式响应
#[derive(Debug, Clone, Serialize)]
pub struct TestRuleResponse {
    pub success: bool,
    pub matches: bool,
    pub details: String,
    pub errors: Vec<EvaluatorError>,
    /// 抓取失败的线索（只可能是请求里的 lead_id）
    pub failed_lead_ids: Vec<LeadId>,
}

/// 字段列表响应
#[derive(Debug, Clone, Serialize)]
pub struct FieldsResponse {
    pub success: bool,
    pub fields: Vec<FieldDescriptor>,
}

/// 请求级错误响应
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
}

impl From<&ColoringError> for ErrorResponse {
    fn from(err: &ColoringError) -> Self {
        Self {
            success: false,
            error: err.to_string(),
            code: err.code(),
        }
    }
}

/// 处理结果
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ColoringResponse {
    Apply(ApplyResponse),
    TestRule(TestRuleResponse),
    Fields(FieldsResponse),
    Error(ErrorResponse),
}

impl ColoringResponse {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Error(_))
    }
}

impl From<ColoringError> for ColoringResponse {
    fn from(err: ColoringError) -> Self {
        Self::Error(ErrorResponse::from(&err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape_detection() {
        let test = ColoringRequest::from_value(json!({
            "rule": {
                "conditions": {"type": "group", "combinator": "AND", "children": []}
            },
            "lead_id": 42
        }))
        .unwrap();
        assert_eq!(test.mode(), "test");

        let apply = ColoringRequest::from_value(json!({"lead_ids": [1, 2], "rules": []})).unwrap();
        assert_eq!(apply.mode(), "apply");

        let err = ColoringRequest::from_value(json!({"foo": 1})).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");

        let err = ColoringRequest::from_value(json!([1])).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[test]
    fn test_malformed_apply_request() {
        let err = ColoringRequest::from_value(json!({"lead_ids": "1,2", "rules": []})).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[test]
    fn test_apply_response_shape() {
        let mut data = BTreeMap::new();
        data.insert(
            1,
            Some(LeadStyle {
                text_color: "#FFFFFF".to_string(),
                background_color: "#FF0000".to_string(),
                matched_rule_id: 7,
                matched_rule_name: "A".to_string(),
            }),
        );
        data.insert(3, None);
        let response = ColoringResponse::Apply(ApplyResponse {
            success: true,
            data,
            failed_lead_ids: vec![2],
        });

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["1"]["matched_rule_id"], 7);
        assert!(json["data"]["3"].is_null());
        assert_eq!(json["failed_lead_ids"], json!([2]));
    }

    #[test]
    fn test_error_response_shape() {
        let response = ColoringResponse::from(ColoringError::InvalidRequest("bad".to_string()));
        assert!(!response.is_success());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, json!({"success": false, "error": "请求格式错误: bad", "code": "INVALID_REQUEST"}));
    }
}
