//! 规则引擎领域模型

use crate::operators::{Combinator, FieldType, Operator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub type RuleId = i64;
pub type LeadId = i64;

/// 着色规则
///
/// 由持久化层拥有，引擎每次决议拿到的是只读快照。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    #[serde(default)]
    pub subdomain: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// 数值越小越先评估，相同优先级按 id 升序
    #[serde(default)]
    pub priority: i32,
    pub conditions: ConditionNode,
    pub style: Style,
}

fn default_active() -> bool {
    true
}

impl Rule {
    pub fn new(id: RuleId, name: impl Into<String>, conditions: ConditionNode, style: Style) -> Self {
        Self {
            id,
            subdomain: String::new(),
            name: name.into(),
            is_active: true,
            priority: 0,
            conditions,
            style,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// 着色样式，引擎不解释颜色值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Style {
    pub text_color: String,
    pub background_color: String,
}

impl Style {
    pub fn new(text_color: impl Into<String>, background_color: impl Into<String>) -> Self {
        Self {
            text_color: text_color.into(),
            background_color: background_color.into(),
        }
    }
}

/// 条件树节点（叶子条件或逻辑组）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionNode {
    #[serde(rename = "condition")]
    Leaf(Condition),
    Group(LogicalGroup),
}

impl ConditionNode {
    pub fn leaf(condition: Condition) -> Self {
        Self::Leaf(condition)
    }

    pub fn and(children: Vec<ConditionNode>) -> Self {
        Self::Group(LogicalGroup::and(children))
    }

    pub fn or(children: Vec<ConditionNode>) -> Self {
        Self::Group(LogicalGroup::or(children))
    }

    /// 树深度（单个叶子为 1）
    pub fn depth(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Group(group) => {
                1 + group
                    .children
                    .iter()
                    .map(ConditionNode::depth)
                    .max()
                    .unwrap_or(0)
            }
        }
    }
}

/// 叶子条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub field_type: FieldType,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    /// 仅对文本和列表比较生效
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub case_insensitive: bool,
}

impl Condition {
    pub fn new(
        field: impl Into<String>,
        field_type: FieldType,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.into(),
            field_type,
            operator,
            value: value.into(),
            case_insensitive: false,
        }
    }

    /// 不需要比较值的条件（空值检查、相对日期）
    pub fn unary(field: impl Into<String>, field_type: FieldType, operator: Operator) -> Self {
        Self::new(field, field_type, operator, Value::Null)
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }
}

/// 逻辑组节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalGroup {
    #[serde(alias = "operator")]
    pub combinator: Combinator,
    #[serde(default)]
    pub children: Vec<ConditionNode>,
}

impl LogicalGroup {
    pub fn new(combinator: Combinator, children: Vec<ConditionNode>) -> Self {
        Self {
            combinator,
            children,
        }
    }

    pub fn and(children: Vec<ConditionNode>) -> Self {
        Self::new(Combinator::And, children)
    }

    pub fn or(children: Vec<ConditionNode>) -> Self {
        Self::new(Combinator::Or, children)
    }
}

/// 线索字段的类型化取值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
    Date(DateTime<Utc>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// 按 unix 秒构造日期，越界时返回 None
    pub fn from_timestamp(secs: i64) -> Option<Self> {
        DateTime::from_timestamp(secs, 0).map(Self::Date)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Date(_) => "date",
        }
    }
}

/// 单条线索在一次决议中使用的字段快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadFieldSnapshot {
    pub lead_id: LeadId,
    pub fields: HashMap<String, FieldValue>,
}

impl LeadFieldSnapshot {
    pub fn new(lead_id: LeadId) -> Self {
        Self {
            lead_id,
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.fields.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}
