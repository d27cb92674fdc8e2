//! 规则操作符与字段类型定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 字段类型
///
/// 同一个操作符在不同字段类型下语义不同，叶子条件必须声明字段类型。
/// 兼容旧版前端的 "string" / "enum" 写法。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[serde(alias = "TEXT", alias = "string")]
    Text,
    #[serde(alias = "NUMBER", alias = "numeric")]
    Number,
    #[serde(alias = "DATE")]
    Date,
    #[serde(alias = "LIST", alias = "enum")]
    List,
}

impl FieldType {
    /// 该字段类型允许的操作符
    pub fn operators(self) -> &'static [Operator] {
        use Operator::*;
        match self {
            Self::Text => &[
                Equals,
                NotEquals,
                Contains,
                NotContains,
                StartsWith,
                EndsWith,
                IsEmpty,
                IsNotEmpty,
            ],
            Self::Number => &[
                Equals,
                NotEquals,
                GreaterThan,
                LessThan,
                GreaterOrEqual,
                LessOrEqual,
                Between,
                IsEmpty,
                IsNotEmpty,
            ],
            Self::Date => &[
                Equals,
                NotEquals,
                After,
                Before,
                Today,
                Yesterday,
                ThisWeek,
                LastWeek,
                ThisMonth,
                LastMonth,
                ThisYear,
                LastYear,
                LastNDays,
                IsEmpty,
                IsNotEmpty,
            ],
            Self::List => &[Equals, NotEquals, InList, NotInList, IsEmpty, IsNotEmpty],
        }
    }

    pub fn supports(self, operator: Operator) -> bool {
        self.operators().contains(&operator)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Text => "TEXT",
            Self::Number => "NUMBER",
            Self::Date => "DATE",
            Self::List => "LIST",
        };
        write!(f, "{}", s)
    }
}

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    // 通用比较
    Equals,
    NotEquals,

    // 文本
    Contains,
    NotContains,
    StartsWith,
    EndsWith,

    // 数值
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Between,

    // 日期
    After,
    Before,
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    ThisYear,
    LastYear,
    LastNDays,

    // 列表
    InList,
    NotInList,

    // 空值检查
    IsEmpty,
    IsNotEmpty,
}

impl Operator {
    /// 是否需要比较值
    ///
    /// 空值检查与相对日期操作符只依赖字段值和评估时刻。
    pub fn takes_value(self) -> bool {
        !matches!(
            self,
            Self::IsEmpty
                | Self::IsNotEmpty
                | Self::Today
                | Self::Yesterday
                | Self::ThisWeek
                | Self::LastWeek
                | Self::ThisMonth
                | Self::LastMonth
                | Self::ThisYear
                | Self::LastYear
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::GreaterOrEqual => "greater_or_equal",
            Self::LessOrEqual => "less_or_equal",
            Self::Between => "between",
            Self::After => "after",
            Self::Before => "before",
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::ThisWeek => "this_week",
            Self::LastWeek => "last_week",
            Self::ThisMonth => "this_month",
            Self::LastMonth => "last_month",
            Self::ThisYear => "this_year",
            Self::LastYear => "last_year",
            Self::LastNDays => "last_n_days",
            Self::InList => "in_list",
            Self::NotInList => "not_in_list",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
        };
        write!(f, "{}", s)
    }
}

/// 逻辑组合符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    #[serde(alias = "and")]
    And,
    #[serde(alias = "or")]
    Or,
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}
