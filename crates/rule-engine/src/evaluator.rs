//! 条件评估器
//!
//! 深度优先、短路求值地评估条件树。叶子按 (字段类型, 操作符) 分派，
//! 不支持的组合走默认分支并记录评估异常，叶子按 false 处理。
//!
//! 评估是纯函数：只读条件树和字段快照，评估时刻在构造时固定。

use crate::error::EvaluatorError;
use crate::models::{Condition, ConditionNode, FieldValue, LogicalGroup};
use crate::operators::{Combinator, FieldType, Operator};
use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc, Weekday};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

/// 评估设置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationSettings {
    /// 相对日期（今天、本周……）使用的固定时区，与线索自身时区无关
    pub utc_offset: FixedOffset,
    pub week_start: Weekday,
    /// 条件树最大深度，超过时整棵子树按 false 处理
    pub max_depth: usize,
}

impl EvaluationSettings {
    pub fn new(utc_offset: FixedOffset, week_start: Weekday, max_depth: usize) -> Self {
        Self {
            utc_offset,
            week_start,
            max_depth,
        }
    }
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            utc_offset: FixedOffset::east_opt(3 * 3600).unwrap_or_else(|| Utc.fix()),
            week_start: Weekday::Mon,
            max_depth: crate::validator::DEFAULT_MAX_CONDITION_DEPTH,
        }
    }
}

/// 一次评估的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationOutcome {
    pub matched: bool,
    /// 评估过程中遇到的异常（按遇到的顺序）
    pub errors: Vec<EvaluatorError>,
}

impl EvaluationOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 叶子评估的内部失败原因，由调用方补全路径后转为 EvaluatorError
enum LeafError {
    Unsupported,
    InvalidValue(String),
}

type LeafResult = std::result::Result<bool, LeafError>;

/// 条件评估器
#[derive(Debug, Clone)]
pub struct ConditionEvaluator {
    settings: EvaluationSettings,
    /// 评估时刻在配置时区下的日期
    today: NaiveDate,
}

impl ConditionEvaluator {
    /// 以指定时刻创建评估器
    pub fn new(settings: EvaluationSettings, now: DateTime<Utc>) -> Self {
        let today = now.with_timezone(&settings.utc_offset).date_naive();
        Self { settings, today }
    }

    /// 以当前时刻创建评估器
    pub fn now(settings: EvaluationSettings) -> Self {
        Self::new(settings, Utc::now())
    }

    pub fn settings(&self) -> &EvaluationSettings {
        &self.settings
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// 评估条件树
    pub fn evaluate(
        &self,
        node: &ConditionNode,
        fields: &HashMap<String, FieldValue>,
    ) -> EvaluationOutcome {
        let mut errors = Vec::new();
        let mut path = Vec::new();
        let matched = self.evaluate_node(node, fields, &mut path, &mut errors);
        EvaluationOutcome { matched, errors }
    }

    /// 只关心是否匹配时的便捷方法
    pub fn matches(&self, node: &ConditionNode, fields: &HashMap<String, FieldValue>) -> bool {
        self.evaluate(node, fields).matched
    }

    /// 递归评估节点，path 为从根到当前节点的子节点下标
    fn evaluate_node(
        &self,
        node: &ConditionNode,
        fields: &HashMap<String, FieldValue>,
        path: &mut Vec<usize>,
        errors: &mut Vec<EvaluatorError>,
    ) -> bool {
        if path.len() >= self.settings.max_depth {
            errors.push(EvaluatorError::DepthExceeded {
                path: render_path(path),
                max_depth: self.settings.max_depth,
            });
            return false;
        }

        match node {
            ConditionNode::Leaf(cond) => self.evaluate_condition(cond, fields, path, errors),
            ConditionNode::Group(group) => self.evaluate_group(group, fields, path, errors),
        }
    }

    /// 评估逻辑组节点（短路求值）
    ///
    /// 空组取单位元：AND 为 true，OR 为 false。
    fn evaluate_group(
        &self,
        group: &LogicalGroup,
        fields: &HashMap<String, FieldValue>,
        path: &mut Vec<usize>,
        errors: &mut Vec<EvaluatorError>,
    ) -> bool {
        match group.combinator {
            Combinator::And => {
                for (i, child) in group.children.iter().enumerate() {
                    path.push(i);
                    let matched = self.evaluate_node(child, fields, path, errors);
                    path.pop();
                    if !matched {
                        return false;
                    }
                }
                true
            }
            Combinator::Or => {
                for (i, child) in group.children.iter().enumerate() {
                    path.push(i);
                    let matched = self.evaluate_node(child, fields, path, errors);
                    path.pop();
                    if matched {
                        return true;
                    }
                }
                false
            }
        }
    }

    /// 评估叶子条件
    fn evaluate_condition(
        &self,
        cond: &Condition,
        fields: &HashMap<String, FieldValue>,
        path: &[usize],
        errors: &mut Vec<EvaluatorError>,
    ) -> bool {
        let stored = fields.get(&cond.field);

        let result = match cond.field_type {
            FieldType::Text => self.evaluate_text(cond, stored),
            FieldType::Number => self.evaluate_number(cond, stored),
            FieldType::Date => self.evaluate_date(cond, stored),
            FieldType::List => self.evaluate_list(cond, stored),
        };

        match result {
            Ok(matched) => matched,
            Err(LeafError::Unsupported) => {
                errors.push(EvaluatorError::UnsupportedOperator {
                    path: render_path(path),
                    field_type: cond.field_type,
                    operator: cond.operator,
                });
                false
            }
            Err(LeafError::InvalidValue(message)) => {
                errors.push(EvaluatorError::InvalidValue {
                    path: render_path(path),
                    operator: cond.operator,
                    message,
                });
                false
            }
        }
    }

    // ==================== 文本 ====================

    fn evaluate_text(&self, cond: &Condition, stored: Option<&FieldValue>) -> LeafResult {
        // 空字符串视为空值
        let actual = stored.map(text_of).filter(|s| !s.is_empty());

        match cond.operator {
            Operator::IsEmpty => Ok(actual.is_none()),
            Operator::IsNotEmpty => Ok(actual.is_some()),
            Operator::Equals => compare_text(actual, cond, |a, e| a == e),
            Operator::NotEquals => compare_text(actual, cond, |a, e| a != e),
            Operator::Contains => compare_text(actual, cond, |a, e| a.contains(e)),
            Operator::NotContains => compare_text(actual, cond, |a, e| !a.contains(e)),
            Operator::StartsWith => compare_text(actual, cond, |a, e| a.starts_with(e)),
            Operator::EndsWith => compare_text(actual, cond, |a, e| a.ends_with(e)),
            _ => Err(LeafError::Unsupported),
        }
    }

    // ==================== 数值 ====================

    fn evaluate_number(&self, cond: &Condition, stored: Option<&FieldValue>) -> LeafResult {
        // 非数值的存储值视为空值
        let actual = stored.and_then(number_of);

        match cond.operator {
            Operator::IsEmpty => Ok(actual.is_none()),
            Operator::IsNotEmpty => Ok(actual.is_some()),
            Operator::Equals => compare_number(actual, &cond.value, approx_eq),
            Operator::NotEquals => compare_number(actual, &cond.value, |a, e| !approx_eq(a, e)),
            Operator::GreaterThan => compare_number(actual, &cond.value, |a, e| a > e),
            Operator::LessThan => compare_number(actual, &cond.value, |a, e| a < e),
            Operator::GreaterOrEqual => compare_number(actual, &cond.value, |a, e| a >= e),
            Operator::LessOrEqual => compare_number(actual, &cond.value, |a, e| a <= e),
            Operator::Between => {
                let Some(actual) = actual else {
                    return Ok(false);
                };
                let (low, high) = expected_range(&cond.value)?;
                Ok(low <= actual && actual <= high)
            }
            _ => Err(LeafError::Unsupported),
        }
    }

    // ==================== 日期 ====================

    fn evaluate_date(&self, cond: &Condition, stored: Option<&FieldValue>) -> LeafResult {
        // 只比较日历日期，无法解析的存储值视为空值
        let actual = stored.and_then(|v| self.date_of(v));
        let today = self.today;

        match cond.operator {
            Operator::IsEmpty => Ok(actual.is_none()),
            Operator::IsNotEmpty => Ok(actual.is_some()),
            Operator::Equals => self.compare_date(actual, &cond.value, |a, e| a == e),
            Operator::NotEquals => self.compare_date(actual, &cond.value, |a, e| a != e),
            Operator::After => self.compare_date(actual, &cond.value, |a, e| a > e),
            Operator::Before => self.compare_date(actual, &cond.value, |a, e| a < e),
            Operator::Today => Ok(actual == Some(today)),
            Operator::Yesterday => Ok(actual.is_some() && actual == today.pred_opt()),
            Operator::ThisWeek => Ok(in_range(actual, self.week_range(today, 0))),
            Operator::LastWeek => Ok(in_range(actual, self.week_range(today, 1))),
            Operator::ThisMonth => Ok(in_range(actual, month_range(today.year(), today.month()))),
            Operator::LastMonth => {
                let (year, month) = if today.month() == 1 {
                    (today.year() - 1, 12)
                } else {
                    (today.year(), today.month() - 1)
                };
                Ok(in_range(actual, month_range(year, month)))
            }
            Operator::ThisYear => Ok(in_range(actual, year_range(today.year()))),
            Operator::LastYear => Ok(in_range(actual, year_range(today.year() - 1))),
            Operator::LastNDays => {
                let Some(actual) = actual else {
                    return Ok(false);
                };
                let days = expected_day_count(&cond.value)?;
                let from = today.checked_sub_days(Days::new(days));
                Ok(from.is_some_and(|from| from <= actual && actual <= today))
            }
            _ => Err(LeafError::Unsupported),
        }
    }

    fn compare_date(
        &self,
        actual: Option<NaiveDate>,
        expected: &Value,
        cmp: impl Fn(NaiveDate, NaiveDate) -> bool,
    ) -> LeafResult {
        let Some(actual) = actual else {
            return Ok(false);
        };
        let expected = self.expected_date(expected)?;
        Ok(cmp(actual, expected))
    }

    /// 存储值转为配置时区下的日历日期
    fn date_of(&self, value: &FieldValue) -> Option<NaiveDate> {
        match value {
            FieldValue::Date(dt) => Some(dt.with_timezone(&self.settings.utc_offset).date_naive()),
            FieldValue::Number(secs) => self.date_from_timestamp(*secs),
            FieldValue::Text(s) => self.parse_date(s),
            FieldValue::List(_) => None,
        }
    }

    fn expected_date(&self, value: &Value) -> Result<NaiveDate, LeafError> {
        let parsed = match value {
            Value::String(s) => self.parse_date(s),
            Value::Number(n) => n.as_f64().and_then(|secs| self.date_from_timestamp(secs)),
            _ => None,
        };
        parsed.ok_or_else(|| LeafError::InvalidValue(format!("无法解析日期: {}", value)))
    }

    fn date_from_timestamp(&self, secs: f64) -> Option<NaiveDate> {
        date_from_timestamp(secs, &self.settings.utc_offset)
    }

    fn parse_date(&self, s: &str) -> Option<NaiveDate> {
        parse_date_str(s, &self.settings.utc_offset)
    }

    /// 第 weeks_ago 周（0 为本周）的起止日期
    fn week_range(&self, today: NaiveDate, weeks_ago: u64) -> Option<(NaiveDate, NaiveDate)> {
        let since_start = (today.weekday().num_days_from_monday() + 7
            - self.settings.week_start.num_days_from_monday())
            % 7;
        let start = today
            .checked_sub_days(Days::new(u64::from(since_start)))?
            .checked_sub_days(Days::new(7 * weeks_ago))?;
        let end = start.checked_add_days(Days::new(6))?;
        Some((start, end))
    }

    // ==================== 列表 ====================

    fn evaluate_list(&self, cond: &Condition, stored: Option<&FieldValue>) -> LeafResult {
        let actual = stored
            .map(|v| tokens_of(v, cond.case_insensitive))
            .filter(|tokens| !tokens.is_empty());

        match cond.operator {
            Operator::IsEmpty => Ok(actual.is_none()),
            Operator::IsNotEmpty => Ok(actual.is_some()),
            Operator::Equals => compare_tokens(actual, cond, |a, e| *a == e),
            Operator::NotEquals => compare_tokens(actual, cond, |a, e| *a != e),
            Operator::InList => compare_tokens(actual, cond, |a, e| e.iter().any(|t| a.contains(t))),
            Operator::NotInList => {
                compare_tokens(actual, cond, |a, e| !e.iter().any(|t| a.contains(t)))
            }
            _ => Err(LeafError::Unsupported),
        }
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::now(EvaluationSettings::default())
    }
}

/// 把下标路径渲染为 "root.children[0].children[2]"
fn render_path(path: &[usize]) -> String {
    let mut rendered = String::from("root");
    for index in path {
        rendered.push_str(&format!(".children[{}]", index));
    }
    rendered
}

// ==================== 取值转换 ====================

pub(crate) fn date_from_timestamp(secs: f64, offset: &FixedOffset) -> Option<NaiveDate> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp(secs as i64, 0).map(|dt| dt.with_timezone(offset).date_naive())
}

/// 解析日期字符串
///
/// 支持 RFC 3339（换算到 offset 时区）、无时区的日期时间、`YYYY-MM-DD`、
/// `DD.MM.YYYY` 以及纯数字的 unix 秒。
pub(crate) fn parse_date_str(s: &str, offset: &FixedOffset) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(offset).date_naive());
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.date());
        }
    }

    for format in ["%Y-%m-%d", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }

    s.parse::<i64>()
        .ok()
        .and_then(|secs| date_from_timestamp(secs as f64, offset))
}

/// 整数值不带小数部分输出，保证 142 与 142.0 的文本一致
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn text_of(value: &FieldValue) -> Cow<'_, str> {
    match value {
        FieldValue::Text(s) => Cow::Borrowed(s.as_str()),
        FieldValue::Number(n) => Cow::Owned(format_number(*n)),
        FieldValue::Date(dt) => Cow::Owned(dt.to_rfc3339()),
        FieldValue::List(items) => Cow::Owned(items.join(", ")),
    }
}

fn number_of(value: &FieldValue) -> Option<f64> {
    let n = match value {
        FieldValue::Number(n) => *n,
        FieldValue::Text(s) => s.trim().parse::<f64>().ok()?,
        FieldValue::List(items) if items.len() == 1 => items[0].trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn tokens_of(value: &FieldValue, case_insensitive: bool) -> HashSet<String> {
    let raw: Vec<Cow<'_, str>> = match value {
        FieldValue::List(items) => items.iter().map(|s| Cow::Borrowed(s.as_str())).collect(),
        FieldValue::Text(s) => vec![Cow::Borrowed(s.as_str())],
        FieldValue::Number(n) => vec![Cow::Owned(format_number(*n))],
        FieldValue::Date(dt) => vec![Cow::Owned(dt.to_rfc3339())],
    };
    raw.into_iter()
        .filter(|token| !token.is_empty())
        .map(|token| normalize(&token, case_insensitive))
        .collect()
}

fn normalize(token: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        token.to_lowercase()
    } else {
        token.to_string()
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => n.as_f64().map(format_number),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn expected_number(value: &Value) -> Result<f64, LeafError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|n| n.is_finite())
        .ok_or_else(|| LeafError::InvalidValue(format!("需要数值，实际为 {}", value)))
}

fn expected_range(value: &Value) -> Result<(f64, f64), LeafError> {
    match value.as_array().map(Vec::as_slice) {
        Some([low, high]) => Ok((expected_number(low)?, expected_number(high)?)),
        _ => Err(LeafError::InvalidValue(format!(
            "between 需要 [low, high] 数组，实际为 {}",
            value
        ))),
    }
}

fn expected_day_count(value: &Value) -> Result<u64, LeafError> {
    let days = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match days {
        Some(days) if days >= 0 => Ok(days as u64),
        _ => Err(LeafError::InvalidValue(format!(
            "last_n_days 需要非负整数，实际为 {}",
            value
        ))),
    }
}

fn expected_tokens(value: &Value, case_insensitive: bool) -> Result<HashSet<String>, LeafError> {
    let invalid = || LeafError::InvalidValue(format!("需要文本或文本数组，实际为 {}", value));
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                scalar_text(item)
                    .map(|s| normalize(&s, case_insensitive))
                    .ok_or_else(invalid)
            })
            .collect(),
        _ => {
            let token = scalar_text(value).ok_or_else(invalid)?;
            Ok(HashSet::from([normalize(&token, case_insensitive)]))
        }
    }
}

// ==================== 比较辅助 ====================

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0)
}

fn compare_text(
    actual: Option<Cow<'_, str>>,
    cond: &Condition,
    cmp: impl Fn(&str, &str) -> bool,
) -> LeafResult {
    let Some(actual) = actual else {
        return Ok(false);
    };
    let expected = scalar_text(&cond.value)
        .ok_or_else(|| LeafError::InvalidValue(format!("需要文本值，实际为 {}", cond.value)))?;

    if cond.case_insensitive {
        Ok(cmp(
            actual.to_lowercase().as_str(),
            expected.to_lowercase().as_str(),
        ))
    } else {
        Ok(cmp(actual.as_ref(), expected.as_str()))
    }
}

fn compare_number(
    actual: Option<f64>,
    expected: &Value,
    cmp: impl Fn(f64, f64) -> bool,
) -> LeafResult {
    let Some(actual) = actual else {
        return Ok(false);
    };
    Ok(cmp(actual, expected_number(expected)?))
}

fn compare_tokens(
    actual: Option<HashSet<String>>,
    cond: &Condition,
    cmp: impl Fn(&HashSet<String>, HashSet<String>) -> bool,
) -> LeafResult {
    let Some(actual) = actual else {
        return Ok(false);
    };
    let expected = expected_tokens(&cond.value, cond.case_insensitive)?;
    Ok(cmp(&actual, expected))
}

fn in_range(actual: Option<NaiveDate>, range: Option<(NaiveDate, NaiveDate)>) -> bool {
    match (actual, range) {
        (Some(date), Some((start, end))) => start <= date && date <= end,
        _ => false,
    }
}

fn month_range(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((start, next.pred_opt()?))
}

fn year_range(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}
