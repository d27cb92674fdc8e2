//! 线索 JSON 到字段快照的映射

use crate::error::{FetchError, Result};
use rule_engine::{FieldValue, LeadFieldSnapshot, LeadId};
use serde_json::{Map, Value};

/// 文本类标准字段
const TEXT_FIELDS: &[&str] = &["name"];
/// 数值类标准字段
const NUMBER_FIELDS: &[&str] = &["price"];
/// 枚举 id 类标准字段，按单元素列表处理
const ID_FIELDS: &[&str] = &["status_id", "pipeline_id", "responsible_user_id"];
/// unix 秒时间戳字段
const DATE_FIELDS: &[&str] = &["created_at", "updated_at", "closed_at"];

/// 把 CRM 返回的线索对象映射为字段快照
///
/// 自定义字段同时以 field_id 与 field_code 为键；
/// 单个取值映射为标量，多个取值映射为文本列表。
pub fn lead_snapshot(lead_id: LeadId, lead: &Value) -> Result<LeadFieldSnapshot> {
    let object = lead
        .as_object()
        .ok_or_else(|| FetchError::Decode(format!("线索 {} 的响应不是 JSON 对象", lead_id)))?;

    let mut snapshot = LeadFieldSnapshot::new(lead_id);
    map_standard_fields(object, &mut snapshot);

    if let Some(custom_fields) = object.get("custom_fields_values").and_then(Value::as_array) {
        for field in custom_fields {
            map_custom_field(field, &mut snapshot);
        }
    }

    Ok(snapshot)
}

/// 测试模式下直接提交的 lead_data，没有 id 时记为 0
pub fn snapshot_from_lead_data(lead: &Value) -> Result<LeadFieldSnapshot> {
    let lead_id = lead.get("id").and_then(Value::as_i64).unwrap_or_default();
    lead_snapshot(lead_id, lead)
}

fn map_standard_fields(object: &Map<String, Value>, snapshot: &mut LeadFieldSnapshot) {
    for &field in TEXT_FIELDS {
        if let Some(text) = object.get(field).and_then(Value::as_str) {
            snapshot.insert(field, FieldValue::text(text));
        }
    }

    for &field in NUMBER_FIELDS {
        if let Some(n) = object.get(field).and_then(Value::as_f64) {
            snapshot.insert(field, FieldValue::Number(n));
        }
    }

    for &field in ID_FIELDS {
        if let Some(token) = object.get(field).and_then(scalar_token) {
            snapshot.insert(field, FieldValue::List(vec![token]));
        }
    }

    for &field in DATE_FIELDS {
        if let Some(value) = object
            .get(field)
            .and_then(Value::as_i64)
            .and_then(FieldValue::from_timestamp)
        {
            snapshot.insert(field, value);
        }
    }
}

fn map_custom_field(field: &Value, snapshot: &mut LeadFieldSnapshot) {
    let values: Vec<&Value> = field
        .get("values")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("value"))
                .filter(|v| !v.is_null())
                .collect()
        })
        .unwrap_or_default();

    let value = match values.as_slice() {
        [] => return,
        [single] => match single {
            Value::Number(n) => match n.as_f64() {
                Some(n) => FieldValue::Number(n),
                None => return,
            },
            other => match scalar_token(other) {
                Some(token) => FieldValue::Text(token),
                None => return,
            },
        },
        many => FieldValue::List(many.iter().filter_map(|v| scalar_token(v)).collect()),
    };

    if let Some(id) = field.get("field_id").and_then(scalar_token) {
        snapshot.insert(id, value.clone());
    }
    if let Some(code) = field
        .get("field_code")
        .and_then(Value::as_str)
        .filter(|code| !code.is_empty())
    {
        snapshot.insert(code, value);
    }
}

fn scalar_token(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(
            n.as_i64()
                .map(|i| i.to_string())
                .unwrap_or_else(|| n.to_string()),
        ),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_lead() -> Value {
        json!({
            "id": 3912171,
            "name": "Сделка #3912171",
            "price": 1500,
            "responsible_user_id": 504141,
            "status_id": 143,
            "pipeline_id": 3104455,
            "created_at": 1700000000,
            "updated_at": 1700003600,
            "closed_at": null,
            "custom_fields_values": [
                {
                    "field_id": 3,
                    "field_name": "Телефон",
                    "field_code": "PHONE",
                    "field_type": "multitext",
                    "values": [{"value": "+7 900 000-00-00", "enum_code": "WORK"}]
                },
                {
                    "field_id": 17,
                    "field_name": "Теги",
                    "field_code": null,
                    "field_type": "multiselect",
                    "values": [{"value": "опт", "enum_id": 1}, {"value": "vip", "enum_id": 2}]
                },
                {
                    "field_id": 21,
                    "field_name": "Скидка",
                    "field_type": "numeric",
                    "values": [{"value": 15}]
                }
            ]
        })
    }

    #[test]
    fn test_standard_fields() {
        let snapshot = lead_snapshot(3912171, &sample_lead()).unwrap();
        assert_eq!(snapshot.lead_id, 3912171);
        assert_eq!(snapshot.get("name"), Some(&FieldValue::text("Сделка #3912171")));
        assert_eq!(snapshot.get("price"), Some(&FieldValue::Number(1500.0)));
        assert_eq!(snapshot.get("status_id"), Some(&FieldValue::list(["143"])));
        assert_eq!(snapshot.get("created_at").map(FieldValue::type_name), Some("date"));
        assert!(snapshot.get("closed_at").is_none());
    }

    #[test]
    fn test_custom_fields_keyed_by_id_and_code() {
        let snapshot = lead_snapshot(1, &sample_lead()).unwrap();
        let phone = Some(&FieldValue::text("+7 900 000-00-00"));
        assert_eq!(snapshot.get("3"), phone);
        assert_eq!(snapshot.get("PHONE"), phone);
        assert_eq!(snapshot.get("17"), Some(&FieldValue::list(["опт", "vip"])));
        assert_eq!(snapshot.get("21"), Some(&FieldValue::Number(15.0)));
    }

    #[test]
    fn test_non_object_is_decode_error() {
        let err = lead_snapshot(1, &json!([1, 2])).unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn test_lead_data_without_id() {
        let snapshot = snapshot_from_lead_data(&json!({"price": 10})).unwrap();
        assert_eq!(snapshot.lead_id, 0);
        assert_eq!(snapshot.get("price"), Some(&FieldValue::Number(10.0)));
    }
}
