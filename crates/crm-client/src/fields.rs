//! 线索字段元数据

use rule_engine::FieldType;
use serde::Serialize;
use serde_json::Value;

/// 可在规则中引用的字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub id: String,
    pub name: String,
    pub field_type: FieldType,
}

impl FieldDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            field_type,
        }
    }
}

/// 所有线索都有的标准字段
pub fn standard_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new("name", "Название", FieldType::Text),
        FieldDescriptor::new("price", "Бюджет", FieldType::Number),
        FieldDescriptor::new("status_id", "Статус", FieldType::List),
        FieldDescriptor::new("pipeline_id", "Воронка", FieldType::List),
        FieldDescriptor::new("responsible_user_id", "Ответственный", FieldType::List),
        FieldDescriptor::new("created_at", "Дата создания", FieldType::Date),
        FieldDescriptor::new("updated_at", "Дата изменения", FieldType::Date),
        FieldDescriptor::new("closed_at", "Дата закрытия", FieldType::Date),
    ]
}

/// CRM 自定义字段类型到规则字段类型
pub fn map_crm_field_type(crm_type: &str) -> FieldType {
    match crm_type {
        "numeric" => FieldType::Number,
        "date" | "date_time" | "birthday" => FieldType::Date,
        "select" | "multiselect" | "radiobutton" | "checkbox" => FieldType::List,
        _ => FieldType::Text,
    }
}

/// 解析 GET /leads/custom_fields 的响应体
///
/// 缺少 `_embedded.custom_fields` 时视为没有自定义字段。
pub fn parse_custom_fields(body: &Value) -> Vec<FieldDescriptor> {
    body.pointer("/_embedded/custom_fields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(|field| {
                    let id = match field.get("id")? {
                        Value::Number(n) => n.to_string(),
                        Value::String(s) => s.clone(),
                        _ => return None,
                    };
                    let name = field
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let crm_type = field
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    Some(FieldDescriptor::new(id, name, map_crm_field_type(crm_type)))
                })
                .collect()
        })
        .unwrap_or_default()
}
