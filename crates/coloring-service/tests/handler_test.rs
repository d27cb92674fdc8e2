//! 请求处理集成测试
//!
//! 用内存中的线索来源走完整的 JSON 请求 -> JSON 响应流程。

use async_trait::async_trait;
use coloring_service::handler::DETAILS_LEAD_UNAVAILABLE;
use coloring_service::{ColoringHandler, ColoringResponse, StyleApplicator, TestRuleRequest};
use coloring_shared::config::AppConfig;
use crm_client::{FetchBatch, LeadSource, lead_snapshot};
use parking_lot::Mutex;
use rule_engine::{EvaluationSettings, LeadFieldSnapshot, LeadId, RuleValidator};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// 内存线索来源，未登记的线索视为抓取失败
struct InMemorySource {
    leads: HashMap<LeadId, LeadFieldSnapshot>,
    requested: Mutex<Vec<Vec<LeadId>>>,
}

impl InMemorySource {
    fn new(leads: Vec<Value>) -> Self {
        let leads = leads
            .into_iter()
            .map(|lead| {
                let id = lead["id"].as_i64().unwrap();
                (id, lead_snapshot(id, &lead).unwrap())
            })
            .collect();
        Self {
            leads,
            requested: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LeadSource for InMemorySource {
    async fn fetch_fields(&self, lead_ids: &[LeadId], _deadline: Option<Instant>) -> FetchBatch {
        self.requested.lock().push(lead_ids.to_vec());
        let mut batch = FetchBatch::default();
        for id in lead_ids {
            match self.leads.get(id) {
                Some(snapshot) => {
                    batch.snapshots.insert(*id, snapshot.clone());
                }
                None => batch.failed.push(*id),
            }
        }
        batch
    }
}

fn handler(leads: Vec<Value>) -> ColoringHandler<InMemorySource> {
    ColoringHandler::new(
        StyleApplicator::new(InMemorySource::new(leads), EvaluationSettings::default()),
        RuleValidator::default(),
        250,
        Duration::from_secs(30),
    )
}

fn price_leads() -> Vec<Value> {
    vec![
        json!({"id": 1, "name": "Крупная сделка", "price": 1500}),
        json!({"id": 2, "name": "Средняя сделка", "price": 600}),
        json!({"id": 3, "name": "Мелкая сделка", "price": 100}),
    ]
}

fn price_rules() -> Value {
    json!([
        {
            "id": 10,
            "name": "A",
            "priority": 1,
            "conditions": {"type": "condition", "field": "price", "field_type": "NUMBER", "operator": "greater_than", "value": 1000},
            "style": {"text_color": "#FFFFFF", "background_color": "#FF0000"}
        },
        {
            "id": 20,
            "name": "B",
            "priority": 2,
            "conditions": {"type": "condition", "field": "price", "field_type": "NUMBER", "operator": "greater_than", "value": 500},
            "style": {"text_color": "#000000", "background_color": "#FFFF00"}
        }
    ])
}

async fn respond(handler: &ColoringHandler<InMemorySource>, request: Value) -> (bool, Value) {
    let response = handler.handle(request).await;
    (response.is_success(), serde_json::to_value(&response).unwrap())
}

#[tokio::test]
async fn test_apply_price_tiers() {
    let handler = handler(price_leads());
    let (ok, json) = respond(&handler, json!({"lead_ids": [1, 2, 3], "rules": price_rules()})).await;

    assert!(ok);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["1"]["matched_rule_id"], 10);
    assert_eq!(json["data"]["1"]["background_color"], "#FF0000");
    assert_eq!(json["data"]["2"]["matched_rule_id"], 20);
    assert_eq!(json["data"]["2"]["matched_rule_name"], "B");
    assert!(json["data"]["3"].is_null());
    assert_eq!(json["failed_lead_ids"], json!([]));
}

#[tokio::test]
async fn test_apply_reports_unfetched_leads() {
    let handler = handler(vec![
        json!({"id": 1, "price": 1500}),
        json!({"id": 3, "price": 100}),
    ]);
    let (ok, json) = respond(&handler, json!({"lead_ids": [1, 2, 3], "rules": price_rules()})).await;

    assert!(ok);
    assert_eq!(json["failed_lead_ids"], json!([2]));
    assert!(json["data"].get("2").is_none());
    assert_eq!(json["data"]["1"]["matched_rule_id"], 10);
    assert!(json["data"]["3"].is_null());
}

#[tokio::test]
async fn test_apply_priority_change_affects_only_matching_leads() {
    let handler = handler(price_leads());
    let mut rules = price_rules();
    // B 提到最前：1500 和 600 都先命中 B
    rules[1]["priority"] = json!(0);

    let (_, json) = respond(&handler, json!({"lead_ids": [1, 2, 3], "rules": rules})).await;
    assert_eq!(json["data"]["1"]["matched_rule_id"], 20);
    assert_eq!(json["data"]["2"]["matched_rule_id"], 20);
    assert!(json["data"]["3"].is_null());
}

#[tokio::test]
async fn test_apply_ignores_inactive_rules() {
    let handler = handler(price_leads());
    let mut rules = price_rules();
    rules[0]["is_active"] = json!(false);
    // 停用规则即使结构非法也不影响请求
    rules[0]["name"] = json!("");

    let (ok, json) = respond(&handler, json!({"lead_ids": [1], "rules": rules})).await;
    assert!(ok);
    assert_eq!(json["data"]["1"]["matched_rule_id"], 20);
}

#[tokio::test]
async fn test_apply_with_empty_lead_ids() {
    let handler = handler(price_leads());
    let (ok, json) = respond(&handler, json!({"lead_ids": [], "rules": price_rules()})).await;

    assert!(ok);
    assert_eq!(json["data"], json!({}));
    assert!(handler.applicator().source().requested.lock().is_empty());
}

#[tokio::test]
async fn test_apply_rejects_too_many_leads() {
    let handler = handler(price_leads());
    let ids: Vec<LeadId> = (1..=251).collect();
    let (ok, json) = respond(&handler, json!({"lead_ids": ids, "rules": []})).await;

    assert!(!ok);
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert!(handler.applicator().source().requested.lock().is_empty());
}

#[tokio::test]
async fn test_apply_rejects_invalid_rule() {
    let handler = handler(price_leads());
    let rules = json!([{
        "id": 1,
        "name": "bad",
        "conditions": {"type": "condition", "field": "price", "field_type": "NUMBER", "operator": "between", "value": [100, 10]},
        "style": {"text_color": "#000", "background_color": "#FFF"}
    }]);
    let (ok, json) = respond(&handler, json!({"lead_ids": [1], "rules": rules})).await;

    assert!(!ok);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert!(handler.applicator().source().requested.lock().is_empty());
}

#[tokio::test]
async fn test_apply_rejects_unknown_operator() {
    let handler = handler(price_leads());
    let rules = json!([{
        "id": 1,
        "name": "bad",
        "conditions": {"type": "condition", "field": "price", "field_type": "NUMBER", "operator": "roughly", "value": 1},
        "style": {"text_color": "#000", "background_color": "#FFF"}
    }]);
    let (ok, json) = respond(&handler, json!({"lead_ids": [1], "rules": rules})).await;

    assert!(!ok);
    assert_eq!(json["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_rule_with_lead_data() {
    let handler = handler(vec![]);
    let request = json!({
        "rule": {
            "conditions": {
                "type": "group",
                "combinator": "AND",
                "children": [
                    {"type": "condition", "field": "name", "field_type": "TEXT", "operator": "contains", "value": "сделка", "case_insensitive": true},
                    {"type": "condition", "field": "price", "field_type": "NUMBER", "operator": "between", "value": [500, 2000]}
                ]
            },
            "style": {"text_color": "#000000", "background_color": "#00FF00"}
        },
        "lead_data": {"id": 99, "name": "Новая СДЕЛКА", "price": 700}
    });

    let (ok, json) = respond(&handler, request).await;
    assert!(ok);
    assert_eq!(json["matches"], true);
    assert_eq!(json["details"], "Условие выполнено");
    assert_eq!(json["failed_lead_ids"], json!([]));
    assert_eq!(json["errors"], json!([]));
    // lead_data 不经过线索来源
    assert!(handler.applicator().source().requested.lock().is_empty());
}

#[tokio::test]
async fn test_rule_with_lead_id() {
    let handler = handler(price_leads());
    let request = json!({
        "rule": {"conditions": {"type": "condition", "field": "price", "field_type": "NUMBER", "operator": "less_than", "value": 500}},
        "lead_id": 2
    });

    let (ok, json) = respond(&handler, request).await;
    assert!(ok);
    assert_eq!(json["matches"], false);
    assert_eq!(json["details"], "Условие не выполнено");
}

#[tokio::test]
async fn test_rule_with_unavailable_lead() {
    let handler = handler(price_leads());
    let request = json!({
        "rule": {"conditions": {"type": "condition", "field": "price", "field_type": "NUMBER", "operator": "is_empty"}},
        "lead_id": 404
    });

    // 单条线索抓取失败不是请求级错误
    let (ok, json) = respond(&handler, request.clone()).await;
    assert!(ok);
    assert_eq!(json["success"], true);
    assert_eq!(json["matches"], false);
    assert_eq!(json["failed_lead_ids"], json!([404]));
    assert!(json.get("code").is_none());

    let request: TestRuleRequest = serde_json::from_value(request).unwrap();
    let response = tokio_test::assert_ok!(handler.test_rule(request).await);
    assert_eq!(response.details, DETAILS_LEAD_UNAVAILABLE);
    assert_eq!(response.failed_lead_ids, vec![404]);
    assert!(response.errors.is_empty());
}

#[tokio::test]
async fn test_rule_without_lead() {
    let handler = handler(vec![]);
    let request = json!({
        "rule": {"conditions": {"type": "condition", "field": "price", "field_type": "NUMBER", "operator": "is_empty"}}
    });

    let (ok, json) = respond(&handler, request).await;
    assert!(!ok);
    assert_eq!(json["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_rule_rejects_empty_group() {
    let handler = handler(vec![]);
    let request = json!({
        "rule": {"conditions": {"type": "group", "combinator": "OR", "children": []}},
        "lead_data": {"id": 1}
    });

    let (ok, json) = respond(&handler, request).await;
    assert!(!ok);
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unrecognised_request() {
    let handler = handler(vec![]);
    let response = handler.handle(json!({"hello": "world"})).await;
    assert!(matches!(response, ColoringResponse::Error(_)));
}

#[tokio::test]
async fn test_handler_from_default_config() {
    let handler = tokio_test::assert_ok!(ColoringHandler::from_config(
        InMemorySource::new(price_leads()),
        &AppConfig::default()
    ));
    let (ok, json) = respond(&handler, json!({"lead_ids": [1, 3], "rules": price_rules()})).await;
    assert!(ok);
    assert_eq!(json["data"]["1"]["matched_rule_id"], 10);
    assert!(json["data"]["3"].is_null());
}
