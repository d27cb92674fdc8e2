//! 规则决议器
//!
//! 按 (priority, id) 升序评估启用的规则，第一条匹配的规则胜出。

use crate::error::EvaluatorError;
use crate::evaluator::ConditionEvaluator;
use crate::models::{ConditionNode, FieldValue, LeadFieldSnapshot, LeadId, Rule, RuleId, Style};
use coloring_shared::observability::metrics;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// 命中的规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedRule {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub style: Style,
}

/// 评估某条规则时出现的异常
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleAnomaly {
    pub rule_id: RuleId,
    pub error: EvaluatorError,
}

/// 单条线索的决议结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub lead_id: LeadId,
    pub matched: Option<MatchedRule>,
    /// 决议过程中被跳过的异常规则
    pub anomalies: Vec<RuleAnomaly>,
}

impl Resolution {
    pub fn matched_rule_id(&self) -> Option<RuleId> {
        self.matched.as_ref().map(|m| m.rule_id)
    }

    pub fn style(&self) -> Option<&Style> {
        self.matched.as_ref().map(|m| &m.style)
    }
}

/// 测试模式的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleTestResult {
    pub matched: bool,
    pub errors: Vec<EvaluatorError>,
}

/// 规则决议器
#[derive(Debug, Clone)]
pub struct RuleResolver {
    evaluator: ConditionEvaluator,
}

impl RuleResolver {
    pub fn new(evaluator: ConditionEvaluator) -> Self {
        Self { evaluator }
    }

    pub fn evaluator(&self) -> &ConditionEvaluator {
        &self.evaluator
    }

    /// 过滤出启用的规则并按 (priority, id) 升序排序
    ///
    /// 批量决议时只需排序一次，结果传给 [`RuleResolver::resolve_ordered`]。
    pub fn order_rules(rules: &[Rule]) -> Vec<&Rule> {
        let mut ordered: Vec<&Rule> = rules.iter().filter(|r| r.is_active).collect();
        ordered.sort_by_key(|r| (r.priority, r.id));
        ordered
    }

    /// 为一条线索决议样式
    pub fn resolve(&self, snapshot: &LeadFieldSnapshot, rules: &[Rule]) -> Resolution {
        let ordered = Self::order_rules(rules);
        self.resolve_ordered(snapshot, &ordered)
    }

    /// 在已排序的规则上决议，调用方保证顺序与过滤
    pub fn resolve_ordered(&self, snapshot: &LeadFieldSnapshot, ordered: &[&Rule]) -> Resolution {
        let mut anomalies = Vec::new();

        for rule in ordered {
            let outcome = self.evaluator.evaluate(&rule.conditions, &snapshot.fields);

            if !outcome.is_clean() {
                // 有异常的规则按不匹配处理，继续看下一条
                for error in outcome.errors {
                    warn!(
                        lead_id = snapshot.lead_id,
                        rule_id = rule.id,
                        kind = error.kind(),
                        "规则评估异常: {}",
                        error
                    );
                    metrics::record_evaluator_anomaly(error.kind());
                    anomalies.push(RuleAnomaly {
                        rule_id: rule.id,
                        error,
                    });
                }
                continue;
            }

            if outcome.matched {
                debug!(lead_id = snapshot.lead_id, rule_id = rule.id, "规则命中");
                metrics::record_rule_resolution(true);
                return Resolution {
                    lead_id: snapshot.lead_id,
                    matched: Some(MatchedRule {
                        rule_id: rule.id,
                        rule_name: rule.name.clone(),
                        style: rule.style.clone(),
                    }),
                    anomalies,
                };
            }
        }

        debug!(lead_id = snapshot.lead_id, "没有规则命中");
        metrics::record_rule_resolution(false);
        Resolution {
            lead_id: snapshot.lead_id,
            matched: None,
            anomalies,
        }
    }

    /// 测试模式：用一棵未持久化的条件树评估一组字段，不涉及规则集合
    pub fn test_rule(
        &self,
        conditions: &ConditionNode,
        fields: &HashMap<String, FieldValue>,
    ) -> RuleTestResult {
        let outcome = self.evaluator.evaluate(conditions, fields);
        for error in &outcome.errors {
            metrics::record_evaluator_anomaly(error.kind());
        }

        RuleTestResult {
            matched: outcome.matched && outcome.errors.is_empty(),
            errors: outcome.errors,
        }
    }
}
