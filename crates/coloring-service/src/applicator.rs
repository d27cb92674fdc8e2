//! 样式应用器
//!
//! 先批量抓取线索字段，再对每条抓到的线索用同一组规则决议样式。
//! 抓取失败的线索记为失败，不会被当作“未命中”。

use coloring_shared::observability::metrics;
use crm_client::LeadSource;
use rule_engine::{
    ConditionEvaluator, EvaluationSettings, LeadFieldSnapshot, LeadId, MatchedRule, Rule,
    RuleResolver,
};
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::{info, instrument};

/// 一次 apply 的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    /// 成功抓取的线索及其命中规则（未命中为 None）
    pub styles: BTreeMap<LeadId, Option<MatchedRule>>,
    /// 抓取失败或超时的线索，保持请求顺序
    pub failed: Vec<LeadId>,
}

/// 样式应用器
pub struct StyleApplicator<S: LeadSource> {
    source: S,
    settings: EvaluationSettings,
}

impl<S: LeadSource> StyleApplicator<S> {
    pub fn new(source: S, settings: EvaluationSettings) -> Self {
        Self { source, settings }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// 以当前时刻作为评估时刻的决议器，同一次调用内的线索共用
    pub fn resolver(&self) -> RuleResolver {
        RuleResolver::new(ConditionEvaluator::now(self.settings))
    }

    /// 为一批线索决议样式
    #[instrument(skip(self, lead_ids, rules), fields(leads = lead_ids.len(), rules = rules.len()))]
    pub async fn apply(
        &self,
        lead_ids: &[LeadId],
        rules: &[Rule],
        deadline: Option<Instant>,
    ) -> ApplyOutcome {
        let started = std::time::Instant::now();

        let batch = self.source.fetch_fields(lead_ids, deadline).await;

        let ordered = RuleResolver::order_rules(rules);
        let resolver = self.resolver();
        let styles: BTreeMap<LeadId, Option<MatchedRule>> = batch
            .snapshots
            .iter()
            .map(|(lead_id, snapshot)| {
                (*lead_id, resolver.resolve_ordered(snapshot, &ordered).matched)
            })
            .collect();

        let matched = styles.values().filter(|s| s.is_some()).count();
        info!(
            resolved = styles.len(),
            matched,
            failed = batch.failed.len(),
            "样式决议完成"
        );
        metrics::record_style_apply(
            lead_ids.len(),
            batch.failed.len(),
            started.elapsed().as_secs_f64(),
        );

        ApplyOutcome {
            styles,
            failed: batch.failed,
        }
    }

    /// 抓取单条线索，测试模式使用
    pub async fn fetch_one(
        &self,
        lead_id: LeadId,
        deadline: Option<Instant>,
    ) -> Option<LeadFieldSnapshot> {
        let mut batch = self.source.fetch_fields(&[lead_id], deadline).await;
        batch.snapshots.remove(&lead_id)
    }
}
