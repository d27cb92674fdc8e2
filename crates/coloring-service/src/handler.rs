//! 请求处理
//!
//! 负责请求级校验（规则结构、线索数量）和模式分派，
//! 把请求级错误转换为 `{success: false, error, code}` 响应。

use crate::applicator::StyleApplicator;
use crate::dto::{
    ApplyRequest, ApplyResponse, ColoringRequest, ColoringResponse, FieldsResponse, LeadStyle,
    TestRuleRequest, TestRuleResponse,
};
use crate::error::{ColoringError, Result};
use coloring_shared::config::{AppConfig, EvaluationConfig};
use crm_client::{snapshot_from_lead_data, CrmClient, CrmTransport, LeadSource};
use rule_engine::{EvaluationSettings, RuleValidator};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// 测试模式的 details 文案，与前端约定
pub const DETAILS_MATCHED: &str = "Условие выполнено";
pub const DETAILS_NOT_MATCHED: &str = "Условие не выполнено";
pub const DETAILS_LEAD_UNAVAILABLE: &str = "Не удалось получить данные сделки";

/// 由配置构造评估设置
pub fn evaluation_settings(config: &EvaluationConfig) -> Result<EvaluationSettings> {
    let offset = config
        .offset()
        .map_err(|e| ColoringError::Config(e.to_string()))?;
    let week_start = config
        .week_start_day()
        .map_err(|e| ColoringError::Config(e.to_string()))?;
    Ok(EvaluationSettings::new(
        offset,
        week_start,
        config.max_condition_depth,
    ))
}

/// 着色请求处理器
pub struct ColoringHandler<S: LeadSource> {
    applicator: StyleApplicator<S>,
    validator: RuleValidator,
    /// 单次 apply 允许的最大线索数
    max_leads: usize,
    /// 调用方未给截止时间时使用
    default_deadline: Duration,
}

impl<S: LeadSource> ColoringHandler<S> {
    pub fn new(
        applicator: StyleApplicator<S>,
        validator: RuleValidator,
        max_leads: usize,
        default_deadline: Duration,
    ) -> Self {
        Self {
            applicator,
            validator,
            max_leads,
            default_deadline,
        }
    }

    /// 按应用配置构造处理器
    pub fn from_config(source: S, config: &AppConfig) -> Result<Self> {
        let settings = evaluation_settings(&config.evaluation)?;
        Ok(Self::new(
            StyleApplicator::new(source, settings),
            RuleValidator::new(settings.max_depth),
            config.crm.max_leads_per_request,
            config.request.deadline(),
        ))
    }

    pub fn applicator(&self) -> &StyleApplicator<S> {
        &self.applicator
    }

    /// 处理一条原始 JSON 请求
    pub async fn handle(&self, value: Value) -> ColoringResponse {
        match ColoringRequest::from_value(value) {
            Ok(request) => self.handle_request(request).await,
            Err(err) => {
                warn!(error = %err, "请求解析失败");
                err.into()
            }
        }
    }

    /// 处理已解析的请求
    pub async fn handle_request(&self, request: ColoringRequest) -> ColoringResponse {
        let mode = request.mode();
        let result = match request {
            ColoringRequest::Apply(request) => self.apply(request).await.map(ColoringResponse::Apply),
            ColoringRequest::TestRule(request) => {
                self.test_rule(request).await.map(ColoringResponse::TestRule)
            }
        };

        result.unwrap_or_else(|err| {
            warn!(mode, code = err.code(), error = %err, "请求处理失败");
            err.into()
        })
    }

    /// 着色模式
    #[instrument(skip(self, request), fields(leads = request.lead_ids.len(), rules = request.rules.len()))]
    pub async fn apply(&self, request: ApplyRequest) -> Result<ApplyResponse> {
        let distinct = request.lead_ids.iter().collect::<HashSet<_>>().len();
        if distinct > self.max_leads {
            return Err(ColoringError::TooManyLeads {
                count: distinct,
                max: self.max_leads,
            });
        }

        // 停用的规则不参与决议，也不校验
        for rule in request.rules.iter().filter(|rule| rule.is_active) {
            self.validator.validate_rule(rule)?;
        }

        if request.lead_ids.is_empty() {
            return Ok(ApplyResponse {
                success: true,
                data: Default::default(),
                failed_lead_ids: Vec::new(),
            });
        }

        let deadline = Instant::now() + self.deadline(request.deadline_ms);
        let outcome = self
            .applicator
            .apply(&request.lead_ids, &request.rules, Some(deadline))
            .await;

        Ok(ApplyResponse {
            success: true,
            data: outcome
                .styles
                .into_iter()
                .map(|(lead_id, matched)| (lead_id, matched.map(LeadStyle::from)))
                .collect(),
            failed_lead_ids: outcome.failed,
        })
    }

    /// 测试模式：用一条未持久化的规则评估一条线索
    #[instrument(skip(self, request), fields(lead_id = request.lead_id))]
    pub async fn test_rule(&self, request: TestRuleRequest) -> Result<TestRuleResponse> {
        self.validator.validate_conditions(&request.rule.conditions)?;
        if let Some(style) = &request.rule.style {
            self.validator.validate_style(style)?;
        }

        let snapshot = match (&request.lead_data, request.lead_id) {
            (Some(data), _) => snapshot_from_lead_data(data)
                .map_err(|e| ColoringError::InvalidRequest(e.to_string()))?,
            (None, Some(lead_id)) => {
                let deadline = Instant::now() + self.default_deadline;
                match self.applicator.fetch_one(lead_id, Some(deadline)).await {
                    Some(snapshot) => snapshot,
                    None => {
                        warn!(lead_id, "测试线索抓取失败");
                        return Ok(TestRuleResponse {
                            success: true,
                            matches: false,
                            details: DETAILS_LEAD_UNAVAILABLE.to_string(),
                            errors: Vec::new(),
                            failed_lead_ids: vec![lead_id],
                        });
                    }
                }
            }
            (None, None) => {
                return Err(ColoringError::InvalidRequest(
                    "测试模式需要 lead_id 或 lead_data".to_string(),
                ));
            }
        };

        let result = self
            .applicator
            .resolver()
            .test_rule(&request.rule.conditions, &snapshot.fields);
        info!(
            lead_id = snapshot.lead_id,
            matched = result.matched,
            anomalies = result.errors.len(),
            "规则测试完成"
        );

        let details = if result.matched {
            DETAILS_MATCHED
        } else {
            DETAILS_NOT_MATCHED
        };
        Ok(TestRuleResponse {
            success: true,
            matches: result.matched,
            details: details.to_string(),
            errors: result.errors,
            failed_lead_ids: Vec::new(),
        })
    }

    fn deadline(&self, requested_ms: Option<u64>) -> Duration {
        requested_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_deadline)
    }
}

impl<T: CrmTransport> ColoringHandler<CrmClient<T>> {
    /// 可用于规则的字段列表
    pub async fn fields(&self) -> ColoringResponse {
        match self.applicator.source().fetch_field_metadata().await {
            Ok(fields) => ColoringResponse::Fields(FieldsResponse {
                success: true,
                fields,
            }),
            Err(err) => {
                warn!(error = %err, "获取字段列表失败");
                ColoringError::from(err).into()
            }
        }
    }
}
