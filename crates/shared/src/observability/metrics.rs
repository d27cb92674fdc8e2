//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 未安装 recorder 时所有记录函数都是空操作。

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::{error, info};

use crate::config::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 导出器自带 HTTP 监听，在指定端口暴露 `/metrics`。
pub fn init(service_name: &str, config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

    let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(addr).build()?;
    let _ = PROMETHEUS_HANDLE.set(recorder.handle());
    metrics::set_global_recorder(recorder)
        .map_err(|_| anyhow::anyhow!("metrics recorder 已被安装"))?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = exporter.await {
            error!("Metrics exporter error: {:?}", e);
        }
    });

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
    info!("Metrics exporter listening on {}", addr);

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 描述业务指标
///
/// 这些描述会出现在 /metrics 端点的 HELP 注释中。
pub fn describe_metrics() {
    metrics::describe_counter!("lead_fetch_total", "Total number of CRM lead fetches");
    metrics::describe_counter!(
        "lead_fetch_retries_total",
        "Total number of retried CRM requests"
    );
    metrics::describe_histogram!(
        "rate_limiter_wait_seconds",
        "Time spent waiting for rate limiter tokens"
    );
    metrics::describe_counter!("rule_resolutions_total", "Total number of rule resolutions");
    metrics::describe_counter!(
        "evaluator_anomalies_total",
        "Unexpected operator or value encountered during evaluation"
    );
    metrics::describe_histogram!(
        "style_apply_duration_seconds",
        "Duration of a style apply batch in seconds"
    );
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录单个线索的抓取结果
#[inline]
pub fn record_lead_fetch(status: &str) {
    metrics::counter!("lead_fetch_total", "status" => status.to_string()).increment(1);
}

/// 记录一次 CRM 请求重试
#[inline]
pub fn record_fetch_retry(reason: &str) {
    metrics::counter!("lead_fetch_retries_total", "reason" => reason.to_string()).increment(1);
}

/// 记录限流等待时长
#[inline]
pub fn record_limiter_wait(wait_secs: f64) {
    metrics::histogram!("rate_limiter_wait_seconds").record(wait_secs);
}

/// 记录规则决议
#[inline]
pub fn record_rule_resolution(matched: bool) {
    metrics::counter!("rule_resolutions_total", "matched" => matched.to_string()).increment(1);
}

/// 记录评估异常（未知操作符组合、非法比较值等）
#[inline]
pub fn record_evaluator_anomaly(kind: &str) {
    metrics::counter!("evaluator_anomalies_total", "kind" => kind.to_string()).increment(1);
}

/// 记录一次批量着色
#[inline]
pub fn record_style_apply(lead_count: usize, failed: usize, duration_secs: f64) {
    metrics::histogram!("style_apply_duration_seconds").record(duration_secs);
    metrics::counter!("style_apply_leads_total", "outcome" => "resolved")
        .increment(lead_count.saturating_sub(failed) as u64);
    metrics::counter!("style_apply_leads_total", "outcome" => "failed").increment(failed as u64);
}
