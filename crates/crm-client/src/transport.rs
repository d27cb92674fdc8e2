//! CRM HTTP 传输层
//!
//! 只负责单次 HTTP 调用与状态码映射，限流和重试由 [`crate::client::CrmClient`] 负责。
//! 通过 trait 抽象以便测试时替换为假实现。

use crate::error::{FetchError, Result};
use async_trait::async_trait;
use coloring_shared::config::CrmConfig;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use rule_engine::LeadId;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// 自定义字段接口单页最大条数
const CUSTOM_FIELDS_PAGE_LIMIT: u32 = 250;

/// CRM 传输层抽象
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CrmTransport: Send + Sync {
    /// GET /leads/{id}，返回原始线索 JSON
    async fn get_lead(&self, lead_id: LeadId) -> Result<Value>;

    /// GET /leads/custom_fields，返回原始响应 JSON
    async fn get_custom_fields(&self) -> Result<Value>;
}

/// 基于 reqwest 的传输实现
///
/// 信号量限制同时打开的请求数，连接池耗尽时调用方排队而不是失败。
pub struct HttpTransport {
    client: Client,
    base_url: String,
    access_token: Option<String>,
    timeout: Duration,
    connections: Arc<Semaphore>,
}

impl HttpTransport {
    pub fn new(config: &CrmConfig) -> Result<Self> {
        let timeout = config.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(config.max_connections)
            .build()
            .map_err(|e| FetchError::Transport(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            timeout,
            connections: Arc::new(Semaphore::new(config.max_connections.max(1))),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Option<Value>> {
        let _permit = self
            .connections
            .acquire()
            .await
            .map_err(|_| FetchError::Transport("连接池已关闭".to_string()))?;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .query(query);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        debug!(url = %url, "请求 CRM");
        let response = request.send().await.map_err(|e| self.map_error(e))?;
        self.handle_response(response).await
    }

    /// 状态码映射；204 表示资源存在但无内容，返回 None
    async fn handle_response(&self, response: Response) -> Result<Option<Value>> {
        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if status.is_success() {
            let body = response.json::<Value>().await.map_err(|e| self.map_error(e))?;
            return Ok(Some(body));
        }

        match status {
            StatusCode::NOT_FOUND => Err(FetchError::NotFound),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                warn!(?retry_after, "CRM 返回 429");
                Err(FetchError::Throttled { retry_after })
            }
            s if s.is_server_error() => Err(FetchError::Server { status: s.as_u16() }),
            s => Err(FetchError::Unexpected { status: s.as_u16() }),
        }
    }

    fn map_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl CrmTransport for HttpTransport {
    async fn get_lead(&self, lead_id: LeadId) -> Result<Value> {
        // CRM 对不存在的线索可能返回 204
        self.get_json(&format!("/leads/{}", lead_id), &[])
            .await?
            .ok_or(FetchError::NotFound)
    }

    async fn get_custom_fields(&self) -> Result<Value> {
        let query = [("limit", CUSTOM_FIELDS_PAGE_LIMIT.to_string())];
        Ok(self
            .get_json("/leads/custom_fields", &query)
            .await?
            .unwrap_or(Value::Null))
    }
}

/// 解析 Retry-After 头（秒数形式）
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_http_transport_normalizes_base_url() {
        let config = CrmConfig {
            base_url: "https://acme.amocrm.ru/api/v4/".to_string(),
            ..CrmConfig::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.base_url, "https://acme.amocrm.ru/api/v4");
        assert_eq!(transport.timeout, Duration::from_secs(10));
    }

    fn transport() -> HttpTransport {
        HttpTransport::new(&CrmConfig::default()).unwrap()
    }

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> Response {
        let mut builder = http::Response::builder().status(status);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        Response::from(builder.body(body.to_string()).unwrap())
    }

    #[tokio::test]
    async fn test_success_body_is_returned() {
        let body = tokio_test::assert_ok!(
            transport()
                .handle_response(response(200, &[], r#"{"id": 7, "price": 10}"#))
                .await
        );
        assert_eq!(body.unwrap()["id"], 7);
    }

    #[tokio::test]
    async fn test_no_content_maps_to_none() {
        let body = tokio_test::assert_ok!(transport().handle_response(response(204, &[], "")).await);
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn test_not_found() {
        let err = tokio_test::assert_err!(transport().handle_response(response(404, &[], "")).await);
        assert!(matches!(err, FetchError::NotFound));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_throttled_carries_retry_after() {
        let err = tokio_test::assert_err!(
            transport()
                .handle_response(response(429, &[("Retry-After", "3")], ""))
                .await
        );
        assert!(matches!(
            err,
            FetchError::Throttled { retry_after: Some(d) } if d == Duration::from_secs(3)
        ));
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));

        // 缺少或无法解析的 Retry-After 不提供等待提示
        let err = tokio_test::assert_err!(
            transport()
                .handle_response(response(429, &[("Retry-After", "soon")], ""))
                .await
        );
        assert!(matches!(err, FetchError::Throttled { retry_after: None }));
    }

    #[tokio::test]
    async fn test_server_errors() {
        for status in [500, 502, 503] {
            let err =
                tokio_test::assert_err!(transport().handle_response(response(status, &[], "")).await);
            assert!(matches!(err, FetchError::Server { status: s } if s == status));
            assert!(err.is_retryable());
        }
    }

    #[tokio::test]
    async fn test_other_statuses_are_unexpected() {
        for status in [400, 401, 403] {
            let err =
                tokio_test::assert_err!(transport().handle_response(response(status, &[], "")).await);
            assert!(matches!(err, FetchError::Unexpected { status: s } if s == status));
            assert!(!err.is_retryable());
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let err =
            tokio_test::assert_err!(transport().handle_response(response(200, &[], "{oops")).await);
        assert!(matches!(err, FetchError::Decode(_)));
    }
}
