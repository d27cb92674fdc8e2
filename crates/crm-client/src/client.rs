//! 限流的 CRM 客户端
//!
//! 每次 HTTP 调用前先从令牌桶取令牌，瞬时失败按重试策略退避重试。
//! 批量抓取有并发上限，单条线索失败不影响整批，调用方拿到部分结果
//! 和失败的线索 id 列表。

use crate::error::{FetchError, Result};
use crate::fields::{parse_custom_fields, standard_fields, FieldDescriptor};
use crate::limiter::TokenBucket;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::snapshot::lead_snapshot;
use crate::transport::CrmTransport;
use async_trait::async_trait;
use coloring_shared::observability::metrics;
use futures::StreamExt;
use rule_engine::{LeadFieldSnapshot, LeadId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// 一次批量抓取的结果
#[derive(Debug, Default)]
pub struct FetchBatch {
    pub snapshots: HashMap<LeadId, LeadFieldSnapshot>,
    /// 抓取失败或截止时间前未完成的线索，保持请求顺序
    pub failed: Vec<LeadId>,
}

impl FetchBatch {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 线索字段来源
///
/// 着色流程只依赖这个接口，测试时可替换为内存实现。
#[async_trait]
pub trait LeadSource: Send + Sync {
    /// 批量抓取线索字段，deadline 到期时放弃未完成的请求
    async fn fetch_fields(&self, lead_ids: &[LeadId], deadline: Option<Instant>) -> FetchBatch;
}

/// 限流的 CRM 客户端
pub struct CrmClient<T: CrmTransport> {
    transport: T,
    limiter: Arc<TokenBucket>,
    retry: RetryPolicy,
    /// 同时在途的线索请求数
    concurrency: usize,
}

impl<T: CrmTransport> CrmClient<T> {
    pub fn new(transport: T, limiter: Arc<TokenBucket>, retry: RetryPolicy, concurrency: usize) -> Self {
        Self {
            transport,
            limiter,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn limiter(&self) -> &Arc<TokenBucket> {
        &self.limiter
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 抓取单条线索（限流 + 重试）
    #[instrument(skip(self))]
    pub async fn fetch_lead(&self, lead_id: LeadId) -> Result<LeadFieldSnapshot> {
        let result = retry_with_backoff(&self.retry, "get_lead", || async move {
            if let Err(e) = self.limiter.acquire().await {
                return Err(FetchError::from(e));
            }
            self.transport.get_lead(lead_id).await
        })
        .await
        .and_then(|body| lead_snapshot(lead_id, &body));

        match &result {
            Ok(snapshot) => {
                debug!(lead_id, fields = snapshot.fields.len(), "线索抓取成功");
                metrics::record_lead_fetch("success");
            }
            Err(err) => {
                warn!(lead_id, error = %err, "线索抓取失败");
                metrics::record_lead_fetch(err.status_label());
            }
        }
        result
    }

    /// 批量抓取线索字段
    ///
    /// 重复的 id 只抓一次。deadline 到期时丢弃在途请求，
    /// 已完成的结果照常返回，其余记为失败。
    #[instrument(skip(self, lead_ids), fields(count = lead_ids.len()))]
    pub async fn fetch_fields(&self, lead_ids: &[LeadId], deadline: Option<Instant>) -> FetchBatch {
        let mut seen = HashSet::new();
        let ids: Vec<LeadId> = lead_ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let stream = futures::stream::iter(ids.iter().copied())
            .map(|lead_id| async move { (lead_id, self.fetch_lead(lead_id).await) })
            .buffer_unordered(self.concurrency);
        tokio::pin!(stream);

        let mut snapshots = HashMap::with_capacity(ids.len());
        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            completed = snapshots.len(),
                            total = ids.len(),
                            "批量抓取超过截止时间，放弃未完成的请求"
                        );
                        break;
                    }
                },
                None => stream.next().await,
            };

            match next {
                Some((lead_id, Ok(snapshot))) => {
                    snapshots.insert(lead_id, snapshot);
                }
                Some((_, Err(_))) => {}
                None => break,
            }
        }

        let failed: Vec<LeadId> = ids
            .iter()
            .copied()
            .filter(|id| !snapshots.contains_key(id))
            .collect();
        info!(succeeded = snapshots.len(), failed = failed.len(), "批量抓取完成");

        FetchBatch { snapshots, failed }
    }

    /// 获取可用于规则的字段（标准字段 + CRM 自定义字段）
    #[instrument(skip(self))]
    pub async fn fetch_field_metadata(&self) -> Result<Vec<FieldDescriptor>> {
        let body = retry_with_backoff(&self.retry, "get_custom_fields", || async move {
            if let Err(e) = self.limiter.acquire().await {
                return Err(FetchError::from(e));
            }
            self.transport.get_custom_fields().await
        })
        .await?;

        let mut fields = standard_fields();
        let custom = parse_custom_fields(&body);
        info!(custom = custom.len(), "获取到自定义字段");
        fields.extend(custom);
        Ok(fields)
    }
}

#[async_trait]
impl<T: CrmTransport> LeadSource for CrmClient<T> {
    async fn fetch_fields(&self, lead_ids: &[LeadId], deadline: Option<Instant>) -> FetchBatch {
        CrmClient::fetch_fields(self, lead_ids, deadline).await
    }
}
