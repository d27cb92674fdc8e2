//! 限流的 CRM 客户端
//!
//! - 令牌桶限流器（进程内唯一实例）
//! - 指数退避的有界重试
//! - HTTP 传输层与状态码映射
//! - 线索 JSON 到字段快照的映射、字段元数据

pub mod client;
pub mod error;
pub mod fields;
pub mod limiter;
pub mod retry;
pub mod snapshot;
pub mod transport;

pub use client::{CrmClient, FetchBatch, LeadSource};
pub use error::{FetchError, LimiterError, Result};
pub use fields::FieldDescriptor;
pub use limiter::TokenBucket;
pub use retry::{retry_with_backoff, RetryPolicy, Retryable};
pub use snapshot::{lead_snapshot, snapshot_from_lead_data};
pub use transport::{CrmTransport, HttpTransport};
