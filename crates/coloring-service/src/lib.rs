//! 线索着色服务
//!
//! 把 CRM 客户端和规则引擎串成完整的请求处理流程：
//! - 着色模式：批量抓取线索字段，按优先级为每条线索决议样式
//! - 测试模式：用一条未保存的规则评估一条线索
//! - 字段列表：标准字段与 CRM 自定义字段

pub mod applicator;
pub mod cli;
pub mod dto;
pub mod error;
pub mod handler;

pub use applicator::{ApplyOutcome, StyleApplicator};
pub use dto::{
    ApplyRequest, ApplyResponse, ColoringRequest, ColoringResponse, DraftRule, ErrorResponse,
    FieldsResponse, LeadStyle, TestRuleRequest, TestRuleResponse,
};
pub use error::{ColoringError, Result};
pub use handler::{evaluation_settings, ColoringHandler};
