//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use chrono::{FixedOffset, Weekday};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// CRM 接入配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrmConfig {
    /// CRM API 根地址，如 https://{subdomain}.amocrm.ru/api/v4
    pub base_url: String,
    /// 访问令牌，为空时不携带 Authorization 头
    pub access_token: Option<String>,
    pub request_timeout_ms: u64,
    /// 连接池允许同时打开的 socket 数
    pub max_connections: usize,
    /// 同时在途的线索请求数，未配置时取限流器的 burst
    pub concurrency: Option<usize>,
    /// 单次请求允许的最大线索数（CRM 过滤接口上限 250）
    pub max_leads_per_request: usize,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://example.amocrm.ru/api/v4".to_string(),
            access_token: None,
            request_timeout_ms: 10_000,
            max_connections: 6,
            concurrency: None,
            max_leads_per_request: 250,
        }
    }
}

impl CrmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// 令牌桶限流配置
///
/// CRM 允许每秒 7 个请求，默认取 6 留出余量。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 6.0,
            burst: 6,
        }
    }
}

/// 重试配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// 条件评估配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// 相对日期操作符使用的固定时区偏移，如 "+03:00"
    pub utc_offset: String,
    /// 一周的起始日
    pub week_start: String,
    pub max_condition_depth: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            utc_offset: "+03:00".to_string(),
            week_start: "monday".to_string(),
            max_condition_depth: 16,
        }
    }
}

impl EvaluationConfig {
    /// 解析时区偏移（"+03:00"、"-05:30"、"Z"）
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        parse_utc_offset(&self.utc_offset).ok_or_else(|| {
            ConfigError::Message(format!("无效的时区偏移: {}", self.utc_offset))
        })
    }

    pub fn week_start_day(&self) -> Result<Weekday, ConfigError> {
        self.week_start
            .parse::<Weekday>()
            .map_err(|_| ConfigError::Message(format!("无效的周起始日: {}", self.week_start)))
    }
}

/// 请求级配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// 调用方未指定截止时间时 apply 的整体时限
    pub deadline_ms: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { deadline_ms: 30_000 }
    }
}

impl RequestConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 是否输出 JSON 结构化日志
    pub json_logs: bool,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub crm: CrmConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub evaluation: EvaluationConfig,
    pub request: RequestConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（COLORING 前缀，双下划线分隔层级，如
    ///    COLORING__CRM__ACCESS_TOKEN -> crm.access_token）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        // .env 仅用于本地开发，不存在时忽略
        let _ = dotenvy::dotenv();

        let env = std::env::var("COLORING_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("COLORING")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置取值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.rate_limit.requests_per_second > 0.0) {
            return Err(ConfigError::Message(format!(
                "rate_limit.requests_per_second 必须为正数，当前 {}",
                self.rate_limit.requests_per_second
            )));
        }
        if self.rate_limit.burst == 0 {
            return Err(ConfigError::Message("rate_limit.burst 不能为 0".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Message("retry.max_attempts 不能为 0".to_string()));
        }
        if self.crm.max_connections == 0 {
            return Err(ConfigError::Message("crm.max_connections 不能为 0".to_string()));
        }
        if self.crm.concurrency == Some(0) {
            return Err(ConfigError::Message("crm.concurrency 不能为 0".to_string()));
        }
        self.evaluation.offset()?;
        self.evaluation.week_start_day()?;
        Ok(())
    }

    /// 实际生效的抓取并发上限
    pub fn fetch_concurrency(&self) -> usize {
        self.crm
            .concurrency
            .unwrap_or(self.rate_limit.burst as usize)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// 解析 "+HH:MM" / "-HH:MM" / "Z" 格式的时区偏移
pub fn parse_utc_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None => (rest.parse::<i32>().ok()?, 0),
    };
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
