//! 线索着色命令行入口
//!
//! 读取 JSON 请求，抓取线索字段并决议样式，把 JSON 响应打印到标准输出。

use anyhow::Context;
use clap::Parser;
use coloring_service::ColoringHandler;
use coloring_service::cli::{Cli, CommandRunner, runner::print_response};
use coloring_shared::config::AppConfig;
use coloring_shared::observability;
use crm_client::{CrmClient, HttpTransport, RetryPolicy, TokenBucket};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

const SERVICE_NAME: &str = "lead-coloring";

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let mut obs_config = config.observability.clone();
    if let Some(level) = &cli.log_level {
        obs_config.log_level = level.clone();
    }
    let _guard = observability::init(SERVICE_NAME, &obs_config)?;

    if config.is_production() && config.crm.access_token.is_none() {
        warn!("生产环境未配置 CRM 访问令牌");
    }

    // 进程内唯一的限流器，由客户端持有
    let limiter = Arc::new(TokenBucket::from_config(&config.rate_limit)?);
    let transport = HttpTransport::new(&config.crm)?;
    let client = CrmClient::new(
        transport,
        limiter,
        RetryPolicy::from_config(&config.retry),
        config.fetch_concurrency(),
    );
    info!(
        base_url = %config.crm.base_url,
        rps = config.rate_limit.requests_per_second,
        burst = config.rate_limit.burst,
        concurrency = client.concurrency(),
        "CRM 客户端已就绪"
    );

    let handler = ColoringHandler::from_config(client, &config).context("构造请求处理器失败")?;
    let runner = CommandRunner::new(handler);

    let response = runner.run(&cli.command).await?;
    print_response(&response)?;

    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
