//! 命令执行器
//!
//! 读取请求 JSON，交给处理器，返回要打印的响应。

use std::fs;
use std::io::Read as _;

use anyhow::{Context, Result, bail};
use crm_client::{CrmClient, CrmTransport};
use tracing::info;

use super::commands::Commands;
use crate::dto::{ColoringRequest, ColoringResponse};
use crate::error::ColoringError;
use crate::handler::ColoringHandler;

/// 命令执行器
pub struct CommandRunner<T: CrmTransport> {
    handler: ColoringHandler<CrmClient<T>>,
}

impl<T: CrmTransport> CommandRunner<T> {
    pub fn new(handler: ColoringHandler<CrmClient<T>>) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &ColoringHandler<CrmClient<T>> {
        &self.handler
    }

    /// 执行子命令
    ///
    /// 请求内容有误时返回错误响应；读不到请求、或请求模式与子命令不符时返回 Err。
    pub async fn run(&self, command: &Commands) -> Result<ColoringResponse> {
        let path = match command {
            Commands::Apply { request } | Commands::Test { request } => request,
            Commands::Fields => {
                info!("获取字段列表");
                return Ok(self.handler.fields().await);
            }
        };

        let text = read_request(path)?;
        let request = match parse_request(&text) {
            Ok(request) => request,
            Err(err) => return Ok(err.into()),
        };

        if let Some(expected) = command.expected_mode() {
            if request.mode() != expected {
                bail!("请求模式 {} 与子命令 {} 不符", request.mode(), expected);
            }
        }

        info!(mode = request.mode(), source = %path, "处理请求");
        Ok(self.handler.handle_request(request).await)
    }
}

/// 从文件或标准输入（"-"）读取请求文本
pub fn read_request(path: &str) -> Result<String> {
    if path == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("读取标准输入失败")?;
        Ok(text)
    } else {
        fs::read_to_string(path).with_context(|| format!("读取请求文件失败: {}", path))
    }
}

/// 解析请求文本
pub fn parse_request(text: &str) -> std::result::Result<ColoringRequest, ColoringError> {
    let value = serde_json::from_str(text)?;
    ColoringRequest::from_value(value)
}

/// 把响应以格式化 JSON 打印到标准输出
pub fn print_response(response: &ColoringResponse) -> Result<()> {
    let json = serde_json::to_string_pretty(response).context("序列化响应失败")?;
    println!("{}", json);
    Ok(())
}
