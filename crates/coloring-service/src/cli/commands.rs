//! CLI 命令定义

use clap::{Parser, Subcommand};

/// 线索着色命令行工具
///
/// 请求与响应均为 JSON，响应打印到标准输出。
#[derive(Parser, Debug)]
#[command(name = "lead-coloring")]
#[command(version, about = "CRM 线索着色规则工具")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 日志级别，覆盖配置文件中的值 (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// 子命令枚举
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 为一批线索决议样式
    ///
    /// 请求格式：{"lead_ids": [...], "rules": [...], "deadline_ms": 可选}
    Apply {
        /// 请求文件路径，"-" 表示标准输入
        #[arg(short, long, default_value = "-")]
        request: String,
    },

    /// 用一条未保存的规则测试一条线索
    ///
    /// 请求格式：{"rule": {"conditions": ..., "style": 可选}, "lead_id" 或 "lead_data"}
    Test {
        /// 请求文件路径，"-" 表示标准输入
        #[arg(short, long, default_value = "-")]
        request: String,
    },

    /// 列出可用于规则的线索字段
    Fields,
}

impl Commands {
    /// 子命令期望的请求模式
    pub fn expected_mode(&self) -> Option<&'static str> {
        match self {
            Self::Apply { .. } => Some("apply"),
            Self::Test { .. } => Some("test"),
            Self::Fields => None,
        }
    }
}
