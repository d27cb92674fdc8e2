//! CLI 模块
//!
//! 提供命令行接口，支持以下功能：
//!
//! - `apply` - 为一批线索决议样式
//! - `test` - 用一条未保存的规则测试一条线索
//! - `fields` - 列出可用于规则的线索字段
//!
//! # 使用示例
//!
//! ```bash
//! # 从文件读取着色请求
//! lead-coloring apply --request request.json
//!
//! # 从标准输入读取测试请求
//! cat test.json | lead-coloring test
//!
//! # 查看字段列表
//! lead-coloring fields
//! ```

pub mod commands;
pub mod runner;

pub use commands::{Cli, Commands};
pub use runner::CommandRunner;
