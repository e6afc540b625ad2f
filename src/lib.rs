//! Procure - 采购对话路由层
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与恢复动作
//! - **supervisor**: 意图识别、上下文补全、分派与原样转发、会话
//! - **handlers**: 无记忆的检索 / 采购处理器
//! - **knowledge**: 向量知识库（SQLite / 内存）
//! - **mail**: 邮件传输（MCP 工具进程 / 记录型）
//! - **ingest**: 未读邮件入库
//! - **llm**: 文本生成与嵌入客户端（OpenAI 兼容 / Mock / 本地哈希）
//! - **memory**: 消息与会话轮次
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod handlers;
pub mod ingest;
pub mod knowledge;
pub mod llm;
pub mod mail;
pub mod memory;
pub mod observability;
pub mod supervisor;

pub use supervisor::{Session, Supervisor};
