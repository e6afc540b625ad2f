//! 邮件传输适配层
//!
//! MailTransport 暴露 send / search / get / mark_read 四个操作；McpMailTransport 每次操作启动一个
//! 短生命周期的工具进程会话（连接 → 初始化 → 调用 → 释放），RecordingMailTransport 用于测试与演示。
//! 连接或鉴权失败以 MailError 返回，由调用方决定降级方式。

pub mod mcp;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use mcp::{McpMailTransport, McpSession};
pub use mock::{RecordingMailTransport, SentMail};

/// 邮件传输错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum MailError {
    /// 无法启动进程或会话中途断开
    #[error("mail transport connection failed: {0}")]
    Connection(String),

    /// 工具进程报告鉴权 / 凭据问题
    #[error("mail transport not authenticated: {0}")]
    Auth(String),

    /// 响应不符合约定格式
    #[error("mail transport protocol error: {0}")]
    Protocol(String),

    /// 工具执行返回 isError
    #[error("mail tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error("mail transport timed out after {0}s")]
    Timeout(u64),
}

/// 一封邮件（get 的结果）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EmailMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub date: String,
}

/// 邮件传输 trait
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// 发送邮件，返回传输层回执
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<String, MailError>;

    /// 按查询语句搜索，返回邮件 id 列表
    async fn search(&self, query: &str) -> Result<Vec<String>, MailError>;

    /// 读取单封邮件
    async fn get(&self, message_id: &str) -> Result<EmailMessage, MailError>;

    /// 去掉 UNREAD 标签
    async fn mark_read(&self, message_id: &str) -> Result<(), MailError>;
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

/// 解析 search 工具的文本结果：`{"messages":[{"id":"..."}]}`；空文本或缺少 messages 视为无结果
pub fn parse_search_response(text: &str) -> Result<Vec<String>, MailError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let parsed: SearchResponse = serde_json::from_str(text)
        .map_err(|e| MailError::Protocol(format!("search response: {e}")))?;
    Ok(parsed.messages.into_iter().map(|m| m.id).collect())
}

/// 解析 get 工具的文本结果：`{"from","subject","body","date"}`；缺失字段为空，date 缺失时取当前时间
pub fn parse_message_response(message_id: &str, text: &str) -> Result<EmailMessage, MailError> {
    let mut msg: EmailMessage = serde_json::from_str(text.trim())
        .map_err(|e| MailError::Protocol(format!("message {message_id}: {e}")))?;
    if msg.id.is_empty() {
        msg.id = message_id.to_string();
    }
    if msg.date.trim().is_empty() {
        msg.date = chrono::Utc::now().to_rfc3339();
    }
    Ok(msg)
}
