//! 错误分类与恢复动作
//!
//! 与 RecoveryEngine 配合：处理器边界把 ProcureError 转为给用户的字符串，不中断会话。

use thiserror::Error;

use crate::handlers::OrderField;
use crate::knowledge::StoreError;
use crate::mail::MailError;

/// 路由层与处理器中可能出现的错误
#[derive(Error, Debug)]
pub enum ProcureError {
    /// LLM 输出不是合法的结构化数据
    #[error("Extraction parse error: {0}")]
    ExtractionParse(String),

    /// 邮件进程或向量库不可达
    #[error("Adapter connection error: {0}")]
    AdapterConnection(String),

    /// 缺少必填采购字段，不允许起草
    #[error("Missing required fields: {0:?}")]
    MissingField(Vec<OrderField>),

    /// 收到确认 / 取消，但历史中找不到待发送的草稿
    #[error("No draft found in conversation history")]
    MissingDraftReference,

    #[error("LLM error: {0}")]
    Llm(String),
}

impl From<MailError> for ProcureError {
    fn from(e: MailError) -> Self {
        ProcureError::AdapterConnection(e.to_string())
    }
}

impl From<StoreError> for ProcureError {
    fn from(e: StoreError) -> Self {
        ProcureError::AdapterConnection(e.to_string())
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 请用户按固定格式补充信息
    AskForFormat(String),
    /// 列出缺失字段，等待用户补充
    AskForFields(String),
    /// 请用户重述草稿内容
    AskToRestate(String),
    /// 降级回复（未执行外部动作）
    Degrade(String),
}

impl RecoveryAction {
    /// 最终展示给用户的文本
    pub fn into_reply(self) -> String {
        match self {
            RecoveryAction::AskForFormat(s)
            | RecoveryAction::AskForFields(s)
            | RecoveryAction::AskToRestate(s)
            | RecoveryAction::Degrade(s) => s,
        }
    }
}
