//! 短期记忆：LLM 消息与会话轮次
//!
//! Message 是发给 LLM 的单条消息；ConversationTurn 是监督者记录的会话轮次（只追加，会话结束即丢弃），
//! 处理器本身不保留任何记忆，上下文全部由 ConversationState 提供。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条 LLM 消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 会话轮次的发言方
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnRole {
    /// 用户原话
    User,
    /// 监督者发给处理器的指令，或监督者自己的回复
    Supervisor,
    /// 处理器返回（原样转给用户的内容）
    Handler,
}

/// 单个会话轮次
#[derive(Clone, Debug)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, text)
    }

    pub fn supervisor(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Supervisor, text)
    }

    pub fn handler(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Handler, text)
    }
}

/// 监督者持有的会话状态：按时间顺序、只追加
#[derive(Clone, Debug, Default)]
pub struct ConversationState {
    turns: Vec<ConversationTurn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// 开始新会话
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl From<Vec<ConversationTurn>> for ConversationState {
    fn from(turns: Vec<ConversationTurn>) -> Self {
        Self { turns }
    }
}
