//! 记忆层：LLM 消息与会话轮次（仅在单个会话内存活）

pub mod conversation;

pub use conversation::{ConversationState, ConversationTurn, Message, Role, TurnRole};
