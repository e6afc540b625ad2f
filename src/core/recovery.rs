//! 错误恢复引擎
//!
//! 根据 ProcureError 类型返回 RecoveryAction，处理器据此生成给用户的回复，而不是向上抛出。

use crate::core::{ProcureError, RecoveryAction};
use crate::handlers::purchase::{missing_fields_prompt, NO_DRAFT_FOUND};

/// 用户可直接照填的字段格式
pub const DETAILS_FORMAT_PROMPT: &str = "I couldn't read the order details. Please provide them in this format:\n\
Item: <product or service>\n\
Quantity: <number>\n\
Vendor name: <supplier name>\n\
Vendor email: <supplier@example.com>\n\
Price: <optional>";

/// 将错误映射为可执行动作（按格式重填 / 补字段 / 重述草稿 / 降级）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &ProcureError) -> RecoveryAction {
        match err {
            ProcureError::ExtractionParse(_) => {
                RecoveryAction::AskForFormat(DETAILS_FORMAT_PROMPT.to_string())
            }
            ProcureError::MissingField(fields) => {
                RecoveryAction::AskForFields(missing_fields_prompt(fields))
            }
            ProcureError::MissingDraftReference => {
                RecoveryAction::AskToRestate(NO_DRAFT_FOUND.to_string())
            }
            ProcureError::AdapterConnection(reason) => RecoveryAction::Degrade(format!(
                "⚠ A backing service is unavailable ({reason}). No action was taken."
            )),
            ProcureError::Llm(reason) => RecoveryAction::Degrade(format!(
                "⚠ The language service is unavailable right now ({reason}). Please try again."
            )),
        }
    }

    /// handle + into_reply 的简写
    pub fn reply_for(&self, err: &ProcureError) -> String {
        self.handle(err).into_reply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::OrderField;

    #[test]
    fn test_recovery_extraction_parse() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&ProcureError::ExtractionParse("not json".into()));
        match action {
            RecoveryAction::AskForFormat(msg) => {
                assert!(msg.contains("in this format"));
                assert!(msg.contains("Vendor email:"));
            }
            _ => panic!("Expected AskForFormat"),
        }
    }

    #[test]
    fn test_recovery_missing_fields_lists_only_absent() {
        let engine = RecoveryEngine::new();
        let err = ProcureError::MissingField(vec![OrderField::VendorEmail]);
        let reply = engine.reply_for(&err);
        assert!(reply.contains("Vendor email"));
        assert!(!reply.contains("- Item"));
        assert!(!reply.contains("- Quantity"));
    }

    #[test]
    fn test_recovery_missing_draft() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&ProcureError::MissingDraftReference);
        assert_eq!(action, RecoveryAction::AskToRestate(NO_DRAFT_FOUND.to_string()));
    }

    #[test]
    fn test_recovery_adapter_degrades() {
        let engine = RecoveryEngine::new();
        let reply = engine.reply_for(&ProcureError::AdapterConnection("store offline".into()));
        assert!(reply.contains("store offline"));
        assert!(reply.contains("No action was taken"));
    }

    #[test]
    fn test_recovery_llm_degrades() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&ProcureError::Llm("rate limited".into()));
        assert!(matches!(action, RecoveryAction::Degrade(m) if m.contains("rate limited")));
    }
}
