//! 监督者：意图识别 → 指令合成 → 分派 → 原样转发
//!
//! 处理器没有记忆，监督者持有会话历史并负责把每一轮补全成自包含指令。
//! 处理器返回的字符串一字不改地交给用户。

pub mod compose;
pub mod intent;
pub mod session;

use std::sync::Arc;

pub use compose::{compose_instruction, find_pending_draft};
pub use intent::{draft_reply, DraftReply, Intent, IntentClassifier};
pub use session::Session;

use crate::config::AppConfig;
use crate::core::RecoveryEngine;
use crate::handlers::{Handler, PurchaseHandler, RetrievalHandler};
use crate::knowledge::KnowledgeStore;
use crate::llm::LlmClient;
use crate::mail::MailTransport;
use crate::memory::ConversationState;

/// 一轮路由的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub intent: Intent,
    /// 发给处理器的指令；None 表示未分派（监督者直接回复）
    pub instruction: Option<String>,
    pub reply: String,
}

pub struct Supervisor {
    classifier: IntentClassifier,
    retrieval: Arc<dyn Handler>,
    purchase: Arc<dyn Handler>,
    recovery: RecoveryEngine,
}

impl Supervisor {
    pub fn new(
        classifier: IntentClassifier,
        retrieval: Arc<dyn Handler>,
        purchase: Arc<dyn Handler>,
    ) -> Self {
        tracing::debug!(
            retrieval = retrieval.description(),
            purchase = purchase.description(),
            "Supervisor handlers registered"
        );
        Self {
            classifier,
            retrieval,
            purchase,
            recovery: RecoveryEngine::new(),
        }
    }

    /// 按配置组装两个处理器
    pub fn from_config(
        cfg: &AppConfig,
        llm: Arc<dyn LlmClient>,
        mail: Arc<dyn MailTransport>,
        store: Arc<dyn KnowledgeStore>,
    ) -> Self {
        let mut retrieval = RetrievalHandler::new(store, cfg.knowledge.top_k);
        if cfg.retrieval.synthesize_answer {
            retrieval = retrieval.with_synthesis(llm.clone());
        }
        let purchase = PurchaseHandler::new(llm.clone(), mail, cfg.purchase.clone());
        let classifier = if cfg.supervisor.llm_fallback {
            IntentClassifier::with_llm_fallback(llm)
        } else {
            IntentClassifier::new()
        };
        Self::new(classifier, Arc::new(retrieval), Arc::new(purchase))
    }

    fn handler_for(&self, intent: Intent) -> &Arc<dyn Handler> {
        match intent {
            Intent::Retrieval => &self.retrieval,
            Intent::Purchase => &self.purchase,
        }
    }

    /// 路由一条用户消息，返回给用户的字符串
    pub async fn route(&self, history: &ConversationState, message: &str) -> String {
        self.dispatch(history, message).await.reply
    }

    /// 路由并返回完整结果（意图、指令、回复），供会话记录
    pub async fn dispatch(&self, history: &ConversationState, message: &str) -> Routed {
        let intent = self.classifier.classify(history, message).await;

        let instruction = match compose_instruction(history, message, intent) {
            Ok(instruction) => instruction,
            Err(e) => {
                tracing::info!(%intent, error = %e, "Not dispatching");
                return Routed {
                    intent,
                    instruction: None,
                    reply: self.recovery.reply_for(&e),
                };
            }
        };

        let handler = self.handler_for(intent);
        tracing::info!(%intent, handler = handler.name(), "Dispatching instruction");
        let reply = handler.handle(&instruction).await;

        Routed {
            intent,
            instruction: Some(instruction),
            reply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::purchase::NO_DRAFT_FOUND;
    use crate::memory::ConversationTurn;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 记录收到的指令并返回固定字符串的处理器
    struct Echo {
        reply: String,
        seen: Mutex<Vec<String>>,
    }

    impl Echo {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Handler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "test handler"
        }

        async fn handle(&self, instruction: &str) -> String {
            self.seen.lock().unwrap().push(instruction.to_string());
            self.reply.clone()
        }
    }

    fn supervisor(retrieval: Arc<Echo>, purchase: Arc<Echo>) -> Supervisor {
        Supervisor::new(IntentClassifier::new(), retrieval, purchase)
    }

    #[tokio::test]
    async fn test_relays_handler_output_verbatim() {
        let odd = "  {\"json\": true}\n\nraw *markdown*  ";
        let retrieval = Echo::new(odd);
        let purchase = Echo::new("unused");
        let sup = supervisor(retrieval.clone(), purchase.clone());
        let reply = sup.route(&ConversationState::new(), "What invoices are due?").await;
        assert_eq!(reply, odd);
        assert_eq!(retrieval.seen(), vec!["What invoices are due?".to_string()]);
        assert!(purchase.seen().is_empty());
    }

    #[tokio::test]
    async fn test_confirmation_without_draft_is_not_dispatched() {
        let purchase = Echo::new("should not be called");
        let sup = supervisor(Echo::new("r"), purchase.clone());
        let routed = sup.dispatch(&ConversationState::new(), "yes").await;
        assert_eq!(routed.intent, Intent::Purchase);
        assert_eq!(routed.instruction, None);
        assert_eq!(routed.reply, NO_DRAFT_FOUND);
        assert!(purchase.seen().is_empty());
    }

    #[tokio::test]
    async fn test_fused_instruction_reaches_purchase_handler() {
        let purchase = Echo::new("drafted");
        let sup = supervisor(Echo::new("r"), purchase.clone());
        let history = ConversationState::from(vec![
            ConversationTurn::user("Order bricks"),
            ConversationTurn::handler(crate::handlers::purchase::missing_fields_prompt(&[
                crate::handlers::OrderField::VendorEmail,
            ])),
        ]);
        sup.route(&history, "bob@example.com").await;
        let seen = purchase.seen();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("bricks"));
        assert!(seen[0].contains("bob@example.com"));
    }

    #[tokio::test]
    async fn test_ambiguous_message_goes_to_retrieval() {
        let retrieval = Echo::new("r");
        let sup = supervisor(retrieval.clone(), Echo::new("p"));
        assert_eq!(sup.route(&ConversationState::new(), "bricks").await, "r");
        assert_eq!(retrieval.seen(), vec!["bricks".to_string()]);
    }
}
