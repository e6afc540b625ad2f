//! 意图识别
//!
//! 二分类：检索 / 采购。先走规则（不调用 LLM），规则无法判定时可选询问 LLM，最后默认走检索。
//! 规则优先级：确认 / 取消词 → 检索线索 → 采购线索 → 上一条处理器回复在等待补充信息。

use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::handlers::purchase::awaits_user_input;
use crate::llm::LlmClient;
use crate::memory::{ConversationState, Message, TurnRole};

/// 路由目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Retrieval,
    Purchase,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Retrieval => f.write_str("retrieval"),
            Intent::Purchase => f.write_str("purchase"),
        }
    }
}

/// 针对草稿的简短答复
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftReply {
    Confirm,
    Cancel,
}

const CONFIRM_PHRASES: &[&str] = &[
    "yes",
    "yep",
    "yeah",
    "yes please",
    "yes send it",
    "yes send",
    "send",
    "send it",
    "send it now",
    "please send it",
    "confirm",
    "confirmed",
    "i confirm",
    "go ahead",
    "looks good",
    "looks good send it",
];

const CANCEL_PHRASES: &[&str] = &[
    "no",
    "nope",
    "cancel",
    "cancel it",
    "cancel the order",
    "cancel the draft",
    "don't send",
    "don't send it",
    "do not send",
    "do not send it",
    "discard",
    "discard it",
    "never mind",
    "nevermind",
];

/// 确认 / 取消词识别（忽略大小写、逗号与句末标点）
pub fn draft_reply(message: &str) -> Option<DraftReply> {
    let normalized = message
        .to_lowercase()
        .replace(['’', '‘'], "'")
        .replace([',', '!', '.'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if CONFIRM_PHRASES.contains(&normalized.as_str()) {
        Some(DraftReply::Confirm)
    } else if CANCEL_PHRASES.contains(&normalized.as_str()) {
        Some(DraftReply::Cancel)
    } else {
        None
    }
}

static RETRIEVAL_RE: OnceLock<Regex> = OnceLock::new();
static PURCHASE_RE: OnceLock<Regex> = OnceLock::new();

/// 状态 / 历史 / 发票 / 疑问句
pub fn has_retrieval_cue(message: &str) -> bool {
    let re = RETRIEVAL_RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(what|when|where|who|whom|which|how|why|show|find|list|did|does|has|have|is|are|was|were|any)\b|\b(status|history|invoices?|delay(?:s|ed)?|tracking|shipped)\b|\?\s*$",
        )
        .unwrap()
    });
    re.is_match(message)
}

/// 购买 / 下单 / 采购
pub fn has_purchase_cue(message: &str) -> bool {
    let re = PURCHASE_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(buy|order|purchase|procure|need|draft|reorder|send)\b").unwrap()
    });
    re.is_match(message)
}

/// 意图识别器
pub struct IntentClassifier {
    /// 规则无法判定时询问的 LLM；None 表示直接默认检索
    llm: Option<Arc<dyn LlmClient>>,
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self { llm: None }
    }

    pub fn with_llm_fallback(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm: Some(llm) }
    }

    /// 识别意图：规则 → LLM（可选）→ 默认检索
    pub async fn classify(&self, state: &ConversationState, message: &str) -> Intent {
        if let Some(intent) = fast_match(state, message) {
            return intent;
        }
        if let Some(llm) = &self.llm {
            match llm_classify(llm.as_ref(), message).await {
                Ok(intent) => return intent,
                Err(e) => tracing::warn!(error = %e, "LLM intent fallback failed"),
            }
        }
        tracing::debug!("Ambiguous message, defaulting to retrieval");
        Intent::Retrieval
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// 规则匹配（不调用 LLM）
pub fn fast_match(state: &ConversationState, message: &str) -> Option<Intent> {
    if draft_reply(message).is_some() {
        return Some(Intent::Purchase);
    }
    if has_retrieval_cue(message) {
        return Some(Intent::Retrieval);
    }
    if has_purchase_cue(message) {
        return Some(Intent::Purchase);
    }
    let awaiting = state
        .turns()
        .iter()
        .rev()
        .find(|t| t.role == TurnRole::Handler)
        .map(|t| awaits_user_input(&t.text))
        .unwrap_or(false);
    if awaiting {
        return Some(Intent::Purchase);
    }
    None
}

async fn llm_classify(llm: &dyn LlmClient, message: &str) -> Result<Intent, String> {
    let system_prompt = r#"You route procurement requests. Classify the user's message.

Output ONLY one word:
- retrieval: questions about order status, invoices, deliveries, history or any stored email
- purchase: buying something, placing or changing a purchase order, confirming or cancelling a draft

Output format: just the word, nothing else."#;

    let messages = vec![
        Message::system(system_prompt.to_string()),
        Message::user(format!("User message: {}", message)),
    ];
    let response = llm.complete(&messages).await?;
    match response.trim().to_lowercase().as_str() {
        "retrieval" => Ok(Intent::Retrieval),
        "purchase" => Ok(Intent::Purchase),
        other => Err(format!("unrecognised intent label: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::purchase::missing_fields_prompt;
    use crate::handlers::OrderField;
    use crate::llm::MockLlmClient;
    use crate::memory::ConversationTurn;

    #[test]
    fn test_draft_reply_tokens() {
        assert_eq!(draft_reply("Yes"), Some(DraftReply::Confirm));
        assert_eq!(draft_reply("yes, send it!"), Some(DraftReply::Confirm));
        assert_eq!(draft_reply("Confirmed."), Some(DraftReply::Confirm));
        assert_eq!(draft_reply("Don’t send it"), Some(DraftReply::Cancel));
        assert_eq!(draft_reply("cancel"), Some(DraftReply::Cancel));
        assert_eq!(draft_reply("yes I want 200 bricks"), None);
        assert_eq!(draft_reply("ok"), None);
        assert_eq!(draft_reply("Okay"), None);
        assert_eq!(draft_reply("y"), None);
    }

    #[tokio::test]
    async fn test_rules() {
        let classifier = IntentClassifier::new();
        let empty = ConversationState::new();
        for (msg, expected) in [
            ("What is the status of the brick delivery?", Intent::Retrieval),
            ("Show me the invoice history", Intent::Retrieval),
            ("Any delays from Woodworks", Intent::Retrieval),
            ("Order 100 bricks from bob@example.com", Intent::Purchase),
            ("I need 20 bags of cement", Intent::Purchase),
            ("yes", Intent::Purchase),
            ("cancel", Intent::Purchase),
        ] {
            assert_eq!(classifier.classify(&empty, msg).await, expected, "{msg}");
        }
    }

    #[tokio::test]
    async fn test_ambiguous_defaults_to_retrieval() {
        let classifier = IntentClassifier::new();
        let empty = ConversationState::new();
        assert_eq!(classifier.classify(&empty, "bob@example.com").await, Intent::Retrieval);
        assert_eq!(classifier.classify(&empty, "bricks").await, Intent::Retrieval);
    }

    #[tokio::test]
    async fn test_follow_up_to_pending_prompt_is_purchase() {
        let state = ConversationState::from(vec![
            ConversationTurn::user("Order bricks"),
            ConversationTurn::supervisor("Order bricks"),
            ConversationTurn::handler(missing_fields_prompt(&[
                OrderField::Quantity,
                OrderField::VendorEmail,
            ])),
        ]);
        let classifier = IntentClassifier::new();
        assert_eq!(classifier.classify(&state, "bob@example.com").await, Intent::Purchase);
        assert_eq!(
            classifier.classify(&state, "when did Bob last deliver?").await,
            Intent::Retrieval
        );
    }

    #[tokio::test]
    async fn test_llm_fallback_and_its_failure() {
        let llm = Arc::new(MockLlmClient::with_replies(["purchase", "no idea"]));
        let classifier = IntentClassifier::with_llm_fallback(llm.clone());
        let empty = ConversationState::new();
        assert_eq!(classifier.classify(&empty, "bricks").await, Intent::Purchase);
        assert_eq!(classifier.classify(&empty, "bricks").await, Intent::Retrieval);
        assert_eq!(llm.call_count(), 2);
    }
}
