//! 指令合成：把当前消息与历史中的相关事实合并为一条自包含指令
//!
//! 纯函数，不调用 LLM，便于单测。处理器没有记忆，所以：
//! - 确认 / 取消：从历史中最近一份未完结的草稿取出收件人、主题、正文，原样写进指令
//! - 采购消息缺少必填字段：有待确认草稿时带上草稿内容；否则向前扫描用户轮次，
//!   为每个缺失字段取最近一次提供它的轮次，按时间顺序与当前消息拼接
//! - 检索：消息本身即查询

use std::sync::OnceLock;

use regex::Regex;

use crate::core::ProcureError;
use crate::handlers::purchase::{CANCELLED_MARKER, NOT_SENT_MARKER, SENT_MARKER};
use crate::handlers::{DraftEmail, OrderField, PurchaseInstruction};
use crate::memory::{ConversationState, TurnRole};
use crate::supervisor::intent::{draft_reply, has_retrieval_cue, DraftReply, Intent};

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
static QUANTITY_RE: OnceLock<Regex> = OnceLock::new();
static ITEM_RE: OnceLock<Regex> = OnceLock::new();

fn email_re() -> &'static Regex {
    EMAIL_RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

/// 文本中是否提到某个必填字段（词法判断）
pub fn mentions(text: &str, field: OrderField) -> bool {
    let without_email = email_re().replace_all(text, " ");
    match field {
        OrderField::VendorEmail => email_re().is_match(text),
        OrderField::Quantity => QUANTITY_RE
            .get_or_init(|| {
                Regex::new(r"(?i)\b\d+(?:[.,]\d+)?\b|\b(one|two|three|four|five|six|seven|eight|nine|ten|twelve|dozen|hundred|thousand)\b\s+\w")
                    .unwrap()
            })
            .is_match(&without_email),
        OrderField::Item => ITEM_RE
            .get_or_init(|| {
                Regex::new(
                    r"(?i)\b(?:order|buy|purchase|procure|need|get|item\s*:)\s+(?:(?:some|more|\d+(?:[.,]\d+)?|a|an)\s+)*[a-z]{3,}|\b\d+(?:[.,]\d+)?\s+(?:[a-z]+\s+of\s+)?[a-z]{3,}",
                )
                .unwrap()
            })
            .is_match(&without_email),
        _ => false,
    }
}

/// 仍待确认的草稿：只看最近一次处理器回复。
/// 它本身是草稿则返回；是发送失败回复则沿失败链继续回溯到草稿；其余回复（检索结果、已发送、已取消、缺字段提示）都表示草稿已不在上下文中
pub fn find_pending_draft(state: &ConversationState) -> Option<DraftEmail> {
    for turn in state.turns().iter().rev() {
        if turn.role != TurnRole::Handler {
            continue;
        }
        if closes_order(&turn.text) {
            return None;
        }
        if let Some(draft) = DraftEmail::parse(&turn.text) {
            return Some(draft);
        }
        if !turn.text.starts_with(NOT_SENT_MARKER) {
            return None;
        }
    }
    None
}

fn closes_order(handler_text: &str) -> bool {
    handler_text.starts_with(SENT_MARKER) || handler_text.starts_with(CANCELLED_MARKER)
}

/// 为意图合成处理器指令
pub fn compose_instruction(
    state: &ConversationState,
    message: &str,
    intent: Intent,
) -> Result<String, ProcureError> {
    let message = message.trim();
    match intent {
        Intent::Retrieval => Ok(message.to_string()),
        Intent::Purchase => match draft_reply(message) {
            Some(reply) => {
                let draft = find_pending_draft(state).ok_or(ProcureError::MissingDraftReference)?;
                let instruction = match reply {
                    DraftReply::Confirm => PurchaseInstruction::confirm(&draft),
                    DraftReply::Cancel => PurchaseInstruction::cancel(&draft),
                };
                Ok(instruction.to_string())
            }
            None => Ok(fuse_order_context(state, message)),
        },
    }
}

fn fuse_order_context(state: &ConversationState, message: &str) -> String {
    let missing: Vec<OrderField> = OrderField::REQUIRED
        .into_iter()
        .filter(|f| !mentions(message, *f))
        .collect();
    if missing.is_empty() {
        return message.to_string();
    }

    if let Some(draft) = find_pending_draft(state) {
        return format!(
            "Revise the current purchase order draft to {} with subject {} and body {}. Requested change: {}",
            draft.recipient,
            draft.subject,
            draft.body,
            strip_end(message)
        );
    }

    let turns = state.turns();
    let mut contributing: Vec<usize> = Vec::new();
    for field in missing {
        let found = turns
            .iter()
            .enumerate()
            .rev()
            .take_while(|(_, t)| !(t.role == TurnRole::Handler && closes_order(&t.text)))
            .filter(|(_, t)| t.role == TurnRole::User)
            .filter(|(_, t)| draft_reply(&t.text).is_none() && !has_retrieval_cue(&t.text))
            .find(|(_, t)| mentions(&t.text, field))
            .map(|(i, _)| i);
        if let Some(i) = found {
            if !contributing.contains(&i) {
                contributing.push(i);
            }
        }
    }
    contributing.sort_unstable();

    contributing
        .into_iter()
        .map(|i| strip_end(&turns[i].text))
        .chain(std::iter::once(strip_end(message)))
        .collect::<Vec<_>>()
        .join(". ")
}

fn strip_end(text: &str) -> &str {
    text.trim().trim_end_matches('.').trim_end()
}
