//! 采购处理器：COLLECTING → DRAFTED → CONFIRMED → SENT，另有从 DRAFTED 进入的终态 CANCELLED
//!
//! 处理器不保留跨轮状态：每条指令自带全部信息。
//! - 普通请求：抽取字段 → 缺字段则列出缺失项（停在 COLLECTING）→ 齐全则渲染草稿（DRAFTED）
//! - 确认指令：必须携带收件人 / 主题 / 正文，才会调用邮件传输发送
//! - 取消指令：DRAFTED → CANCELLED，不发送

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PurchaseSection;
use crate::core::recovery::DETAILS_FORMAT_PROMPT;
use crate::core::{ProcureError, RecoveryEngine};
use crate::handlers::extraction::{extraction_messages, parse_extraction};
use crate::handlers::template::{DraftEmail, PurchaseDraft, DRAFT_BEGIN};
use crate::handlers::{Handler, OrderField};
use crate::llm::LlmClient;
use crate::mail::{MailError, MailTransport};

pub const MISSING_FIELDS_HEADER: &str =
    "I need a few more details before I can draft the purchase order:";
pub const NO_DRAFT_FOUND: &str = "I couldn't find a draft to act on in this conversation. \
Please restate the order (item, quantity and vendor email) and I'll prepare a new draft.";
pub const SENT_MARKER: &str = "✓ Email sent successfully";
pub const CANCELLED_MARKER: &str = "Purchase order cancelled";
pub const NOT_SENT_MARKER: &str = "⚠ Email NOT sent";

const CONFIRM_PREFIX: &str = "User confirmed. Send the email to ";
const CANCEL_PREFIX: &str = "User cancelled the draft to ";
const SUBJECT_SEP: &str = " with subject ";
const BODY_SEP: &str = " and body ";

/// 列出缺失字段（只列缺的，按必填顺序）
pub fn missing_fields_prompt(fields: &[OrderField]) -> String {
    let mut out = String::from(MISSING_FIELDS_HEADER);
    for field in fields {
        out.push_str("\n- ");
        out.push_str(field.label());
    }
    out
}

/// 处理器的回复是否在等待用户补充（缺字段提示 / 格式提示 / 草稿 / 未发送）
pub fn awaits_user_input(reply: &str) -> bool {
    reply.starts_with(MISSING_FIELDS_HEADER)
        || reply.starts_with(DETAILS_FORMAT_PROMPT)
        || reply.starts_with(NOT_SENT_MARKER)
        || reply.contains(DRAFT_BEGIN)
}

/// 采购单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PurchaseState {
    Collecting,
    Drafted,
    Confirmed,
    Sent,
    Cancelled,
}

impl PurchaseState {
    pub fn can_transition_to(self, next: PurchaseState) -> bool {
        use PurchaseState::*;
        matches!(
            (self, next),
            (Collecting, Collecting)
                | (Collecting, Drafted)
                | (Drafted, Drafted)
                | (Drafted, Collecting)
                | (Drafted, Confirmed)
                | (Drafted, Cancelled)
                | (Confirmed, Sent)
                | (Confirmed, Drafted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PurchaseState::Sent | PurchaseState::Cancelled)
    }
}

impl fmt::Display for PurchaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PurchaseState::Collecting => "COLLECTING",
            PurchaseState::Drafted => "DRAFTED",
            PurchaseState::Confirmed => "CONFIRMED",
            PurchaseState::Sent => "SENT",
            PurchaseState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// 单次调用内的状态轨迹；非法迁移被拒绝并记录告警
#[derive(Debug, Clone)]
struct PurchaseWorkflow {
    state: PurchaseState,
    trace: Vec<PurchaseState>,
}

impl PurchaseWorkflow {
    fn start(state: PurchaseState) -> Self {
        Self {
            state,
            trace: vec![state],
        }
    }

    fn advance(&mut self, next: PurchaseState) {
        if self.state.can_transition_to(next) {
            self.state = next;
            self.trace.push(next);
        } else {
            tracing::warn!(from = %self.state, to = %next, "Rejected purchase state transition");
        }
    }
}

/// 采购处理器能理解的三类指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseInstruction {
    Confirm {
        recipient: String,
        subject: String,
        body: String,
    },
    Cancel {
        recipient: String,
        subject: String,
    },
    Request(String),
}

impl PurchaseInstruction {
    pub fn confirm(email: &DraftEmail) -> Self {
        PurchaseInstruction::Confirm {
            recipient: email.recipient.clone(),
            subject: email.subject.clone(),
            body: email.body.clone(),
        }
    }

    pub fn cancel(email: &DraftEmail) -> Self {
        PurchaseInstruction::Cancel {
            recipient: email.recipient.clone(),
            subject: email.subject.clone(),
        }
    }

    /// 解析指令文本；以确认 / 取消前缀开头却缺少收件人、主题或正文时返回 MissingDraftReference
    pub fn parse(text: &str) -> Result<Self, ProcureError> {
        let trimmed = text.trim();

        if let Some(rest) = trimmed.strip_prefix(CONFIRM_PREFIX) {
            let (recipient, rest) = rest
                .split_once(SUBJECT_SEP)
                .ok_or(ProcureError::MissingDraftReference)?;
            let (subject, body) = rest
                .split_once(BODY_SEP)
                .ok_or(ProcureError::MissingDraftReference)?;
            let body = body.strip_suffix('.').unwrap_or(body);
            if recipient.trim().is_empty() || body.trim().is_empty() {
                return Err(ProcureError::MissingDraftReference);
            }
            return Ok(PurchaseInstruction::Confirm {
                recipient: recipient.trim().to_string(),
                subject: subject.trim().to_string(),
                body: body.to_string(),
            });
        }

        if let Some(rest) = trimmed.strip_prefix(CANCEL_PREFIX) {
            let rest = rest.strip_suffix('.').unwrap_or(rest);
            let (recipient, subject) = rest
                .split_once(SUBJECT_SEP)
                .ok_or(ProcureError::MissingDraftReference)?;
            return Ok(PurchaseInstruction::Cancel {
                recipient: recipient.trim().to_string(),
                subject: subject.trim().to_string(),
            });
        }

        if is_bare_reference(trimmed) {
            return Err(ProcureError::MissingDraftReference);
        }
        Ok(PurchaseInstruction::Request(trimmed.to_string()))
    }
}

impl fmt::Display for PurchaseInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurchaseInstruction::Confirm {
                recipient,
                subject,
                body,
            } => write!(f, "{CONFIRM_PREFIX}{recipient}{SUBJECT_SEP}{subject}{BODY_SEP}{body}."),
            PurchaseInstruction::Cancel { recipient, subject } => {
                write!(f, "{CANCEL_PREFIX}{recipient}{SUBJECT_SEP}{subject}.")
            }
            PurchaseInstruction::Request(text) => f.write_str(text),
        }
    }
}

/// 没有附带内容的确认 / 取消（"yes"、"User confirmed" 之类）
fn is_bare_reference(text: &str) -> bool {
    let lowered = text
        .trim_end_matches(|c: char| c == '.' || c == '!')
        .trim()
        .to_lowercase();
    matches!(
        lowered.as_str(),
        "yes" | "y" | "ok" | "send" | "send it" | "confirm" | "confirmed" | "user confirmed"
            | "cancel" | "user cancelled" | "no" | "don't send"
    )
}

/// 一次处理的结果：最终状态、回复、状态轨迹
#[derive(Debug, Clone)]
pub struct PurchaseOutcome {
    pub state: PurchaseState,
    pub reply: String,
    pub trace: Vec<PurchaseState>,
}

impl PurchaseOutcome {
    fn finish(workflow: PurchaseWorkflow, reply: String) -> Self {
        Self {
            state: workflow.state,
            reply,
            trace: workflow.trace,
        }
    }
}

/// 采购处理器
pub struct PurchaseHandler {
    llm: Arc<dyn LlmClient>,
    mail: Arc<dyn MailTransport>,
    cfg: PurchaseSection,
    recovery: RecoveryEngine,
}

impl PurchaseHandler {
    pub fn new(llm: Arc<dyn LlmClient>, mail: Arc<dyn MailTransport>, cfg: PurchaseSection) -> Self {
        Self {
            llm,
            mail,
            cfg,
            recovery: RecoveryEngine::new(),
        }
    }

    /// 处理一条完整指令
    pub async fn process(&self, instruction: &str) -> PurchaseOutcome {
        match PurchaseInstruction::parse(instruction) {
            Ok(PurchaseInstruction::Confirm {
                recipient,
                subject,
                body,
            }) => self.send(&recipient, &subject, &body).await,
            Ok(PurchaseInstruction::Cancel { recipient, subject }) => {
                let mut wf = PurchaseWorkflow::start(PurchaseState::Drafted);
                wf.advance(PurchaseState::Cancelled);
                tracing::info!(to = %recipient, "Purchase draft cancelled");
                PurchaseOutcome::finish(
                    wf,
                    format!(
                        "{CANCELLED_MARKER}. The draft to {recipient} (subject: {subject}) was discarded and nothing was sent."
                    ),
                )
            }
            Ok(PurchaseInstruction::Request(text)) => self.draft(&text).await,
            Err(e) => {
                tracing::warn!(error = %e, "Purchase instruction without draft content");
                PurchaseOutcome::finish(
                    PurchaseWorkflow::start(PurchaseState::Collecting),
                    self.recovery.reply_for(&e),
                )
            }
        }
    }

    async fn draft(&self, text: &str) -> PurchaseOutcome {
        let mut wf = PurchaseWorkflow::start(PurchaseState::Collecting);

        let result = async {
            let output = self
                .llm
                .complete(&extraction_messages(text))
                .await
                .map_err(ProcureError::Llm)?;
            let order = parse_extraction(&output)?;
            PurchaseDraft::from_order(order, &self.cfg)
        }
        .await;

        match result {
            Ok(draft) => {
                wf.advance(PurchaseState::Drafted);
                tracing::info!(to = %draft.vendor_email, item = %draft.item, "Purchase order drafted");
                let email = draft.to_email(&self.cfg);
                PurchaseOutcome::finish(wf, email.render())
            }
            Err(e) => {
                tracing::info!(error = %e, "Purchase order not drafted");
                wf.advance(PurchaseState::Collecting);
                PurchaseOutcome::finish(wf, self.recovery.reply_for(&e))
            }
        }
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> PurchaseOutcome {
        let mut wf = PurchaseWorkflow::start(PurchaseState::Drafted);
        wf.advance(PurchaseState::Confirmed);

        match self.mail.send(recipient, subject, body).await {
            Ok(receipt) => {
                wf.advance(PurchaseState::Sent);
                tracing::info!(to = %recipient, "Purchase order sent");
                PurchaseOutcome::finish(
                    wf,
                    format!(
                        "{SENT_MARKER} to {recipient}.\nSubject: {subject}\nTransport result: {receipt}"
                    ),
                )
            }
            Err(e) => {
                wf.advance(PurchaseState::Drafted);
                tracing::warn!(to = %recipient, error = %e, "Purchase order not sent, degraded reply");
                PurchaseOutcome::finish(
                    wf,
                    format!(
                        "{NOT_SENT_MARKER} to {recipient}: {}.\nThe draft (subject: {subject}) is unchanged; reply \"yes\" to try again once the mail service is available.",
                        send_failure_reason(&e)
                    ),
                )
            }
        }
    }
}

fn send_failure_reason(e: &MailError) -> String {
    match e {
        MailError::Auth(detail) => format!(
            "the mail service is not authenticated ({detail}); check the mail credentials configuration"
        ),
        MailError::Connection(detail) => format!(
            "the mail service could not be reached ({detail}); check the [mail] command configuration"
        ),
        MailError::Timeout(secs) => format!("the mail service did not answer within {secs}s"),
        other => other.to_string(),
    }
}

#[async_trait]
impl Handler for PurchaseHandler {
    fn name(&self) -> &str {
        "purchase"
    }

    fn description(&self) -> &str {
        "Drafts purchase order emails, sends them after explicit confirmation, or cancels them"
    }

    async fn handle(&self, instruction: &str) -> String {
        self.process(instruction).await.reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::mail::RecordingMailTransport;

    const FULL_ORDER: &str = r#"{"item":"red bricks","quantity":"5000","vendor_name":"Bob","vendor_email":"bob@brickco.com","price":null,"needs_info":false}"#;

    fn handler(
        replies: Vec<&str>,
        mail: Arc<RecordingMailTransport>,
    ) -> (PurchaseHandler, Arc<MockLlmClient>) {
        let llm = Arc::new(MockLlmClient::with_replies(replies));
        let h = PurchaseHandler::new(llm.clone(), mail, PurchaseSection::default());
        (h, llm)
    }

    #[tokio::test]
    async fn test_missing_fields_listed_and_nothing_sent() {
        let mail = Arc::new(RecordingMailTransport::new());
        let (h, _) = handler(
            vec![r#"{"item":"bricks","quantity":null,"vendor_email":null,"needs_info":true}"#],
            mail.clone(),
        );
        let out = h.process("Order bricks").await;
        assert_eq!(out.state, PurchaseState::Collecting);
        assert_eq!(
            out.reply,
            missing_fields_prompt(&[OrderField::Quantity, OrderField::VendorEmail])
        );
        assert!(!out.reply.contains("- Item"));
        assert!(mail.sent().is_empty());
    }

    #[tokio::test]
    async fn test_complete_order_is_drafted_not_sent() {
        let mail = Arc::new(RecordingMailTransport::new());
        let (h, _) = handler(vec![FULL_ORDER], mail.clone());
        let out = h.process("Order 5000 red bricks from Bob, bob@brickco.com").await;
        assert_eq!(out.state, PurchaseState::Drafted);
        assert_eq!(out.trace, vec![PurchaseState::Collecting, PurchaseState::Drafted]);
        let draft = DraftEmail::parse(&out.reply).unwrap();
        assert_eq!(draft.recipient, "bob@brickco.com");
        assert_eq!(draft.subject, "Purchase Order Request");
        assert!(draft.body.contains("- Price: Please provide a quote"));
        assert!(mail.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_extraction_asks_for_format() {
        let mail = Arc::new(RecordingMailTransport::new());
        let (h, _) = handler(vec!["Sure! I'll get right on that."], mail.clone());
        let out = h.process("buy some stuff").await;
        assert_eq!(out.state, PurchaseState::Collecting);
        assert_eq!(out.reply, DETAILS_FORMAT_PROMPT);
    }

    #[tokio::test]
    async fn test_confirm_sends_exact_values() {
        let mail = Arc::new(RecordingMailTransport::new());
        let (h, llm) = handler(vec![], mail.clone());
        let email = DraftEmail {
            recipient: "x@vendor.com".into(),
            subject: "Purchase Order Request".into(),
            body: "Dear X,\n- Quantity: 10\nEnds with a period.".into(),
        };
        let instruction = PurchaseInstruction::confirm(&email).to_string();
        let out = h.process(&instruction).await;

        assert_eq!(out.state, PurchaseState::Sent);
        assert_eq!(
            out.trace,
            vec![PurchaseState::Drafted, PurchaseState::Confirmed, PurchaseState::Sent]
        );
        assert!(out.reply.starts_with(SENT_MARKER));
        assert!(out.reply.contains("recorded message #1"));
        let sent = mail.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, email.recipient);
        assert_eq!(sent[0].subject, email.subject);
        assert_eq!(sent[0].body, email.body);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_degrades_and_keeps_draft() {
        let mail = Arc::new(RecordingMailTransport::failing(MailError::Auth(
            "missing OAuth token".into(),
        )));
        let (h, _) = handler(vec![], mail.clone());
        let instruction = PurchaseInstruction::Confirm {
            recipient: "x@vendor.com".into(),
            subject: "Purchase Order Request".into(),
            body: "body".into(),
        }
        .to_string();
        let out = h.process(&instruction).await;
        assert_eq!(out.state, PurchaseState::Drafted);
        assert!(out.reply.starts_with(NOT_SENT_MARKER));
        assert!(out.reply.contains("not authenticated"));
        assert!(awaits_user_input(&out.reply));
    }

    #[tokio::test]
    async fn test_bare_confirmation_is_rejected() {
        let mail = Arc::new(RecordingMailTransport::new());
        let (h, llm) = handler(vec![], mail.clone());
        for bare in ["yes", "User confirmed.", "User confirmed. Send the email to bob@x.com"] {
            let out = h.process(bare).await;
            assert_eq!(out.reply, NO_DRAFT_FOUND);
        }
        assert!(mail.sent().is_empty());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_reaches_terminal_state() {
        let mail = Arc::new(RecordingMailTransport::new());
        let (h, _) = handler(vec![], mail.clone());
        let out = h
            .process("User cancelled the draft to bob@brickco.com with subject Purchase Order Request.")
            .await;
        assert_eq!(out.state, PurchaseState::Cancelled);
        assert!(out.reply.starts_with(CANCELLED_MARKER));
        assert!(mail.sent().is_empty());
    }

    #[test]
    fn test_transitions() {
        use PurchaseState::*;
        assert!(Collecting.can_transition_to(Drafted));
        assert!(Drafted.can_transition_to(Cancelled));
        assert!(!Collecting.can_transition_to(Sent));
        assert!(!Sent.can_transition_to(Drafted));
        assert!(!Cancelled.can_transition_to(Drafted));
        assert!(Sent.is_terminal());
    }

    #[test]
    fn test_instruction_display_parse() {
        let confirm = PurchaseInstruction::Confirm {
            recipient: "a@b.com".into(),
            subject: "Purchase Order Request".into(),
            body: "Line one\nLine two.".into(),
        };
        assert_eq!(PurchaseInstruction::parse(&confirm.to_string()).unwrap(), confirm);
        assert_eq!(
            PurchaseInstruction::parse("Order 10 bags of cement").unwrap(),
            PurchaseInstruction::Request("Order 10 bags of cement".into())
        );
    }
}
