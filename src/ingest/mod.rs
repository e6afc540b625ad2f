//! 邮件入库：未读邮件 → LLM 分类 → 写入知识库 → 标记已读
//!
//! run_once 执行一轮；run_loop 按间隔循环，单轮失败只记录日志，不终止循环。
//! 邮箱搜索失败且允许演示数据时，写入三封固定 id 的采购邮件（重复执行为 upsert）。

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::IngestSection;
use crate::core::ProcureError;
use crate::knowledge::{KnowledgeStore, Metadata};
use crate::llm::LlmClient;
use crate::mail::{EmailMessage, MailTransport};
use crate::memory::Message;

/// 允许的邮件类别
pub const EMAIL_TYPES: [&str; 6] = [
    "Invoice",
    "Quote",
    "Delay",
    "Update",
    "Order Confirmation",
    "General",
];

/// 邮件分类结果
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmailClassification {
    #[serde(rename = "type")]
    pub kind: String,
    pub summary: String,
}

impl EmailClassification {
    pub fn fallback(sender: &str) -> Self {
        Self {
            kind: "General".to_string(),
            summary: format!("Email from {sender}"),
        }
    }
}

/// 一轮入库的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// 搜索到的未读邮件数
    pub found: usize,
    pub ingested: usize,
    pub skipped: usize,
    /// 是否写入了演示数据
    pub seeded: bool,
}

pub struct Ingestor {
    transport: Arc<dyn MailTransport>,
    store: Arc<dyn KnowledgeStore>,
    llm: Arc<dyn LlmClient>,
    cfg: IngestSection,
}

impl Ingestor {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        store: Arc<dyn KnowledgeStore>,
        llm: Arc<dyn LlmClient>,
        cfg: IngestSection,
    ) -> Self {
        Self {
            transport,
            store,
            llm,
            cfg,
        }
    }

    /// 执行一轮入库
    pub async fn run_once(&self) -> Result<IngestReport, ProcureError> {
        tracing::info!(query = %self.cfg.unread_query, "Fetching unread emails");

        let ids = match self.transport.search(&self.cfg.unread_query).await {
            Ok(ids) => ids,
            Err(e) if self.cfg.seed_mock_on_failure => {
                tracing::warn!(error = %e, "Mailbox unavailable, seeding demo emails");
                let count = self.seed_mock().await?;
                return Ok(IngestReport {
                    ingested: count,
                    seeded: true,
                    ..Default::default()
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut report = IngestReport {
            found: ids.len(),
            ..Default::default()
        };
        if ids.is_empty() {
            tracing::info!("No new unread emails");
            return Ok(report);
        }
        if ids.len() > self.cfg.max_per_run {
            tracing::info!(
                found = ids.len(),
                max = self.cfg.max_per_run,
                "Limiting emails processed this run"
            );
        }

        let mut documents = Vec::new();
        let mut metadatas = Vec::new();
        let mut doc_ids = Vec::new();
        let mut processed = Vec::new();

        for id in ids.iter().take(self.cfg.max_per_run) {
            let email = match self.transport.get(id).await {
                Ok(email) => email,
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Failed to fetch email, skipping");
                    report.skipped += 1;
                    continue;
                }
            };
            let class = self.classify(&email).await;
            tracing::info!(id = %id, sender = %email.from, kind = %class.kind, "Processed email");

            documents.push(format!("Subject: {}\n\n{}", email.subject, email.body));
            metadatas.push(email_metadata(&email, &class));
            doc_ids.push(document_id(&email.id));
            processed.push(id.clone());
        }

        if documents.is_empty() {
            tracing::warn!("No emails were processed successfully");
            return Ok(report);
        }

        self.store.add(documents, metadatas, doc_ids).await?;
        report.ingested = processed.len();

        for id in &processed {
            if let Err(e) = self.transport.mark_read(id).await {
                tracing::warn!(id = %id, error = %e, "Failed to mark email as read");
            }
        }

        tracing::info!(ingested = report.ingested, skipped = report.skipped, "Ingestion cycle done");
        Ok(report)
    }

    /// 按间隔循环执行，直到 cancel 被触发
    pub async fn run_loop(&self, interval: Duration, cancel: CancellationToken) {
        tracing::info!(interval_secs = interval.as_secs(), "Starting ingestion loop");
        loop {
            match self.run_once().await {
                Ok(report) => tracing::info!(?report, "Ingestion cycle finished"),
                Err(e) => tracing::error!(error = %e, "Error during ingestion"),
            }

            tracing::info!(secs = interval.as_secs(), "Sleeping until next cycle");
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Ingestion loop stopped");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// LLM 分类；失败或类别不在允许列表内时退回 General
    async fn classify(&self, email: &EmailMessage) -> EmailClassification {
        let prompt = format!(
            "Analyze this procurement-related email and extract:\n\
             1. Type: One of [{}]\n\
             2. Summary: A one-sentence summary of the key information\n\n\
             Email from: {}\nContent: {}\n\n\
             Respond in JSON format:\n{{\"type\": \"...\", \"summary\": \"...\"}}",
            EMAIL_TYPES.join(", "),
            email.from,
            email.body
        );
        match self.llm.complete(&[Message::user(prompt)]).await {
            Ok(output) => parse_classification(&output).unwrap_or_else(|| {
                tracing::warn!(sender = %email.from, "Unparseable classification, using General");
                EmailClassification::fallback(&email.from)
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Classification failed, using General");
                EmailClassification::fallback(&email.from)
            }
        }
    }

    async fn seed_mock(&self) -> Result<usize, ProcureError> {
        let seeds = mock_emails();
        let count = seeds.len();
        let mut documents = Vec::with_capacity(count);
        let mut metadatas = Vec::with_capacity(count);
        let mut ids = Vec::with_capacity(count);
        for (id, body, meta) in seeds {
            ids.push(id.to_string());
            documents.push(body.to_string());
            metadatas.push(meta);
        }
        self.store.add(documents, metadatas, ids).await?;
        tracing::info!(count, "Ingested demo documents");
        Ok(count)
    }
}

/// 文档 id 取自邮箱 id：标记已读失败后重新摄取只会覆盖原文档
fn document_id(message_id: &str) -> String {
    format!("email-{message_id}")
}

fn email_metadata(email: &EmailMessage, class: &EmailClassification) -> Metadata {
    Metadata::from([
        ("sender".to_string(), email.from.clone()),
        ("date".to_string(), email.date.clone()),
        ("type".to_string(), class.kind.clone()),
        ("summary".to_string(), class.summary.clone()),
    ])
}

/// 解析 {"type","summary"}；类别不在允许列表内视为失败
pub fn parse_classification(output: &str) -> Option<EmailClassification> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end < start {
        return None;
    }
    let class: EmailClassification = serde_json::from_str(&output[start..=end]).ok()?;
    let kind = EMAIL_TYPES
        .iter()
        .find(|t| t.eq_ignore_ascii_case(class.kind.trim()))?;
    Some(EmailClassification {
        kind: kind.to_string(),
        summary: class.summary.trim().to_string(),
    })
}

fn mock_emails() -> Vec<(&'static str, &'static str, Metadata)> {
    let meta = |sender: &str, date: &str, kind: &str, summary: &str| {
        Metadata::from([
            ("sender".to_string(), sender.to_string()),
            ("date".to_string(), date.to_string()),
            ("type".to_string(), kind.to_string()),
            ("summary".to_string(), summary.to_string()),
        ])
    };
    vec![
        (
            "demo-brickco-update",
            "Hi, the order for 5000 bricks will be delivered on Monday. - Bob, BrickCo",
            meta("bob@brickco.com", "2023-10-25", "Update", "Brick delivery update"),
        ),
        (
            "demo-suppliesinc-invoice",
            "Invoice #12345 for $500.00 is attached. Please pay by Friday. - Alice, SuppliesInc",
            meta("alice@suppliesinc.com", "2023-10-26", "Invoice", "Invoice for supplies"),
        ),
        (
            "demo-woodworks-delay",
            "We are out of stock on the 2x4 lumber. Expect a 2 week delay. - Charlie, WoodWorks",
            meta("charlie@woodworks.com", "2023-10-27", "Delay", "Lumber stockout delay"),
        ),
    ]
}
