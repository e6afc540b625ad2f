//! 检索处理器：取 top-k 相似文档，按来源（日期 / 发件人）格式化
//!
//! 检索为空时返回固定文案，不调用 LLM；开启 synthesize 时 LLM 只拿到检索到的原文作为上下文。

use std::sync::Arc;

use async_trait::async_trait;

use crate::handlers::Handler;
use crate::knowledge::{KnowledgeStore, QueryHit};
use crate::llm::LlmClient;
use crate::memory::Message;

pub const NO_RESULTS: &str = "No relevant information found.";
const RESULT_SEPARATOR: &str = "\n---\n";

/// 把检索结果格式化为 "Date: ..., Sender: ...\nContent: ..."，以分隔行连接
pub fn format_results(hits: &[QueryHit]) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "Date: {}, Sender: {}\nContent: {}",
                hit.meta("date").unwrap_or("unknown"),
                hit.meta("sender").unwrap_or("unknown"),
                hit.document
            )
        })
        .collect::<Vec<_>>()
        .join(RESULT_SEPARATOR)
}

pub struct RetrievalHandler {
    store: Arc<dyn KnowledgeStore>,
    top_k: usize,
    /// 设置后基于检索内容生成回答
    synthesizer: Option<Arc<dyn LlmClient>>,
}

impl RetrievalHandler {
    pub fn new(store: Arc<dyn KnowledgeStore>, top_k: usize) -> Self {
        Self {
            store,
            top_k,
            synthesizer: None,
        }
    }

    pub fn with_synthesis(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.synthesizer = Some(llm);
        self
    }

    pub async fn retrieve(&self, query: &str) -> String {
        let hits = match self.store.query(query, self.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::error!(error = %e, "Knowledge store query failed");
                return NO_RESULTS.to_string();
            }
        };
        tracing::info!(hits = hits.len(), top_k = self.top_k, "Retrieved documents");
        if hits.is_empty() {
            return NO_RESULTS.to_string();
        }

        let context = format_results(&hits);
        match &self.synthesizer {
            None => context,
            Some(llm) => match llm.complete(&synthesis_messages(&context, query)).await {
                Ok(answer) if !answer.trim().is_empty() => answer.trim().to_string(),
                Ok(_) => context,
                Err(e) => {
                    tracing::warn!(error = %e, "Answer synthesis failed, returning retrieved context");
                    context
                }
            },
        }
    }
}

fn synthesis_messages(context: &str, question: &str) -> Vec<Message> {
    vec![
        Message::system(
            "You answer procurement questions using ONLY the context below. \
             Cite the sender and date for every fact. If the context does not contain \
             the answer, say you don't know. Do not invent information.",
        ),
        Message::user(format!("Context:\n{context}\n\nQuestion: {question}")),
    ]
}

#[async_trait]
impl Handler for RetrievalHandler {
    fn name(&self) -> &str {
        "retrieval"
    }

    fn description(&self) -> &str {
        "Answers questions about invoices, deliveries and order history from stored emails"
    }

    async fn handle(&self, instruction: &str) -> String {
        self.retrieve(instruction).await
    }
}
