//! 处理器层：无记忆的专职处理器
//!
//! 每个处理器只接收一条完整、自包含的指令字符串，返回给用户的字符串；
//! 不保留任何跨轮状态，上下文由监督者负责补全。
//!
//! - **retrieval**: 知识库检索，按来源格式化
//! - **purchase**: 采购单 起草 / 确认 / 发送 状态机
//! - **extraction**: 从指令中抽取订单字段（LLM + 固定 schema）
//! - **template**: 采购单邮件模板与草稿块的渲染 / 解析

pub mod extraction;
pub mod purchase;
pub mod retrieval;
pub mod template;

use async_trait::async_trait;

pub use extraction::{ExtractedOrder, OrderField};
pub use purchase::{PurchaseHandler, PurchaseInstruction, PurchaseOutcome, PurchaseState};
pub use retrieval::{format_results, RetrievalHandler, NO_RESULTS};
pub use template::{DraftEmail, PurchaseDraft};

/// 处理器 trait：名称、描述、处理一条完整指令
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 处理指令；错误在处理器边界内转为用户可读的字符串，不向上抛
    async fn handle(&self, instruction: &str) -> String;
}
