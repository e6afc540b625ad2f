//! 知识库适配层：向量集合的写入与按自然语言检索
//!
//! - **store**: KnowledgeStore trait、检索结果、错误与排序
//! - **memory**: 进程内集合（测试 / 演示）
//! - **sqlite**: 持久化集合（rusqlite，阻塞操作经 spawn_blocking 执行）
//!
//! 相似度度量与嵌入模型都是可插拔依赖：集合只负责存储向量并按余弦相似度排序。
//! 同一个 id 再次写入时覆盖旧条目（upsert）。

pub mod memory;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

use tokio::sync::OnceCell;

pub use memory::InMemoryCollection;
pub use sqlite::SqliteCollection;
pub use store::{KnowledgeStore, Metadata, QueryHit, StoreError};

use crate::config::AppConfig;
use crate::llm::create_embedder_from_config;

/// 进程级共享集合：首次使用时初始化，直到进程退出，无需显式关闭
static SHARED_STORE: OnceCell<Arc<dyn KnowledgeStore>> = OnceCell::const_new();

/// 获取进程级共享集合（首次调用按配置打开）
pub async fn shared_store(cfg: &AppConfig) -> Result<Arc<dyn KnowledgeStore>, StoreError> {
    SHARED_STORE
        .get_or_try_init(|| create_store_from_config(cfg))
        .await
        .map(Arc::clone)
}

/// 按 [knowledge].backend 创建集合：sqlite（默认）/ memory
pub async fn create_store_from_config(
    cfg: &AppConfig,
) -> Result<Arc<dyn KnowledgeStore>, StoreError> {
    let embedder = create_embedder_from_config(&cfg.embedding, cfg.llm.base_url.as_deref());
    match cfg.knowledge.backend.to_lowercase().as_str() {
        "memory" => {
            tracing::info!(collection = %cfg.knowledge.collection, "Using in-memory knowledge store");
            Ok(Arc::new(
                InMemoryCollection::new(embedder).with_min_score(cfg.knowledge.min_score),
            ))
        }
        "sqlite" => {
            let path = cfg.knowledge_path();
            tracing::info!(path = %path.display(), collection = %cfg.knowledge.collection, "Using SQLite knowledge store");
            let store = SqliteCollection::open(path, &cfg.knowledge.collection, embedder)
                .await?
                .with_min_score(cfg.knowledge.min_score);
            Ok(Arc::new(store))
        }
        other => Err(StoreError::Backend(format!(
            "unknown knowledge backend: {other}"
        ))),
    }
}
