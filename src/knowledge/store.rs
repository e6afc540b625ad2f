//! 知识库 trait 与公共逻辑（批次校验、余弦排序）

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;

/// 文档元数据（sender / date / type / summary 等，均为字符串）
pub type Metadata = BTreeMap<String, String>;

/// 单条检索结果，按相关度从高到低排列
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub score: f32,
}

impl QueryHit {
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// 知识库操作错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("documents/metadatas/ids length mismatch ({documents}/{metadatas}/{ids})")]
    LengthMismatch {
        documents: usize,
        metadatas: usize,
        ids: usize,
    },

    #[error("duplicate id in batch: {0}")]
    DuplicateId(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// 向量集合：add 写入（同 id 覆盖），query 返回最相关的 k 条
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn add(
        &self,
        documents: Vec<String>,
        metadatas: Vec<Metadata>,
        ids: Vec<String>,
    ) -> Result<(), StoreError>;

    async fn query(&self, text: &str, k: usize) -> Result<Vec<QueryHit>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

/// 校验一个写入批次：三个序列等长，批次内 id 不重复
pub(crate) fn validate_batch(
    documents: &[String],
    metadatas: &[Metadata],
    ids: &[String],
) -> Result<(), StoreError> {
    if documents.len() != metadatas.len() || documents.len() != ids.len() {
        return Err(StoreError::LengthMismatch {
            documents: documents.len(),
            metadatas: metadatas.len(),
            ids: ids.len(),
        });
    }
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(StoreError::DuplicateId(id.clone()));
        }
    }
    Ok(())
}

/// 余弦相似度
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// 一条待排序的条目：(id, document, metadata, embedding)
pub(crate) type Entry = (String, String, Metadata, Vec<f32>);

/// 按相似度降序取前 k 条；分数不高于 min_score 的丢弃，同分保持写入顺序
pub(crate) fn rank(query: &[f32], entries: Vec<Entry>, k: usize, min_score: f32) -> Vec<QueryHit> {
    let mut scored: Vec<QueryHit> = entries
        .into_iter()
        .map(|(id, document, metadata, emb)| QueryHit {
            score: cosine_similarity(query, &emb),
            id,
            document,
            metadata,
        })
        .filter(|hit| hit.score > min_score)
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, emb: Vec<f32>) -> Entry {
        (id.to_string(), format!("doc {id}"), Metadata::new(), emb)
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 0.001);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }

    #[test]
    fn test_rank_orders_filters_and_truncates() {
        let q = vec![1.0, 0.0];
        let hits = rank(
            &q,
            vec![
                entry("low", vec![1.0, 3.0]),
                entry("none", vec![0.0, 1.0]),
                entry("high", vec![1.0, 0.1]),
                entry("mid", vec![1.0, 1.0]),
            ],
            2,
            0.0,
        );
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
    }

    #[test]
    fn test_validate_batch() {
        let docs = vec!["a".to_string(), "b".to_string()];
        let metas = vec![Metadata::new(), Metadata::new()];
        assert!(validate_batch(&docs, &metas, &["1".into(), "2".into()]).is_ok());
        assert!(matches!(
            validate_batch(&docs, &metas, &["1".into()]),
            Err(StoreError::LengthMismatch { ids: 1, .. })
        ));
        assert!(matches!(
            validate_batch(&docs, &metas, &["1".into(), "1".into()]),
            Err(StoreError::DuplicateId(id)) if id == "1"
        ));
    }
}
