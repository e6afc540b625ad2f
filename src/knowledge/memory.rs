//! 进程内向量集合：进程退出即丢失，适合测试与演示

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::knowledge::store::{rank, validate_batch, Entry};
use crate::knowledge::{KnowledgeStore, Metadata, QueryHit, StoreError};
use crate::llm::EmbeddingProvider;

/// 内存集合：按写入顺序保存 (id, document, metadata, embedding)
pub struct InMemoryCollection {
    entries: RwLock<Vec<Entry>>,
    embedder: Arc<dyn EmbeddingProvider>,
    min_score: f32,
}

impl InMemoryCollection {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            embedder,
            min_score: 0.0,
        }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryCollection {
    async fn add(
        &self,
        documents: Vec<String>,
        metadatas: Vec<Metadata>,
        ids: Vec<String>,
    ) -> Result<(), StoreError> {
        validate_batch(&documents, &metadatas, &ids)?;

        let mut batch = Vec::with_capacity(documents.len());
        for ((document, metadata), id) in documents.into_iter().zip(metadatas).zip(ids) {
            let embedding = self
                .embedder
                .embed(&document)
                .await
                .map_err(StoreError::Embedding)?;
            batch.push((id, document, metadata, embedding));
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        for entry in batch {
            match entries.iter_mut().find(|(id, ..)| *id == entry.0) {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
        }
        Ok(())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<QueryHit>, StoreError> {
        let query = self
            .embedder
            .embed(text)
            .await
            .map_err(StoreError::Embedding)?;
        let snapshot = self
            .entries
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .clone();
        Ok(rank(&query, snapshot, k, self.min_score))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self
            .entries
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbedder;

    fn meta(sender: &str, date: &str) -> Metadata {
        Metadata::from([
            ("sender".to_string(), sender.to_string()),
            ("date".to_string(), date.to_string()),
        ])
    }

    fn collection() -> InMemoryCollection {
        InMemoryCollection::new(Arc::new(HashingEmbedder::new(1 << 16)))
    }

    #[tokio::test]
    async fn test_added_document_is_retrievable_in_top_3() {
        let store = collection();
        store
            .add(
                vec![
                    "Hi, the order for 5000 bricks will be delivered on Monday.".into(),
                    "Invoice #12345 for $500.00 is attached.".into(),
                    "We are out of stock on the 2x4 lumber.".into(),
                ],
                vec![
                    meta("bob@brickco.com", "2023-10-25"),
                    meta("alice@suppliesinc.com", "2023-10-26"),
                    meta("charlie@woodworks.com", "2023-10-27"),
                ],
                vec!["I1".into(), "I2".into(), "I3".into()],
            )
            .await
            .unwrap();

        let hits = store.query("when are the bricks delivered", 3).await.unwrap();
        assert!(hits.len() <= 3);
        assert_eq!(hits[0].id, "I1");
        assert_eq!(hits[0].meta("sender"), Some("bob@brickco.com"));
    }

    #[tokio::test]
    async fn test_same_id_upserts() {
        let store = collection();
        store
            .add(vec!["old brick text".into()], vec![Metadata::new()], vec!["I1".into()])
            .await
            .unwrap();
        store
            .add(vec!["new brick text".into()], vec![Metadata::new()], vec!["I1".into()])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let hits = store.query("brick", 3).await.unwrap();
        assert_eq!(hits[0].document, "new brick text");
    }

    #[tokio::test]
    async fn test_unrelated_query_returns_nothing() {
        let store = collection();
        store
            .add(vec!["bricks delivered monday".into()], vec![Metadata::new()], vec!["I1".into()])
            .await
            .unwrap();
        assert!(store.query("zzzqqq", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_length_mismatch_rejected() {
        let store = collection();
        let err = store
            .add(vec!["a doc".into()], vec![], vec!["I1".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LengthMismatch { .. }));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
