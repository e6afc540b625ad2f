//! SQLite 持久化向量集合
//!
//! 一张表保存 (collection, id, document, metadata JSON, embedding BLOB)，(collection, id) 唯一，
//! 再次写入同 id 时覆盖。rusqlite 是同步 API，所有数据库操作都放到 spawn_blocking 中执行，
//! 嵌入在此之前以 async 方式完成。

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::knowledge::store::{rank, validate_batch, Entry};
use crate::knowledge::{KnowledgeStore, Metadata, QueryHit, StoreError};
use crate::llm::EmbeddingProvider;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS documents (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    id         TEXT NOT NULL,
    document   TEXT NOT NULL,
    metadata   TEXT NOT NULL,
    embedding  BLOB NOT NULL,
    UNIQUE (collection, id)
)";

/// 持久化集合
pub struct SqliteCollection {
    conn: Arc<Mutex<Connection>>,
    collection: String,
    embedder: Arc<dyn EmbeddingProvider>,
    min_score: f32,
}

fn backend<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteCollection {
    /// 打开（必要时创建）数据库文件与表
    pub async fn open(
        path: PathBuf,
        collection: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, StoreError> {
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(backend)?;
                }
            }
            let conn = Connection::open(&path).map_err(backend)?;
            conn.execute(SCHEMA, []).map_err(backend)?;
            Ok(conn)
        })
        .await
        .map_err(backend)??;

        Ok(Self::from_connection(conn, collection, embedder))
    }

    /// 进程内数据库（测试用）
    pub fn open_in_memory(
        collection: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        conn.execute(SCHEMA, []).map_err(backend)?;
        Ok(Self::from_connection(conn, collection, embedder))
    }

    fn from_connection(
        conn: Connection,
        collection: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            collection: collection.to_string(),
            embedder,
            min_score: 0.0,
        }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// 在阻塞线程池中使用连接
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let collection = self.collection.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(backend)?;
            f(&mut *guard, &collection)
        })
        .await
        .map_err(backend)?
    }
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[async_trait]
impl KnowledgeStore for SqliteCollection {
    async fn add(
        &self,
        documents: Vec<String>,
        metadatas: Vec<Metadata>,
        ids: Vec<String>,
    ) -> Result<(), StoreError> {
        validate_batch(&documents, &metadatas, &ids)?;

        let mut rows = Vec::with_capacity(documents.len());
        for ((document, metadata), id) in documents.into_iter().zip(metadatas).zip(ids) {
            let embedding = self
                .embedder
                .embed(&document)
                .await
                .map_err(StoreError::Embedding)?;
            let metadata = serde_json::to_string(&metadata).map_err(backend)?;
            rows.push((id, document, metadata, encode_embedding(&embedding)));
        }

        let count = rows.len();
        self.with_conn(move |conn, collection| {
            let tx = conn.transaction().map_err(backend)?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO documents (collection, id, document, metadata, embedding)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(collection, id) DO UPDATE SET
                             document = excluded.document,
                             metadata = excluded.metadata,
                             embedding = excluded.embedding",
                    )
                    .map_err(backend)?;
                for (id, document, metadata, embedding) in &rows {
                    stmt.execute(params![collection, id, document, metadata, embedding])
                        .map_err(backend)?;
                }
            }
            tx.commit().map_err(backend)
        })
        .await?;

        tracing::debug!(collection = %self.collection, count, "documents upserted");
        Ok(())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<QueryHit>, StoreError> {
        let query = self
            .embedder
            .embed(text)
            .await
            .map_err(StoreError::Embedding)?;

        let entries: Vec<Entry> = self
            .with_conn(|conn, collection| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, document, metadata, embedding FROM documents
                         WHERE collection = ?1 ORDER BY seq",
                    )
                    .map_err(backend)?;
                let rows = stmt
                    .query_map(params![collection], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Vec<u8>>(3)?,
                        ))
                    })
                    .map_err(backend)?;

                let mut out = Vec::new();
                for row in rows {
                    let (id, document, metadata, embedding) = row.map_err(backend)?;
                    let metadata: Metadata = serde_json::from_str(&metadata).unwrap_or_default();
                    out.push((id, document, metadata, decode_embedding(&embedding)));
                }
                Ok(out)
            })
            .await?;

        Ok(rank(&query, entries, k, self.min_score))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn, collection| {
            conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                params![collection],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(backend)
        })
        .await
    }
}
