//! 嵌入提供方：知识库用它把文本编码为向量
//!
//! HashingEmbedder 在本地按词哈希成定长向量（无需网络，结果确定）；
//! OpenAiEmbedder 调用 OpenAI 兼容的 /embeddings 端点。两者都是 async，不在运行时内部再 block_on。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::EmbeddingSection;

/// 嵌入提供方 trait
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 将文本编码为向量；失败时返回错误字符串
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// 本地特征哈希嵌入：小写词 → 去掉复数 s → 哈希到桶，最后 L2 归一化
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() % self.dimensions as u64) as usize
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// 切词：按非字母数字切分，转小写，过滤单字符，粗略去复数（-ss / -us 结尾保留）
pub(crate) fn normalize_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .map(|w| {
            let lower = w.to_lowercase();
            match lower.strip_suffix('s') {
                Some(stem)
                    if stem.chars().count() > 2 && !stem.ends_with('s') && !stem.ends_with('u') =>
                {
                    stem.to_string()
                }
                _ => lower,
            }
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let mut v = vec![0.0f32; self.dimensions];
        for token in normalize_tokens(text) {
            v[self.bucket(&token)] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(v)
    }
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(vec![]);
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| e.to_string())?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;
        Ok(response
            .data
            .first()
            .map(|e| e.embedding.clone())
            .unwrap_or_default())
    }
}

/// 从配置创建嵌入提供方；openai 缺少 OPENAI_API_KEY 时退回本地哈希
pub fn create_embedder_from_config(
    section: &EmbeddingSection,
    base_url: Option<&str>,
) -> Arc<dyn EmbeddingProvider> {
    if section.provider.eq_ignore_ascii_case("openai") {
        match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => {
                tracing::info!(model = %section.model, "Using OpenAI embeddings");
                return Arc::new(OpenAiEmbedder::new(base_url, &section.model, &key));
            }
            _ => tracing::warn!("embedding provider is openai but OPENAI_API_KEY is unset, using hashing"),
        }
    }
    Arc::new(HashingEmbedder::new(section.dimensions))
}
