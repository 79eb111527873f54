//! 嵌入 API：记忆检索使用的向量后端，调用 OpenAI 兼容的 /embeddings 端点
//!
//! 后端本身不保证并发安全；所有调用都应经由 [`crate::llm::Embedder`] 串行化。

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::EmbeddingSection;
use crate::core::EmbeddingError;

/// 嵌入提供方：文本 -> 定长向量
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 将文本编码为向量
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// 向量维度（同一存储内保持不变）
    fn dimensions(&self) -> usize;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: usize,
    has_key: bool,
}

impl OpenAiEmbedder {
    /// 从环境变量与可选 base_url 创建（未显式传入 key 时读取 OPENAI_API_KEY）
    ///
    /// 没有可用 key 时仍可构造，但 `embed` 返回 `EmbeddingUnavailable`。
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        let has_key = is_usable_key(&api_key);

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            dimensions: model_dimensions(model),
            has_key,
        }
    }
}

fn is_usable_key(key: &str) -> bool {
    !key.trim().is_empty() && key != "sk-placeholder"
}

/// 常见模型的输出维度
fn model_dimensions(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if !self.has_key {
            return Err(EmbeddingError::EmbeddingUnavailable("no API key configured".into()));
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| EmbeddingError::VectorGenerationFailed(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EmbeddingError::VectorGenerationFailed(e.to_string()))?;
        response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EmbeddingError::VectorGenerationFailed("empty embedding response".into()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// 从应用配置创建嵌入提供方；未启用或没有可用 key 时返回 None（调用方退化为词法伪向量）
pub fn create_embedder_from_config(section: &EmbeddingSection) -> Option<Arc<dyn EmbeddingProvider>> {
    if !section.enabled {
        tracing::debug!("embedding backend disabled by config");
        return None;
    }
    let key = section
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    if !key.as_deref().is_some_and(is_usable_key) {
        tracing::debug!("embedding backend skipped: no OPENAI_API_KEY");
        return None;
    }
    Some(Arc::new(OpenAiEmbedder::new(
        section.base_url.as_deref(),
        &section.model,
        key.as_deref(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_section_yields_none() {
        let section = EmbeddingSection {
            enabled: false,
            api_key: Some("sk-real".into()),
            ..Default::default()
        };
        assert!(create_embedder_from_config(&section).is_none());
    }

    #[test]
    fn test_placeholder_key_yields_none() {
        let section = EmbeddingSection {
            api_key: Some("sk-placeholder".into()),
            ..Default::default()
        };
        assert!(create_embedder_from_config(&section).is_none());
    }

    #[tokio::test]
    async fn test_missing_key_reports_unavailable() {
        let embedder = OpenAiEmbedder::new(Some("http://127.0.0.1:9"), "text-embedding-3-small", Some(""));
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::EmbeddingUnavailable(_)));
    }

    #[test]
    fn test_model_dimensions() {
        assert_eq!(model_dimensions("text-embedding-3-large"), 3072);
        assert_eq!(model_dimensions("text-embedding-3-small"), 1536);
    }
}
