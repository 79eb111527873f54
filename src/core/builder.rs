//! 子系统装配：根据 AppConfig 构建嵌入入口、记忆存储、上下文处理器与归档存储
//!
//! 三个组件共享同一个 [`Embedder`]，因此所有嵌入调用都经过同一个串行点。

use std::sync::Arc;

use crate::archive::{ArchiveOptions, ArchiveStore};
use crate::config::AppConfig;
use crate::context::{CompressionOptions, ContextProcessor};
use crate::llm::{create_embedder_from_config, Embedder, EmbeddingProvider};
use crate::memory::{MemoryStore, TokenEstimator};
use crate::storage::StorageLocation;

/// 装配完成的记忆子系统
pub struct MemorySystem {
    config: AppConfig,
    embedder: Arc<Embedder>,
    memory: Arc<MemoryStore>,
    context: Arc<ContextProcessor>,
    archive: Arc<ArchiveStore>,
}

impl MemorySystem {
    pub fn builder(config: AppConfig) -> MemorySystemBuilder {
        MemorySystemBuilder::new(config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn embedder(&self) -> Arc<Embedder> {
        Arc::clone(&self.embedder)
    }

    pub fn memory(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.memory)
    }

    pub fn context(&self) -> Arc<ContextProcessor> {
        Arc::clone(&self.context)
    }

    pub fn archive(&self) -> Arc<ArchiveStore> {
        Arc::clone(&self.archive)
    }

    /// 关闭所有会话连接并清空上下文缓存
    pub async fn close(&self) {
        let memories = self.memory.close().await;
        let archives = self.archive.close().await;
        self.context.clear_cache().await;
        tracing::info!(memories, archives, "memory system closed");
    }
}

/// MemorySystem 构建器
pub struct MemorySystemBuilder {
    config: AppConfig,
    location: Option<StorageLocation>,
    backend: Option<Option<Arc<dyn EmbeddingProvider>>>,
    estimator: Option<Arc<dyn TokenEstimator>>,
}

impl MemorySystemBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            location: None,
            backend: None,
            estimator: None,
        }
    }

    /// 覆盖配置中的存储位置
    pub fn with_location(mut self, location: StorageLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// 指定嵌入后端；传 None 强制使用词法伪向量
    pub fn with_embedding_backend(mut self, backend: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 注入宿主的 token 估算器
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn build(self) -> MemorySystem {
        let config = self.config;

        let location = self.location.unwrap_or_else(|| {
            if config.storage.in_memory {
                StorageLocation::InMemory
            } else {
                StorageLocation::Directory(config.storage.data_dir.clone())
            }
        });

        let backend = self
            .backend
            .unwrap_or_else(|| create_embedder_from_config(&config.embedding));
        if backend.is_none() {
            tracing::info!("no embedding backend configured, using lexical embeddings");
        }
        let embedder = Arc::new(Embedder::new(backend).with_max_input_chars(config.embedding.max_input_chars));

        let memory = Arc::new(MemoryStore::new(location.clone(), Arc::clone(&embedder)));

        let mut context = ContextProcessor::new(Arc::clone(&memory), config.context.yarn_config())
            .with_options(CompressionOptions::from_config(&config.context, &config.memory));
        if let Some(estimator) = self.estimator {
            context = context.with_estimator(estimator);
        }

        let archive = ArchiveStore::new(location.clone()).with_options(ArchiveOptions::from(&config.archive));

        tracing::info!(
            location = ?location,
            dimensions = embedder.dimensions(),
            profile = config.context.profile.as_str(),
            "memory system ready"
        );

        MemorySystem {
            config,
            embedder,
            memory,
            context: Arc::new(context),
            archive: Arc::new(archive),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockEmbedder;
    use crate::memory::ContentType;

    fn in_memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.in_memory = true;
        config
    }

    #[tokio::test]
    async fn test_build_in_memory_without_backend() {
        let system = MemorySystem::builder(in_memory_config())
            .with_embedding_backend(None)
            .build();
        assert!(!system.embedder().has_backend());
        assert_eq!(system.embedder().dimensions(), crate::llm::LEXICAL_DIMENSIONS);

        system
            .memory()
            .store_memory("hello there", "c", ContentType::Message, 0.5, vec![])
            .await
            .unwrap();
        assert_eq!(system.memory().open_conversations().await, vec!["c".to_string()]);
        system.close().await;
        assert!(system.memory().open_conversations().await.is_empty());
    }

    #[tokio::test]
    async fn test_components_share_embedder() {
        let mock = Arc::new(MockEmbedder::new(8));
        let system = MemorySystem::builder(in_memory_config())
            .with_embedding_backend(Some(mock.clone()))
            .build();
        system
            .memory()
            .store_memory("shared gate", "c", ContentType::Message, 0.5, vec![])
            .await
            .unwrap();
        system
            .context()
            .retrieve_augmented_memory_context("shared gate", "c", 100)
            .await
            .unwrap();
        assert_eq!(mock.calls(), 2);
        assert_eq!(system.embedder().call_count(), 2);
    }
}
