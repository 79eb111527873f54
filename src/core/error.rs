//! 记忆子系统错误类型
//!
//! 按组件划分：记忆存储（MemoryError）、归档存储（ArchiveError）、嵌入后端（EmbeddingError）。
//! 底层 I/O / SQLite 错误统一转成带原始消息的字符串变体向上传播。

use thiserror::Error;

/// 记忆存储错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemoryError {
    #[error("Memory database not initialized")]
    DatabaseNotInitialized,

    #[error("Memory database initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Failed to store memory: {0}")]
    StorageFailed(String),

    #[error("Failed to retrieve memories: {0}")]
    RetrievalFailed(String),

    #[error("Memory operation failed: {0}")]
    OperationFailed(String),
}

/// 归档存储错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArchiveError {
    #[error("Cannot archive an empty message list")]
    EmptyMessages,

    #[error("Archive database error: {0}")]
    DatabaseError(String),

    #[error("Archive chunk not found: {0}")]
    ChunkNotFound(String),
}

/// 嵌入后端错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    /// 后端未配置或暂不可用
    #[error("Embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// 后端拒绝或返回了无效向量
    #[error("Vector generation failed: {0}")]
    VectorGenerationFailed(String),
}

/// 写入路径上的嵌入失败：条目没有向量就不能落库
impl From<EmbeddingError> for MemoryError {
    fn from(e: EmbeddingError) -> Self {
        MemoryError::StorageFailed(e.to_string())
    }
}

impl From<rusqlite::Error> for ArchiveError {
    fn from(e: rusqlite::Error) -> Self {
        ArchiveError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(e: serde_json::Error) -> Self {
        ArchiveError::DatabaseError(e.to_string())
    }
}
