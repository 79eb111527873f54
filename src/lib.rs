//! Bee Memory - 长对话智能体的记忆与上下文子系统
//!
//! 模块划分：
//! - **archive**: 归档存储（被逐出的消息、记忆地图、按相关度/时间召回）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: YaRN 上下文处理（direct / scaling / compression 三档）
//! - **core**: 错误类型与子系统装配
//! - **llm**: 嵌入后端抽象、全局串行化入口、词法伪向量
//! - **memory**: 每会话语义记忆库、检索打分、分词与 token 预算
//! - **observability**: 日志初始化
//! - **storage**: 每会话 SQLite 连接池

pub mod archive;
pub mod config;
pub mod context;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod storage;

pub use crate::archive::{ArchiveChunk, ArchiveReason, ArchiveStore, MemoryMap};
pub use crate::context::{ContextProcessor, ProcessedContext, ProcessingMethod, YarnConfig};
pub use crate::core::{ArchiveError, EmbeddingError, MemoryError, MemorySystem, MemorySystemBuilder};
pub use crate::memory::{ContentType, MemoryEntry, MemoryStore, Message, Role};
