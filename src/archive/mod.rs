//! 归档层：逐出消息的持久化、记忆地图与召回

pub mod database;
pub mod store;
pub mod types;

pub use database::ArchiveDatabase;
pub use store::{extract_topics, ArchiveOptions, ArchiveStore, TopicDirectory};
pub use types::{
    ArchiveChunk, ArchiveReason, ArchivedMessage, ChunkSummary, MemoryMap, RecallHit, TopicMemoryMap,
};
