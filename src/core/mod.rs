//! 核心层：错误类型与子系统装配

pub mod builder;
pub mod error;

pub use builder::{MemorySystem, MemorySystemBuilder};
pub use error::{ArchiveError, EmbeddingError, MemoryError};
