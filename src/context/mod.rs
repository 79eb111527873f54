//! 上下文处理：YaRN 档位与三档压缩

pub mod processor;
pub mod profile;

pub use processor::{
    message_importance, CompressionOptions, ContextProcessor, ContextStatistics, ProcessedContext,
    ProcessingMethod,
};
pub use profile::{ContextProfile, YarnConfig};
