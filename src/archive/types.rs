//! 归档数据类型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{Message, Role};

/// 归档原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArchiveReason {
    YarnCompression,
    ManualArchive,
    TokenLimitReached,
    ConversationTrimmed,
}

impl ArchiveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveReason::YarnCompression => "yarnCompression",
            ArchiveReason::ManualArchive => "manualArchive",
            ArchiveReason::TokenLimitReached => "tokenLimitReached",
            ArchiveReason::ConversationTrimmed => "conversationTrimmed",
        }
    }

    /// 未知字符串按 manualArchive 处理
    pub fn parse(s: &str) -> Self {
        match s {
            "yarnCompression" => ArchiveReason::YarnCompression,
            "tokenLimitReached" => ArchiveReason::TokenLimitReached,
            "conversationTrimmed" => ArchiveReason::ConversationTrimmed,
            _ => ArchiveReason::ManualArchive,
        }
    }
}

/// 归档中的单条消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedMessage {
    pub id: String,
    pub content: String,
    pub is_from_user: bool,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
}

impl From<&Message> for ArchivedMessage {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.clone(),
            content: m.content.clone(),
            is_from_user: m.is_from_user(),
            timestamp: m.timestamp,
            role: m.role,
        }
    }
}

/// 一组被逐出上下文的消息，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveChunk {
    pub id: String,
    pub conversation_id: String,
    pub messages: Vec<ArchivedMessage>,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    pub summary: String,
    /// 最多 5 个，按频次降序
    pub key_topics: Vec<String>,
    /// 估算值：总字符数 / 4
    pub token_count: usize,
    pub reason: ArchiveReason,
    pub created_at: DateTime<Utc>,
}

impl ArchiveChunk {
    /// 展示用时间范围
    pub fn time_range(&self) -> String {
        format!(
            "{} - {}",
            self.time_start.format("%Y-%m-%d %H:%M"),
            self.time_end.format("%Y-%m-%d %H:%M")
        )
    }
}

/// 记忆地图中的单块摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkSummary {
    pub id: String,
    pub time_range: String,
    pub summary: String,
    pub topics: Vec<String>,
    pub message_count: usize,
    pub token_count: usize,
}

impl From<&ArchiveChunk> for ChunkSummary {
    fn from(chunk: &ArchiveChunk) -> Self {
        Self {
            id: chunk.id.clone(),
            time_range: chunk.time_range(),
            summary: chunk.summary.clone(),
            topics: chunk.key_topics.clone(),
            message_count: chunk.messages.len(),
            token_count: chunk.token_count,
        }
    }
}

/// 单会话记忆地图（按时间降序）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryMap {
    pub conversation_id: String,
    pub total_chunks: usize,
    pub total_tokens_archived: usize,
    pub chunks: Vec<ChunkSummary>,
}

/// 一个主题下所有会话的记忆地图
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicMemoryMap {
    pub topic: String,
    pub conversations: Vec<MemoryMap>,
    pub total_chunks: usize,
    pub total_tokens_archived: usize,
}

/// 带得分的召回结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecallHit {
    pub score: u32,
    pub chunk: ArchiveChunk,
}
