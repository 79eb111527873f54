//! 记忆条目与统计快照

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 记忆内容类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentType {
    Message,
    UserInput,
    AssistantResponse,
    SystemEvent,
    ToolResult,
    ContextInfo,
    Document,
}

impl ContentType {
    pub const ALL: [ContentType; 7] = [
        ContentType::Message,
        ContentType::UserInput,
        ContentType::AssistantResponse,
        ContentType::SystemEvent,
        ContentType::ToolResult,
        ContentType::ContextInfo,
        ContentType::Document,
    ];

    /// 落库使用的字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Message => "message",
            ContentType::UserInput => "userInput",
            ContentType::AssistantResponse => "assistantResponse",
            ContentType::SystemEvent => "systemEvent",
            ContentType::ToolResult => "toolResult",
            ContentType::ContextInfo => "contextInfo",
            ContentType::Document => "document",
        }
    }

    /// 未知字符串按 message 处理（兼容旧数据）
    pub fn parse(s: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .unwrap_or(ContentType::Message)
    }
}

/// 一条语义记忆
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub content_type: ContentType,
    pub embedding: Option<Vec<f32>>,
    /// 重要度，始终在 [0, 1]
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub access_count: u32,
    pub last_accessed: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    /// 检索得分（不落库）；全量列举时固定为 1.0
    #[serde(skip)]
    pub similarity: f32,
}

/// 单会话记忆统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStatistics {
    pub conversation_id: String,
    pub count: usize,
    pub average_importance: f32,
    pub total_accesses: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// 全局记忆统计（覆盖所有已知会话）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalMemoryStatistics {
    pub conversation_count: usize,
    pub total_memories: usize,
    pub counts_by_type: BTreeMap<ContentType, usize>,
    /// 最近 7 天创建的条目数
    pub recent_count: usize,
    pub average_importance: f32,
}
