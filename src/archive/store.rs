//! 归档存储：保存被逐出上下文的消息，并支持按相关度/时间召回
//!
//! 召回打分：对查询中的每个词，出现在摘要 +3，出现在任一主题 +2，出现在消息正文 +1；
//! 得分为 0 的块不返回。主题级操作通过 [`TopicDirectory`] 找到主题下的会话后逐个聚合，
//! 单个会话失败只记日志。

use std::collections::HashMap;

use chrono::Utc;

use crate::archive::database::{ArchiveDatabase, TimeOrder};
use crate::archive::types::{
    ArchiveChunk, ArchiveReason, ArchivedMessage, ChunkSummary, MemoryMap, RecallHit, TopicMemoryMap,
};
use crate::config::ArchiveSection;
use crate::core::ArchiveError;
use crate::memory::{tokenizer, Message, Role};
use crate::storage::{ConnectionPool, StorageLocation};

const SUMMARY_WEIGHT: u32 = 3;
const TOPIC_WEIGHT: u32 = 2;
const CONTENT_WEIGHT: u32 = 1;

/// 每个归档块最多保留的主题数
pub const MAX_KEY_TOPICS: usize = 5;

/// 主题 -> 所属会话
pub trait TopicDirectory: Send + Sync {
    fn conversations_for(&self, topic: &str) -> Vec<String>;
}

impl<F> TopicDirectory for F
where
    F: Fn(&str) -> Vec<String> + Send + Sync,
{
    fn conversations_for(&self, topic: &str) -> Vec<String> {
        self(topic)
    }
}

/// 摘要与主题提取参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    pub summary_prefix_chars: usize,
    pub max_topics: usize,
    pub hint_topics: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            summary_prefix_chars: 200,
            max_topics: MAX_KEY_TOPICS,
            hint_topics: 10,
        }
    }
}

impl From<&ArchiveSection> for ArchiveOptions {
    fn from(section: &ArchiveSection) -> Self {
        Self {
            summary_prefix_chars: section.summary_prefix_chars,
            max_topics: section.max_topics.min(MAX_KEY_TOPICS),
            hint_topics: section.hint_topics,
        }
    }
}

/// 归档存储
pub struct ArchiveStore {
    pool: ConnectionPool<ArchiveDatabase>,
    options: ArchiveOptions,
}

impl ArchiveStore {
    pub fn new(location: StorageLocation) -> Self {
        Self {
            pool: ConnectionPool::new(location),
            options: ArchiveOptions::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(StorageLocation::InMemory)
    }

    pub fn with_options(mut self, options: ArchiveOptions) -> Self {
        self.options = options;
        self
    }

    /// 归档一组消息，生成摘要与主题后落库
    pub async fn archive_messages(
        &self,
        messages: &[Message],
        conversation_id: &str,
        reason: ArchiveReason,
    ) -> Result<ArchiveChunk, ArchiveError> {
        let (Some(time_start), Some(time_end)) = (
            messages.iter().map(|m| m.timestamp).min(),
            messages.iter().map(|m| m.timestamp).max(),
        ) else {
            return Err(ArchiveError::EmptyMessages);
        };

        let total_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        let chunk = ArchiveChunk {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            messages: messages.iter().map(ArchivedMessage::from).collect(),
            time_start,
            time_end,
            summary: summarize(messages, self.options.summary_prefix_chars),
            key_topics: extract_topics(
                messages.iter().map(|m| m.content.as_str()),
                self.options.max_topics.min(MAX_KEY_TOPICS),
            ),
            token_count: total_chars / 4,
            reason,
            created_at: Utc::now(),
        };

        let db = self.pool.get_or_open(conversation_id).await?;
        db.insert(&chunk)?;
        tracing::info!(
            conversation_id,
            chunk_id = %chunk.id,
            messages = chunk.messages.len(),
            tokens = chunk.token_count,
            reason = reason.as_str(),
            "archived messages"
        );
        Ok(chunk)
    }

    /// 记忆地图：所有块按时间降序汇总
    pub async fn get_memory_map(&self, conversation_id: &str) -> Result<MemoryMap, ArchiveError> {
        let chunks = self.load(conversation_id, TimeOrder::NewestFirst).await?;
        Ok(MemoryMap {
            conversation_id: conversation_id.to_string(),
            total_chunks: chunks.len(),
            total_tokens_archived: chunks.iter().map(|c| c.token_count).sum(),
            chunks: chunks.iter().map(ChunkSummary::from).collect(),
        })
    }

    /// 给 agent 的提示：归档块数与最常见的主题；没有归档时为 None
    pub async fn memory_map_hint(&self, conversation_id: &str) -> Result<Option<String>, ArchiveError> {
        let map = self.get_memory_map(conversation_id).await?;
        if map.total_chunks == 0 {
            return Ok(None);
        }
        let topics = common_topics(&map.chunks, self.options.hint_topics);
        let mut hint = format!(
            "{} archived chunk(s) of earlier conversation ({} tokens) are available for recall.",
            map.total_chunks, map.total_tokens_archived
        );
        if !topics.is_empty() {
            hint.push_str(&format!(" Topics: {}.", topics.join(", ")));
        }
        Ok(Some(hint))
    }

    /// 按查询词召回，得分降序（同分保持时间降序）
    pub async fn recall_history(
        &self,
        query: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ArchiveChunk>, ArchiveError> {
        let hits = self.scored_recall(query, conversation_id).await?;
        Ok(hits.into_iter().take(limit).map(|h| h.chunk).collect())
    }

    /// 按时间召回："recent" 最新在前，"early" 最早在前，其他按最新在前
    pub async fn recall_history_by_time(
        &self,
        conversation_id: &str,
        time_hint: &str,
        limit: usize,
    ) -> Result<Vec<ArchiveChunk>, ArchiveError> {
        let order = match time_hint.trim().to_ascii_lowercase().as_str() {
            "early" => TimeOrder::OldestFirst,
            _ => TimeOrder::NewestFirst,
        };
        let mut chunks = self.load(conversation_id, order).await?;
        chunks.truncate(limit);
        Ok(chunks)
    }

    pub async fn get_chunk(&self, conversation_id: &str, chunk_id: &str) -> Result<ArchiveChunk, ArchiveError> {
        let db = self.pool.get_or_open(conversation_id).await?;
        db.get(chunk_id)?
            .ok_or_else(|| ArchiveError::ChunkNotFound(chunk_id.to_string()))
    }

    /// 关闭并删除会话归档库；返回是否删除了任何东西
    pub async fn delete_conversation_archive(&self, conversation_id: &str) -> Result<bool, ArchiveError> {
        let removed = self
            .pool
            .remove(conversation_id)
            .await
            .map_err(|e| ArchiveError::DatabaseError(e.to_string()))?;
        tracing::info!(conversation_id, removed, "deleted conversation archive");
        Ok(removed)
    }

    /// 主题下所有会话的召回结果，按得分降序合并
    pub async fn recall_topic_history(
        &self,
        topic: &str,
        query: &str,
        directory: &dyn TopicDirectory,
        limit: usize,
    ) -> Vec<RecallHit> {
        let mut hits = Vec::new();
        for conversation_id in directory.conversations_for(topic) {
            match self.scored_recall(query, &conversation_id).await {
                Ok(found) => hits.extend(found),
                Err(e) => {
                    tracing::warn!(topic, conversation_id = %conversation_id, error = %e, "skipping conversation in topic recall");
                }
            }
        }
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits.truncate(limit);
        hits
    }

    /// 主题下所有会话的记忆地图与合计
    pub async fn get_topic_memory_map(&self, topic: &str, directory: &dyn TopicDirectory) -> TopicMemoryMap {
        let mut conversations = Vec::new();
        for conversation_id in directory.conversations_for(topic) {
            match self.get_memory_map(&conversation_id).await {
                Ok(map) => conversations.push(map),
                Err(e) => {
                    tracing::warn!(topic, conversation_id = %conversation_id, error = %e, "skipping conversation in topic memory map");
                }
            }
        }
        TopicMemoryMap {
            topic: topic.to_string(),
            total_chunks: conversations.iter().map(|m| m.total_chunks).sum(),
            total_tokens_archived: conversations.iter().map(|m| m.total_tokens_archived).sum(),
            conversations,
        }
    }

    pub async fn open_conversations(&self) -> Vec<String> {
        self.pool.open_ids().await
    }

    pub async fn close(&self) -> usize {
        self.pool.close_all().await
    }

    async fn load(&self, conversation_id: &str, order: TimeOrder) -> Result<Vec<ArchiveChunk>, ArchiveError> {
        let db = self.pool.get_or_open(conversation_id).await?;
        db.load_all(order)
    }

    async fn scored_recall(&self, query: &str, conversation_id: &str) -> Result<Vec<RecallHit>, ArchiveError> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits: Vec<RecallHit> = self
            .load(conversation_id, TimeOrder::NewestFirst)
            .await?
            .into_iter()
            .filter_map(|chunk| {
                let score = recall_score(&terms, &chunk);
                (score > 0).then_some(RecallHit { score, chunk })
            })
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        tracing::debug!(conversation_id, hits = hits.len(), "recalled archive chunks");
        Ok(hits)
    }
}

/// 去重后的小写查询词
fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for t in tokenizer::tokenize(query) {
        if !terms.contains(&t) {
            terms.push(t);
        }
    }
    terms
}

fn recall_score(terms: &[String], chunk: &ArchiveChunk) -> u32 {
    let summary = chunk.summary.to_lowercase();
    let topics: Vec<String> = chunk.key_topics.iter().map(|t| t.to_lowercase()).collect();
    let content = chunk
        .messages
        .iter()
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");

    terms
        .iter()
        .map(|term| {
            let mut score = 0;
            if summary.contains(term.as_str()) {
                score += SUMMARY_WEIGHT;
            }
            if topics.iter().any(|t| t.contains(term.as_str())) {
                score += TOPIC_WEIGHT;
            }
            if content.contains(term.as_str()) {
                score += CONTENT_WEIGHT;
            }
            score
        })
        .sum()
}

fn prefix_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// 第一条用户消息前缀 + 第一条非置顶助手消息前缀
fn summarize(messages: &[Message], prefix: usize) -> String {
    let mut parts = Vec::new();
    if let Some(user) = messages.iter().find(|m| m.role == Role::User) {
        parts.push(format!("User: {}", prefix_chars(user.content.trim(), prefix)));
    }
    if let Some(assistant) = messages
        .iter()
        .find(|m| m.role == Role::Assistant && !m.pinned)
    {
        parts.push(format!("Assistant: {}", prefix_chars(assistant.content.trim(), prefix)));
    }
    parts.join(" | ")
}

/// 出现频次最高的主题词；同频按首次出现先后
pub fn extract_topics<'a>(texts: impl IntoIterator<Item = &'a str>, max_topics: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut position = 0usize;
    for text in texts {
        for word in tokenizer::tokenize(text) {
            if !tokenizer::is_topic_word(&word) {
                continue;
            }
            counts.entry(word).or_insert((0, position)).0 += 1;
            position += 1;
        }
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(max_topics).map(|(w, _)| w).collect()
}

/// 记忆地图中出现最多的主题（按块计数）
fn common_topics(chunks: &[ChunkSummary], max: usize) -> Vec<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    let mut position = 0usize;
    for chunk in chunks {
        for topic in &chunk.topics {
            counts.entry(topic.as_str()).or_insert((0, position)).0 += 1;
            position += 1;
        }
    }
    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(max).map(|(t, _)| t.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};

    fn at(start: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
        start + Duration::minutes(minutes)
    }

    fn conversation(start: DateTime<Utc>) -> Vec<Message> {
        vec![
            Message::user("We need to plan the rocket launch budget for next quarter.").with_timestamp(at(start, 0)),
            Message::assistant("You are a helpful planner.").pinned().with_timestamp(at(start, 1)),
            Message::assistant("The launch budget should cover engines and telemetry.").with_timestamp(at(start, 2)),
            Message::user("Telemetry hardware is expensive, engines too.").with_timestamp(at(start, 3)),
            Message::assistant("Engines first, telemetry second.").with_timestamp(at(start, 5)),
        ]
    }

    #[tokio::test]
    async fn test_key_topics_capped_even_when_configured_higher() {
        let section = ArchiveSection {
            max_topics: 8,
            ..ArchiveSection::default()
        };
        let options = ArchiveOptions::from(&section);
        assert_eq!(options.max_topics, MAX_KEY_TOPICS);

        let widened = ArchiveOptions {
            max_topics: 8,
            ..ArchiveOptions::default()
        };
        let store = ArchiveStore::in_memory().with_options(widened);
        let msgs = vec![Message::user(
            "engines telemetry payload fairing booster gimbal thruster nozzle avionics",
        )];
        let chunk = store.archive_messages(&msgs, "c", ArchiveReason::ManualArchive).await.unwrap();
        assert_eq!(chunk.key_topics.len(), MAX_KEY_TOPICS);
    }

    #[tokio::test]
    async fn test_empty_messages_rejected() {
        let store = ArchiveStore::in_memory();
        let err = store.archive_messages(&[], "c", ArchiveReason::ManualArchive).await.unwrap_err();
        assert_eq!(err, ArchiveError::EmptyMessages);
    }

    #[tokio::test]
    async fn test_archive_builds_summary_topics_and_range() {
        let store = ArchiveStore::in_memory();
        let start = Utc::now() - Duration::hours(2);
        let msgs = conversation(start);
        let chunk = store
            .archive_messages(&msgs, "c", ArchiveReason::TokenLimitReached)
            .await
            .unwrap();

        assert_eq!(chunk.time_start, at(start, 0));
        assert_eq!(chunk.time_end, at(start, 5));
        assert!(chunk.summary.starts_with("User: We need to plan"));
        assert!(chunk.summary.contains("Assistant: The launch budget"));
        assert!(!chunk.summary.contains("helpful planner"));
        assert!(chunk.key_topics.len() <= 5);
        assert_eq!(chunk.key_topics[0], "engines");
        let chars: usize = msgs.iter().map(|m| m.content.chars().count()).sum();
        assert_eq!(chunk.token_count, chars / 4);
    }

    #[tokio::test]
    async fn test_summary_prefix_is_bounded() {
        let store = ArchiveStore::in_memory();
        let long = "a".repeat(500);
        let chunk = store
            .archive_messages(&[Message::user(long)], "c", ArchiveReason::ManualArchive)
            .await
            .unwrap();
        assert_eq!(chunk.summary.chars().count(), "User: ".len() + 200);
    }

    #[tokio::test]
    async fn test_recall_scoring() {
        let store = ArchiveStore::in_memory();
        let start = Utc::now() - Duration::hours(2);
        let chunk = store
            .archive_messages(&conversation(start), "c", ArchiveReason::TokenLimitReached)
            .await
            .unwrap();
        store
            .archive_messages(&[Message::user("weather talk only")], "c", ArchiveReason::ManualArchive)
            .await
            .unwrap();

        let hits = store.recall_history("budget", "c", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, chunk.id);
        assert!(store.recall_history("submarine", "c", 10).await.unwrap().is_empty());
        assert!(store.recall_history("", "c", 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_recall_weights() {
        let now = Utc::now();
        let chunk = ArchiveChunk {
            id: "x".into(),
            conversation_id: "c".into(),
            messages: vec![ArchivedMessage {
                id: "m".into(),
                content: "rocket talk".into(),
                is_from_user: true,
                timestamp: now,
                role: Role::User,
            }],
            time_start: now,
            time_end: now,
            summary: "User: rocket talk".into(),
            key_topics: vec!["rocket".into()],
            token_count: 2,
            reason: ArchiveReason::ManualArchive,
            created_at: now,
        };
        assert_eq!(recall_score(&["rocket".to_string()], &chunk), 6);
        assert_eq!(recall_score(&["talk".to_string()], &chunk), 4);
        assert_eq!(recall_score(&["none".to_string()], &chunk), 0);
    }

    #[tokio::test]
    async fn test_recall_by_time() {
        let store = ArchiveStore::in_memory();
        let now = Utc::now();
        let early = store
            .archive_messages(&[Message::user("first").with_timestamp(now - Duration::days(2))], "c", ArchiveReason::ManualArchive)
            .await
            .unwrap();
        let recent = store
            .archive_messages(&[Message::user("second").with_timestamp(now - Duration::hours(1))], "c", ArchiveReason::ManualArchive)
            .await
            .unwrap();

        let r = store.recall_history_by_time("c", "recent", 1).await.unwrap();
        assert_eq!(r[0].id, recent.id);
        let e = store.recall_history_by_time("c", "early", 1).await.unwrap();
        assert_eq!(e[0].id, early.id);
        let other = store.recall_history_by_time("c", "whenever", 5).await.unwrap();
        assert_eq!(other[0].id, recent.id);
        assert_eq!(other.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_map_and_hint() {
        let store = ArchiveStore::in_memory();
        assert!(store.memory_map_hint("c").await.unwrap().is_none());

        let start = Utc::now() - Duration::hours(3);
        let a = store.archive_messages(&conversation(start), "c", ArchiveReason::YarnCompression).await.unwrap();
        let b = store
            .archive_messages(&[Message::user("engines again and again")], "c", ArchiveReason::ManualArchive)
            .await
            .unwrap();

        let map = store.get_memory_map("c").await.unwrap();
        assert_eq!(map.total_chunks, 2);
        assert_eq!(map.total_tokens_archived, a.token_count + b.token_count);
        assert_eq!(map.chunks[0].id, b.id);

        let hint = store.memory_map_hint("c").await.unwrap().unwrap();
        assert!(hint.starts_with("2 archived chunk(s)"));
        assert!(hint.contains("engines"));
    }

    #[tokio::test]
    async fn test_get_chunk_and_delete() {
        let store = ArchiveStore::in_memory();
        let chunk = store
            .archive_messages(&[Message::user("keep me")], "c", ArchiveReason::ManualArchive)
            .await
            .unwrap();
        assert_eq!(store.get_chunk("c", &chunk.id).await.unwrap(), chunk);
        assert!(matches!(
            store.get_chunk("c", "nope").await,
            Err(ArchiveError::ChunkNotFound(_))
        ));

        assert!(store.delete_conversation_archive("c").await.unwrap());
        assert!(store.get_memory_map("c").await.unwrap().chunks.is_empty());
    }

    #[tokio::test]
    async fn test_topic_aggregation() {
        let store = ArchiveStore::in_memory();
        store
            .archive_messages(&[Message::user("budget review for rocket")], "a", ArchiveReason::ManualArchive)
            .await
            .unwrap();
        store
            .archive_messages(&[Message::user("rocket budget budget")], "b", ArchiveReason::ManualArchive)
            .await
            .unwrap();
        store
            .archive_messages(&[Message::user("unrelated")], "z", ArchiveReason::ManualArchive)
            .await
            .unwrap();

        let directory = |topic: &str| -> Vec<String> {
            if topic == "space" {
                vec!["a".to_string(), "b".to_string()]
            } else {
                Vec::new()
            }
        };

        let hits = store.recall_topic_history("space", "rocket budget", &directory, 10).await;
        assert_eq!(hits.len(), 2);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        let map = store.get_topic_memory_map("space", &directory).await;
        assert_eq!(map.conversations.len(), 2);
        assert_eq!(map.total_chunks, 2);
        assert!(store.get_topic_memory_map("other", &directory).await.conversations.is_empty());
    }
}
