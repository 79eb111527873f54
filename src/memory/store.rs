//! 语义记忆存储
//!
//! 每个会话一个持久库（经 [`ConnectionPool`] 懒打开并缓存）。检索得分 =
//! 向量余弦相似度 + 词法加分，其中词法加分 = min(0.5, 0.5 × Jaccard(长度 > 2 的词))。
//! 跨会话检索覆盖所有已知会话：已打开的 + 数据目录中存在库文件的。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::core::MemoryError;
use crate::llm::{cosine_similarity, Embedder};
use crate::memory::database::MemoryDatabase;
use crate::memory::tokenizer;
use crate::memory::types::{ContentType, GlobalMemoryStatistics, MemoryEntry, MemoryStatistics};
use crate::storage::{ConnectionPool, StorageLocation};

/// 词法加分上限
const MAX_LEXICAL_BOOST: f32 = 0.5;

/// 全量列举时的相似度哨兵值
pub const LISTING_SIMILARITY: f32 = 1.0;

/// 「最近」统计窗口（天）
const RECENT_WINDOW_DAYS: i64 = 7;

/// 查询的预处理结果：关键词集合 + 向量（嵌入失败时为 None，所有相似度按 0 计）
struct PreparedQuery {
    keywords: HashSet<String>,
    vector: Option<Vec<f32>>,
}

/// 语义记忆存储
pub struct MemoryStore {
    pool: ConnectionPool<MemoryDatabase>,
    embedder: Arc<Embedder>,
}

impl MemoryStore {
    pub fn new(location: StorageLocation, embedder: Arc<Embedder>) -> Self {
        Self {
            pool: ConnectionPool::new(location),
            embedder,
        }
    }

    /// 全部使用内存库（测试用）
    pub fn in_memory(embedder: Arc<Embedder>) -> Self {
        Self::new(StorageLocation::InMemory, embedder)
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    /// 写入一条记忆，返回其 ID
    ///
    /// 必须先拿到向量（真实或词法伪向量）；嵌入失败直接返回 StorageFailed。
    pub async fn store_memory(
        &self,
        content: &str,
        conversation_id: &str,
        content_type: ContentType,
        importance: f32,
        tags: Vec<String>,
    ) -> Result<String, MemoryError> {
        let embedding = self.embedder.embed(content).await?;
        let db = self.pool.get_or_open(conversation_id).await?;

        let entry = MemoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            content_type,
            embedding: Some(embedding),
            importance: clamp_importance(importance),
            created_at: Utc::now(),
            access_count: 0,
            last_accessed: None,
            tags,
            similarity: 0.0,
        };
        db.insert(&entry)?;
        tracing::debug!(
            conversation_id,
            memory_id = %entry.id,
            content_type = content_type.as_str(),
            importance = entry.importance,
            "stored memory"
        );
        Ok(entry.id)
    }

    /// 检索单个会话中与 query 相关的记忆（按得分降序，同分保持原顺序）
    ///
    /// 返回的每一条都会 access_count + 1 并更新 last_accessed。
    pub async fn retrieve_relevant_memories(
        &self,
        query: &str,
        conversation_id: &str,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let query = self.prepare_query(query).await;
        let db = self.pool.get_or_open(conversation_id).await?;
        let mut hits = score_database(&db, &query, threshold)?;
        hits.truncate(limit);
        record_access(&db, &mut hits)?;
        tracing::debug!(conversation_id, hits = hits.len(), threshold, "retrieved memories");
        Ok(hits)
    }

    /// 跨所有已知会话检索；单个会话失败只记日志并跳过
    pub async fn search_all_conversations(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> Vec<MemoryEntry> {
        let query = self.prepare_query(query).await;
        let mut hits: Vec<MemoryEntry> = Vec::new();
        let mut opened: HashMap<String, Arc<MemoryDatabase>> = HashMap::new();

        for conversation_id in self.pool.known_ids().await {
            let db = match self.pool.get_or_open(&conversation_id).await {
                Ok(db) => db,
                Err(e) => {
                    tracing::warn!(conversation_id = %conversation_id, error = %e, "skipping conversation in global search");
                    continue;
                }
            };
            match score_database(&db, &query, threshold) {
                Ok(found) => hits.extend(found),
                Err(e) => {
                    tracing::warn!(conversation_id = %conversation_id, error = %e, "skipping conversation in global search");
                    continue;
                }
            }
            opened.insert(conversation_id, db);
        }

        sort_by_score(&mut hits);
        hits.truncate(limit);

        let mut by_conversation: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, hit) in hits.iter().enumerate() {
            by_conversation
                .entry(hit.conversation_id.clone())
                .or_default()
                .push(i);
        }
        let now = Utc::now();
        for (conversation_id, indices) in by_conversation {
            let Some(db) = opened.get(&conversation_id) else {
                continue;
            };
            let ids: Vec<String> = indices.iter().map(|&i| hits[i].id.clone()).collect();
            if let Err(e) = db.record_access(&ids, now) {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "failed to record memory access");
                continue;
            }
            for i in indices {
                hits[i].access_count += 1;
                hits[i].last_accessed = Some(now);
            }
        }
        hits
    }

    /// 会话内全部记忆，按创建时间降序；similarity 固定为 1.0
    pub async fn get_all_memories(&self, conversation_id: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        let db = self.pool.get_or_open(conversation_id).await?;
        let mut entries = db.load_entries(true)?;
        for e in &mut entries {
            e.similarity = LISTING_SIMILARITY;
        }
        Ok(entries)
    }

    /// 清空会话当前使用的记忆库（不删除库文件），返回删除条数
    pub async fn clear_memories(&self, conversation_id: &str) -> Result<usize, MemoryError> {
        let db = self.pool.get_or_open(conversation_id).await?;
        let removed = db.clear()?;
        tracing::info!(conversation_id, removed, "cleared memories");
        Ok(removed)
    }

    pub async fn get_memory_statistics(&self, conversation_id: &str) -> Result<MemoryStatistics, MemoryError> {
        let db = self.pool.get_or_open(conversation_id).await?;
        db.statistics()
    }

    /// 全局统计：按类型计数、近 7 天新增、全局平均重要度；单个会话失败只记日志
    pub async fn get_global_memory_statistics(&self) -> GlobalMemoryStatistics {
        let since = Utc::now() - Duration::days(RECENT_WINDOW_DAYS);
        let mut stats = GlobalMemoryStatistics::default();
        let mut importance_sum = 0.0f64;

        for conversation_id in self.pool.known_ids().await {
            let result = async {
                let db = self.pool.get_or_open(&conversation_id).await?;
                Ok::<_, MemoryError>((
                    db.count()?,
                    db.type_counts()?,
                    db.count_since(since)?,
                    db.importance_sum()?,
                ))
            }
            .await;
            match result {
                Ok((count, types, recent, sum)) => {
                    stats.conversation_count += 1;
                    stats.total_memories += count;
                    stats.recent_count += recent;
                    importance_sum += sum;
                    for (t, n) in types {
                        *stats.counts_by_type.entry(t).or_insert(0) += n;
                    }
                }
                Err(e) => {
                    tracing::warn!(conversation_id = %conversation_id, error = %e, "skipping conversation in global statistics");
                }
            }
        }

        if stats.total_memories > 0 {
            stats.average_importance = (importance_sum / stats.total_memories as f64) as f32;
        }
        stats
    }

    /// 关闭并删除会话记忆库文件；返回是否删除了任何东西
    pub async fn delete_conversation_database(&self, conversation_id: &str) -> Result<bool, MemoryError> {
        let removed = self
            .pool
            .remove(conversation_id)
            .await
            .map_err(|e| MemoryError::OperationFailed(e.to_string()))?;
        tracing::info!(conversation_id, removed, "deleted conversation memory database");
        Ok(removed)
    }

    /// 批量导入已有条目（id 已存在时跳过），返回 (写入数, 跳过数)
    pub async fn import_entries(
        &self,
        conversation_id: &str,
        entries: &[MemoryEntry],
    ) -> Result<(usize, usize), MemoryError> {
        let db = self.pool.get_or_open(conversation_id).await?;
        let mut imported = 0;
        let mut skipped = 0;
        for entry in entries {
            if db.import(entry)? {
                imported += 1;
            } else {
                skipped += 1;
            }
        }
        Ok((imported, skipped))
    }

    /// 当前已打开的会话
    pub async fn open_conversations(&self) -> Vec<String> {
        self.pool.open_ids().await
    }

    /// 所有已知会话（含磁盘上尚未打开的）
    pub async fn known_conversations(&self) -> Vec<String> {
        self.pool.known_ids().await
    }

    /// 关闭所有连接
    pub async fn close(&self) -> usize {
        self.pool.close_all().await
    }

    async fn prepare_query(&self, query: &str) -> PreparedQuery {
        let vector = match self.embedder.embed(query).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, similarity degrades to 0");
                None
            }
        };
        PreparedQuery {
            keywords: tokenizer::keyword_set(query),
            vector,
        }
    }
}

fn clamp_importance(importance: f32) -> f32 {
    if importance.is_nan() {
        0.5
    } else {
        importance.clamp(0.0, 1.0)
    }
}

/// 单条记忆的最终得分
fn score_entry(query: &PreparedQuery, entry: &MemoryEntry) -> f32 {
    let similarity = match (&query.vector, &entry.embedding) {
        (Some(q), Some(e)) => cosine_similarity(q, e),
        _ => 0.0,
    };
    let overlap = tokenizer::jaccard_similarity(&query.keywords, &tokenizer::keyword_set(&entry.content));
    let boost = (MAX_LEXICAL_BOOST * overlap).min(MAX_LEXICAL_BOOST);
    similarity + boost
}

/// 稳定降序排序（同分保持原顺序）
fn sort_by_score(entries: &mut [MemoryEntry]) {
    entries.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// 对一个会话库打分、过滤、排序（不截断、不记录访问）
fn score_database(
    db: &MemoryDatabase,
    query: &PreparedQuery,
    threshold: f32,
) -> Result<Vec<MemoryEntry>, MemoryError> {
    let mut hits: Vec<MemoryEntry> = db
        .load_entries(false)?
        .into_iter()
        .map(|mut entry| {
            entry.similarity = score_entry(query, &entry);
            entry
        })
        .filter(|entry| entry.similarity >= threshold)
        .collect();
    sort_by_score(&mut hits);
    Ok(hits)
}

fn record_access(db: &MemoryDatabase, hits: &mut [MemoryEntry]) -> Result<(), MemoryError> {
    if hits.is_empty() {
        return Ok(());
    }
    let now = Utc::now();
    let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
    db.record_access(&ids, now)?;
    for hit in hits.iter_mut() {
        hit.access_count += 1;
        hit.last_accessed = Some(now);
    }
    Ok(())
}
