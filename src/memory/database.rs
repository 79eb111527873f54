//! 每会话记忆库（SQLite）
//!
//! 表 `memories`：id, conversation_id, content, content_type, embedding(BLOB), importance,
//! created_at, access_count, last_accessed, tags(JSON)；按 conversation_id / created_at / importance 建索引。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::core::MemoryError;
use crate::memory::types::{ContentType, MemoryEntry, MemoryStatistics};
use crate::storage::{blob_to_f32_vec, configure_connection, f32_slice_to_blob, ConversationDatabase};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    content TEXT NOT NULL,
    content_type TEXT NOT NULL,
    embedding BLOB,
    importance REAL NOT NULL,
    created_at TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    tags TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_memories_conversation ON memories(conversation_id);
CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at);
CREATE INDEX IF NOT EXISTS idx_memories_importance ON memories(importance);
";

/// SELECT 列顺序，与 [`entry_from_row`] 对应
pub(crate) const ENTRY_COLUMNS: &str = "id, conversation_id, content, content_type, embedding, \
     importance, created_at, access_count, last_accessed, tags";

/// 从一行还原记忆条目（similarity 置 0）；tags 列不是合法 JSON 数组时报错
pub(crate) fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let content_type: String = row.get(3)?;
    let embedding: Option<Vec<u8>> = row.get(4)?;
    let importance: f64 = row.get(5)?;
    let access_count: i64 = row.get(7)?;
    let tags_json: String = row.get(9)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(MemoryEntry {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        content: row.get(2)?,
        content_type: ContentType::parse(&content_type),
        embedding: embedding.map(|b| blob_to_f32_vec(&b)),
        importance: (importance as f32).clamp(0.0, 1.0),
        created_at: row.get(6)?,
        access_count: access_count.max(0) as u32,
        last_accessed: row.get(8)?,
        tags,
        similarity: 0.0,
    })
}

/// 单个会话的记忆库
pub struct MemoryDatabase {
    conversation_id: String,
    conn: Mutex<Connection>,
}

impl ConversationDatabase for MemoryDatabase {
    type Error = MemoryError;
    const FILE_PREFIX: &'static str = "memories";

    fn open(path: Option<&Path>, conversation_id: &str) -> Result<Self, MemoryError> {
        let init = |e: String| MemoryError::InitializationFailed(e);
        let conn = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| init(e.to_string()))?;
                }
                Connection::open(path).map_err(|e| init(e.to_string()))?
            }
            None => Connection::open_in_memory().map_err(|e| init(e.to_string()))?,
        };
        configure_connection(&conn, path.is_some()).map_err(|e| init(e.to_string()))?;
        conn.execute_batch(SCHEMA).map_err(|e| init(e.to_string()))?;
        Ok(Self {
            conversation_id: conversation_id.to_string(),
            conn: Mutex::new(conn),
        })
    }
}

impl MemoryDatabase {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, MemoryError> {
        self.conn
            .lock()
            .map_err(|_| MemoryError::OperationFailed("memory connection lock poisoned".into()))
    }

    /// 写入新条目
    pub fn insert(&self, entry: &MemoryEntry) -> Result<(), MemoryError> {
        let conn = self.conn()?;
        Self::insert_with(&conn, entry, "INSERT")
            .map(|_| ())
            .map_err(|e| MemoryError::StorageFailed(e.to_string()))
    }

    /// 导入条目（id 已存在时跳过）；返回是否实际写入
    pub fn import(&self, entry: &MemoryEntry) -> Result<bool, MemoryError> {
        let conn = self.conn()?;
        Self::insert_with(&conn, entry, "INSERT OR IGNORE")
            .map(|n| n > 0)
            .map_err(|e| MemoryError::StorageFailed(e.to_string()))
    }

    fn insert_with(conn: &Connection, entry: &MemoryEntry, verb: &str) -> rusqlite::Result<usize> {
        let tags = serde_json::to_string(&entry.tags).unwrap_or_else(|_| "[]".to_string());
        let sql = format!(
            "{} INTO memories ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            verb, ENTRY_COLUMNS
        );
        conn.execute(
            &sql,
            params![
                entry.id,
                entry.conversation_id,
                entry.content,
                entry.content_type.as_str(),
                entry.embedding.as_deref().map(f32_slice_to_blob),
                f64::from(entry.importance),
                entry.created_at,
                i64::from(entry.access_count),
                entry.last_accessed,
                tags,
            ],
        )
    }

    /// 读取全部条目；newest_first 为 false 时按写入顺序
    pub fn load_entries(&self, newest_first: bool) -> Result<Vec<MemoryEntry>, MemoryError> {
        let order = if newest_first {
            "created_at DESC, rowid DESC"
        } else {
            "rowid ASC"
        };
        let sql = format!("SELECT {} FROM memories ORDER BY {}", ENTRY_COLUMNS, order);
        let retrieval = |e: rusqlite::Error| MemoryError::RetrievalFailed(e.to_string());

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(retrieval)?;
        let rows = stmt.query_map([], entry_from_row).map_err(retrieval)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(retrieval)
    }

    /// 记录一次访问：access_count + 1，last_accessed = at
    pub fn record_access(&self, ids: &[String], at: DateTime<Utc>) -> Result<(), MemoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        let failed = |e: rusqlite::Error| MemoryError::RetrievalFailed(e.to_string());
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(failed)?;
        {
            let mut stmt = tx
                .prepare(
                    "UPDATE memories SET access_count = access_count + 1, last_accessed = ?1 WHERE id = ?2",
                )
                .map_err(failed)?;
            for id in ids {
                stmt.execute(params![at, id]).map_err(failed)?;
            }
        }
        tx.commit().map_err(failed)
    }

    /// 删除全部条目，返回删除数
    pub fn clear(&self) -> Result<usize, MemoryError> {
        self.conn()?
            .execute("DELETE FROM memories", [])
            .map_err(|e| MemoryError::OperationFailed(e.to_string()))
    }

    pub fn count(&self) -> Result<usize, MemoryError> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .map_err(|e| MemoryError::RetrievalFailed(e.to_string()))?;
        Ok(n.max(0) as usize)
    }

    /// 聚合统计
    pub fn statistics(&self) -> Result<MemoryStatistics, MemoryError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT COUNT(*), AVG(importance), SUM(access_count), MIN(created_at), MAX(created_at)
                 FROM memories",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<DateTime<Utc>>>(3)?,
                        row.get::<_, Option<DateTime<Utc>>>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| MemoryError::RetrievalFailed(e.to_string()))?;

        let Some((count, avg, accesses, oldest, newest)) = row else {
            return Ok(MemoryStatistics {
                conversation_id: self.conversation_id.clone(),
                ..Default::default()
            });
        };
        Ok(MemoryStatistics {
            conversation_id: self.conversation_id.clone(),
            count: count.max(0) as usize,
            average_importance: avg.unwrap_or(0.0) as f32,
            total_accesses: accesses.unwrap_or(0).max(0) as u64,
            oldest,
            newest,
        })
    }

    /// 按内容类型计数
    pub fn type_counts(&self) -> Result<Vec<(ContentType, usize)>, MemoryError> {
        let failed = |e: rusqlite::Error| MemoryError::RetrievalFailed(e.to_string());
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT content_type, COUNT(*) FROM memories GROUP BY content_type")
            .map_err(failed)?;
        let rows = stmt
            .query_map([], |row| {
                let t: String = row.get(0)?;
                let n: i64 = row.get(1)?;
                Ok((ContentType::parse(&t), n.max(0) as usize))
            })
            .map_err(failed)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(failed)
    }

    /// 自 since 起创建的条目数
    pub fn count_since(&self, since: DateTime<Utc>) -> Result<usize, MemoryError> {
        let n: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE created_at >= ?1",
                params![since],
                |row| row.get(0),
            )
            .map_err(|e| MemoryError::RetrievalFailed(e.to_string()))?;
        Ok(n.max(0) as usize)
    }

    /// 重要度总和（用于跨会话平均）
    pub fn importance_sum(&self) -> Result<f64, MemoryError> {
        let sum: Option<f64> = self
            .conn()?
            .query_row("SELECT SUM(importance) FROM memories", [], |row| row.get(0))
            .map_err(|e| MemoryError::RetrievalFailed(e.to_string()))?;
        Ok(sum.unwrap_or(0.0))
    }
}
