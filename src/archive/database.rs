//! 每会话归档库（SQLite）

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::archive::types::{ArchiveChunk, ArchiveReason, ArchivedMessage};
use crate::core::ArchiveError;
use crate::storage::{configure_connection, ConversationDatabase};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS archive_chunks (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    messages TEXT NOT NULL,
    time_start TEXT NOT NULL,
    time_end TEXT NOT NULL,
    summary TEXT NOT NULL,
    key_topics TEXT NOT NULL,
    token_count INTEGER NOT NULL,
    reason TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_archive_conversation ON archive_chunks(conversation_id);
CREATE INDEX IF NOT EXISTS idx_archive_time_start ON archive_chunks(time_start);
";

const CHUNK_COLUMNS: &str =
    "id, conversation_id, messages, time_start, time_end, summary, key_topics, token_count, reason, created_at";

/// 还原时 JSON 列解析失败会以 FromSqlConversionFailure 的形式返回
fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<ArchiveChunk> {
    let messages_json: String = row.get(2)?;
    let topics_json: String = row.get(6)?;
    let token_count: i64 = row.get(7)?;
    let reason: String = row.get(8)?;

    let messages: Vec<ArchivedMessage> = serde_json::from_str(&messages_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e)))?;
    let key_topics: Vec<String> = serde_json::from_str(&topics_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(ArchiveChunk {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        messages,
        time_start: row.get(3)?,
        time_end: row.get(4)?,
        summary: row.get(5)?,
        key_topics,
        token_count: token_count.max(0) as usize,
        reason: ArchiveReason::parse(&reason),
        created_at: row.get(9)?,
    })
}

/// 时间排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOrder {
    NewestFirst,
    OldestFirst,
}

/// 单个会话的归档库
pub struct ArchiveDatabase {
    conn: Mutex<Connection>,
}

impl ConversationDatabase for ArchiveDatabase {
    type Error = ArchiveError;
    const FILE_PREFIX: &'static str = "archive";

    fn open(path: Option<&Path>, _conversation_id: &str) -> Result<Self, ArchiveError> {
        let conn = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| ArchiveError::DatabaseError(e.to_string()))?;
                }
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        configure_connection(&conn, path.is_some())?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ArchiveDatabase {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ArchiveError> {
        self.conn
            .lock()
            .map_err(|_| ArchiveError::DatabaseError("archive connection lock poisoned".into()))
    }

    pub fn insert(&self, chunk: &ArchiveChunk) -> Result<(), ArchiveError> {
        let messages = serde_json::to_string(&chunk.messages)?;
        let topics = serde_json::to_string(&chunk.key_topics)?;
        let sql = format!(
            "INSERT INTO archive_chunks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            CHUNK_COLUMNS
        );
        self.conn()?.execute(
            &sql,
            params![
                chunk.id,
                chunk.conversation_id,
                messages,
                chunk.time_start,
                chunk.time_end,
                chunk.summary,
                topics,
                chunk.token_count as i64,
                chunk.reason.as_str(),
                chunk.created_at,
            ],
        )?;
        Ok(())
    }

    /// 全部归档块，按起始时间排序
    pub fn load_all(&self, order: TimeOrder) -> Result<Vec<ArchiveChunk>, ArchiveError> {
        let order = match order {
            TimeOrder::NewestFirst => "time_start DESC, rowid DESC",
            TimeOrder::OldestFirst => "time_start ASC, rowid ASC",
        };
        let sql = format!("SELECT {} FROM archive_chunks ORDER BY {}", CHUNK_COLUMNS, order);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], chunk_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get(&self, chunk_id: &str) -> Result<Option<ArchiveChunk>, ArchiveError> {
        let sql = format!("SELECT {} FROM archive_chunks WHERE id = ?1", CHUNK_COLUMNS);
        let conn = self.conn()?;
        Ok(conn.query_row(&sql, params![chunk_id], chunk_from_row).optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use crate::memory::Role;

    fn chunk(id: &str, minutes_ago: i64) -> ArchiveChunk {
        let at = Utc::now() - Duration::minutes(minutes_ago);
        ArchiveChunk {
            id: id.to_string(),
            conversation_id: "c".into(),
            messages: vec![ArchivedMessage {
                id: format!("{}-m", id),
                content: "hello".into(),
                is_from_user: true,
                timestamp: at,
                role: Role::User,
            }],
            time_start: at,
            time_end: at,
            summary: "User: hello".into(),
            key_topics: vec!["hello".into()],
            token_count: 1,
            reason: ArchiveReason::ManualArchive,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_load_ordering() {
        let db = ArchiveDatabase::open(None, "c").unwrap();
        db.insert(&chunk("old", 60)).unwrap();
        db.insert(&chunk("new", 1)).unwrap();

        let newest: Vec<String> = db.load_all(TimeOrder::NewestFirst).unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(newest, vec!["new", "old"]);
        let oldest: Vec<String> = db.load_all(TimeOrder::OldestFirst).unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(oldest, vec!["old", "new"]);
    }

    #[test]
    fn test_get_round_trip() {
        let db = ArchiveDatabase::open(None, "c").unwrap();
        let original = chunk("x", 5);
        db.insert(&original).unwrap();
        let loaded = db.get("x").unwrap().unwrap();
        assert_eq!(loaded.messages, original.messages);
        assert_eq!(loaded.key_topics, original.key_topics);
        assert_eq!(loaded.reason, ArchiveReason::ManualArchive);
        assert!(db.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let db = ArchiveDatabase::open(None, "c").unwrap();
        db.insert(&chunk("dup", 1)).unwrap();
        assert!(matches!(db.insert(&chunk("dup", 2)), Err(ArchiveError::DatabaseError(_))));
    }
}
