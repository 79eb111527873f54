//! 旧版共享记忆库迁移
//!
//! 旧版所有会话共用一个库文件（同样的 `memories` 表）。这里提供一次性的显式导入：
//! 只读打开旧库，按 conversation_id 分组写入各自的会话库。重复执行是安全的，
//! 已存在的 id 会被跳过。

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use crate::core::MemoryError;
use crate::memory::database::{entry_from_row, ENTRY_COLUMNS};
use crate::memory::store::MemoryStore;
use crate::memory::types::MemoryEntry;

/// 迁移结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// 涉及的会话数
    pub conversations: usize,
    /// 新写入的条目数
    pub imported: usize,
    /// 目标库中已存在而跳过的条目数
    pub skipped: usize,
}

/// 把旧版共享库导入到按会话划分的存储中
pub async fn migrate_legacy_store(path: &Path, store: &MemoryStore) -> Result<MigrationReport, MemoryError> {
    if !path.exists() {
        return Err(MemoryError::DatabaseNotInitialized);
    }
    let grouped = read_legacy_entries(path)?;

    let mut report = MigrationReport::default();
    for (conversation_id, entries) in grouped {
        let (imported, skipped) = store.import_entries(&conversation_id, &entries).await?;
        tracing::debug!(conversation_id = %conversation_id, imported, skipped, "migrated legacy conversation");
        report.conversations += 1;
        report.imported += imported;
        report.skipped += skipped;
    }

    tracing::info!(
        path = %path.display(),
        conversations = report.conversations,
        imported = report.imported,
        skipped = report.skipped,
        "legacy memory migration finished"
    );
    Ok(report)
}

fn read_legacy_entries(path: &Path) -> Result<BTreeMap<String, Vec<MemoryEntry>>, MemoryError> {
    let init = |e: rusqlite::Error| MemoryError::InitializationFailed(e.to_string());
    let retrieval = |e: rusqlite::Error| MemoryError::RetrievalFailed(e.to_string());

    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(init)?;
    let has_table: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'memories'",
            [],
            |row| row.get(0),
        )
        .map_err(init)?;
    if has_table == 0 {
        return Err(MemoryError::DatabaseNotInitialized);
    }

    let sql = format!("SELECT {} FROM memories ORDER BY rowid ASC", ENTRY_COLUMNS);
    let mut stmt = conn.prepare(&sql).map_err(retrieval)?;
    let rows = stmt.query_map([], entry_from_row).map_err(retrieval)?;

    let mut grouped: BTreeMap<String, Vec<MemoryEntry>> = BTreeMap::new();
    for row in rows {
        let entry = row.map_err(retrieval)?;
        grouped.entry(entry.conversation_id.clone()).or_default().push(entry);
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::llm::Embedder;

    fn write_legacy(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE memories (
                id TEXT PRIMARY KEY, conversation_id TEXT NOT NULL, content TEXT NOT NULL,
                content_type TEXT NOT NULL, embedding BLOB, importance REAL NOT NULL,
                created_at TEXT NOT NULL, access_count INTEGER NOT NULL DEFAULT 0,
                last_accessed TEXT, tags TEXT NOT NULL DEFAULT '[]'
            );
            INSERT INTO memories VALUES ('m1', 'alpha', 'first note', 'userInput', NULL, 0.8,
                '2024-01-01 10:00:00+00:00', 2, NULL, '[\"x\"]');
            INSERT INTO memories VALUES ('m2', 'alpha', 'second note', 'document', NULL, 0.4,
                '2024-01-02 10:00:00+00:00', 0, NULL, '[]');
            INSERT INTO memories VALUES ('m3', 'beta', 'other note', 'bogus', NULL, 3.0,
                '2024-01-03 10:00:00+00:00', 0, NULL, '[]');",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_migrate_groups_by_conversation() {
        let dir = tempfile::TempDir::new().unwrap();
        let legacy = dir.path().join("legacy.sqlite");
        write_legacy(&legacy);

        let store = MemoryStore::in_memory(Arc::new(Embedder::lexical()));
        let report = migrate_legacy_store(&legacy, &store).await.unwrap();
        assert_eq!(
            report,
            MigrationReport {
                conversations: 2,
                imported: 3,
                skipped: 0
            }
        );

        let alpha = store.get_all_memories("alpha").await.unwrap();
        assert_eq!(alpha.len(), 2);
        assert_eq!(alpha[0].content, "second note");
        assert_eq!(alpha[1].tags, vec!["x".to_string()]);
        let beta = store.get_all_memories("beta").await.unwrap();
        assert_eq!(beta[0].importance, 1.0);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let legacy = dir.path().join("legacy.sqlite");
        write_legacy(&legacy);

        let store = MemoryStore::in_memory(Arc::new(Embedder::lexical()));
        migrate_legacy_store(&legacy, &store).await.unwrap();
        let again = migrate_legacy_store(&legacy, &store).await.unwrap();
        assert_eq!(again.imported, 0);
        assert_eq!(again.skipped, 3);
        assert_eq!(store.get_all_memories("alpha").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_legacy_store() {
        let store = MemoryStore::in_memory(Arc::new(Embedder::lexical()));
        let err = migrate_legacy_store(Path::new("/nonexistent/legacy.sqlite"), &store)
            .await
            .unwrap_err();
        assert_eq!(err, MemoryError::DatabaseNotInitialized);
    }
}
