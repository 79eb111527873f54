//! 存储层：每会话 SQLite 库的连接池与公共编解码

pub mod pool;

pub use pool::{ConnectionPool, ConversationDatabase, StorageLocation};

/// f32 向量 -> 小端字节（BLOB 列）
pub fn f32_slice_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// 小端字节 -> f32 向量；尾部不足 4 字节的部分丢弃
pub fn blob_to_f32_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// 文件库打开后的通用设置
pub(crate) fn configure_connection(conn: &rusqlite::Connection, file_backed: bool) -> rusqlite::Result<()> {
    if file_backed {
        // journal_mode 会返回一行结果，不能用 execute
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_codec() {
        let v = vec![0.5f32, -1.25, 3.0];
        assert_eq!(blob_to_f32_vec(&f32_slice_to_blob(&v)), v);
        assert!(blob_to_f32_vec(&[1, 2, 3]).is_empty());
    }
}
