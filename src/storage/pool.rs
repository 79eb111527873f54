//! 每会话连接池
//!
//! 每个会话对应一个独立的 SQLite 库，首次使用时打开并缓存，直到显式 close / remove。
//! 库文件名为 `<前缀>-<会话 ID 的十六进制>.sqlite`，因此可以从数据目录反推出会话 ID，
//! 进程重启后也能发现尚未打开的会话。
//!
//! 池只负责连接的生命周期；同一会话内的操作由调用方保证串行。

use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;

/// 存储位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// 每会话一个文件，位于该目录下
    Directory(PathBuf),
    /// 每会话一个独立的内存库，进程退出即丢失
    InMemory,
}

/// 可按会话打开的数据库
pub trait ConversationDatabase: Send + Sync + Sized + 'static {
    type Error: Display;

    /// 库文件名前缀，不同种类的库互不冲突
    const FILE_PREFIX: &'static str;

    /// 打开（必要时创建）会话库；path 为 None 表示内存库
    fn open(path: Option<&Path>, conversation_id: &str) -> Result<Self, Self::Error>;
}

/// 每会话连接池
pub struct ConnectionPool<D: ConversationDatabase> {
    location: StorageLocation,
    /// conversation_id -> 已打开的库
    open: RwLock<HashMap<String, Arc<D>>>,
}

impl<D: ConversationDatabase> ConnectionPool<D> {
    pub fn new(location: StorageLocation) -> Self {
        Self {
            location,
            open: RwLock::new(HashMap::new()),
        }
    }

    /// 会话库的文件路径；内存库返回 None
    pub fn path_for(&self, conversation_id: &str) -> Option<PathBuf> {
        match &self.location {
            StorageLocation::Directory(dir) => Some(dir.join(format!(
                "{}-{}.sqlite",
                D::FILE_PREFIX,
                encode_conversation_id(conversation_id)
            ))),
            StorageLocation::InMemory => None,
        }
    }

    /// 获取或打开会话库
    pub async fn get_or_open(&self, conversation_id: &str) -> Result<Arc<D>, D::Error> {
        {
            let open = self.open.read().await;
            if let Some(db) = open.get(conversation_id) {
                return Ok(Arc::clone(db));
            }
        }

        let mut open = self.open.write().await;
        if let Some(db) = open.get(conversation_id) {
            return Ok(Arc::clone(db));
        }

        let path = self.path_for(conversation_id);
        let db = Arc::new(D::open(path.as_deref(), conversation_id)?);
        tracing::info!(
            conversation_id,
            prefix = D::FILE_PREFIX,
            path = ?path,
            "opened conversation store"
        );
        open.insert(conversation_id.to_string(), Arc::clone(&db));
        Ok(db)
    }

    /// 当前已打开的会话 ID（排序）
    pub async fn open_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.open.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 所有已知会话：已打开的 + 数据目录中发现的（排序、去重）
    pub async fn known_ids(&self) -> Vec<String> {
        let mut ids: BTreeSet<String> = self.open.read().await.keys().cloned().collect();
        if let StorageLocation::Directory(dir) = &self.location {
            ids.extend(self.discover(dir));
        }
        ids.into_iter().collect()
    }

    fn discover(&self, dir: &Path) -> Vec<String> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(dir = %dir.display(), error = %e, "failed to scan store directory");
                }
                return Vec::new();
            }
        };
        let prefix = format!("{}-", D::FILE_PREFIX);
        entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let encoded = name.strip_prefix(&prefix)?.strip_suffix(".sqlite")?;
                decode_conversation_id(encoded)
            })
            .collect()
    }

    /// 关闭单个会话库；返回之前是否已打开
    pub async fn close(&self, conversation_id: &str) -> bool {
        self.open.write().await.remove(conversation_id).is_some()
    }

    /// 关闭所有会话库，返回关闭数量
    pub async fn close_all(&self) -> usize {
        let mut open = self.open.write().await;
        let n = open.len();
        open.clear();
        n
    }

    /// 关闭并删除会话库文件（含 WAL / SHM）；返回是否删除了任何东西
    pub async fn remove(&self, conversation_id: &str) -> std::io::Result<bool> {
        let was_open = self.close(conversation_id).await;
        let Some(path) = self.path_for(conversation_id) else {
            return Ok(was_open);
        };

        let mut removed = was_open;
        for suffix in ["", "-wal", "-shm"] {
            let mut p = path.clone().into_os_string();
            p.push(suffix);
            match std::fs::remove_file(&p) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}

/// 会话 ID -> 文件名安全的十六进制串（可逆）
pub fn encode_conversation_id(id: &str) -> String {
    id.bytes().map(|b| format!("{:02x}", b)).collect()
}

/// 十六进制串 -> 会话 ID；格式不合法时返回 None
pub fn decode_conversation_id(encoded: &str) -> Option<String> {
    if encoded.is_empty() || encoded.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..encoded.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(encoded.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}
