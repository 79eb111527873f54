//! 串行化嵌入入口
//!
//! 嵌入后端在并发调用下不安全，因此进程内所有 embed 调用（任何会话、任何组件）
//! 都通过同一把全局异步锁排队。调用方在 await 处挂起等待轮到自己，不阻塞线程。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::EmbeddingError;
use crate::llm::lexical::{cosine_similarity, LexicalEmbedder, LEXICAL_DIMENSIONS};
use crate::llm::EmbeddingProvider;

/// 进程级串行点：与 runtime 无关，可在多个 tokio runtime 间共享
static BACKEND_GATE: Mutex<()> = Mutex::const_new(());

/// 默认输入字符上限
pub const DEFAULT_MAX_INPUT_CHARS: usize = 8000;

/// 嵌入入口：截断超长输入、串行化后端调用、无后端时使用词法伪向量
///
/// 后端在构造时确定且之后不再切换，保证同一存储内向量维度恒定。
pub struct Embedder {
    backend: Option<Arc<dyn EmbeddingProvider>>,
    fallback: LexicalEmbedder,
    max_input_chars: usize,
    calls: AtomicU64,
}

impl Embedder {
    /// 使用给定后端；None 表示始终使用词法伪向量
    pub fn new(backend: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            backend,
            fallback: LexicalEmbedder::new(),
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            calls: AtomicU64::new(0),
        }
    }

    /// 仅使用词法伪向量
    pub fn lexical() -> Self {
        Self::new(None)
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars.max(1);
        self
    }

    /// 是否接入了真实后端
    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// 当前向量维度
    pub fn dimensions(&self) -> usize {
        self.backend
            .as_ref()
            .map(|b| b.dimensions())
            .unwrap_or(LEXICAL_DIMENSIONS)
    }

    /// 已完成的 embed 调用次数
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// 文本 -> 向量。空白文本直接得到零向量，不占用后端
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = truncate_chars(text.trim(), self.max_input_chars);
        if text.is_empty() {
            return Ok(vec![0.0; self.dimensions()]);
        }

        let _turn = BACKEND_GATE.lock().await;
        let result = match &self.backend {
            Some(backend) => {
                let v = backend.embed(text).await?;
                if v.is_empty() {
                    return Err(EmbeddingError::VectorGenerationFailed(
                        "backend returned an empty vector".into(),
                    ));
                }
                v
            }
            None => self.fallback.embed_text(text),
        };
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(result)
    }

    /// 两段文本的语义相似度，范围 [0, 1]
    pub async fn pairwise_similarity(&self, a: &str, b: &str) -> Result<f32, EmbeddingError> {
        let va = self.embed(a).await?;
        let vb = self.embed(b).await?;
        Ok(cosine_similarity(&va, &vb))
    }
}

impl Default for Embedder {
    fn default() -> Self {
        Self::lexical()
    }
}

/// 按字符数截断（UTF-8 安全）
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
