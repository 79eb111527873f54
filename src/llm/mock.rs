//! Mock 嵌入后端（用于测试，无需 API）
//!
//! 复用词法伪向量的思路生成确定性向量，同时记录调用次数、最长输入与最大并发数，
//! 便于验证截断与全局串行化。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::EmbeddingError;
use crate::llm::lexical::l2_normalize;
use crate::llm::EmbeddingProvider;
use crate::memory::tokenizer;

/// Mock 嵌入后端
#[derive(Debug, Default)]
pub struct MockEmbedder {
    dims: usize,
    delay_ms: u64,
    failing: AtomicBool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    longest_input: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            ..Default::default()
        }
    }

    /// 每次调用前等待一段时间，放大并发重叠窗口
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// 之后的调用全部失败
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// 收到的最长输入（字符数）
    pub fn longest_input(&self) -> usize {
        self.longest_input.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.longest_input
            .fetch_max(text.chars().count(), Ordering::SeqCst);

        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        let result = if self.failing.load(Ordering::SeqCst) {
            Err(EmbeddingError::VectorGenerationFailed("mock backend refused".into()))
        } else {
            let mut v = vec![0.0f32; self.dims];
            for word in tokenizer::tokenize(text) {
                let idx = word.bytes().fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
                v[idx % self.dims] += 1.0;
            }
            l2_normalize(&mut v);
            Ok(v)
        };

        self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}
