//! 上下文处理器（YaRN）
//!
//! 按估算的总 token 数选择三档之一：
//! - **direct**：总量不超过基础窗口，原样通过
//! - **scaling**：总量不超过扩展窗口，不丢消息，只给出注意力缩放系数
//! - **compression**：超出扩展窗口，保留首尾消息，中间按重要度/相关度择优回填
//!
//! 结果按会话缓存；消息数变化、配置更新或显式清理时失效。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::config::{ContextSection, MemorySection};
use crate::context::profile::{ContextProfile, YarnConfig};
use crate::core::MemoryError;
use crate::memory::token_budget::{truncate_to_sentences, HeuristicEstimator, TokenEstimator};
use crate::memory::{Message, MemoryStore};

/// 代码块标记
const CODE_MARKER: &str = "```";

/// 找不到相关记忆时的默认相关度
const DEFAULT_RELEVANCE: f64 = 0.3;

const PRESERVE_IMPORTANCE: f64 = 0.7;
const PRESERVE_RELEVANCE: f64 = 0.8;

/// 处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMethod {
    Direct,
    Scaling,
    Compression,
}

/// 一次处理的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedContext {
    pub conversation_id: String,
    pub messages: Vec<Message>,
    pub token_count: usize,
    pub compression_applied: bool,
    pub attention_scaling: f64,
    pub processing_method: ProcessingMethod,
    pub processed_at: DateTime<Utc>,
}

/// 压缩与增强检索的可调参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionOptions {
    pub preserve_head: usize,
    pub preserve_tail: usize,
    /// 回填时累计 token 不超过 target × packing_ratio
    pub packing_ratio: f64,
    pub relevance_top_k: usize,
    pub relevance_threshold: f32,
    pub augmented_limit: usize,
    pub augmented_threshold: f32,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            preserve_head: 2,
            preserve_tail: 10,
            packing_ratio: 0.8,
            relevance_top_k: 5,
            relevance_threshold: 0.3,
            augmented_limit: 15,
            augmented_threshold: 0.3,
        }
    }
}

impl CompressionOptions {
    pub fn from_config(context: &ContextSection, memory: &MemorySection) -> Self {
        Self {
            preserve_head: context.preserve_head,
            preserve_tail: context.preserve_tail,
            packing_ratio: context.packing_ratio.clamp(0.0, 1.0),
            relevance_top_k: context.relevance_top_k,
            relevance_threshold: memory.default_threshold,
            augmented_limit: memory.augmented_limit,
            augmented_threshold: memory.augmented_threshold,
        }
    }
}

/// 处理器统计快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextStatistics {
    pub profile: ContextProfile,
    pub config: YarnConfig,
    pub cached_conversations: usize,
    /// 最近一次处理的 新 token / 原 token
    pub last_compression_ratio: f64,
    pub last_attention_scaling: f64,
    pub processed_count: u64,
    pub compressed_count: u64,
}

#[derive(Debug, Clone, Copy)]
struct ContextMetrics {
    last_compression_ratio: f64,
    last_attention_scaling: f64,
    processed_count: u64,
    compressed_count: u64,
}

impl Default for ContextMetrics {
    fn default() -> Self {
        Self {
            last_compression_ratio: 1.0,
            last_attention_scaling: 1.0,
            processed_count: 0,
            compressed_count: 0,
        }
    }
}

/// 缓存项：记录产生该结果的输入消息数（压缩后输出条数会变少）
struct CachedContext {
    source_len: usize,
    result: ProcessedContext,
}

/// 配置与其代号；代号变化后，处理中途得到的结果不再写入缓存
struct ConfigState {
    yarn: YarnConfig,
    generation: u64,
}

/// 上下文处理器
pub struct ContextProcessor {
    memory: Arc<MemoryStore>,
    estimator: Arc<dyn TokenEstimator>,
    options: CompressionOptions,
    config: RwLock<ConfigState>,
    cache: RwLock<HashMap<String, CachedContext>>,
    metrics: Mutex<ContextMetrics>,
}

impl ContextProcessor {
    pub fn new(memory: Arc<MemoryStore>, config: YarnConfig) -> Self {
        Self {
            memory,
            estimator: Arc::new(HeuristicEstimator),
            options: CompressionOptions::default(),
            config: RwLock::new(ConfigState {
                yarn: config,
                generation: 0,
            }),
            cache: RwLock::new(HashMap::new()),
            metrics: Mutex::new(ContextMetrics::default()),
        }
    }

    /// 注入宿主的 token 估算器
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_options(mut self, options: CompressionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &CompressionOptions {
        &self.options
    }

    pub async fn config(&self) -> YarnConfig {
        self.config.read().await.yarn
    }

    /// 处理一段消息历史；target_tokens 为空时使用 extended × compression_threshold
    pub async fn process_conversation_context(
        &self,
        messages: &[Message],
        conversation_id: &str,
        target_tokens: Option<usize>,
    ) -> Result<ProcessedContext, MemoryError> {
        let (config, generation) = {
            let state = self.config.read().await;
            (state.yarn, state.generation)
        };
        let target = target_tokens.unwrap_or_else(|| config.default_target());

        if let Some(cached) = self.cache.read().await.get(conversation_id) {
            if cached.source_len == messages.len() && cached.result.token_count <= target {
                tracing::debug!(conversation_id, "context cache hit");
                return Ok(cached.result.clone());
            }
        }

        let mut estimates = Vec::with_capacity(messages.len());
        for m in messages {
            estimates.push(self.estimator.estimate(&m.content).await);
        }
        let total: usize = estimates.iter().sum();

        let (kept, token_count, method, attention) = if total <= config.base_context_length {
            (messages.to_vec(), total, ProcessingMethod::Direct, 1.0)
        } else if total <= config.extended_context_length {
            let attention = scaling_attention(&config, target, total);
            (messages.to_vec(), total, ProcessingMethod::Scaling, attention)
        } else {
            let (kept, new_tokens) = self
                .compress(messages, &estimates, target, conversation_id)
                .await?;
            let ratio = new_tokens as f64 / total as f64;
            let attention = compression_attention(&config, ratio);
            (kept, new_tokens, ProcessingMethod::Compression, attention)
        };

        let result = ProcessedContext {
            conversation_id: conversation_id.to_string(),
            compression_applied: method == ProcessingMethod::Compression,
            messages: kept,
            token_count,
            attention_scaling: attention,
            processing_method: method,
            processed_at: Utc::now(),
        };

        {
            let mut metrics = self.metrics.lock().await;
            metrics.processed_count += 1;
            if result.compression_applied {
                metrics.compressed_count += 1;
            }
            metrics.last_compression_ratio = if total == 0 {
                1.0
            } else {
                token_count as f64 / total as f64
            };
            metrics.last_attention_scaling = attention;
        }

        if self.config.read().await.generation == generation {
            self.cache
                .write()
                .await
                .insert(
                    conversation_id.to_string(),
                    CachedContext {
                        source_len: messages.len(),
                        result: result.clone(),
                    },
                );
        }

        tracing::debug!(
            conversation_id,
            method = ?result.processing_method,
            original_tokens = total,
            tokens = result.token_count,
            target,
            messages_in = messages.len(),
            messages_out = result.messages.len(),
            attention = result.attention_scaling,
            "processed conversation context"
        );
        Ok(result)
    }

    /// 压缩档：保留首尾，中间值得保留的消息按重要度降序回填，最后按时间排序
    async fn compress(
        &self,
        messages: &[Message],
        estimates: &[usize],
        target: usize,
        conversation_id: &str,
    ) -> Result<(Vec<Message>, usize), MemoryError> {
        let n = messages.len();
        let head_end = self.options.preserve_head.min(n);
        let tail_start = n.saturating_sub(self.options.preserve_tail).max(head_end);

        let mut keep: Vec<usize> = (0..head_end).chain(tail_start..n).collect();
        let mut used: usize = keep.iter().map(|&i| estimates[i]).sum();

        let mut candidates: Vec<(usize, f64)> = Vec::new();
        for i in head_end..tail_start {
            let importance = message_importance(i, n, &messages[i].content);
            let relevance = self.relevance(&messages[i].content, conversation_id).await?;
            if importance > PRESERVE_IMPORTANCE || relevance > PRESERVE_RELEVANCE {
                candidates.push((i, importance));
            }
        }
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let budget = (target as f64 * self.options.packing_ratio).floor() as usize;
        for (i, _) in candidates {
            if used + estimates[i] > budget {
                break;
            }
            used += estimates[i];
            keep.push(i);
        }

        keep.sort_unstable();
        let mut kept: Vec<Message> = keep.into_iter().map(|i| messages[i].clone()).collect();
        kept.sort_by_key(|m| m.timestamp);
        Ok((kept, used))
    }

    /// 与该消息最相关的前 k 条记忆的平均得分；没有命中时为 0.3
    async fn relevance(&self, content: &str, conversation_id: &str) -> Result<f64, MemoryError> {
        let hits = self
            .memory
            .retrieve_relevant_memories(
                content,
                conversation_id,
                self.options.relevance_top_k,
                self.options.relevance_threshold,
            )
            .await?;
        if hits.is_empty() {
            return Ok(DEFAULT_RELEVANCE);
        }
        let sum: f64 = hits.iter().map(|h| f64::from(h.similarity)).sum();
        Ok(sum / hits.len() as f64)
    }

    /// 在 max_tokens 内拼出最相关记忆的文本块
    ///
    /// 放不下的那条按句子边界截断（保留首句与末句），随后停止。
    pub async fn retrieve_augmented_memory_context(
        &self,
        query: &str,
        conversation_id: &str,
        max_tokens: usize,
    ) -> Result<String, MemoryError> {
        let memories = self
            .memory
            .retrieve_relevant_memories(
                query,
                conversation_id,
                self.options.augmented_limit,
                self.options.augmented_threshold,
            )
            .await?;

        let mut parts: Vec<String> = Vec::new();
        let mut used = 0usize;
        for memory in memories {
            let remaining = max_tokens.saturating_sub(used);
            if remaining == 0 {
                break;
            }
            let cost = self.estimator.estimate(&memory.content).await;
            if cost <= remaining {
                used += cost;
                parts.push(memory.content);
                continue;
            }
            if let Some(truncated) =
                truncate_to_sentences(&memory.content, remaining, self.estimator.as_ref()).await
            {
                used += self.estimator.estimate(&truncated).await;
                parts.push(truncated);
            }
            break;
        }

        tracing::debug!(conversation_id, memories = parts.len(), tokens = used, max_tokens, "assembled memory context");
        Ok(parts.join("\n\n"))
    }

    /// 切换配置并清空缓存
    pub async fn update_config(&self, config: YarnConfig) {
        {
            let mut state = self.config.write().await;
            state.yarn = config;
            state.generation += 1;
        }
        self.clear_cache().await;
        tracing::info!(profile = config.profile.as_str(), "context config updated");
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    /// 丢弃单个会话的缓存结果
    pub async fn invalidate(&self, conversation_id: &str) -> bool {
        self.cache.write().await.remove(conversation_id).is_some()
    }

    pub async fn get_context_statistics(&self) -> ContextStatistics {
        let config = self.config().await;
        let cached_conversations = self.cache.read().await.len();
        let metrics = *self.metrics.lock().await;
        ContextStatistics {
            profile: config.profile,
            config,
            cached_conversations,
            last_compression_ratio: metrics.last_compression_ratio,
            last_attention_scaling: metrics.last_attention_scaling,
            processed_count: metrics.processed_count,
            compressed_count: metrics.compressed_count,
        }
    }
}

/// 单条消息的重要度，范围 [0, 1]
///
/// 开头两条固定为 1.0；其余从 0.5 起，越靠后越高（+0.3 × 位置比例），
/// 长消息 +0.1，含问号 +0.15，含代码块 +0.2。
pub fn message_importance(index: usize, count: usize, content: &str) -> f64 {
    let mut score = if index < 2 { 1.0 } else { 0.5 };
    if count > 0 {
        score += 0.3 * index as f64 / count as f64;
    }
    if content.chars().count() > 500 {
        score += 0.1;
    }
    if content.contains('?') || content.contains('？') {
        score += 0.15;
    }
    if content.contains(CODE_MARKER) {
        score += 0.2;
    }
    score.min(1.0)
}

/// scaling 档：clamp(sf × (1 − af × ln(target / total)), 0.1, 2.0)
fn scaling_attention(config: &YarnConfig, target: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    let ratio = target as f64 / total as f64;
    let raw = config.scaling_factor * (1.0 - config.attention_factor * ratio.ln());
    if raw.is_nan() {
        return 1.0;
    }
    raw.clamp(0.1, 2.0)
}

/// compression 档：clamp(1 + (1 − ratio) × af, 0.5, 1.5)
fn compression_attention(config: &YarnConfig, ratio: f64) -> f64 {
    (1.0 + (1.0 - ratio) * config.attention_factor).clamp(0.5, 1.5)
}
