//! 词法伪向量：嵌入后端不可用时的确定性降级
//!
//! 256 维，词袋 + 字符三元组哈希（FNV-1a），L2 归一化。语义检索因此退化为词法检索而不是失败。

use crate::memory::tokenizer;

/// 伪向量维度
pub const LEXICAL_DIMENSIONS: usize = 256;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

/// 确定性词法嵌入器
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalEmbedder;

impl LexicalEmbedder {
    pub fn new() -> Self {
        Self
    }

    /// 生成伪向量；空文本得到全零向量
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; LEXICAL_DIMENSIONS];
        for word in tokenizer::tokenize(text) {
            v[bucket(&word)] += WORD_WEIGHT;
            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let gram: String = window.iter().collect();
                v[bucket(&gram)] += TRIGRAM_WEIGHT;
            }
        }
        l2_normalize(&mut v);
        v
    }
}

fn bucket(token: &str) -> usize {
    (fnv1a(token.as_bytes()) % LEXICAL_DIMENSIONS as u64) as usize
}

/// FNV-1a 64 位哈希；跨进程、跨版本稳定
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// 原地 L2 归一化；零向量保持不变
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// 余弦相似度，截断到 [0, 1]；维度不一致或任一为零向量时为 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
    }
}
