//! Token 估算与预算内截断
//!
//! 估算器由宿主注入（可能是异步的真实 tokenizer），默认提供字符计数启发式实现。
//! 截断按句子边界进行：保留首句与末句，中间尽量填充，不在词中间截断。

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

/// Token 估算器：每次压缩对每条消息调用一次，应当足够便宜
#[async_trait]
pub trait TokenEstimator: Send + Sync {
    async fn estimate(&self, text: &str) -> usize;
}

/// 简单的字符计数近似：英文约 4 字符/token，中文约 1.5 字符/token
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl HeuristicEstimator {
    /// 同步版本，供不需要 await 的场景使用
    pub fn estimate_sync(text: &str) -> usize {
        let mut ascii_chars = 0usize;
        let mut non_ascii_chars = 0usize;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }
}

#[async_trait]
impl TokenEstimator for HeuristicEstimator {
    async fn estimate(&self, text: &str) -> usize {
        Self::estimate_sync(text)
    }
}

/// 闭包也可以直接作为估算器注入
#[async_trait]
impl<F> TokenEstimator for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    async fn estimate(&self, text: &str) -> usize {
        self(text)
    }
}

static SENTENCE_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn sentence_re() -> Option<&'static Regex> {
    // 句末标点（含中文）后可跟空白；末尾无标点的残句也算一句
    SENTENCE_RE
        .get_or_init(|| Regex::new(r"[^.!?。！？\n]+(?:[.!?。！？]+|\n+|$)").ok())
        .as_ref()
}

/// 切分句子（保留句末标点，去掉首尾空白，丢弃空句）
pub fn split_sentences(text: &str) -> Vec<&str> {
    let Some(re) = sentence_re() else {
        let trimmed = text.trim();
        return if trimmed.is_empty() { Vec::new() } else { vec![trimmed] };
    };
    re.find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 省略标记：首句与末句之间被跳过的部分
pub const ELISION: &str = " … ";

/// 在预算内按句子边界截断
///
/// - 整体放得下：原样返回
/// - 否则保留首句与末句，从前往后尽量填充中间句子，被跳过的部分以省略号标记
/// - 首句 + 末句都放不下时只保留首句；首句也放不下则返回 None
pub async fn truncate_to_sentences(
    text: &str,
    max_tokens: usize,
    estimator: &dyn TokenEstimator,
) -> Option<String> {
    if estimator.estimate(text).await <= max_tokens {
        return Some(text.to_string());
    }

    let sentences = split_sentences(text);
    let first = *sentences.first()?;
    if sentences.len() == 1 {
        return None;
    }
    let last = sentences[sentences.len() - 1];

    let head_only = first.to_string();
    let mut body = vec![first];
    let frame = format!("{}{}{}", first, ELISION, last);
    if estimator.estimate(&frame).await > max_tokens {
        return if estimator.estimate(&head_only).await <= max_tokens {
            Some(head_only)
        } else {
            None
        };
    }

    let middle = &sentences[1..sentences.len() - 1];
    let mut taken = 0;
    for sentence in middle {
        body.push(sentence);
        let candidate = format!("{}{}{}", body.join(" "), ELISION, last);
        if estimator.estimate(&candidate).await > max_tokens {
            body.pop();
            break;
        }
        taken += 1;
    }

    let separator = if taken == middle.len() { " " } else { ELISION };
    Some(format!("{}{}{}", body.join(" "), separator, last))
}
