//! 分词模块
//!
//! 提供中英文混合分词能力，用于记忆检索的词法加分、伪向量与归档主题提取。
//! 使用 jieba-rs 进行中文分词，英文按空白切分并去掉首尾标点。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 全局 Jieba 实例（延迟初始化）
static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

/// 常见停用词，主题提取时排除
pub const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "almost", "along", "already", "also",
    "although", "always", "among", "another", "anything", "around", "because", "been",
    "before", "being", "below", "between", "both", "cannot", "could", "didn't", "does",
    "doesn't", "doing", "don't", "during", "each", "either", "else", "enough", "every",
    "everything", "first", "from", "further", "have", "having", "here", "itself", "just",
    "know", "like", "maybe", "might", "more", "most", "much", "must", "need", "never",
    "only", "other", "others", "ought", "over", "really", "right", "same", "should",
    "since", "some", "something", "still", "such", "than", "thank", "thanks", "that",
    "their", "theirs", "them", "themselves", "then", "there", "these", "they", "thing",
    "things", "think", "this", "those", "though", "through", "under", "until", "very",
    "want", "well", "were", "what", "whatever", "when", "where", "whether", "which",
    "while", "whose", "will", "with", "within", "without", "would", "yours", "yourself",
];

/// 判断字符是否为 CJK（中日韩）字符
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |   // CJK Unified Ideographs
        '\u{3400}'..='\u{4DBF}' |   // CJK Unified Ideographs Extension A
        '\u{F900}'..='\u{FAFF}' |   // CJK Compatibility Ideographs
        '\u{3040}'..='\u{309F}' |   // Hiragana
        '\u{30A0}'..='\u{30FF}'     // Katakana
    )
}

/// 判断文本是否包含 CJK 字符
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

/// 去掉词首尾的标点（保留中间的 ' 和 -，如 don't、e-mail）
fn strip_punctuation(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric())
}

/// 智能分词：根据文本内容自动选择分词策略
/// - 包含 CJK 字符时使用 jieba 分词
/// - 纯英文时使用空白分词
///
/// 结果为小写、去标点、非空的词，保持原文顺序（可重复）。
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let raw: Vec<String> = if contains_cjk(text) {
        // 搜索引擎模式，更细粒度
        get_jieba()
            .cut_for_search(text, true)
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect()
    } else {
        text.split_whitespace().map(|s| s.to_lowercase()).collect()
    };

    raw.iter()
        .map(|w| strip_punctuation(w))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// 检索用关键词集合：仅保留长度大于 2 个字符的词
pub fn keyword_set(text: &str) -> HashSet<String> {
    tokenize(text)
        .into_iter()
        .filter(|w| w.chars().count() > 2)
        .collect()
}

/// 计算两个词集合的相似度（Jaccard 相似度）
pub fn jaccard_similarity(set1: &HashSet<String>, set2: &HashSet<String>) -> f32 {
    if set1.is_empty() || set2.is_empty() {
        return 0.0;
    }
    let intersection = set1.intersection(set2).count() as f32;
    let union = set1.union(set2).count() as f32;
    intersection / union
}

/// 是否为主题候选词：长度大于 4 且不是停用词
pub fn is_topic_word(word: &str) -> bool {
    word.chars().count() > 4 && !STOP_WORDS.contains(&word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_chinese() {
        let tokens = tokenize("我喜欢编程和人工智能");
        assert!(!tokens.is_empty());
        assert!(tokens.iter().any(|t| t.contains("编程") || t.contains("人工") || t.contains("智能")));
    }

    #[test]
    fn test_tokenize_english_strips_punctuation() {
        let tokens = tokenize("Launch rocket, budget $500!");
        assert_eq!(tokens, vec!["launch", "rocket", "budget", "500"]);
    }

    #[test]
    fn test_tokenize_mixed() {
        let tokens = tokenize("我喜欢 Rust 编程语言");
        assert!(tokens.iter().any(|t| t == "rust" || t.contains("编程")));
    }

    #[test]
    fn test_contains_cjk() {
        assert!(contains_cjk("你好"));
        assert!(contains_cjk("Hello 世界"));
        assert!(!contains_cjk("Hello World"));
    }

    #[test]
    fn test_keyword_set_drops_short_words() {
        let set = keyword_set("say hi to the team");
        assert!(set.contains("say"));
        assert!(set.contains("the"));
        assert!(set.contains("team"));
        assert!(!set.contains("hi"));
        assert!(!set.contains("to"));
    }

    #[test]
    fn test_jaccard_similarity() {
        let a = keyword_set("rocket budget");
        let b = keyword_set("launch rocket budget $500");
        assert!((jaccard_similarity(&a, &b) - 0.5).abs() < 1e-6);
        assert_eq!(jaccard_similarity(&a, &HashSet::new()), 0.0);
    }

    #[test]
    fn test_topic_word() {
        assert!(is_topic_word("budget"));
        assert!(!is_topic_word("plan"));
        assert!(!is_topic_word("should"));
    }
}
