//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE_MEMORY__*` 覆盖（双下划线表示嵌套，如 `BEE_MEMORY__CONTEXT__PROFILE=extended`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::context::YarnConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub archive: ArchiveSection,
}

/// [storage] 段：每会话库文件所在目录
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// 为 true 时全部存储放在内存中（测试或一次性会话）
    #[serde(default)]
    pub in_memory: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/memory")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            in_memory: false,
        }
    }
}

/// [embedding] 段：OpenAI 兼容嵌入后端；未配置 key 时退化为词法伪向量
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub base_url: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    pub api_key: Option<String>,
    /// 送入后端前的字符上限，超出部分截断
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_true() -> bool {
    true
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_max_input_chars() -> usize {
    8000
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            model: default_embedding_model(),
            api_key: None,
            max_input_chars: default_max_input_chars(),
        }
    }
}

/// [memory] 段：检索默认值
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,
    /// 增强上下文最多取多少条记忆
    #[serde(default = "default_augmented_limit")]
    pub augmented_limit: usize,
    #[serde(default = "default_threshold")]
    pub augmented_threshold: f32,
}

fn default_limit() -> usize {
    10
}

fn default_threshold() -> f32 {
    0.3
}

fn default_augmented_limit() -> usize {
    15
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            default_threshold: default_threshold(),
            augmented_limit: default_augmented_limit(),
            augmented_threshold: default_threshold(),
        }
    }
}

/// [context] 段：YaRN 档位与压缩参数；数值字段为空时使用档位预设
#[derive(Debug, Clone, Deserialize)]
pub struct ContextSection {
    #[serde(default = "default_profile")]
    pub profile: String,
    pub base_context_length: Option<usize>,
    pub extended_context_length: Option<usize>,
    pub scaling_factor: Option<f64>,
    pub attention_factor: Option<f64>,
    pub compression_threshold: Option<f64>,
    /// 压缩时原样保留的开头消息数
    #[serde(default = "default_preserve_head")]
    pub preserve_head: usize,
    /// 压缩时原样保留的结尾消息数
    #[serde(default = "default_preserve_tail")]
    pub preserve_tail: usize,
    /// 中间消息回填时允许占用的目标预算比例
    #[serde(default = "default_packing_ratio")]
    pub packing_ratio: f64,
    /// 相关度打分取前 k 条记忆
    #[serde(default = "default_relevance_top_k")]
    pub relevance_top_k: usize,
}

fn default_profile() -> String {
    "standard".to_string()
}

fn default_preserve_head() -> usize {
    2
}

fn default_preserve_tail() -> usize {
    10
}

fn default_packing_ratio() -> f64 {
    0.8
}

fn default_relevance_top_k() -> usize {
    5
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            base_context_length: None,
            extended_context_length: None,
            scaling_factor: None,
            attention_factor: None,
            compression_threshold: None,
            preserve_head: default_preserve_head(),
            preserve_tail: default_preserve_tail(),
            packing_ratio: default_packing_ratio(),
            relevance_top_k: default_relevance_top_k(),
        }
    }
}

impl ContextSection {
    /// 解析档位名并叠加显式覆盖的数值；未知档位回退到 standard
    pub fn yarn_config(&self) -> YarnConfig {
        let mut cfg = YarnConfig::from_profile_name(&self.profile).unwrap_or_else(|| {
            tracing::warn!(profile = %self.profile, "unknown context profile, using standard");
            YarnConfig::standard()
        });
        if let Some(v) = self.base_context_length {
            cfg.base_context_length = v;
        }
        if let Some(v) = self.extended_context_length {
            cfg.extended_context_length = v;
        }
        if let Some(v) = self.scaling_factor {
            cfg.scaling_factor = v;
        }
        if let Some(v) = self.attention_factor {
            cfg.attention_factor = v;
        }
        if let Some(v) = self.compression_threshold {
            cfg.compression_threshold = v;
        }
        cfg
    }
}

/// [archive] 段：摘要与主题提取参数
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveSection {
    #[serde(default = "default_summary_prefix_chars")]
    pub summary_prefix_chars: usize,
    #[serde(default = "default_max_topics")]
    pub max_topics: usize,
    /// 记忆地图提示中列出的主题数
    #[serde(default = "default_hint_topics")]
    pub hint_topics: usize,
}

fn default_summary_prefix_chars() -> usize {
    200
}

fn default_max_topics() -> usize {
    5
}

fn default_hint_topics() -> usize {
    10
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            summary_prefix_chars: default_summary_prefix_chars(),
            max_topics: default_max_topics(),
            hint_topics: default_hint_topics(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 BEE_MEMORY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE_MEMORY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE_MEMORY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（调用方决定是否据此调用 ContextProcessor::update_config）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.memory.default_limit, 10);
        assert_eq!(cfg.context.preserve_head, 2);
        assert_eq!(cfg.context.preserve_tail, 10);
        assert_eq!(cfg.archive.max_topics, 5);
        assert_eq!(cfg.embedding.max_input_chars, 8000);
    }

    #[test]
    fn test_profile_overrides() {
        let section = ContextSection {
            profile: "extended".into(),
            base_context_length: Some(1000),
            ..Default::default()
        };
        let yarn = section.yarn_config();
        assert_eq!(yarn.base_context_length, 1000);
        assert_eq!(yarn.extended_context_length, YarnConfig::extended().extended_context_length);
    }

    #[test]
    fn test_unknown_profile_falls_back() {
        let section = ContextSection {
            profile: "nonsense".into(),
            ..Default::default()
        };
        assert_eq!(section.yarn_config(), YarnConfig::standard());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[context]\nprofile = \"compact\"\n\n[memory]\ndefault_limit = 3\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.context.profile, "compact");
        assert_eq!(cfg.memory.default_limit, 3);
        assert_eq!(cfg.archive.summary_prefix_chars, 200);
    }
}
