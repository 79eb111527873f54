//! YaRN 档位
//!
//! 五个数字决定压缩策略：基础窗口、扩展窗口、缩放系数、注意力系数，
//! 以及未指定目标时使用的扩展窗口比例（compression_threshold）。

use serde::Serialize;

/// 预设档位名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextProfile {
    Compact,
    Standard,
    Extended,
}

impl ContextProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextProfile::Compact => "compact",
            ContextProfile::Standard => "standard",
            ContextProfile::Extended => "extended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(ContextProfile::Compact),
            "standard" => Some(ContextProfile::Standard),
            "extended" => Some(ContextProfile::Extended),
            _ => None,
        }
    }
}

/// YaRN 参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct YarnConfig {
    /// 来源档位（数值可能已被覆盖）
    pub profile: ContextProfile,
    pub base_context_length: usize,
    pub extended_context_length: usize,
    pub scaling_factor: f64,
    pub attention_factor: f64,
    pub compression_threshold: f64,
}

impl YarnConfig {
    pub fn compact() -> Self {
        Self {
            profile: ContextProfile::Compact,
            base_context_length: 2048,
            extended_context_length: 8192,
            scaling_factor: 4.0,
            attention_factor: 0.1,
            compression_threshold: 0.75,
        }
    }

    pub fn standard() -> Self {
        Self {
            profile: ContextProfile::Standard,
            base_context_length: 4096,
            extended_context_length: 16384,
            scaling_factor: 4.0,
            attention_factor: 0.1,
            compression_threshold: 0.8,
        }
    }

    pub fn extended() -> Self {
        Self {
            profile: ContextProfile::Extended,
            base_context_length: 8192,
            extended_context_length: 32768,
            scaling_factor: 4.0,
            attention_factor: 0.1,
            compression_threshold: 0.85,
        }
    }

    pub fn from_profile(profile: ContextProfile) -> Self {
        match profile {
            ContextProfile::Compact => Self::compact(),
            ContextProfile::Standard => Self::standard(),
            ContextProfile::Extended => Self::extended(),
        }
    }

    /// 按名称取预设；未知名称返回 None
    pub fn from_profile_name(name: &str) -> Option<Self> {
        ContextProfile::parse(name).map(Self::from_profile)
    }

    /// 调用方未给出目标时的默认 token 目标
    pub fn default_target(&self) -> usize {
        (self.extended_context_length as f64 * self.compression_threshold).floor() as usize
    }
}

impl Default for YarnConfig {
    fn default() -> Self {
        Self::standard()
    }
}
