use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::ReloadPolicy;

/// Top-level configuration of the captioning pipeline.
///
/// Every field has a default, so a JSON file only needs to carry the values it
/// wants to override:
///
/// ```
/// use tagline::config::CaptionConfig;
///
/// let config: CaptionConfig =
///     serde_json::from_str(r#"{ "sampling": { "max_new_tokens": 96 } }"#).unwrap();
///
/// assert_eq!(config.sampling.max_new_tokens, 96);
/// assert_eq!(config.sampling.top_k, 20);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    pub model: ModelConfig,
    pub sampling: SamplingConfig,
    pub prompt: PromptConfig,
    pub postprocess: PostprocessConfig,
    pub batch: BatchConfig,
    pub resources: ResourceConfig,
}

impl CaptionConfig {
    /// Read a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&data)?;
        Ok(config)
    }
}

/// Where the checkpoint lives and what a complete one looks like.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub dir: PathBuf,
    /// metadata files that must be present next to the weights
    pub required_files: Vec<String>,
    /// combined size of the weight shards below which the download is considered incomplete
    pub min_weight_bytes: u64,
    pub min_vocab_size: usize,
    pub reload_policy: ReloadPolicy,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./models/paligemma-3b-mix-224"),
            required_files: vec![
                "config.json".to_string(),
                "preprocessor_config.json".to_string(),
                "tokenizer_config.json".to_string(),
                "tokenizer.json".to_string(),
            ],
            min_weight_bytes: 5_000_000_000,
            min_vocab_size: 150_000,
            reload_policy: ReloadPolicy::Reuse,
        }
    }
}

/// Decoding parameters handed to the model for every image.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub seed: u64,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: usize,
    pub repeat_penalty: f32,
    pub repeat_last_n: usize,
    pub max_new_tokens: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            seed: 299792458,
            temperature: 0.7,
            top_p: 0.8,
            top_k: 20,
            repeat_penalty: 1.2,
            repeat_last_n: 64,
            max_new_tokens: 160,
        }
    }
}

/// The fixed instruction sent with every image.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub system: String,
    pub user: String,
}

const SYSTEM_PROMPT: &str = "你是文生图模型LoRA训练数据的图片caption生成器，严格遵守以下规则：
1. 只描述图像中明确可见的内容，不推测、不编造，看不清的细节直接跳过。
2. 使用简体中文自然语句，每句表达一个完整的视觉事实，不堆砌关键词。
3. 描述顺序：主体核心对象，主体属性，场景环境，光照与色彩，构图(全景/近景/特写/半身/全身)，风格标签(真实拍摄/动漫风格/数字艺术/平面设计等)。
4. 禁止主观评价词(美丽/可爱/震撼/惊艳/优雅/精致/完美等)、情绪推测、背景故事、抽象概念。
5. 禁止“图片显示”“这是一张”等冗余前缀，不出现“无xx”“没有xx”类描述。
6. 统一使用中文标点，全文约80到125个汉字，句子必须完整。";

const USER_PROMPT: &str = "生成文生图模型训练用中文caption，禁用所有英文描述，必须使用中文自然语句描述";

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: SYSTEM_PROMPT.to_string(),
            user: USER_PROMPT.to_string(),
        }
    }
}

/// Rules applied to the raw model output before it is written to disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostprocessConfig {
    /// chat-template role echoed by some models; everything up to its last occurrence is dropped
    pub role_marker: String,
    pub banned_words: Vec<String>,
    pub separator: char,
    pub max_chars: usize,
    pub max_segments: usize,
    pub ellipsis: String,
}

const BANNED_WORDS: &[&str] = &[
    "美丽", "可爱", "梦幻", "震撼", "惊艳", "优雅", "迷人", "漂亮", "帅气", "精致", "完美", "绝美",
    "超凡", "非凡", "令人", "非常", "极其", "特别", "好看", "动人", "倾城", "绝色", "清纯", "性感",
    "温柔", "甜美", "英俊", "萌", "酷", "炫", "潮", "时尚", "高级", "质感",
];

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            role_marker: "assistant".to_string(),
            banned_words: BANNED_WORDS.iter().map(|w| w.to_string()).collect(),
            separator: ',',
            max_chars: 200,
            max_segments: 12,
            ellipsis: "...".to_string(),
        }
    }
}

/// Folder enumeration and per-file policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// lowercase image extensions, without the dot
    pub extensions: Vec<String>,
    pub output_extension: String,
    /// captions with this many chars or fewer are treated as failures
    pub min_caption_chars: usize,
    /// release the accelerator cache after every n-th generation attempt
    pub cleanup_interval: usize,
    pub sort_entries: bool,
    /// number of detail lines shown in the summary
    pub detail_window: usize,
    pub preview_chars: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            extensions: ["jpg", "jpeg", "png", "bmp", "webp", "tiff"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            output_extension: "txt".to_string(),
            min_caption_chars: 30,
            cleanup_interval: 3,
            sort_entries: true,
            detail_window: 10,
            preview_chars: 70,
        }
    }
}

/// Thresholds of the start-up resource check.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub min_disk_free_gb: f64,
    pub min_memory_available_gb: f64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            min_disk_free_gb: 15.0,
            min_memory_available_gb: 8.0,
        }
    }
}
