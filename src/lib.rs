//! # Lyrics Translator Library
//!
//! 歌词页面的增量翻译管道：发现不断变化的内容树中的文本单元，跨单元、跨会话去重
//! 并缓存译文，对语言模型接口进行批量与限速调用，再把结果回写到可能已经移动、
//! 被替换或消失的单元上。
//!
//! ## 模块组织
//!
//! - `translation` - 翻译管道（核心、管道阶段、存储、配置、错误）
//! - `env` - 类型化的环境变量

pub mod env;
pub mod translation;

// Re-export commonly used items for convenience
pub use translation::{
    ConfigManager, DomTree, HostEvent, PipelineStatus, TranslationConfig, TranslationError,
    TranslationPipeline, TranslationResult,
};
