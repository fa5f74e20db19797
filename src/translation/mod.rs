//! 翻译模块
//!
//! 增量歌词翻译管道，采用清晰的模块化架构：
//! - **core**: 管道上下文、限速调度、提供商、智能跳过
//! - **pipeline**: 宿主接口、单元追踪、规范化、队列与回写
//! - **storage**: 持久化缓存和键值存储
//! - **config**: 配置管理
//! - **error**: 错误处理
//!
//! # 基本用法
//!
//! ```rust,no_run
//! use lyrics_translator::translation::{ConfigManager, DomTree, TranslationPipeline};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::new()?.into_config();
//! let mut tree = DomTree::parse("<p class=\"lyrics-line\">こんにちは</p>", &config.unit_class)?;
//! let mut pipeline = TranslationPipeline::from_config(config)?;
//!
//! pipeline.run_until_idle(&mut tree).await?;
//! println!("{}", tree.to_html()?);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// 子模块声明
// ============================================================================

/// 配置管理模块 - 默认值、配置文件、环境变量与持久化用户参数
pub mod config;

/// 核心模块 - 管道上下文与调度
pub mod core;

/// 错误处理模块 - 统一的错误类型和处置策略
pub mod error;

/// 文本处理管道模块 - 从单元发现到结果回写
pub mod pipeline;

/// 存储管理模块 - 翻译缓存与键值存储
pub mod storage;

// ============================================================================
// 核心API导出
// ============================================================================

/// 管道上下文及其状态、统计与事件类型
pub use core::{
    attempt_repair, BatchOutcome, BatchReport, ChatCompletionsProvider, EnqueueOutcome, HostEvent,
    PipelineStats, PipelineStatus, TranslationPipeline, TranslationProvider, TranslationRequest,
};

/// 配置管理相关组件
pub use config::{constants, ConfigManager, ProviderKind, TranslationConfig};

/// 错误处理相关类型
pub use error::{
    ErrorCategory, ErrorDisposition, ErrorSeverity, TranslationError, TranslationResult,
};

/// 宿主接口与内置的 DOM 宿主
pub use pipeline::{
    find_live_units_by_key, normalize_text, ContentInjector, ContentTree, DomNode, DomTree,
    NormalizedKey, TextFilter, TextUnit, UnitBounds, Viewport,
};

/// 存储组件
pub use storage::{
    CacheEntry, CacheStats, CacheValue, KeyValueStore, MemoryStore, RedbStore, TranslationCache,
};

// ============================================================================
// 便利函数
// ============================================================================

/// 检查文本是否需要翻译（使用默认的源语言提示）
///
/// ```rust
/// use lyrics_translator::translation::should_translate;
///
/// assert!(should_translate("こんにちは"));
/// assert!(!should_translate("Hello"));
/// assert!(!should_translate("♪ ♪"));
/// ```
pub fn should_translate(text: &str) -> bool {
    TextFilter::from_hints(constants::DEFAULT_SOURCE_HINTS).should_translate(text)
}

/// 检查配置文件是否存在
pub fn config_file_exists() -> bool {
    config::config_file_exists()
}

/// 模块版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 模块初始化日志
pub fn init() {
    tracing::info!("歌词翻译模块 v{} 已加载", VERSION);
}
