//! 翻译配置管理模块
//!
//! 提供配置管理，支持配置文件、环境变量、持久化用户参数和默认值

pub mod manager;

// 重新导出主要类型
pub use manager::{ConfigManager, ProviderKind, TranslationConfig};

/// 配置常量
pub mod constants {
    // 批次处理相关
    pub const DEFAULT_BATCH_SIZE: usize = 20;
    pub const DEFAULT_BATCH_DELAY_MS: u64 = 200;
    pub const DEFAULT_MIN_REQUEST_INTERVAL_MS: u64 = 5000;
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_MAX_RETRY_ATTEMPTS: usize = 5;

    // 退避相关
    pub const RATE_LIMIT_BACKOFF_SECS: u64 = 60;
    pub const SERVER_ERROR_BACKOFF_SECS: u64 = 10;

    // 缓存相关
    pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;
    pub const DEFAULT_NORMALIZER_MEMO_SIZE: usize = 2000;
    pub const DEFAULT_NORMALIZER_MEMO_TTL_MS: u64 = 30_000;

    // 追踪相关
    pub const DEFAULT_FULL_RESCAN_INTERVAL_MS: u64 = 500;
    pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 2000;
    pub const DEFAULT_VIEWPORT_MARGIN_PX: f64 = 300.0;
    pub const DEFAULT_UNIT_CLASS: &str = "lyrics-line";

    // 智能跳过
    pub const DEFAULT_SMART_SKIP_THRESHOLD: f64 = 0.65;
    pub const DEFAULT_SMART_SKIP_MIN_SAMPLES: usize = 3;

    // 采样参数
    pub const DEFAULT_TEMPERATURE: f32 = 0.3;
    pub const DEFAULT_TOP_P: f32 = 1.0;

    // 目标语言与源语言提示
    pub const DEFAULT_TARGET_LANG: &str = "en";
    pub const DEFAULT_SOURCE_HINTS: &[&str] = &["ja", "zh", "ko"];

    // 提供商预设
    pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
    pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";
    pub const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
    pub const GROQ_DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
    pub const GEMINI_API_URL: &str =
        "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions";
    pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";

    // 持久化键
    pub const STORE_CACHE_KEY: &str = "translation_cache";
    pub const STORE_PROVIDER_KEY: &str = "provider";
    pub const STORE_TARGET_LANG_KEY: &str = "target_lang";
    pub const STORE_TEMPERATURE_KEY: &str = "temperature";
    pub const STORE_BATCH_DELAY_KEY: &str = "batch_delay_ms";
    pub const DEFAULT_STORE_PATH: &str = "~/.local/share/lyrics-translator/store.redb";

    // 配置文件搜索路径
    pub const CONFIG_PATHS: &[&str] = &[
        "lyrics-translator.toml",
        ".lyrics-translator.toml",
        "lyrics-translator.json",
        "~/.config/lyrics-translator/config.toml",
        "/etc/lyrics-translator/config.toml",
    ];
}

/// 便利函数
pub fn config_file_exists() -> bool {
    constants::CONFIG_PATHS
        .iter()
        .any(|path| std::path::Path::new(&*shellexpand::tilde(path)).exists())
}
