//! 配置管理器
//!
//! 提供统一的配置接口：默认值 → 配置文件 → 环境变量 → 持久化用户参数

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::constants;
use crate::translation::error::{TranslationError, TranslationResult};
use crate::translation::storage::store::{get_parsed, KeyValueStore};

/// 翻译服务提供商预设
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Groq,
    Gemini,
    Custom,
}

impl ProviderKind {
    /// 预设的接口地址，`Custom` 没有默认值
    pub fn default_api_url(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some(constants::OPENAI_API_URL),
            ProviderKind::Groq => Some(constants::GROQ_API_URL),
            ProviderKind::Gemini => Some(constants::GEMINI_API_URL),
            ProviderKind::Custom => None,
        }
    }

    /// 预设的模型名称
    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some(constants::OPENAI_DEFAULT_MODEL),
            ProviderKind::Groq => Some(constants::GROQ_DEFAULT_MODEL),
            ProviderKind::Gemini => Some(constants::GEMINI_DEFAULT_MODEL),
            ProviderKind::Custom => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Groq => "groq",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Custom => "custom",
        }
    }

    /// 存储中该提供商 API 密钥的键
    pub fn api_key_store_key(&self) -> String {
        format!("{}_api_key", self.as_str())
    }

    /// 存储中该提供商模型的键
    pub fn model_store_key(&self) -> String {
        format!("{}_model", self.as_str())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "groq" => Ok(ProviderKind::Groq),
            "gemini" => Ok(ProviderKind::Gemini),
            "custom" => Ok(ProviderKind::Custom),
            other => Err(TranslationError::ConfigError(format!("未知的提供商: {}", other))),
        }
    }
}

/// 翻译管道配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranslationConfig {
    // 基础配置
    pub enabled: bool,
    pub target_lang: String,
    pub source_hints: Vec<String>,

    // 提供商配置
    pub provider: ProviderKind,
    pub api_url: Option<String>,
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub top_p: f32,

    // 批次与速率
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub min_request_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub max_retry_attempts: usize,
    pub rate_limit_backoff_secs: u64,
    pub server_error_backoff_secs: u64,

    // 缓存配置
    pub cache_capacity: usize,
    pub normalizer_memo_size: usize,
    pub normalizer_memo_ttl_ms: u64,
    pub store_path: Option<String>,

    // 追踪配置
    pub unit_class: String,
    pub full_rescan_interval_ms: u64,
    pub reconcile_interval_ms: u64,
    pub viewport_margin_px: f64,

    // 智能跳过
    pub smart_skip_enabled: bool,
    pub smart_skip_threshold: f64,
    pub smart_skip_min_samples: usize,
}

impl TranslationConfig {
    /// 创建带指定目标语言的默认配置
    pub fn default_with_lang(target_lang: &str) -> Self {
        Self {
            target_lang: target_lang.to_string(),
            ..Self::default()
        }
    }

    /// 验证配置
    pub fn validate(&self) -> TranslationResult<()> {
        if self.target_lang.trim().is_empty() {
            return Err(TranslationError::ConfigError("目标语言不能为空".to_string()));
        }

        if self.batch_size == 0 {
            return Err(TranslationError::ConfigError("批次大小不能为0".to_string()));
        }

        if self.cache_capacity == 0 {
            return Err(TranslationError::ConfigError("缓存容量不能为0".to_string()));
        }

        if self.normalizer_memo_size == 0 {
            return Err(TranslationError::ConfigError("规范化缓存大小不能为0".to_string()));
        }

        if self.request_timeout_secs == 0 {
            return Err(TranslationError::ConfigError("请求超时不能为0".to_string()));
        }

        if self.full_rescan_interval_ms == 0 {
            return Err(TranslationError::ConfigError("完整重扫间隔不能为0".to_string()));
        }

        if self.reconcile_interval_ms == 0 {
            return Err(TranslationError::ConfigError("一致性检查间隔不能为0".to_string()));
        }

        if !(self.smart_skip_threshold > 0.0 && self.smart_skip_threshold <= 1.0) {
            return Err(TranslationError::ConfigError(format!(
                "智能跳过阈值必须在 (0, 1] 之间: {}",
                self.smart_skip_threshold
            )));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(TranslationError::ConfigError(format!(
                "temperature 必须在 [0, 2] 之间: {}",
                self.temperature
            )));
        }

        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(TranslationError::ConfigError(format!(
                "top_p 必须在 (0, 1] 之间: {}",
                self.top_p
            )));
        }

        if self.viewport_margin_px < 0.0 {
            return Err(TranslationError::ConfigError("视口边距不能为负".to_string()));
        }

        if let Some(url) = &self.api_url {
            url::Url::parse(url).map_err(|e| {
                TranslationError::ConfigError(format!("无效的 API 地址 {}: {}", url, e))
            })?;
        }

        Ok(())
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides(&mut self) {
        use crate::env::{cache, smart_skip, translation, EnvVar};

        if let Ok(Some(enabled)) = translation::Enabled::get_set() {
            self.enabled = enabled;
        }

        if let Ok(Some(target_lang)) = translation::TargetLang::get_set() {
            self.target_lang = target_lang;
        }

        if let Ok(Some(provider)) = translation::Provider::get_set() {
            if let Ok(kind) = provider.parse() {
                self.provider = kind;
            }
        }

        if let Ok(Some(api_url)) = translation::ApiUrl::get_set() {
            tracing::info!("环境变量覆盖 API URL: {}", api_url);
            self.api_url = Some(api_url);
        }

        if let Ok(Some(api_key)) = translation::ApiKey::get_set() {
            self.api_key = Some(api_key);
        }

        if let Ok(Some(model)) = translation::Model::get_set() {
            self.model = Some(model);
        }

        if let Ok(Some(batch_size)) = translation::BatchSize::get_set() {
            self.batch_size = batch_size;
        }

        if let Ok(Some(delay)) = translation::BatchDelay::get_set() {
            self.batch_delay_ms = delay.as_millis() as u64;
        }

        if let Ok(Some(interval)) = translation::MinRequestInterval::get_set() {
            self.min_request_interval_ms = interval.as_millis() as u64;
        }

        if let Ok(Some(timeout)) = translation::RequestTimeout::get_set() {
            self.request_timeout_secs = timeout.as_secs();
        }

        if let Ok(Some(capacity)) = cache::Capacity::get_set() {
            self.cache_capacity = capacity;
        }

        if let Ok(Some(path)) = cache::StorePath::get_set() {
            self.store_path = Some(path);
        }

        if let Ok(Some(enabled)) = smart_skip::Enabled::get_set() {
            self.smart_skip_enabled = enabled;
        }

        if let Ok(Some(threshold)) = smart_skip::Threshold::get_set() {
            self.smart_skip_threshold = threshold;
        }
    }

    /// 应用持久化的用户参数
    ///
    /// 存储中缺失或无法解析的键保持当前值。凭据和模型按提供商分别存放。
    pub fn apply_store_overrides(&mut self, store: &dyn KeyValueStore) -> TranslationResult<()> {
        if let Some(provider) = get_parsed::<ProviderKind>(store, constants::STORE_PROVIDER_KEY)? {
            self.provider = provider;
        }

        if let Some(target_lang) = store.get(constants::STORE_TARGET_LANG_KEY)? {
            if !target_lang.trim().is_empty() {
                self.target_lang = target_lang.trim().to_string();
            }
        }

        if let Some(temperature) = get_parsed::<f32>(store, constants::STORE_TEMPERATURE_KEY)? {
            self.temperature = temperature;
        }

        if let Some(delay) = get_parsed::<u64>(store, constants::STORE_BATCH_DELAY_KEY)? {
            self.batch_delay_ms = delay;
        }

        if self.api_key.is_none() {
            self.api_key = store
                .get(&self.provider.api_key_store_key())?
                .filter(|key| !key.trim().is_empty());
        }

        if self.model.is_none() {
            self.model = store
                .get(&self.provider.model_store_key())?
                .filter(|model| !model.trim().is_empty());
        }

        Ok(())
    }

    /// 生效的接口地址：显式配置优先，其次为提供商预设
    pub fn effective_api_url(&self) -> Option<String> {
        self.api_url
            .clone()
            .or_else(|| self.provider.default_api_url().map(str::to_string))
    }

    /// 生效的模型名称
    pub fn effective_model(&self) -> Option<String> {
        self.model
            .clone()
            .or_else(|| self.provider.default_model().map(str::to_string))
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }

    pub fn server_error_backoff(&self) -> Duration {
        Duration::from_secs(self.server_error_backoff_secs)
    }

    pub fn normalizer_memo_ttl(&self) -> Duration {
        Duration::from_millis(self.normalizer_memo_ttl_ms)
    }

    pub fn full_rescan_interval(&self) -> Duration {
        Duration::from_millis(self.full_rescan_interval_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_lang: constants::DEFAULT_TARGET_LANG.to_string(),
            source_hints: constants::DEFAULT_SOURCE_HINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),

            provider: ProviderKind::Groq,
            api_url: None,
            model: None,
            api_key: None,
            temperature: constants::DEFAULT_TEMPERATURE,
            top_p: constants::DEFAULT_TOP_P,

            batch_size: constants::DEFAULT_BATCH_SIZE,
            batch_delay_ms: constants::DEFAULT_BATCH_DELAY_MS,
            min_request_interval_ms: constants::DEFAULT_MIN_REQUEST_INTERVAL_MS,
            request_timeout_secs: constants::DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retry_attempts: constants::DEFAULT_MAX_RETRY_ATTEMPTS,
            rate_limit_backoff_secs: constants::RATE_LIMIT_BACKOFF_SECS,
            server_error_backoff_secs: constants::SERVER_ERROR_BACKOFF_SECS,

            cache_capacity: constants::DEFAULT_CACHE_CAPACITY,
            normalizer_memo_size: constants::DEFAULT_NORMALIZER_MEMO_SIZE,
            normalizer_memo_ttl_ms: constants::DEFAULT_NORMALIZER_MEMO_TTL_MS,
            store_path: None,

            unit_class: constants::DEFAULT_UNIT_CLASS.to_string(),
            full_rescan_interval_ms: constants::DEFAULT_FULL_RESCAN_INTERVAL_MS,
            reconcile_interval_ms: constants::DEFAULT_RECONCILE_INTERVAL_MS,
            viewport_margin_px: constants::DEFAULT_VIEWPORT_MARGIN_PX,

            smart_skip_enabled: true,
            smart_skip_threshold: constants::DEFAULT_SMART_SKIP_THRESHOLD,
            smart_skip_min_samples: constants::DEFAULT_SMART_SKIP_MIN_SAMPLES,
        }
    }
}

/// 配置管理器
pub struct ConfigManager {
    config: TranslationConfig,
    source: Option<String>,
}

impl ConfigManager {
    /// 创建新的配置管理器：.env → 配置文件 → 环境变量 → 校验
    pub fn new() -> TranslationResult<Self> {
        Self::load_dotenv();

        let (mut config, source) = Self::load_config()?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(Self { config, source })
    }

    /// 从指定文件创建，跳过搜索路径
    pub fn from_file(path: &str) -> TranslationResult<Self> {
        Self::load_dotenv();

        let expanded = shellexpand::tilde(path);
        let mut config = Self::load_from_file(&expanded)?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(Self {
            config,
            source: Some(expanded.into_owned()),
        })
    }

    /// 获取配置
    pub fn get_config(&self) -> &TranslationConfig {
        &self.config
    }

    /// 取出配置
    pub fn into_config(self) -> TranslationConfig {
        self.config
    }

    /// 配置来源文件，未找到文件时为 `None`
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// 合并持久化用户参数并重新校验
    pub fn apply_store(&mut self, store: &dyn KeyValueStore) -> TranslationResult<()> {
        self.config.apply_store_overrides(store)?;
        self.config.validate()
    }

    /// 在搜索路径中查找配置文件
    fn load_config() -> TranslationResult<(TranslationConfig, Option<String>)> {
        for path in constants::CONFIG_PATHS {
            let expanded_path = shellexpand::tilde(path);
            if Path::new(expanded_path.as_ref()).exists() {
                tracing::info!("加载配置文件: {}", expanded_path);
                let config = Self::load_from_file(&expanded_path)?;
                return Ok((config, Some(expanded_path.into_owned())));
            }
        }

        tracing::info!("未找到配置文件，使用默认配置");
        Ok((TranslationConfig::default(), None))
    }

    /// 从指定文件加载配置
    fn load_from_file(path: &str) -> TranslationResult<TranslationConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TranslationError::ConfigError(format!("读取配置文件失败: {}", e)))?;

        if path.ends_with(".toml") {
            toml::from_str(&content)
                .map_err(|e| TranslationError::ConfigError(format!("解析TOML配置失败: {}", e)))
        } else {
            serde_json::from_str(&content)
                .map_err(|e| TranslationError::ConfigError(format!("解析JSON配置失败: {}", e)))
        }
    }

    /// 加载 .env 文件
    fn load_dotenv() {
        let env_files = [".env.local", ".env.development", ".env.production", ".env"];

        for env_file in &env_files {
            if Path::new(env_file).exists() && dotenv::from_filename(env_file).is_ok() {
                tracing::info!("已加载环境变量文件: {}", env_file);
                break;
            }
        }
    }

    /// 生成示例配置文件
    pub fn generate_example_config(path: &str) -> TranslationResult<()> {
        let config = TranslationConfig::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| TranslationError::ConfigError(format!("序列化配置失败: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| TranslationError::ConfigError(format!("写入配置文件失败: {}", e)))?;

        Ok(())
    }
}
