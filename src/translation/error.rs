//! 翻译管道统一错误处理
//!
//! 提供结构化错误类型、错误分类以及调度器使用的处置策略（`ErrorDisposition`）。

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::env::EnvError;

/// 翻译错误类型
#[derive(Error, Debug, Clone)]
pub enum TranslationError {
    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 缺少凭据或模型
    #[error("缺少凭据: {0}")]
    MissingCredentials(String),

    /// 网络错误
    #[error("网络错误: {0}")]
    NetworkError(String),

    /// 超时错误
    #[error("操作超时: {0}")]
    TimeoutError(String),

    /// 服务端返回的 HTTP 错误状态
    #[error("HTTP {status}: {message}")]
    HttpStatus {
        status: u16,
        retry_after: Option<Duration>,
        message: String,
    },

    /// 模型输出无法解析
    #[error("响应格式错误: {0}")]
    MalformedResponse(String),

    /// 响应中没有任何条目
    #[error("响应为空")]
    EmptyResponse,

    /// 缓存错误
    #[error("缓存错误: {0}")]
    CacheError(String),

    /// 持久化存储错误
    #[error("存储错误: {0}")]
    StorageError(String),

    /// 解析错误
    #[error("解析错误: {0}")]
    ParseError(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    InternalError(String),
}

/// 调度器对一次失败的处置方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDisposition {
    /// 整批失败，立即重新排队，不推进退避
    Transient,
    /// 可恢复错误，重新排队并施加退避
    Backoff,
    /// 输出格式错误，修复一次后按 Transient 处理
    Malformed,
    /// 配置类致命错误，管道停止直到重新配置
    Fatal,
}

impl TranslationError {
    /// 检查错误是否可重试
    pub fn is_retryable(&self) -> bool {
        !matches!(self.disposition(), ErrorDisposition::Fatal)
    }

    /// 调度器应如何处置该错误
    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            TranslationError::ConfigError(_) => ErrorDisposition::Fatal,
            TranslationError::MissingCredentials(_) => ErrorDisposition::Fatal,
            TranslationError::HttpStatus { status, .. } => match status {
                401 | 403 | 404 => ErrorDisposition::Fatal,
                408 | 429 | 498 => ErrorDisposition::Backoff,
                500..=599 => ErrorDisposition::Backoff,
                _ => ErrorDisposition::Transient,
            },
            TranslationError::MalformedResponse(_) => ErrorDisposition::Malformed,
            TranslationError::NetworkError(_)
            | TranslationError::TimeoutError(_)
            | TranslationError::EmptyResponse
            | TranslationError::CacheError(_)
            | TranslationError::StorageError(_)
            | TranslationError::ParseError(_)
            | TranslationError::SerializationError(_)
            | TranslationError::InternalError(_) => ErrorDisposition::Transient,
        }
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TranslationError::ConfigError(_) => ErrorSeverity::Critical,
            TranslationError::MissingCredentials(_) => ErrorSeverity::Critical,
            TranslationError::NetworkError(_) => ErrorSeverity::Warning,
            TranslationError::TimeoutError(_) => ErrorSeverity::Warning,
            TranslationError::HttpStatus { .. } => match self.disposition() {
                ErrorDisposition::Fatal => ErrorSeverity::Critical,
                _ => ErrorSeverity::Warning,
            },
            TranslationError::MalformedResponse(_) => ErrorSeverity::Warning,
            TranslationError::EmptyResponse => ErrorSeverity::Warning,
            TranslationError::CacheError(_) => ErrorSeverity::Warning,
            TranslationError::StorageError(_) => ErrorSeverity::Error,
            TranslationError::ParseError(_) => ErrorSeverity::Error,
            TranslationError::SerializationError(_) => ErrorSeverity::Error,
            TranslationError::InternalError(_) => ErrorSeverity::Critical,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            TranslationError::ConfigError(_) => ErrorCategory::Configuration,
            TranslationError::MissingCredentials(_) => ErrorCategory::Configuration,
            TranslationError::NetworkError(_) => ErrorCategory::Network,
            TranslationError::TimeoutError(_) => ErrorCategory::Timeout,
            TranslationError::HttpStatus { status, .. } => match status {
                401 | 403 | 404 => ErrorCategory::Configuration,
                429 | 498 => ErrorCategory::RateLimit,
                _ => ErrorCategory::Service,
            },
            TranslationError::MalformedResponse(_) => ErrorCategory::Parsing,
            TranslationError::EmptyResponse => ErrorCategory::Service,
            TranslationError::CacheError(_) => ErrorCategory::Cache,
            TranslationError::StorageError(_) => ErrorCategory::Storage,
            TranslationError::ParseError(_) => ErrorCategory::Parsing,
            TranslationError::SerializationError(_) => ErrorCategory::Serialization,
            TranslationError::InternalError(_) => ErrorCategory::Internal,
        }
    }

    /// 服务端建议的重试等待时间
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TranslationError::HttpStatus { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// 创建带上下文的错误
    pub fn with_context<T: fmt::Display>(mut self, context: T) -> Self {
        let append = |msg: &mut String| {
            msg.push_str(&format!(" (上下文: {})", context));
        };

        match &mut self {
            TranslationError::ConfigError(msg)
            | TranslationError::MissingCredentials(msg)
            | TranslationError::NetworkError(msg)
            | TranslationError::TimeoutError(msg)
            | TranslationError::MalformedResponse(msg)
            | TranslationError::CacheError(msg)
            | TranslationError::StorageError(msg)
            | TranslationError::ParseError(msg)
            | TranslationError::SerializationError(msg)
            | TranslationError::InternalError(msg) => append(msg),
            TranslationError::HttpStatus { message, .. } => append(message),
            TranslationError::EmptyResponse => {}
        }

        self
    }
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    Network,
    RateLimit,
    Cache,
    Storage,
    Service,
    Timeout,
    Parsing,
    Serialization,
    Internal,
}

impl From<std::io::Error> for TranslationError {
    fn from(error: std::io::Error) -> Self {
        TranslationError::StorageError(format!("IO错误: {}", error))
    }
}

impl From<serde_json::Error> for TranslationError {
    fn from(error: serde_json::Error) -> Self {
        TranslationError::SerializationError(format!("JSON序列化错误: {}", error))
    }
}

impl From<toml::de::Error> for TranslationError {
    fn from(error: toml::de::Error) -> Self {
        TranslationError::ParseError(format!("TOML解析错误: {}", error))
    }
}

impl From<toml::ser::Error> for TranslationError {
    fn from(error: toml::ser::Error) -> Self {
        TranslationError::SerializationError(format!("TOML序列化错误: {}", error))
    }
}

impl From<redb::Error> for TranslationError {
    fn from(error: redb::Error) -> Self {
        TranslationError::StorageError(format!("redb错误: {}", error))
    }
}

impl From<redb::DatabaseError> for TranslationError {
    fn from(error: redb::DatabaseError) -> Self {
        redb::Error::from(error).into()
    }
}

impl From<redb::TransactionError> for TranslationError {
    fn from(error: redb::TransactionError) -> Self {
        redb::Error::from(error).into()
    }
}

impl From<redb::TableError> for TranslationError {
    fn from(error: redb::TableError) -> Self {
        redb::Error::from(error).into()
    }
}

impl From<redb::StorageError> for TranslationError {
    fn from(error: redb::StorageError) -> Self {
        redb::Error::from(error).into()
    }
}

impl From<redb::CommitError> for TranslationError {
    fn from(error: redb::CommitError) -> Self {
        redb::Error::from(error).into()
    }
}

impl From<reqwest::Error> for TranslationError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TranslationError::TimeoutError(format!("请求超时: {}", error))
        } else {
            TranslationError::NetworkError(format!("请求失败: {}", error))
        }
    }
}

impl From<tokio::time::error::Elapsed> for TranslationError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        TranslationError::TimeoutError(format!("异步操作超时: {}", error))
    }
}

impl From<EnvError> for TranslationError {
    fn from(error: EnvError) -> Self {
        TranslationError::ConfigError(error.to_string())
    }
}

/// 错误结果类型别名
pub type TranslationResult<T> = Result<T, TranslationError>;

/// 错误统计信息
#[derive(Debug, Clone, Default)]
pub struct ErrorStats {
    pub total_errors: usize,
    pub by_category: std::collections::HashMap<ErrorCategory, usize>,
    pub by_severity: std::collections::HashMap<ErrorSeverity, usize>,
    pub retryable_errors: usize,
    pub critical_errors: usize,
}

impl ErrorStats {
    /// 记录错误
    pub fn record_error(&mut self, error: &TranslationError) {
        self.total_errors += 1;

        *self.by_category.entry(error.category()).or_insert(0) += 1;

        let severity = error.severity();
        *self.by_severity.entry(severity).or_insert(0) += 1;

        if error.is_retryable() {
            self.retryable_errors += 1;
        }

        if severity == ErrorSeverity::Critical {
            self.critical_errors += 1;
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Default::default();
    }

    /// 获取错误率
    pub fn error_rate(&self, total_operations: usize) -> f64 {
        if total_operations == 0 {
            0.0
        } else {
            self.total_errors as f64 / total_operations as f64
        }
    }
}

/// 错误处理助手函数
pub mod helpers {
    use super::*;

    /// 按严重程度记录错误
    pub fn log_error(error: &TranslationError) {
        match error.severity() {
            ErrorSeverity::Info => tracing::info!("翻译信息: {}", error),
            ErrorSeverity::Warning => tracing::warn!("翻译警告: {}", error),
            ErrorSeverity::Error => tracing::error!("翻译错误: {}", error),
            ErrorSeverity::Critical => tracing::error!("翻译严重错误: {}", error),
        }
    }

    /// 创建网络错误
    pub fn network_error<T: fmt::Display>(msg: T) -> TranslationError {
        TranslationError::NetworkError(msg.to_string())
    }

    /// 创建配置错误
    pub fn config_error<T: fmt::Display>(msg: T) -> TranslationError {
        TranslationError::ConfigError(msg.to_string())
    }

    /// 创建超时错误
    pub fn timeout_error<T: fmt::Display>(msg: T) -> TranslationError {
        TranslationError::TimeoutError(msg.to_string())
    }
}
