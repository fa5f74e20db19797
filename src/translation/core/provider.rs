//! 翻译提供商
//!
//! 调度器只依赖 `TranslationProvider`：给定一批 `id -> 原文`，返回模型的原始文本输出。
//! `ChatCompletionsProvider` 实现 OpenAI 兼容的 chat-completions 协议，覆盖 openai、
//! groq、gemini（OpenAI 兼容端点）以及自定义地址。

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::translation::config::{ProviderKind, TranslationConfig};
use crate::translation::error::{TranslationError, TranslationResult};

/// 采样参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
}

/// 一次批量翻译请求
#[derive(Debug, Clone, Serialize)]
pub struct TranslationRequest {
    pub model: String,
    pub target_lang: String,
    pub source_hints: Vec<String>,
    pub items: BTreeMap<String, String>,
    pub sampling: SamplingParams,
}

/// 退避时长
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub rate_limit: Duration,
    pub server_error: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &TranslationConfig) -> Self {
        Self {
            rate_limit: config.rate_limit_backoff(),
            server_error: config.server_error_backoff(),
        }
    }
}

/// 翻译提供商接口
pub trait TranslationProvider: Send + Sync {
    fn name(&self) -> &str;

    /// 检查凭据与地址是否齐全
    fn validate(&self) -> TranslationResult<()>;

    /// 发送请求，返回模型输出的原始文本
    fn translate(&self, request: TranslationRequest) -> BoxFuture<'_, TranslationResult<String>>;

    /// 可恢复错误的退避时长；429 至少为限流退避，服务端给出更长的 `Retry-After` 时以其为准
    fn backoff_for(&self, error: &TranslationError, policy: &BackoffPolicy) -> Duration {
        let retry_after = error.retry_after().unwrap_or_default();
        match error {
            TranslationError::HttpStatus { status: 429, .. } => policy.rate_limit.max(retry_after),
            _ => policy.server_error.max(retry_after),
        }
    }
}

/// 系统提示词
pub fn system_prompt(target_lang: &str, source_hints: &[String]) -> String {
    let hints = if source_hints.is_empty() {
        String::from("any language")
    } else {
        source_hints.join(", ")
    };
    format!(
        "You translate song lyrics line by line into {target}. The lines are most likely in {hints}. \
         The user sends a JSON object mapping identifiers to lines. Reply with a single JSON object \
         using exactly the same identifiers, each mapped to its translation. If a line is already in \
         {target}, or is a name, a sound or otherwise needs no translation, map it to \"SKIP\". \
         Keep the tone of the lyrics. Output only the JSON object.",
        target = target_lang,
        hints = hints,
    )
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// OpenAI 兼容的 chat-completions 提供商
pub struct ChatCompletionsProvider {
    kind: ProviderKind,
    api_url: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ChatCompletionsProvider {
    pub fn new(config: &TranslationConfig) -> TranslationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| TranslationError::ConfigError(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            kind: config.provider,
            api_url: config.effective_api_url(),
            api_key: config
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            client,
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn api_url(&self) -> Option<&str> {
        self.api_url.as_deref()
    }

    fn build_body(&self, request: TranslationRequest) -> TranslationResult<ChatRequest> {
        let system = system_prompt(&request.target_lang, &request.source_hints);
        let user = serde_json::to_string(&request.items)?;

        // 自定义端点不一定支持 JSON 模式
        let response_format = match self.kind {
            ProviderKind::Custom => None,
            _ => Some(ResponseFormat { kind: "json_object" }),
        };

        Ok(ChatRequest {
            model: request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: request.sampling.temperature,
            top_p: request.sampling.top_p,
            response_format,
        })
    }

    async fn send(&self, request: TranslationRequest) -> TranslationResult<String> {
        let url = self
            .api_url
            .as_deref()
            .ok_or_else(|| TranslationError::ConfigError("未配置 API 地址".to_string()))?;
        let body = self.build_body(request)?;

        let mut builder = self.client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = response.text().await.unwrap_or_default();
            return Err(TranslationError::HttpStatus {
                status: status.as_u16(),
                retry_after,
                message: message.chars().take(200).collect(),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            TranslationError::MalformedResponse(format!("无法解析接口响应: {}", e))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(TranslationError::EmptyResponse)?;

        debug!("{} 返回 {} 字节", self.kind, content.len());
        Ok(content)
    }
}

impl TranslationProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn validate(&self) -> TranslationResult<()> {
        if self.api_url.is_none() {
            return Err(TranslationError::ConfigError(format!(
                "提供商 {} 未配置 API 地址",
                self.kind
            )));
        }
        if self.api_key.is_none() && self.kind != ProviderKind::Custom {
            return Err(TranslationError::MissingCredentials(format!(
                "提供商 {} 未配置 API 密钥",
                self.kind
            )));
        }
        Ok(())
    }

    fn translate(&self, request: TranslationRequest) -> BoxFuture<'_, TranslationResult<String>> {
        Box::pin(self.send(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TranslationRequest {
        let mut items = BTreeMap::new();
        items.insert("id_1".to_string(), "こんにちは".to_string());
        TranslationRequest {
            model: "m".to_string(),
            target_lang: "en".to_string(),
            source_hints: vec!["ja".to_string()],
            items,
            sampling: SamplingParams {
                temperature: 0.3,
                top_p: 1.0,
            },
        }
    }

    #[test]
    fn test_validate_requires_key_for_presets() {
        let config = TranslationConfig::default_with_lang("en");
        let provider = ChatCompletionsProvider::new(&config).unwrap();
        let err = provider.validate().unwrap_err();
        assert!(matches!(err, TranslationError::MissingCredentials(_)));

        let mut config = TranslationConfig::default_with_lang("en");
        config.api_key = Some("sk-test".to_string());
        let provider = ChatCompletionsProvider::new(&config).unwrap();
        assert!(provider.validate().is_ok());
        assert_eq!(provider.api_url(), config.provider.default_api_url());
    }

    #[test]
    fn test_custom_without_url_is_config_error() {
        let mut config = TranslationConfig::default_with_lang("en");
        config.provider = ProviderKind::Custom;
        let provider = ChatCompletionsProvider::new(&config).unwrap();
        assert!(matches!(
            provider.validate(),
            Err(TranslationError::ConfigError(_))
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let mut config = TranslationConfig::default_with_lang("en");
        config.api_key = Some("sk-test".to_string());
        let provider = ChatCompletionsProvider::new(&config).unwrap();
        let body = serde_json::to_value(provider.build_body(request()).unwrap()).unwrap();

        assert_eq!(body["model"], "m");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], r#"{"id_1":"こんにちは"}"#);
    }

    #[test]
    fn test_backoff_policy() {
        let mut config = TranslationConfig::default_with_lang("en");
        config.api_key = Some("sk-test".to_string());
        let provider = ChatCompletionsProvider::new(&config).unwrap();
        let policy = BackoffPolicy {
            rate_limit: Duration::from_secs(60),
            server_error: Duration::from_secs(10),
        };

        let limited = TranslationError::HttpStatus {
            status: 429,
            retry_after: Some(Duration::from_secs(5)),
            message: String::new(),
        };
        assert_eq!(provider.backoff_for(&limited, &policy), Duration::from_secs(60));

        let limited_long = TranslationError::HttpStatus {
            status: 429,
            retry_after: Some(Duration::from_secs(120)),
            message: String::new(),
        };
        assert_eq!(provider.backoff_for(&limited_long, &policy), Duration::from_secs(120));

        let server = TranslationError::HttpStatus {
            status: 503,
            retry_after: None,
            message: String::new(),
        };
        assert_eq!(provider.backoff_for(&server, &policy), Duration::from_secs(10));
    }

    #[test]
    fn test_system_prompt_mentions_skip() {
        let prompt = system_prompt("en", &["ja".to_string(), "ko".to_string()]);
        assert!(prompt.contains("SKIP"));
        assert!(prompt.contains("ja, ko"));
    }
}
