//! 限速调度器
//!
//! 保证两次请求之间至少间隔 `min_request_interval`（只推迟，不丢弃），并把每次请求的
//! 结果归入五种结局之一：成功、修复后成功、整批失败、可恢复错误、致命配置错误。
//! 任何错误都不会越过调度器传播出去。

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::provider::{BackoffPolicy, SamplingParams, TranslationProvider, TranslationRequest};
use super::repair::attempt_repair;
use crate::translation::config::TranslationConfig;
use crate::translation::error::{
    helpers, ErrorDisposition, ErrorStats, TranslationError, TranslationResult,
};
use crate::translation::pipeline::Batch;

/// 模型表示“无需翻译”的标记值
pub const SKIP_MARKER: &str = "SKIP";

/// 调度器全局状态，只由调度器修改
#[derive(Debug, Clone, Default)]
pub struct DispatcherState {
    pub last_request_at: Option<Instant>,
    pub backoff_until: Option<Instant>,
    /// 致命配置错误信息；存在时停止调度直到重新配置
    pub fatal: Option<String>,
}

/// 一次批次调度的结局
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// 按条目标识匹配的结果；`None` 表示没有可用译文（`SKIP` 或缺失）
    Success {
        results: HashMap<String, Option<String>>,
        repaired: bool,
    },
    /// 网络错误、超时或没有返回任何条目
    TotalFailure { reason: String },
    /// 可恢复的状态码，已施加退避
    Recoverable { status: u16, backoff_until: Instant },
    /// 凭据、模型或地址错误
    Fatal { reason: String },
}

impl BatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            BatchOutcome::Success { repaired: false, .. } => "success",
            BatchOutcome::Success { repaired: true, .. } => "repaired",
            BatchOutcome::TotalFailure { .. } => "total_failure",
            BatchOutcome::Recoverable { .. } => "recoverable",
            BatchOutcome::Fatal { .. } => "fatal",
        }
    }
}

fn parse_object(raw: &str) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// 解析模型输出并按条目标识匹配
///
/// 无效 JSON 先修复一次；返回值第二项表示是否经过修复。没有任何标识匹配时视为空响应。
pub fn parse_results<'a, I>(
    raw: &str,
    item_ids: I,
) -> TranslationResult<(HashMap<String, Option<String>>, bool)>
where
    I: IntoIterator<Item = &'a str>,
{
    let (map, repaired) = match parse_object(raw) {
        Some(map) => (map, false),
        None => {
            let fixed = attempt_repair(raw);
            let map = parse_object(&fixed).ok_or_else(|| {
                TranslationError::MalformedResponse(format!(
                    "修复后仍无法解析: {}",
                    raw.chars().take(120).collect::<String>()
                ))
            })?;
            (map, true)
        }
    };

    let mut matched = 0;
    let mut results = HashMap::new();
    for id in item_ids {
        let value = match map.get(id) {
            Some(value) => {
                matched += 1;
                value
                    .as_str()
                    .map(str::trim)
                    .filter(|text| !text.is_empty() && *text != SKIP_MARKER)
                    .map(str::to_string)
            }
            None => None,
        };
        results.insert(id.to_string(), value);
    }

    if matched == 0 {
        return Err(TranslationError::EmptyResponse);
    }
    Ok((results, repaired))
}

/// 限速调度器
pub struct Dispatcher {
    state: DispatcherState,
    min_interval: Duration,
    request_timeout: Duration,
    backoff: BackoffPolicy,
    errors: ErrorStats,
}

impl Dispatcher {
    pub fn new(config: &TranslationConfig) -> Self {
        Self {
            state: DispatcherState::default(),
            min_interval: config.min_request_interval(),
            request_timeout: config.request_timeout(),
            backoff: BackoffPolicy::from_config(config),
            errors: ErrorStats::default(),
        }
    }

    /// 更新限速参数并清除致命标记
    pub fn reconfigure(&mut self, config: &TranslationConfig) {
        self.min_interval = config.min_request_interval();
        self.request_timeout = config.request_timeout();
        self.backoff = BackoffPolicy::from_config(config);
        if let Some(reason) = self.state.fatal.take() {
            info!("配置已更新，清除致命错误: {}", reason);
        }
    }

    pub fn state(&self) -> &DispatcherState {
        &self.state
    }

    pub fn error_stats(&self) -> &ErrorStats {
        &self.errors
    }

    pub fn fatal_reason(&self) -> Option<&str> {
        self.state.fatal.as_deref()
    }

    /// 下一次请求最早可以发出的时间
    pub fn ready_at(&self) -> Option<Instant> {
        let interval_end = self.state.last_request_at.map(|at| at + self.min_interval);
        match (interval_end, self.state.backoff_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// 退避是否仍在生效
    pub fn backoff_active(&self, now: Instant) -> Option<Instant> {
        self.state.backoff_until.filter(|until| *until > now)
    }

    fn fail_fatal(&mut self, err: TranslationError) -> BatchOutcome {
        error!("翻译配置错误，停止调度: {}", err);
        self.errors.record_error(&err);
        let reason = err.to_string();
        self.state.fatal = Some(reason.clone());
        BatchOutcome::Fatal { reason }
    }

    fn build_request<N>(&self, batch: &Batch<N>, config: &TranslationConfig, model: String) -> TranslationRequest {
        TranslationRequest {
            model,
            target_lang: config.target_lang.clone(),
            source_hints: config.source_hints.clone(),
            items: batch.request_items(),
            sampling: SamplingParams {
                temperature: config.temperature,
                top_p: config.top_p,
            },
        }
    }

    /// 发送一个批次
    pub async fn dispatch<N>(
        &mut self,
        provider: &dyn TranslationProvider,
        batch: &Batch<N>,
        config: &TranslationConfig,
    ) -> BatchOutcome {
        if let Some(reason) = &self.state.fatal {
            return BatchOutcome::Fatal {
                reason: reason.clone(),
            };
        }

        let model = match config.effective_model().filter(|m| !m.trim().is_empty()) {
            Some(model) => model,
            None => {
                return self.fail_fatal(TranslationError::MissingCredentials(format!(
                    "提供商 {} 未配置模型",
                    config.provider
                )))
            }
        };

        if let Err(err) = provider.validate() {
            return self.fail_fatal(err);
        }

        if let Some(at) = self.ready_at() {
            if at > Instant::now() {
                debug!("等待速率限制，{:?} 后发送批次 #{}", at - Instant::now(), batch.id);
                sleep_until(at).await;
            }
        }

        let request = self.build_request(batch, config, model);
        self.state.last_request_at = Some(Instant::now());
        metrics::counter!("lyrics_batches_dispatched_total", "provider" => provider.name().to_string())
            .increment(1);
        debug!("发送批次 #{}，{} 条，提供商 {}", batch.id, batch.len(), provider.name());

        let response = match timeout(self.request_timeout, provider.translate(request)).await {
            Ok(result) => result,
            Err(elapsed) => Err(TranslationError::from(elapsed)),
        };

        let ids = batch.items.iter().map(|item| item.item_id.as_str());
        let outcome = match response.and_then(|raw| parse_results(&raw, ids)) {
            Ok((results, repaired)) => {
                if repaired {
                    debug!("批次 #{} 的响应经修复后解析成功", batch.id);
                }
                BatchOutcome::Success { results, repaired }
            }
            Err(err) => self.classify_failure(provider, err),
        };

        metrics::counter!("lyrics_batch_outcomes_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    fn classify_failure(&mut self, provider: &dyn TranslationProvider, err: TranslationError) -> BatchOutcome {
        match err.disposition() {
            ErrorDisposition::Fatal => self.fail_fatal(err),
            ErrorDisposition::Backoff => {
                self.errors.record_error(&err);
                let status = match &err {
                    TranslationError::HttpStatus { status, .. } => *status,
                    _ => 0,
                };
                let delay = provider.backoff_for(&err, &self.backoff);
                let until = Instant::now() + delay;
                self.state.backoff_until = Some(
                    self.state
                        .backoff_until
                        .map_or(until, |existing| existing.max(until)),
                );
                warn!("可恢复错误 {}，退避 {:?}", err, delay);
                BatchOutcome::Recoverable {
                    status,
                    backoff_until: until,
                }
            }
            ErrorDisposition::Transient | ErrorDisposition::Malformed => {
                self.errors.record_error(&err);
                helpers::log_error(&err);
                BatchOutcome::TotalFailure {
                    reason: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::pipeline::normalizer::normalize_text;
    use crate::translation::pipeline::queue::QueueItem;
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted(Mutex<VecDeque<TranslationResult<String>>>);

    impl Scripted {
        fn new(responses: Vec<TranslationResult<String>>) -> Self {
            Self(Mutex::new(responses.into()))
        }
    }

    impl TranslationProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn validate(&self) -> TranslationResult<()> {
            Ok(())
        }

        fn translate(&self, _request: TranslationRequest) -> BoxFuture<'_, TranslationResult<String>> {
            let next = self
                .0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TranslationError::EmptyResponse));
            Box::pin(async move { next })
        }
    }

    fn batch(texts: &[&str]) -> Batch<u32> {
        let items = texts
            .iter()
            .enumerate()
            .map(|(i, text)| QueueItem {
                key: normalize_text(text),
                text: text.to_string(),
                units: vec![i as u32],
                enqueued_at: Instant::now(),
                attempts: 0,
                seq: i as i64,
            })
            .collect();
        Batch::from_queue_items(1, items)
    }

    fn config() -> TranslationConfig {
        let mut config = TranslationConfig::default_with_lang("en");
        config.api_key = Some("sk-test".to_string());
        config
    }

    #[test]
    fn test_parse_results_matches_by_id() {
        let raw = r#"{"id_2": "World", "id_1": "Hello", "id_9": "stray"}"#;
        let (results, repaired) = parse_results(raw, ["id_1", "id_2", "id_3"]).unwrap();
        assert!(!repaired);
        assert_eq!(results["id_1"].as_deref(), Some("Hello"));
        assert_eq!(results["id_2"].as_deref(), Some("World"));
        assert_eq!(results["id_3"], None);
        assert!(!results.contains_key("id_9"));
    }

    #[test]
    fn test_parse_results_skip_and_non_string() {
        let raw = r#"{"id_1": "SKIP", "id_2": "", "id_3": 42}"#;
        let (results, _) = parse_results(raw, ["id_1", "id_2", "id_3"]).unwrap();
        assert!(results.values().all(Option::is_none));
    }

    #[test]
    fn test_parse_results_repair_and_failure() {
        let (results, repaired) =
            parse_results(r#"{"id_1": "a "b" c"}"#, ["id_1"]).unwrap();
        assert!(repaired);
        assert_eq!(results["id_1"].as_deref(), Some("a \"b\" c"));

        assert!(matches!(
            parse_results("{}", ["id_1"]),
            Err(TranslationError::EmptyResponse)
        ));
        assert!(matches!(
            parse_results("no json here", ["id_1"]),
            Err(TranslationError::MalformedResponse(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_defers() {
        let provider = Scripted::new(vec![
            Ok(r#"{"id_1": "a"}"#.to_string()),
            Ok(r#"{"id_1": "b"}"#.to_string()),
        ]);
        let config = config();
        let mut dispatcher = Dispatcher::new(&config);

        let start = Instant::now();
        dispatcher.dispatch(&provider, &batch(&["一"]), &config).await;
        assert_eq!(dispatcher.ready_at(), Some(start + config.min_request_interval()));

        let outcome = dispatcher.dispatch(&provider, &batch(&["二"]), &config).await;
        assert!(matches!(outcome, BatchOutcome::Success { .. }));
        assert!(Instant::now() >= start + config.min_request_interval());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_sets_backoff() {
        let provider = Scripted::new(vec![Err(TranslationError::HttpStatus {
            status: 429,
            retry_after: None,
            message: String::new(),
        })]);
        let config = config();
        let mut dispatcher = Dispatcher::new(&config);

        let start = Instant::now();
        match dispatcher.dispatch(&provider, &batch(&["一"]), &config).await {
            BatchOutcome::Recoverable {
                status,
                backoff_until,
            } => {
                assert_eq!(status, 429);
                assert!(backoff_until >= start + Duration::from_secs(60));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(dispatcher.backoff_active(Instant::now()).is_some());
        assert!(dispatcher.ready_at().unwrap() >= start + Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_is_total_failure_without_backoff() {
        let provider = Scripted::new(vec![Err(TranslationError::NetworkError("reset".to_string()))]);
        let config = config();
        let mut dispatcher = Dispatcher::new(&config);

        let outcome = dispatcher.dispatch(&provider, &batch(&["一"]), &config).await;
        assert!(matches!(outcome, BatchOutcome::TotalFailure { .. }));
        assert!(dispatcher.state().backoff_until.is_none());
        assert_eq!(dispatcher.error_stats().total_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_is_fatal_until_reconfigured() {
        let provider = Scripted::new(vec![
            Err(TranslationError::HttpStatus {
                status: 401,
                retry_after: None,
                message: "bad key".to_string(),
            }),
            Ok(r#"{"id_1": "a"}"#.to_string()),
        ]);
        let config = config();
        let mut dispatcher = Dispatcher::new(&config);

        let outcome = dispatcher.dispatch(&provider, &batch(&["一"]), &config).await;
        assert!(matches!(outcome, BatchOutcome::Fatal { .. }));
        assert!(dispatcher.fatal_reason().is_some());

        // 致命状态下不再发送
        let again = dispatcher.dispatch(&provider, &batch(&["一"]), &config).await;
        assert!(matches!(again, BatchOutcome::Fatal { .. }));

        dispatcher.reconfigure(&config);
        let outcome = dispatcher.dispatch(&provider, &batch(&["一"]), &config).await;
        assert!(matches!(outcome, BatchOutcome::Success { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_model_is_fatal() {
        let provider = Scripted::new(Vec::new());
        let mut config = config();
        config.provider = crate::translation::config::ProviderKind::Custom;
        config.api_url = Some("http://localhost:8080/v1/chat/completions".to_string());
        let mut dispatcher = Dispatcher::new(&config);

        let outcome = dispatcher.dispatch(&provider, &batch(&["一"]), &config).await;
        assert!(matches!(outcome, BatchOutcome::Fatal { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_total_failure() {
        struct Hanging;
        impl TranslationProvider for Hanging {
            fn name(&self) -> &str {
                "hanging"
            }
            fn validate(&self) -> TranslationResult<()> {
                Ok(())
            }
            fn translate(&self, _request: TranslationRequest) -> BoxFuture<'_, TranslationResult<String>> {
                Box::pin(futures::future::pending())
            }
        }

        let config = config();
        let mut dispatcher = Dispatcher::new(&config);
        let outcome = dispatcher.dispatch(&Hanging, &batch(&["一"]), &config).await;
        assert!(matches!(outcome, BatchOutcome::TotalFailure { .. }));
    }
}
