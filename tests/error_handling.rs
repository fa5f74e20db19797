//! 错误处理集成测试
//!
//! 测试错误处置策略、响应修复以及各类失败在管道中的表现

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

use common::*;
use lyrics_translator::translation::core::parse_results;
use lyrics_translator::translation::error::{helpers, ErrorStats};
use lyrics_translator::translation::{
    attempt_repair, ErrorCategory, ErrorDisposition, ErrorSeverity, PipelineStatus, ProviderKind,
    TranslationError, TranslationProvider, TranslationRequest, TranslationResult,
};

/// 永不返回的提供商
struct HangingProvider;

impl TranslationProvider for HangingProvider {
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

// ============================================================================
// 错误分类
// ============================================================================

#[test]
fn test_error_classification() {
    let rate_limited = TranslationError::HttpStatus {
        status: 429,
        retry_after: Some(Duration::from_secs(90)),
        message: "slow down".to_string(),
    };
    assert_eq!(rate_limited.disposition(), ErrorDisposition::Backoff);
    assert_eq!(rate_limited.category(), ErrorCategory::RateLimit);
    assert_eq!(rate_limited.severity(), ErrorSeverity::Warning);
    assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(90)));

    let unauthorized = TranslationError::HttpStatus {
        status: 401,
        retry_after: None,
        message: "bad key".to_string(),
    };
    assert_eq!(unauthorized.disposition(), ErrorDisposition::Fatal);
    assert_eq!(unauthorized.severity(), ErrorSeverity::Critical);
    assert!(!unauthorized.is_retryable());

    let malformed = TranslationError::MalformedResponse("{".to_string());
    assert_eq!(malformed.disposition(), ErrorDisposition::Malformed);
    assert_eq!(malformed.category(), ErrorCategory::Parsing);
    assert!(malformed.is_retryable());

    println!("✅ 错误分类测试通过");
}

#[test]
fn test_helpers_and_stats() {
    let errors = [
        helpers::network_error("connection reset"),
        helpers::timeout_error("30s"),
        helpers::config_error("missing url"),
    ];

    let mut stats = ErrorStats::default();
    for err in &errors {
        helpers::log_error(err);
        stats.record_error(err);
    }

    assert_eq!(stats.total_errors, 3);
    assert_eq!(stats.retryable_errors, 2);
    assert_eq!(stats.critical_errors, 1);
    assert_eq!(stats.by_category[&ErrorCategory::Timeout], 1);

    stats.reset();
    assert_eq!(stats.total_errors, 0);
}

// ============================================================================
// 响应解析与修复
// ============================================================================

#[test]
fn test_repair_unescaped_quotes() {
    let raw = "Sure! {\"id_1\": \"He said \"hi\" to me\", \"id_2\": \"Night\"} done";
    let fixed = attempt_repair(raw);
    let value: serde_json::Value = serde_json::from_str(&fixed).unwrap();

    assert_eq!(value["id_1"], "He said \"hi\" to me");
    assert_eq!(value["id_2"], "Night");
}

#[test]
fn test_parse_results_marks_repair() {
    let (results, repaired) =
        parse_results("{\"id_1\": \"Star\"}", ["id_1", "id_2"]).unwrap();
    assert!(!repaired);
    assert_eq!(results["id_1"].as_deref(), Some("Star"));
    assert_eq!(results["id_2"], None);

    let (results, repaired) =
        parse_results("```json\n{\"id_1\": \"SKIP\", \"id_2\": \"Moon\",}\n```", ["id_1", "id_2"])
            .unwrap();
    assert!(repaired);
    assert_eq!(results["id_1"], None);
    assert_eq!(results["id_2"].as_deref(), Some("Moon"));
}

#[test]
fn test_parse_results_failures() {
    let err = parse_results("no json at all", ["id_1"]).unwrap_err();
    assert!(matches!(err, TranslationError::MalformedResponse(_)));

    let err = parse_results("{\"other\": \"x\"}", ["id_1"]).unwrap_err();
    assert!(matches!(err, TranslationError::EmptyResponse));
}

// ============================================================================
// 管道中的失败处理
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unauthorized_halts_until_reconfigured() {
    let provider = MockProvider::new();
    provider.push_status(401);
    let mut pipeline = default_pipeline(&provider);
    let mut host = FakeHost::with_lines(&["夜空に星", "月の光"]);

    let err = pipeline.run_until_idle(&mut host).await.unwrap_err();
    assert!(matches!(err, TranslationError::ConfigError(_)));
    assert!(matches!(pipeline.status(), PipelineStatus::Fatal(_)));
    assert_eq!(pipeline.pending_len(), 2);
    assert_eq!(pipeline.next_drain_at(), None);

    provider.push_ok(&response(&[("id_1", "Stars"), ("id_2", "Moonlight")]));
    let config = pipeline.config().clone();
    pipeline
        .reconfigure(Box::new(provider.clone()), config)
        .unwrap();
    pipeline.run_until_idle(&mut host).await.unwrap();

    assert_eq!(host.rendered(1), Some("Stars"));
    assert_eq!(host.rendered(2), Some("Moonlight"));
    // 致命错误不计入重试次数
    assert_eq!(pipeline.stats().items_abandoned, 0);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_fatal_errors_keep_retry_budget() {
    let provider = MockProvider::new();
    let mut config = test_config();
    config.max_retry_attempts = 1;
    let mut pipeline = pipeline_with(&provider, config);
    let mut host = FakeHost::with_lines(&["夜空に星"]);

    // 凭据反复失效又被修复
    for _ in 0..5 {
        provider.push_status(401);
        let err = pipeline.run_until_idle(&mut host).await.unwrap_err();
        assert!(matches!(err, TranslationError::ConfigError(_)));
        assert_eq!(pipeline.pending_len(), 1);

        let config = pipeline.config().clone();
        pipeline
            .reconfigure(Box::new(provider.clone()), config)
            .unwrap();
    }

    // 之后的一次网络错误仍然自动重试
    provider.push_err(TranslationError::NetworkError("connection reset".to_string()));
    provider.push_ok(&response(&[("id_1", "Stars")]));
    let stats = pipeline.run_until_idle(&mut host).await.unwrap();

    assert_eq!(stats.items_abandoned, 0);
    assert_eq!(provider.request_count(), 7);
    assert_eq!(host.rendered(1), Some("Stars"));

    println!("✅ 致命错误不消耗重试次数测试通过");
}

#[tokio::test(start_paused = true)]
async fn test_missing_model_is_fatal() {
    let provider = MockProvider::new();
    let mut config = test_config();
    config.provider = ProviderKind::Custom;
    config.api_url = Some("http://localhost:8080/v1/chat/completions".to_string());
    config.model = None;
    let mut pipeline = pipeline_with(&provider, config);
    let mut host = FakeHost::with_lines(&["夜空に星"]);

    let err = pipeline.run_until_idle(&mut host).await.unwrap_err();
    assert!(matches!(err, TranslationError::ConfigError(_)));
    assert_eq!(provider.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_repaired_response_is_applied() {
    let provider = MockProvider::new();
    provider.push_ok("Here you go:\n{\"id_1\": \"The \"last\" song\"}");
    let mut pipeline = default_pipeline(&provider);
    let mut host = FakeHost::with_lines(&["最後の歌"]);

    let stats = pipeline.run_until_idle(&mut host).await.unwrap();

    assert_eq!(stats.repaired_responses, 1);
    assert_eq!(host.rendered(1), Some("The \"last\" song"));
}

#[tokio::test(start_paused = true)]
async fn test_unrepairable_response_requeues() {
    let provider = MockProvider::new();
    provider.push_ok("I cannot translate this.");
    provider.push_ok(&response(&[("id_1", "Snow")]));
    let mut pipeline = default_pipeline(&provider);
    let mut host = FakeHost::with_lines(&["雪"]);

    pipeline.poll(&mut host, Instant::now());
    tokio::time::advance(Duration::from_millis(250)).await;
    let report = pipeline.dispatch_next(&mut host).await.unwrap();
    assert_eq!(report.outcome, "total_failure");
    assert_eq!(pipeline.pending_len(), 1);

    // 整批失败不施加退避，只受最小请求间隔约束
    let started = Instant::now();
    pipeline.run_until_idle(&mut host).await.unwrap();
    assert!(Instant::now() - started <= Duration::from_secs(5));
    assert_eq!(host.rendered(1), Some("Snow"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_extends_backoff() {
    let provider = MockProvider::new();
    provider.push_err(TranslationError::HttpStatus {
        status: 503,
        retry_after: Some(Duration::from_secs(120)),
        message: "maintenance".to_string(),
    });
    let mut pipeline = default_pipeline(&provider);
    let mut host = FakeHost::with_lines(&["夜空に星"]);

    pipeline.poll(&mut host, Instant::now());
    pipeline.dispatch_next(&mut host).await.unwrap();
    let failed_at = Instant::now();

    assert!(pipeline.next_drain_at().unwrap() >= failed_at + Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_is_transient() {
    let mut config = test_config();
    config.request_timeout_secs = 1;
    config.max_retry_attempts = 0;
    let mut pipeline = lyrics_translator::translation::TranslationPipeline::<u32>::new(
        config,
        Box::new(HangingProvider),
        Box::new(lyrics_translator::translation::MemoryStore::new()),
    )
    .unwrap();
    let mut host = FakeHost::with_lines(&["夜空に星"]);

    pipeline.poll(&mut host, Instant::now());
    let report = pipeline.dispatch_next(&mut host).await.unwrap();

    assert_eq!(report.outcome, "total_failure");
    assert_eq!(pipeline.stats().items_abandoned, 1);
    assert_eq!(pipeline.pending_len(), 0);
}
