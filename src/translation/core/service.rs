//! 翻译管道上下文
//!
//! `TranslationPipeline` 拥有管道的全部状态：规范化器、缓存、追踪器、队列、调度器、
//! 智能跳过控制器与回写器。所有操作通过 `&mut self` 进行，运行在调用方的任务上，
//! 同一时刻最多只有一个批次在请求中。
//!
//! ## 数据流
//!
//! ```text
//! UnitTracker → enqueue（缓存 / 过滤 / 抑制）→ TranslationQueue
//!     → Dispatcher → Reconciler → TranslationCache
//!                  ↘ SmartSkipController
//! ```

use std::fmt::Debug;
use std::hash::Hash;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::dispatcher::{BatchOutcome, Dispatcher};
use super::provider::{ChatCompletionsProvider, TranslationProvider};
use super::smart_skip::{SkipStats, SmartSkipController};
use crate::translation::config::TranslationConfig;
use crate::translation::error::{TranslationError, TranslationResult};
use crate::translation::pipeline::{
    render_idempotent, Batch, ContentInjector, ContentTree, EnqueueResult, FilterDecision,
    KeyNormalizer, Reconciler, SkipReason, TextFilter, TextUnit, TranslationQueue,
    UnitChange, UnitTracker,
};
use crate::translation::storage::{
    CacheStats, CacheValue, KeyValueStore, MemoryStore, RedbStore, TranslationCache,
};

// ============================================================================
// 对外类型
// ============================================================================

/// 宿主发往管道的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent<N> {
    /// 节点（及其子树）发生变化
    Changed(N),
    /// 视口移动或尺寸变化
    ViewportChanged,
    /// 页面可见性变化
    VisibilityChanged(bool),
    /// 请求完整重扫
    Rescan,
    /// 停止运行循环
    Shutdown,
}

/// 管道状态指示
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStatus {
    Idle,
    /// 收集窗口内，等待更多单元
    Collecting,
    /// 等待最小请求间隔
    Waiting { until: Instant },
    Dispatching,
    BackingOff { until: Instant },
    Suppressed,
    Fatal(String),
    Disabled,
}

/// 单元入队结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// 命中缓存，未产生请求
    CacheHit(CacheValue),
    /// 语言启发式判断无需翻译
    Skipped(SkipReason),
    /// 智能跳过已抑制翻译
    Suppressed,
    /// 进入队列
    Queued(EnqueueResult),
    Disabled,
}

/// 运行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub units_seen: u64,
    pub cache_hits: u64,
    pub heuristic_skips: u64,
    pub suppressed_skips: u64,
    pub batches_dispatched: u64,
    pub batches_succeeded: u64,
    pub repaired_responses: u64,
    pub batch_failures: u64,
    pub items_abandoned: u64,
    pub items_dropped: u64,
    pub rendered: u64,
}

/// 单个批次的处理报告
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub batch_id: u64,
    pub items: usize,
    pub outcome: &'static str,
    pub translated: usize,
    pub skipped: usize,
    pub rendered: usize,
    pub suppressed: bool,
}

// ============================================================================
// 管道上下文
// ============================================================================

/// 翻译管道
pub struct TranslationPipeline<N> {
    config: TranslationConfig,
    normalizer: KeyNormalizer,
    cache: TranslationCache,
    store: Box<dyn KeyValueStore>,
    tracker: UnitTracker<N>,
    queue: TranslationQueue<N>,
    dispatcher: Dispatcher,
    smart_skip: SmartSkipController,
    filter: TextFilter,
    reconciler: Reconciler,
    provider: Box<dyn TranslationProvider>,
    stats: PipelineStats,
    dispatching: bool,
    /// 目标语言变化后，下一次轮询清除旧语言的译文
    clear_rendered: bool,
    last_reconcile: Option<Instant>,
    status_tx: watch::Sender<PipelineStatus>,
}

impl<N> TranslationPipeline<N>
where
    N: Clone + Eq + Hash + Debug,
{
    /// 使用给定的提供商与存储创建管道，并从存储加载缓存
    pub fn new(
        config: TranslationConfig,
        provider: Box<dyn TranslationProvider>,
        store: Box<dyn KeyValueStore>,
    ) -> TranslationResult<Self> {
        config.validate()?;

        let mut cache = TranslationCache::new(config.cache_capacity, &config.target_lang);
        match cache.load_from_store(store.as_ref()) {
            Ok(0) => {}
            Ok(count) => info!("从存储加载 {} 条缓存译文", count),
            Err(e) => warn!("加载缓存失败，使用空缓存: {}", e),
        }

        let initial = if config.enabled {
            PipelineStatus::Idle
        } else {
            PipelineStatus::Disabled
        };
        let (status_tx, _) = watch::channel(initial);

        info!(
            "翻译管道初始化: 提供商 {}，目标语言 {}，批次 {} 条",
            provider.name(),
            config.target_lang,
            config.batch_size
        );

        Ok(Self {
            normalizer: KeyNormalizer::new(config.normalizer_memo_size, config.normalizer_memo_ttl()),
            tracker: UnitTracker::new(config.full_rescan_interval(), config.viewport_margin_px),
            queue: TranslationQueue::new(config.batch_delay()),
            dispatcher: Dispatcher::new(&config),
            smart_skip: SmartSkipController::new(
                config.smart_skip_enabled,
                config.smart_skip_threshold,
                config.smart_skip_min_samples as u64,
            ),
            filter: TextFilter::from_hints(&config.source_hints),
            reconciler: Reconciler::new(),
            cache,
            store,
            provider,
            config,
            stats: PipelineStats::default(),
            dispatching: false,
            clear_rendered: false,
            last_reconcile: None,
            status_tx,
        })
    }

    /// 按配置打开存储、应用持久化的用户参数并创建 HTTP 提供商
    pub fn from_config(mut config: TranslationConfig) -> TranslationResult<Self> {
        let store: Box<dyn KeyValueStore> = match &config.store_path {
            Some(path) => Box::new(RedbStore::open(shellexpand::tilde(path).into_owned())?),
            None => Box::new(MemoryStore::new()),
        };
        config.apply_store_overrides(store.as_ref())?;
        let provider = ChatCompletionsProvider::new(&config)?;
        Self::new(config, Box::new(provider), store)
    }

    // ------------------------------------------------------------------------
    // 访问器
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &TranslationConfig {
        &self.config
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn skip_stats(&self) -> SkipStats {
        self.smart_skip.stats()
    }

    pub fn is_suppressed(&self) -> bool {
        self.smart_skip.is_suppressed()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.pending_len()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracker.tracked_count()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PipelineStatus> {
        self.status_tx.subscribe()
    }

    /// 当前状态
    pub fn status(&self) -> PipelineStatus {
        let now = Instant::now();
        if !self.config.enabled {
            return PipelineStatus::Disabled;
        }
        if let Some(reason) = self.dispatcher.fatal_reason() {
            return PipelineStatus::Fatal(reason.to_string());
        }
        if self.smart_skip.is_suppressed() {
            return PipelineStatus::Suppressed;
        }
        if self.dispatching {
            return PipelineStatus::Dispatching;
        }
        if let Some(until) = self.dispatcher.backoff_active(now) {
            return PipelineStatus::BackingOff { until };
        }
        if self.queue.is_empty() {
            return PipelineStatus::Idle;
        }
        match self.queue.drain_ready_at() {
            Some(at) if at > now => PipelineStatus::Collecting,
            _ => match self.dispatcher.ready_at() {
                Some(until) if until > now => PipelineStatus::Waiting { until },
                _ => PipelineStatus::Collecting,
            },
        }
    }

    fn publish_status(&self) {
        let status = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                debug!("管道状态: {:?}", status);
                *current = status;
                true
            }
        });
    }

    // ------------------------------------------------------------------------
    // 宿主通知
    // ------------------------------------------------------------------------

    pub fn notify_changed(&mut self, node: N) {
        self.tracker.notify_changed(node);
    }

    pub fn notify_viewport_changed(&mut self) {
        self.tracker.notify_viewport_changed();
    }

    pub fn set_page_visible(&mut self, visible: bool) {
        self.tracker.set_page_visible(visible);
    }

    pub fn handle_event(&mut self, event: HostEvent<N>) {
        match event {
            HostEvent::Changed(node) => self.notify_changed(node),
            HostEvent::ViewportChanged => self.notify_viewport_changed(),
            HostEvent::VisibilityChanged(visible) => self.set_page_visible(visible),
            HostEvent::Rescan => self.tracker.request_full_scan(),
            HostEvent::Shutdown => {}
        }
    }

    // ------------------------------------------------------------------------
    // 发现与入队
    // ------------------------------------------------------------------------

    /// 处理追踪器积累的变化，返回产生的单元事件数
    pub fn poll<H>(&mut self, host: &mut H, now: Instant) -> usize
    where
        H: ContentTree<Node = N> + ContentInjector<N>,
    {
        if std::mem::take(&mut self.clear_rendered) {
            host.clear_all_rendered();
            debug!("已清除旧目标语言的译文");
        }
        if !self.config.enabled {
            return 0;
        }

        let events = self.tracker.poll(&*host, &mut self.normalizer, now);
        let count = events.len();
        for event in events {
            if event.change == UnitChange::TextChanged {
                // 旧译文已过期
                self.queue.forget_unit(&event.unit.node);
                host.clear_rendered(&event.unit.node);
            }
            self.enqueue(host, event.unit, now);
        }
        count
    }

    /// 解析一个单元：缓存 → 抑制 → 语言启发式 → 入队
    pub fn enqueue<H>(&mut self, host: &mut H, unit: TextUnit<N>, now: Instant) -> EnqueueOutcome
    where
        H: ContentTree<Node = N> + ContentInjector<N>,
    {
        if !self.config.enabled {
            return EnqueueOutcome::Disabled;
        }
        self.stats.units_seen += 1;

        if self.smart_skip.is_suppressed() {
            self.stats.suppressed_skips += 1;
            return EnqueueOutcome::Suppressed;
        }

        let key = self.normalizer.normalize(&unit.text);

        if let Some(value) = self.cache.get(&key) {
            self.stats.cache_hits += 1;
            metrics::counter!("lyrics_cache_hits_total").increment(1);
            if let Some(text) = value.translation() {
                if render_idempotent(host, &unit.node, text) {
                    self.stats.rendered += 1;
                }
            }
            return EnqueueOutcome::CacheHit(value);
        }

        if let FilterDecision::Skip(reason) = self.filter.classify(&unit.text) {
            self.stats.heuristic_skips += 1;
            return EnqueueOutcome::Skipped(reason);
        }

        let result = self.queue.enqueue(unit.node, key, unit.text, now);
        EnqueueOutcome::Queued(result)
    }

    // ------------------------------------------------------------------------
    // 出队与调度
    // ------------------------------------------------------------------------

    fn dispatch_blocked(&self) -> bool {
        !self.config.enabled
            || self.dispatching
            || self.smart_skip.is_suppressed()
            || self.dispatcher.fatal_reason().is_some()
    }

    /// 下一次出队的时间：收集窗口结束、最小间隔与退避三者取最晚
    pub fn next_drain_at(&self) -> Option<Instant> {
        if self.dispatch_blocked() {
            return None;
        }
        let window = self.queue.drain_ready_at()?;
        Some(match self.dispatcher.ready_at() {
            Some(at) => window.max(at),
            None => window,
        })
    }

    /// 立即取出一个批次
    pub fn drain<T>(&mut self, tree: &T) -> Option<Batch<N>>
    where
        T: ContentTree<Node = N>,
    {
        if self.dispatch_blocked() {
            return None;
        }
        self.queue.drain(self.config.batch_size, tree)
    }

    /// 取出并发送一个批次，应用结果
    pub async fn dispatch_next<H>(&mut self, host: &mut H) -> Option<BatchReport>
    where
        H: ContentTree<Node = N> + ContentInjector<N>,
    {
        let batch = self.drain(&*host)?;
        Some(self.process_batch(host, batch).await)
    }

    async fn process_batch<H>(&mut self, host: &mut H, batch: Batch<N>) -> BatchReport
    where
        H: ContentTree<Node = N> + ContentInjector<N>,
    {
        self.dispatching = true;
        self.publish_status();
        self.stats.batches_dispatched += 1;

        let outcome = self
            .dispatcher
            .dispatch(self.provider.as_ref(), &batch, &self.config)
            .await;
        self.dispatching = false;

        let mut report = BatchReport {
            batch_id: batch.id,
            items: batch.len(),
            outcome: outcome.label(),
            translated: 0,
            skipped: 0,
            rendered: 0,
            suppressed: false,
        };

        match outcome {
            BatchOutcome::Success { results, repaired } => {
                self.stats.batches_succeeded += 1;
                if repaired {
                    self.stats.repaired_responses += 1;
                }

                let outcomes: Vec<_> = batch
                    .into_items()
                    .into_iter()
                    .map(|item| {
                        let text = results.get(&item.item_id).cloned().flatten();
                        (item, text)
                    })
                    .collect();
                report.translated = outcomes.iter().filter(|(_, text)| text.is_some()).count();
                report.skipped = outcomes.len() - report.translated;

                // 先判定抑制，抑制生效的批次只写缓存
                let newly_suppressed = self.smart_skip.record_batch(report.skipped, report.items);
                let render = !self.smart_skip.is_suppressed();

                for (item, text) in outcomes {
                    let units = self.queue.settle(&item.key);
                    let value = match text {
                        Some(text) => CacheValue::Translated(text),
                        None => CacheValue::Skip,
                    };
                    report.rendered += self.reconciler.apply(
                        host,
                        &mut self.cache,
                        &mut self.normalizer,
                        &item.key,
                        &units,
                        value,
                        render,
                    );
                }
                self.stats.rendered += report.rendered as u64;

                if !render {
                    report.suppressed = true;
                    if newly_suppressed {
                        self.suppress(host);
                    }
                }

                debug!(
                    "批次 #{} 完成: 译文 {}，跳过 {}，渲染 {}",
                    report.batch_id, report.translated, report.skipped, report.rendered
                );
                self.flush_cache();
            }
            BatchOutcome::TotalFailure { reason } => {
                self.stats.batch_failures += 1;
                warn!("批次 #{} 整批失败，重新排队: {}", report.batch_id, reason);
                self.requeue(batch, Some(self.config.max_retry_attempts));
            }
            BatchOutcome::Recoverable { status, .. } => {
                self.stats.batch_failures += 1;
                debug!("批次 #{} 收到 HTTP {}，重新排队", report.batch_id, status);
                self.requeue(batch, Some(self.config.max_retry_attempts));
            }
            BatchOutcome::Fatal { reason } => {
                self.stats.batch_failures += 1;
                warn!("批次 #{} 因配置错误停止: {}", report.batch_id, reason);
                // 重新配置后继续，不计入重试次数
                self.requeue(batch, None);
            }
        }

        self.publish_status();
        report
    }

    fn requeue(&mut self, batch: Batch<N>, max_attempts: Option<usize>) {
        let abandoned = self
            .queue
            .requeue_front(batch.into_items(), max_attempts, Instant::now());
        if !abandoned.is_empty() {
            self.stats.items_abandoned += abandoned.len() as u64;
            warn!("{} 个条目超过重试上限，已放弃", abandoned.len());
        }
    }

    /// 进入抑制：清除已渲染的译文，丢弃待处理条目（不写缓存）
    fn suppress<H>(&mut self, host: &mut H)
    where
        H: ContentTree<Node = N> + ContentInjector<N>,
    {
        host.clear_all_rendered();
        let dropped = self.queue.drop_pending();
        self.stats.items_dropped += dropped.len() as u64;
        info!("智能跳过已生效，清除译文并丢弃 {} 个待处理条目", dropped.len());
    }

    // ------------------------------------------------------------------------
    // 一致性与持久化
    // ------------------------------------------------------------------------

    /// 把缓存中的译文补到可见单元上
    pub fn reconcile<H>(&mut self, host: &mut H) -> usize
    where
        H: ContentTree<Node = N> + ContentInjector<N>,
    {
        self.last_reconcile = Some(Instant::now());
        if !self.config.enabled || self.smart_skip.is_suppressed() {
            return 0;
        }
        let visible = self.tracker.visible_units();
        let rendered =
            self.reconciler
                .reconcile_visible(host, &self.cache, &mut self.normalizer, &visible);
        self.stats.rendered += rendered as u64;
        rendered
    }

    fn next_reconcile_at(&self) -> Instant {
        match self.last_reconcile {
            Some(last) => last + self.config.reconcile_interval(),
            None => Instant::now(),
        }
    }

    /// 有修改时把缓存写回存储
    pub fn flush_cache(&mut self) -> bool {
        match self.cache.flush_to_store(self.store.as_mut()) {
            Ok(flushed) => flushed,
            Err(e) => {
                warn!("缓存写回失败: {}", e);
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // 控制
    // ------------------------------------------------------------------------

    /// 更换提供商或配置，清除致命标记
    pub fn reconfigure(
        &mut self,
        provider: Box<dyn TranslationProvider>,
        config: TranslationConfig,
    ) -> TranslationResult<()> {
        config.validate()?;

        if config.target_lang != self.config.target_lang {
            self.cache.set_target_lang(&config.target_lang);
            let dropped = self.queue.drop_pending();
            self.tracker.reset();
            self.clear_rendered = true;
            debug!("目标语言变为 {}，丢弃 {} 个待处理条目", config.target_lang, dropped.len());
        }

        self.cache.resize(config.cache_capacity);
        self.queue.set_window(config.batch_delay());
        self.dispatcher.reconfigure(&config);
        self.smart_skip.configure(
            config.smart_skip_enabled,
            config.smart_skip_threshold,
            config.smart_skip_min_samples as u64,
        );
        self.filter = TextFilter::from_hints(&config.source_hints);
        self.provider = provider;
        self.config = config;

        info!("管道已重新配置: 提供商 {}", self.provider.name());
        self.publish_status();
        Ok(())
    }

    /// 清空缓存并同步到存储
    pub fn clear_cache(&mut self) {
        let count = self.cache.len();
        self.cache.clear();
        self.flush_cache();
        info!("已清空 {} 条缓存译文", count);
    }

    /// 暂停或恢复整个管道
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.config.enabled == enabled {
            return;
        }
        self.config.enabled = enabled;
        if enabled {
            self.tracker.request_full_scan();
            info!("翻译管道已启用");
        } else {
            info!("翻译管道已暂停");
        }
        self.publish_status();
    }

    // ------------------------------------------------------------------------
    // 运行循环
    // ------------------------------------------------------------------------

    /// 协作式运行循环，直到收到 `Shutdown` 或事件通道关闭
    pub async fn run<H>(
        &mut self,
        host: &mut H,
        mut events: mpsc::Receiver<HostEvent<N>>,
    ) -> TranslationResult<()>
    where
        H: ContentTree<Node = N> + ContentInjector<N>,
    {
        info!("翻译管道开始运行");

        loop {
            let now = Instant::now();
            self.poll(host, now);
            if self.next_reconcile_at() <= now {
                self.reconcile(host);
            }
            self.publish_status();

            let drain_at = self.next_drain_at();
            let wake_at = match self.tracker.next_full_scan_at() {
                Some(scan) => scan.min(self.next_reconcile_at()),
                None => self.next_reconcile_at(),
            };

            tokio::select! {
                event = events.recv() => match event {
                    Some(HostEvent::Shutdown) | None => break,
                    Some(event) => self.handle_event(event),
                },
                _ = sleep_until(drain_at.unwrap_or(now)), if drain_at.is_some() => {
                    self.dispatch_next(host).await;
                }
                _ = sleep_until(wake_at) => {}
            }
        }

        self.flush_cache();
        info!("翻译管道已停止");
        Ok(())
    }

    /// 对静态文档完整处理一遍，直到队列清空
    pub async fn run_until_idle<H>(&mut self, host: &mut H) -> TranslationResult<PipelineStats>
    where
        H: ContentTree<Node = N> + ContentInjector<N>,
    {
        self.tracker.request_full_scan();
        self.poll(host, Instant::now());

        while let Some(at) = self.next_drain_at() {
            sleep_until(at).await;
            self.dispatch_next(host).await;
        }

        if let Some(reason) = self.dispatcher.fatal_reason() {
            return Err(TranslationError::ConfigError(reason.to_string()));
        }

        self.reconcile(host);
        self.flush_cache();
        Ok(self.stats)
    }
}
