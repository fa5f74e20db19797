//! 翻译队列
//!
//! 待翻译条目按规范化键去重，同键的单元合并到同一条目。收集窗口从空闲周期的第一次
//! 入队开始计时；出队时按优先级（屏内 → 折线以下 → 折线以上 → 零尺寸/已分离）和
//! 垂直位置排序，取至多 N 条，其余留在队列中。

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::batch::{Batch, BatchItem};
use super::host::{ContentTree, PriorityTier};
use super::normalizer::NormalizedKey;

/// 队列条目
#[derive(Debug, Clone)]
pub struct QueueItem<N> {
    pub key: NormalizedKey,
    pub text: String,
    pub units: Vec<N>,
    pub enqueued_at: Instant,
    pub attempts: usize,
    /// 同优先级内的先后顺序，重新排队的条目为负数
    pub(crate) seq: i64,
}

/// 入队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// 新建条目
    Queued,
    /// 合并到已有的待处理条目
    Merged,
    /// 同一单元已在队列中
    AlreadyQueued,
    /// 同键条目正在请求中，单元等待其结果
    JoinedInFlight,
}

/// 翻译队列
pub struct TranslationQueue<N> {
    pending: HashMap<NormalizedKey, QueueItem<N>>,
    in_flight: HashMap<NormalizedKey, Vec<N>>,
    window: Duration,
    ready_at: Option<Instant>,
    next_seq: i64,
    front_seq: i64,
    next_batch_id: u64,
}

impl<N> TranslationQueue<N>
where
    N: Clone + Eq + std::hash::Hash + std::fmt::Debug,
{
    pub fn new(window: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            in_flight: HashMap::new(),
            window,
            ready_at: None,
            next_seq: 0,
            front_seq: 0,
            next_batch_id: 1,
        }
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    /// 入队；相同文本的同一单元不会重复加入
    pub fn enqueue(&mut self, unit: N, key: NormalizedKey, text: String, now: Instant) -> EnqueueResult {
        if let Some(units) = self.in_flight.get_mut(&key) {
            if !units.contains(&unit) {
                units.push(unit);
            }
            return EnqueueResult::JoinedInFlight;
        }

        if let Some(item) = self.pending.get_mut(&key) {
            if item.units.contains(&unit) {
                return EnqueueResult::AlreadyQueued;
            }
            item.units.push(unit);
            return EnqueueResult::Merged;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(
            key.clone(),
            QueueItem {
                key,
                text,
                units: vec![unit],
                enqueued_at: now,
                attempts: 0,
                seq,
            },
        );

        if self.ready_at.is_none() {
            self.ready_at = Some(now + self.window);
        }
        EnqueueResult::Queued
    }

    pub fn is_pending(&self, key: &NormalizedKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 最早可出队的时间；队列为空时为 `None`
    pub fn drain_ready_at(&self) -> Option<Instant> {
        if self.pending.is_empty() {
            None
        } else {
            self.ready_at
        }
    }

    fn rank<T>(tree: &T, item: &QueueItem<N>) -> (PriorityTier, f64)
    where
        T: ContentTree<Node = N>,
    {
        let viewport = tree.viewport();
        item.units
            .iter()
            .map(|unit| {
                if !tree.is_attached(unit) {
                    return (PriorityTier::Detached, f64::MAX);
                }
                let bounds = tree.bounds(unit);
                let tier = PriorityTier::classify(bounds, viewport);
                (tier, bounds.map_or(f64::MAX, |b| b.top))
            })
            .min_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)))
            .unwrap_or((PriorityTier::Detached, f64::MAX))
    }

    /// 取出一个批次，剩余条目留在队列中
    pub fn drain<T>(&mut self, max: usize, tree: &T) -> Option<Batch<N>>
    where
        T: ContentTree<Node = N>,
    {
        if self.pending.is_empty() || max == 0 {
            return None;
        }

        let mut ranked: Vec<((PriorityTier, f64, i64), NormalizedKey)> = self
            .pending
            .values()
            .map(|item| {
                let (tier, top) = Self::rank(tree, item);
                ((tier, top, item.seq), item.key.clone())
            })
            .collect();

        ranked.sort_by(|(a, _), (b, _)| {
            a.0.cmp(&b.0)
                .then(a.1.total_cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut items = Vec::with_capacity(max.min(ranked.len()));
        for (_, key) in ranked.into_iter().take(max) {
            if let Some(item) = self.pending.remove(&key) {
                self.in_flight.insert(key, item.units.clone());
                items.push(item);
            }
        }

        if self.pending.is_empty() {
            self.ready_at = None;
        }

        let id = self.next_batch_id;
        self.next_batch_id += 1;
        Some(Batch::from_queue_items(id, items))
    }

    /// 结束请求，返回等待该键结果的所有单元
    pub fn settle(&mut self, key: &NormalizedKey) -> Vec<N> {
        self.in_flight.remove(key).unwrap_or_default()
    }

    /// 把失败的条目放回队首，保持它们彼此的先后顺序
    ///
    /// `max_attempts` 为 `Some` 时本次失败计入重试次数，超过上限的条目不再排队，
    /// 作为放弃的条目返回；为 `None` 时不计数也不放弃。
    pub fn requeue_front(
        &mut self,
        items: Vec<BatchItem<N>>,
        max_attempts: Option<usize>,
        now: Instant,
    ) -> Vec<BatchItem<N>> {
        let mut abandoned = Vec::new();
        let mut retry = Vec::new();

        for mut item in items {
            let mut units = self.settle(&item.key);
            for unit in std::mem::take(&mut item.units) {
                if !units.contains(&unit) {
                    units.push(unit);
                }
            }
            item.units = units;

            match max_attempts {
                Some(max) => {
                    item.attempts += 1;
                    if item.attempts > max {
                        abandoned.push(item);
                    } else {
                        retry.push(item);
                    }
                }
                None => retry.push(item),
            }
        }

        let base = self.front_seq - retry.len() as i64;
        self.front_seq = base;

        for (offset, item) in retry.into_iter().enumerate() {
            let mut queued: QueueItem<N> = item.into();
            queued.seq = base + offset as i64;
            queued.enqueued_at = now;

            match self.pending.get_mut(&queued.key) {
                Some(existing) => {
                    for unit in queued.units {
                        if !existing.units.contains(&unit) {
                            existing.units.push(unit);
                        }
                    }
                    existing.seq = existing.seq.min(queued.seq);
                    existing.attempts = existing.attempts.max(queued.attempts);
                }
                None => {
                    self.pending.insert(queued.key.clone(), queued);
                }
            }
        }

        if !self.pending.is_empty() {
            self.ready_at = Some(self.ready_at.map_or(now, |at| at.min(now)));
        }

        abandoned
    }

    /// 丢弃所有待处理条目
    pub fn drop_pending(&mut self) -> Vec<QueueItem<N>> {
        self.ready_at = None;
        self.pending.drain().map(|(_, item)| item).collect()
    }

    /// 单元文本已变化，不再等待旧键的结果
    pub fn forget_unit(&mut self, unit: &N) {
        self.pending.retain(|_, item| {
            item.units.retain(|u| u != unit);
            !item.units.is_empty()
        });
        for units in self.in_flight.values_mut() {
            units.retain(|u| u != unit);
        }
        if self.pending.is_empty() {
            self.ready_at = None;
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.in_flight.clear();
        self.ready_at = None;
    }
}
