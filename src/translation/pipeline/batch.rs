//! 批次构建
//!
//! 一个批次是按规范化键去重后的至多 N 个条目。每个条目在构建时获得不透明标识
//! （`id_1`、`id_2`……），结果按标识而不是位置匹配。

use std::collections::BTreeMap;

use tokio::time::Instant;

use super::normalizer::NormalizedKey;
use super::queue::QueueItem;

/// 批次中的条目
#[derive(Debug, Clone)]
pub struct BatchItem<N> {
    pub item_id: String,
    pub key: NormalizedKey,
    pub text: String,
    /// 发起该条目的所有单元
    pub units: Vec<N>,
    pub attempts: usize,
    pub(crate) seq: i64,
}

/// 翻译批次
#[derive(Debug, Clone)]
pub struct Batch<N> {
    pub id: u64,
    pub items: Vec<BatchItem<N>>,
    pub created_at: Instant,
}

impl<N> Batch<N> {
    /// 从出队条目构建批次并分配标识
    pub fn from_queue_items(id: u64, items: Vec<QueueItem<N>>) -> Self {
        let items = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| BatchItem {
                item_id: format!("id_{}", index + 1),
                key: item.key,
                text: item.text,
                units: item.units,
                attempts: item.attempts,
                seq: item.seq,
            })
            .collect();

        Self {
            id,
            items,
            created_at: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 请求负载：标识 → 原文
    pub fn request_items(&self) -> BTreeMap<String, String> {
        self.items
            .iter()
            .map(|item| (item.item_id.clone(), item.text.clone()))
            .collect()
    }

    /// 拆出条目，用于重新排队或逐条应用结果
    pub fn into_items(self) -> Vec<BatchItem<N>> {
        self.items
    }
}

impl<N> From<BatchItem<N>> for QueueItem<N> {
    fn from(item: BatchItem<N>) -> Self {
        QueueItem {
            key: item.key,
            text: item.text,
            units: item.units,
            enqueued_at: Instant::now(),
            attempts: item.attempts,
            seq: item.seq,
        }
    }
}
