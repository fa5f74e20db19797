//! 持久化翻译缓存
//!
//! 容量有界、无 TTL 的长期缓存。条目按插入先后淘汰（最旧的先淘汰），
//! 查询不刷新顺序，覆盖写入视为重新插入。整个缓存以一个 JSON 文档保存在
//! 键值存储的 `translation_cache` 键下。

use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::translation::config::constants;
use crate::translation::error::{TranslationError, TranslationResult};
use crate::translation::pipeline::normalizer::NormalizedKey;
use crate::translation::storage::store::KeyValueStore;

// ============================================================================
// 核心类型
// ============================================================================

/// 缓存值：译文，或“已知无需翻译”的哨兵
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "lowercase")]
pub enum CacheValue {
    Translated(String),
    Skip,
}

impl CacheValue {
    pub fn is_skip(&self) -> bool {
        matches!(self, CacheValue::Skip)
    }

    /// 可渲染的译文
    pub fn translation(&self) -> Option<&str> {
        match self {
            CacheValue::Translated(text) => Some(text),
            CacheValue::Skip => None,
        }
    }
}

/// 缓存条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: NormalizedKey,
    pub value: CacheValue,
    /// 插入时间（Unix 毫秒）
    pub inserted_at: i64,
}

/// 缓存统计信息
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub total_entries: usize,
}

impl CacheStats {
    /// 计算缓存命中率
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_requests as f64
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedCache {
    version: u32,
    /// 最旧的在前
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    id: String,
    #[serde(flatten)]
    entry: CacheEntry,
}

const PERSIST_VERSION: u32 = 1;

/// 翻译缓存
pub struct TranslationCache {
    entries: LruCache<String, CacheEntry>,
    target_lang: String,
    stats: CacheStats,
    dirty: bool,
}

// ============================================================================
// 实现
// ============================================================================

/// 生成按目标语言分区的存储键
pub fn storage_key(target_lang: &str, key: &NormalizedKey) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(target_lang.as_bytes());
    hasher.update(&[0]);
    hasher.update(key.as_str().as_bytes());
    format!("trans:{}", hasher.finalize().to_hex())
}

impl TranslationCache {
    pub fn new(capacity: usize, target_lang: &str) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            target_lang: target_lang.to_string(),
            stats: CacheStats::default(),
            dirty: false,
        }
    }

    pub fn target_lang(&self) -> &str {
        &self.target_lang
    }

    /// 切换目标语言分区，已有条目保留
    pub fn set_target_lang(&mut self, target_lang: &str) {
        self.target_lang = target_lang.to_string();
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// 调整容量，缩小时淘汰最旧的条目
    pub fn resize(&mut self, capacity: usize) {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let before = self.entries.len();
        self.entries.resize(capacity);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            self.stats.evictions += evicted as u64;
            self.dirty = true;
        }
    }

    /// 查询缓存，不改变淘汰顺序
    pub fn get(&mut self, key: &NormalizedKey) -> Option<CacheValue> {
        self.stats.total_requests += 1;
        let id = storage_key(&self.target_lang, key);
        match self.entries.peek(&id) {
            Some(entry) => {
                self.stats.cache_hits += 1;
                Some(entry.value.clone())
            }
            None => {
                self.stats.cache_misses += 1;
                None
            }
        }
    }

    /// 只读检查，不计入统计
    pub fn peek(&self, key: &NormalizedKey) -> Option<&CacheValue> {
        self.entries
            .peek(&storage_key(&self.target_lang, key))
            .map(|entry| &entry.value)
    }

    pub fn contains(&self, key: &NormalizedKey) -> bool {
        self.entries.contains(&storage_key(&self.target_lang, key))
    }

    /// 写入条目，返回因容量溢出被淘汰的条目
    pub fn put(&mut self, key: NormalizedKey, value: CacheValue) -> Option<CacheEntry> {
        let id = storage_key(&self.target_lang, &key);
        // 覆盖写入移到最新位置
        self.entries.pop(&id);

        let entry = CacheEntry {
            key,
            value,
            inserted_at: chrono::Utc::now().timestamp_millis(),
        };

        self.stats.insertions += 1;
        self.dirty = true;

        match self.entries.push(id, entry) {
            Some((_, evicted)) => {
                self.stats.evictions += 1;
                tracing::debug!("缓存已满，淘汰最旧条目: {}", evicted.key);
                Some(evicted)
            }
            None => None,
        }
    }

    pub fn remove(&mut self, key: &NormalizedKey) -> Option<CacheEntry> {
        let removed = self.entries.pop(&storage_key(&self.target_lang, key));
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// 清空所有语言分区
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.dirty = true;
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 自上次持久化以来是否有修改
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// 按插入顺序（最旧的在前）遍历条目
    pub fn iter_oldest_first(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.iter().rev().map(|(_, entry)| entry)
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.total_entries = self.entries.len();
        stats
    }

    /// 序列化为 JSON 文档
    pub fn to_json(&self) -> TranslationResult<String> {
        let entries = self
            .entries
            .iter()
            .rev()
            .map(|(id, entry)| PersistedEntry {
                id: id.clone(),
                entry: entry.clone(),
            })
            .collect();

        let doc = PersistedCache {
            version: PERSIST_VERSION,
            entries,
        };
        Ok(serde_json::to_string(&doc)?)
    }

    /// 从 JSON 文档恢复，按保存顺序重新插入，超出容量时保留最新的条目
    pub fn load_json(&mut self, json: &str) -> TranslationResult<usize> {
        let doc: PersistedCache = serde_json::from_str(json)?;
        if doc.version != PERSIST_VERSION {
            return Err(TranslationError::CacheError(format!(
                "不支持的缓存版本: {}",
                doc.version
            )));
        }

        self.entries.clear();
        for persisted in doc.entries {
            self.entries.push(persisted.id, persisted.entry);
        }
        self.dirty = false;
        Ok(self.entries.len())
    }

    /// 从存储加载；文档缺失或损坏时从空缓存开始
    pub fn load_from_store(&mut self, store: &dyn KeyValueStore) -> TranslationResult<usize> {
        match store.get(constants::STORE_CACHE_KEY)? {
            Some(json) => match self.load_json(&json) {
                Ok(count) => {
                    tracing::info!("从存储加载 {} 条缓存", count);
                    Ok(count)
                }
                Err(e) => {
                    tracing::warn!("缓存文档无法解析，忽略: {}", e);
                    self.entries.clear();
                    Ok(0)
                }
            },
            None => Ok(0),
        }
    }

    /// 有修改时写回存储
    pub fn flush_to_store(&mut self, store: &mut dyn KeyValueStore) -> TranslationResult<bool> {
        if !self.dirty {
            return Ok(false);
        }

        if self.entries.is_empty() {
            store.remove(constants::STORE_CACHE_KEY)?;
        } else {
            let json = self.to_json()?;
            store.set(constants::STORE_CACHE_KEY, &json)?;
        }

        self.dirty = false;
        tracing::debug!("缓存已写回存储: {} 条", self.entries.len());
        Ok(true)
    }
}
