//! 文本键规范化
//!
//! 把原始文本折叠为稳定的查找键：空白序列（含全角空格与零宽字符）合并为单个空格，
//! 去除首尾空白并转为小写。`KeyNormalizer` 在其上加一层有界、带 TTL 的记忆缓存。

use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// 规范化后的文本键，缓存、去重与渲染幂等判断都以它为身份
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}')
}

/// 纯函数形式的规范化
pub fn normalize_text(text: &str) -> NormalizedKey {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars() {
        if is_separator(c) {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.extend(c.to_lowercase());
    }

    NormalizedKey(out)
}

struct MemoEntry {
    key: NormalizedKey,
    inserted_at: Instant,
}

/// 带记忆缓存的规范化器
///
/// 记忆缓存只影响开销，不影响结果：条目过期或被淘汰后会重新计算。
pub struct KeyNormalizer {
    memo: LruCache<String, MemoEntry>,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

impl KeyNormalizer {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            memo: LruCache::new(capacity),
            ttl,
            hits: 0,
            misses: 0,
        }
    }

    /// 规范化文本，命中未过期的记忆条目时直接返回
    pub fn normalize(&mut self, text: &str) -> NormalizedKey {
        let now = Instant::now();

        // peek 不刷新顺序，淘汰按插入先后进行
        if let Some(entry) = self.memo.peek(text) {
            if now.duration_since(entry.inserted_at) < self.ttl {
                self.hits += 1;
                return entry.key.clone();
            }
        }

        self.misses += 1;
        let key = normalize_text(text);
        self.memo.put(
            text.to_string(),
            MemoEntry {
                key: key.clone(),
                inserted_at: now,
            },
        );
        key
    }

    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }

    /// (命中, 未命中)
    pub fn memo_stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn clear(&mut self) {
        self.memo.clear();
    }
}
