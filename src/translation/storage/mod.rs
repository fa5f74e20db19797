//! 存储模块
//!
//! 提供持久化翻译缓存和键值存储。

pub mod cache;
pub mod store;

pub use cache::{CacheEntry, CacheStats, CacheValue, TranslationCache};
pub use store::{KeyValueStore, MemoryStore, RedbStore};
