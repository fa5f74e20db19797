//! 持久化键值存储
//!
//! 扁平字符串映射，跨会话保存缓存内容、提供商凭据与用户参数。缺失的键即使用默认值。

use std::collections::HashMap;
use std::path::Path;

use redb::{Database, TableDefinition};

use crate::translation::error::TranslationResult;

const SETTINGS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// 键值存储接口
pub trait KeyValueStore {
    /// 读取键，不存在时返回 `None`
    fn get(&self, key: &str) -> TranslationResult<Option<String>>;

    /// 写入键
    fn set(&mut self, key: &str, value: &str) -> TranslationResult<()>;

    /// 删除键，键不存在时不报错
    fn remove(&mut self, key: &str) -> TranslationResult<()>;
}

/// 内存存储，用于测试和无需持久化的场景
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> TranslationResult<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> TranslationResult<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> TranslationResult<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// 基于 redb 的磁盘存储
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// 打开或创建数据库文件
    pub fn open<P: AsRef<Path>>(path: P) -> TranslationResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path)?;
        tracing::debug!("打开存储: {}", path.display());
        Ok(Self { db })
    }
}

impl KeyValueStore for RedbStore {
    fn get(&self, key: &str) -> TranslationResult<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(SETTINGS_TABLE) {
            Ok(table) => table,
            // 首次写入之前表不存在
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let value = table.get(key)?.map(|guard| guard.value().to_string());
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> TranslationResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS_TABLE)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> TranslationResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS_TABLE)?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }
}

/// 读取并解析一个键，解析失败时记录警告并视为缺失
pub fn get_parsed<T: std::str::FromStr>(
    store: &dyn KeyValueStore,
    key: &str,
) -> TranslationResult<Option<T>> {
    match store.get(key)? {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                tracing::warn!("存储中的 {} 无法解析，忽略: {}", key, raw);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}
