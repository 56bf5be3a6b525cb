//! 评估缓存
//!
//! 使用 DashMap 提供线程安全的激活版本缓存，避免每次评估都回表取内容。
//! 条目不设 TTL，唯一的失效触发是决策服务在激活切换后的显式调用。

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};

/// 缓存条目：激活版本的内容及其版本号
///
/// content 用 Arc 包裹，命中路径只克隆指针不复制载荷。
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub content: Arc<Value>,
    pub version_number: i32,
}

/// 评估缓存
#[derive(Clone, Default)]
pub struct EvaluationCache {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl EvaluationCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// 查询缓存，未命中返回 None
    pub fn get(&self, rule_id: &str) -> Option<CacheEntry> {
        self.entries.get(rule_id).map(|e| e.clone())
    }

    /// 写入/覆盖缓存条目
    pub fn put(&self, rule_id: &str, content: Arc<Value>, version_number: i32) {
        self.entries.insert(
            rule_id.to_string(),
            CacheEntry {
                content,
                version_number,
            },
        );
    }

    /// 失效单个条目，下一次 get 保证未命中
    #[instrument(skip(self))]
    pub fn invalidate(&self, rule_id: &str) {
        if self.entries.remove(rule_id).is_some() {
            info!("缓存已失效: {}", rule_id);
        }
    }

    /// 清空全部条目（受控基准测试前的显式清理）
    #[instrument(skip(self))]
    pub fn invalidate_all(&self) {
        let count = self.entries.len();
        self.entries.clear();
        info!("已清空 {} 条缓存", count);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 获取缓存统计信息
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
        }
    }
}

/// 缓存统计信息
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: usize,
}
