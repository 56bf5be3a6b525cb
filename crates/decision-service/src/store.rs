//! 版本存储
//!
//! 规则版本的权威记录：每个规则的版本号单调递增，任一时刻至多一个
//! 版本处于 active 状态。提供 trait 抽象和基于 DashMap 的内存实现，
//! PostgreSQL 实现见 repository 模块。

use crate::error::{DecisionError, Result};
use crate::models::{Rule, RuleStatus, RuleVersion, VersionStatus};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 版本存储契约
///
/// save_version 由存储层分配版本号（max+1，新规则从 1 开始），并发写入
/// 的版本号冲突以 DuplicateVersion 上报，存储层不代为重试。
/// activate 是原子操作：目标版本置 active，原 active 版本置 archived，
/// 任何其他操作都观察不到零个或两个 active 版本的中间状态。
/// 回滚就是对旧版本号调用 activate，不是独立的状态机。
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// 保存新版本（draft 状态），首次出现的 rule_id 会隐式创建规则
    async fn save_version(
        &self,
        rule_id: &str,
        content: Value,
        created_by: &str,
        changelog: &str,
    ) -> Result<RuleVersion>;

    /// 激活指定版本，原子归档之前的 active 版本
    async fn activate(&self, rule_id: &str, version_number: i32) -> Result<()>;

    /// 按 (rule_id, version_number) 查询版本
    async fn get_version(&self, rule_id: &str, version_number: i32)
        -> Result<Option<RuleVersion>>;

    /// 查询当前激活版本，规则存在但无激活版本时返回 None
    async fn get_active_version(&self, rule_id: &str) -> Result<Option<RuleVersion>>;

    /// 按最新在前的顺序列出版本，最多 limit 条
    async fn list_versions(&self, rule_id: &str, limit: i64) -> Result<Vec<RuleVersion>>;

    /// 查询规则元数据
    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>>;

    /// 启用/停用规则（元数据编辑，不触碰版本行）
    async fn set_rule_status(&self, rule_id: &str, status: RuleStatus) -> Result<()>;

    /// 清空所有规则和版本（测试/基准专用的重置工具）
    async fn reset(&self) -> Result<()>;
}

/// 单个规则及其全部版本
#[derive(Debug, Clone)]
struct RuleRecord {
    rule: Rule,
    versions: Vec<RuleVersion>,
}

/// 内存版本存储
///
/// DashMap 按 rule_id 分桶，写操作持有桶内条目的独占引用，
/// 版本号分配和激活切换天然原子。适用于测试和单进程内嵌场景。
#[derive(Clone, Default)]
pub struct MemoryVersionStore {
    rules: Arc<DashMap<String, RuleRecord>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
        }
    }

    /// 当前存储的规则数量
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    #[instrument(skip(self, content))]
    async fn save_version(
        &self,
        rule_id: &str,
        content: Value,
        created_by: &str,
        changelog: &str,
    ) -> Result<RuleVersion> {
        let mut record = self
            .rules
            .entry(rule_id.to_string())
            .or_insert_with(|| RuleRecord {
                rule: Rule::new(rule_id, "default"),
                versions: Vec::new(),
            });

        let next = record
            .versions
            .last()
            .map(|v| v.version_number + 1)
            .unwrap_or(1);

        // 独占条目引用下不可能撞号，防御性保留与 SQL 唯一约束相同的语义
        if record.versions.iter().any(|v| v.version_number == next) {
            return Err(DecisionError::DuplicateVersion {
                rule_id: rule_id.to_string(),
                version: next,
            });
        }

        let version = RuleVersion {
            rule_id: rule_id.to_string(),
            version_number: next,
            content,
            created_by: created_by.to_string(),
            changelog: changelog.to_string(),
            status: VersionStatus::Draft,
            created_at: Utc::now(),
        };

        record.versions.push(version.clone());
        record.rule.updated_at = Utc::now();

        info!("版本已保存: {} v{}", rule_id, next);
        Ok(version)
    }

    #[instrument(skip(self))]
    async fn activate(&self, rule_id: &str, version_number: i32) -> Result<()> {
        let mut record = self
            .rules
            .get_mut(rule_id)
            .ok_or_else(|| DecisionError::RuleNotFound(rule_id.to_string()))?;

        if !record
            .versions
            .iter()
            .any(|v| v.version_number == version_number)
        {
            warn!("激活不存在的版本: {} v{}", rule_id, version_number);
            return Err(DecisionError::VersionNotFound {
                rule_id: rule_id.to_string(),
                version: version_number,
            });
        }

        for version in record.versions.iter_mut() {
            if version.version_number == version_number {
                version.status = VersionStatus::Active;
            } else if version.status == VersionStatus::Active {
                version.status = VersionStatus::Archived;
            }
        }
        record.rule.updated_at = Utc::now();

        info!("版本已激活: {} v{}", rule_id, version_number);
        Ok(())
    }

    async fn get_version(
        &self,
        rule_id: &str,
        version_number: i32,
    ) -> Result<Option<RuleVersion>> {
        let record = self
            .rules
            .get(rule_id)
            .ok_or_else(|| DecisionError::RuleNotFound(rule_id.to_string()))?;

        Ok(record
            .versions
            .iter()
            .find(|v| v.version_number == version_number)
            .cloned())
    }

    async fn get_active_version(&self, rule_id: &str) -> Result<Option<RuleVersion>> {
        let record = self
            .rules
            .get(rule_id)
            .ok_or_else(|| DecisionError::RuleNotFound(rule_id.to_string()))?;

        Ok(record
            .versions
            .iter()
            .find(|v| v.status == VersionStatus::Active)
            .cloned())
    }

    async fn list_versions(&self, rule_id: &str, limit: i64) -> Result<Vec<RuleVersion>> {
        let record = self
            .rules
            .get(rule_id)
            .ok_or_else(|| DecisionError::RuleNotFound(rule_id.to_string()))?;

        let mut versions: Vec<RuleVersion> = record.versions.iter().rev().cloned().collect();
        versions.truncate(limit.max(0) as usize);
        Ok(versions)
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>> {
        Ok(self.rules.get(rule_id).map(|r| r.rule.clone()))
    }

    #[instrument(skip(self))]
    async fn set_rule_status(&self, rule_id: &str, status: RuleStatus) -> Result<()> {
        let mut record = self
            .rules
            .get_mut(rule_id)
            .ok_or_else(|| DecisionError::RuleNotFound(rule_id.to_string()))?;

        record.rule.status = status;
        record.rule.updated_at = Utc::now();
        info!("规则状态已更新: {} -> {}", rule_id, status);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reset(&self) -> Result<()> {
        let count = self.rules.len();
        self.rules.clear();
        info!("已清空 {} 条规则", count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_assigns_monotonic_numbers() {
        let store = MemoryVersionStore::new();

        let v1 = store
            .save_version("r1", json!({"a": 1}), "tester", "init")
            .await
            .unwrap();
        let v2 = store
            .save_version("r1", json!({"a": 2}), "tester", "bump")
            .await
            .unwrap();

        assert_eq!(v1.version_number, 1);
        assert_eq!(v2.version_number, 2);
        assert_eq!(v1.status, VersionStatus::Draft);
    }

    #[tokio::test]
    async fn test_first_save_creates_rule() {
        let store = MemoryVersionStore::new();
        assert!(store.is_empty());

        store
            .save_version("fraud_check", json!({"limit": 10}), "tester", "init")
            .await
            .unwrap();

        let rule = store.get_rule("fraud_check").await.unwrap().unwrap();
        assert_eq!(rule.rule_id, "fraud_check");
        assert_eq!(rule.status, RuleStatus::Active);
    }

    #[tokio::test]
    async fn test_activate_archives_previous() {
        let store = MemoryVersionStore::new();
        store
            .save_version("r1", json!({"a": 1}), "tester", "v1")
            .await
            .unwrap();
        store
            .save_version("r1", json!({"a": 2}), "tester", "v2")
            .await
            .unwrap();

        store.activate("r1", 1).await.unwrap();
        store.activate("r1", 2).await.unwrap();

        let v1 = store.get_version("r1", 1).await.unwrap().unwrap();
        let v2 = store.get_version("r1", 2).await.unwrap().unwrap();
        assert_eq!(v1.status, VersionStatus::Archived);
        assert_eq!(v2.status, VersionStatus::Active);

        let active = store.get_active_version("r1").await.unwrap().unwrap();
        assert_eq!(active.version_number, 2);
    }

    #[tokio::test]
    async fn test_activate_unknown_version() {
        let store = MemoryVersionStore::new();
        store
            .save_version("r1", json!({}), "tester", "v1")
            .await
            .unwrap();

        let err = store.activate("r1", 99).await.unwrap_err();
        assert!(matches!(err, DecisionError::VersionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unknown_rule_errors() {
        let store = MemoryVersionStore::new();

        assert!(matches!(
            store.activate("nope", 1).await.unwrap_err(),
            DecisionError::RuleNotFound(_)
        ));
        assert!(matches!(
            store.get_active_version("nope").await.unwrap_err(),
            DecisionError::RuleNotFound(_)
        ));
        assert!(matches!(
            store.list_versions("nope", 10).await.unwrap_err(),
            DecisionError::RuleNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_list_versions_most_recent_first() {
        let store = MemoryVersionStore::new();
        for i in 1..=5 {
            store
                .save_version("r1", json!({"a": i}), "tester", "")
                .await
                .unwrap();
        }

        let versions = store.list_versions("r1", 3).await.unwrap();
        let numbers: Vec<i32> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn test_rollback_reactivates_without_duplicating() {
        let store = MemoryVersionStore::new();
        store
            .save_version("r1", json!({"a": 1}), "tester", "v1")
            .await
            .unwrap();
        store
            .save_version("r1", json!({"a": 2}), "tester", "v2")
            .await
            .unwrap();
        store.activate("r1", 2).await.unwrap();

        // 回滚就是激活旧版本号
        store.activate("r1", 1).await.unwrap();

        let versions = store.list_versions("r1", 10).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version_number, 2);
        assert_eq!(versions[0].status, VersionStatus::Archived);
        assert_eq!(versions[1].version_number, 1);
        assert_eq!(versions[1].status, VersionStatus::Active);
    }

    #[tokio::test]
    async fn test_set_rule_status() {
        let store = MemoryVersionStore::new();
        store
            .save_version("r1", json!({}), "tester", "")
            .await
            .unwrap();

        store
            .set_rule_status("r1", RuleStatus::Disabled)
            .await
            .unwrap();

        let rule = store.get_rule("r1").await.unwrap().unwrap();
        assert_eq!(rule.status, RuleStatus::Disabled);
    }

    #[tokio::test]
    async fn test_reset() {
        let store = MemoryVersionStore::new();
        store
            .save_version("r1", json!({}), "tester", "")
            .await
            .unwrap();

        store.reset().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_saves_no_gaps_no_duplicates() {
        let store = MemoryVersionStore::new();
        let writers = 8;
        let per_writer = 25;

        let mut handles = Vec::new();
        for _ in 0..writers {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..per_writer {
                    store
                        .save_version("hot_rule", json!({}), "writer", "")
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let total = (writers * per_writer) as i64;
        let versions = store.list_versions("hot_rule", total).await.unwrap();
        let mut numbers: Vec<i32> = versions.iter().map(|v| v.version_number).collect();
        numbers.sort_unstable();

        // 严格递增、无空洞、无重复
        let expected: Vec<i32> = (1..=total as i32).collect();
        assert_eq!(numbers, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_activates_single_active() {
        let store = MemoryVersionStore::new();
        for _ in 0..10 {
            store
                .save_version("r1", json!({}), "tester", "")
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for n in 1..=10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.activate("r1", n).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let versions = store.list_versions("r1", 10).await.unwrap();
        let active_count = versions
            .iter()
            .filter(|v| v.status == VersionStatus::Active)
            .count();
        assert_eq!(active_count, 1);
    }
}
