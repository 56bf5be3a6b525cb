//! 决策服务门面
//!
//! 进程内唯一的访问入口：持有评估缓存和一把写锁，写者之间以及写者与
//! 缓存回填之间串行，已缓存条目的读路径不取锁。缓存失效发生在和存储层
//! 激活切换相同的临界区内，因此 activate 返回后任何线程的后续评估
//! 要么看到新版本，要么被强制 miss 后重新拉取，绝不会读到旧缓存。
//!
//! 按部署约定每个进程只构造一个实例（显式注入，不用全局访问器）；
//! 多个实例指向同一存储会破坏失效保证。

use crate::cache::{CacheEntry, CacheStats, EvaluationCache};
use crate::compare::{diff_contents, ContentDiff};
use crate::error::{DecisionError, Result};
use crate::evaluator::Evaluator;
use crate::models::{DecisionResult, RuleStatus, RuleVersion};
use crate::store::VersionStore;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, instrument};

/// 决策服务
#[derive(Clone)]
pub struct DecisionService {
    store: Arc<dyn VersionStore>,
    evaluator: Arc<dyn Evaluator>,
    cache: EvaluationCache,
    write_lock: Arc<Mutex<()>>,
}

impl DecisionService {
    pub fn new(store: Arc<dyn VersionStore>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            store,
            evaluator,
            cache: EvaluationCache::new(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// 评估规则
    ///
    /// 缓存命中时直接用缓存内容调用评估器，不访问存储也不取写锁；
    /// 未命中时在写锁内回源填充，评估器调用始终发生在锁外。
    /// 未配置激活版本返回 NoActiveVersion 错误，调用方应将其作为
    /// 可恢复的"未配置"情形处理，而不是崩溃。
    pub async fn evaluate(&self, rule_id: &str, context: &Value) -> Result<DecisionResult> {
        let entry = match self.cache.get(rule_id) {
            Some(entry) => entry,
            None => self.load_active(rule_id).await?,
        };

        let start = Instant::now();
        let evaluation = self
            .evaluator
            .evaluate(&entry.content, context)
            .await
            .map_err(DecisionError::Evaluator)?;

        Ok(DecisionResult {
            rule_id: rule_id.to_string(),
            version_number: entry.version_number,
            decision: evaluation.decision,
            confidence: evaluation.confidence,
            explanations: evaluation.explanations,
            evaluation_time_ms: start.elapsed().as_millis() as i64,
        })
    }

    /// 缓存未命中路径：写锁内回源并填充
    async fn load_active(&self, rule_id: &str) -> Result<CacheEntry> {
        let _guard = self.write_lock.lock().await;

        // 等锁期间可能已被其他 miss 填充
        if let Some(entry) = self.cache.get(rule_id) {
            return Ok(entry);
        }

        let rule = self
            .store
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| DecisionError::RuleNotFound(rule_id.to_string()))?;

        if rule.status == RuleStatus::Disabled {
            return Err(DecisionError::NoActiveVersion(rule_id.to_string()));
        }

        let version = self
            .store
            .get_active_version(rule_id)
            .await?
            .ok_or_else(|| DecisionError::NoActiveVersion(rule_id.to_string()))?;

        let entry = CacheEntry {
            content: Arc::new(version.content),
            version_number: version.version_number,
        };
        self.cache
            .put(rule_id, entry.content.clone(), entry.version_number);

        info!("缓存已填充: {} v{}", rule_id, entry.version_number);
        Ok(entry)
    }

    /// 保存新版本（draft），不影响当前激活版本和缓存
    #[instrument(skip(self, content))]
    pub async fn save_rule_version(
        &self,
        rule_id: &str,
        content: Value,
        created_by: &str,
        changelog: &str,
    ) -> Result<RuleVersion> {
        let _guard = self.write_lock.lock().await;
        self.store
            .save_version(rule_id, content, created_by, changelog)
            .await
    }

    /// 激活指定版本
    ///
    /// 存储层切换和缓存失效在同一临界区内完成。
    #[instrument(skip(self))]
    pub async fn activate_version(&self, rule_id: &str, version_number: i32) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.activate(rule_id, version_number).await?;
        self.cache.invalidate(rule_id);
        Ok(())
    }

    /// 回滚到历史版本：就是对旧版本号的激活，不产生新版本
    pub async fn rollback(&self, rule_id: &str, version_number: i32) -> Result<()> {
        self.activate_version(rule_id, version_number).await
    }

    /// 版本历史，最新在前
    pub async fn version_history(&self, rule_id: &str, limit: i64) -> Result<Vec<RuleVersion>> {
        self.store.list_versions(rule_id, limit).await
    }

    /// 比较两个版本的内容差异
    ///
    /// 低频管理操作，直接穿透存储，不经过缓存和写锁。
    pub async fn compare_versions(&self, rule_id: &str, v1: i32, v2: i32) -> Result<ContentDiff> {
        let old = self
            .store
            .get_version(rule_id, v1)
            .await?
            .ok_or_else(|| DecisionError::VersionNotFound {
                rule_id: rule_id.to_string(),
                version: v1,
            })?;
        let new = self
            .store
            .get_version(rule_id, v2)
            .await?
            .ok_or_else(|| DecisionError::VersionNotFound {
                rule_id: rule_id.to_string(),
                version: v2,
            })?;

        Ok(diff_contents(&old.content, &new.content))
    }

    /// 启用/停用规则
    #[instrument(skip(self))]
    pub async fn set_rule_status(&self, rule_id: &str, status: RuleStatus) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.set_rule_status(rule_id, status).await?;
        self.cache.invalidate(rule_id);
        Ok(())
    }

    /// 清空全部缓存（管理操作）
    pub async fn clear_cache(&self) {
        let _guard = self.write_lock.lock().await;
        self.cache.invalidate_all();
    }

    /// 缓存统计信息
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
