//! PostgreSQL 版本存储
//!
//! 基于 rules / rule_versions 两张表的持久化实现。
//! (rule_id, version_number) 上的唯一约束把并发 save_version 的撞号
//! 变成可检测的 DuplicateVersion 而不是静默覆盖；激活切换在事务内完成。

use crate::error::{DecisionError, Result};
use crate::models::{Rule, RuleStatus, RuleVersion, VersionStatus};
use crate::store::VersionStore;
use async_trait::async_trait;
use decision_shared::config::DatabaseConfig;
use decision_shared::database::Database;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{info, instrument};

/// PostgreSQL 版本存储
pub struct PgVersionStore {
    pool: PgPool,
}

impl PgVersionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按数据库配置建池并构造
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let database = Database::connect(config).await?;
        Ok(Self::new(database.pool().clone()))
    }

    /// 规则存在性检查，未知 rule_id 统一报 RuleNotFound
    async fn ensure_rule_exists(&self, rule_id: &str) -> Result<()> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM rules WHERE rule_id = $1) AS exists")
            .bind(rule_id)
            .fetch_one(&self.pool)
            .await?;

        if row.get::<bool, _>("exists") {
            Ok(())
        } else {
            Err(DecisionError::RuleNotFound(rule_id.to_string()))
        }
    }

    /// 从数据库行映射到 RuleVersion 结构体
    fn map_version_row(row: &sqlx::postgres::PgRow) -> Result<RuleVersion> {
        let status: String = row.get("status");
        let status: VersionStatus = status.parse().map_err(DecisionError::Internal)?;

        Ok(RuleVersion {
            rule_id: row.get("rule_id"),
            version_number: row.get("version_number"),
            content: row.get("content"),
            created_by: row.get("created_by"),
            changelog: row.get("changelog"),
            status,
            created_at: row.get("created_at"),
        })
    }

    fn map_rule_row(row: &sqlx::postgres::PgRow) -> Result<Rule> {
        let status: String = row.get("status");
        let status: RuleStatus = status.parse().map_err(DecisionError::Internal)?;

        Ok(Rule {
            rule_id: row.get("rule_id"),
            ruleset: row.get("ruleset"),
            description: row.get("description"),
            status,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// 唯一约束冲突（PostgreSQL 错误码 23505）
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl VersionStore for PgVersionStore {
    #[instrument(skip(self, content))]
    async fn save_version(
        &self,
        rule_id: &str,
        content: Value,
        created_by: &str,
        changelog: &str,
    ) -> Result<RuleVersion> {
        let mut tx = self.pool.begin().await?;

        // 首次出现的 rule_id 隐式创建规则
        sqlx::query(
            r#"INSERT INTO rules (rule_id, ruleset, description, status)
               VALUES ($1, 'default', '', 'active')
               ON CONFLICT (rule_id) DO NOTHING"#,
        )
        .bind(rule_id)
        .execute(&mut *tx)
        .await?;

        let next: i32 = sqlx::query(
            r#"SELECT COALESCE(MAX(version_number), 0) + 1 AS next
               FROM rule_versions WHERE rule_id = $1"#,
        )
        .bind(rule_id)
        .fetch_one(&mut *tx)
        .await?
        .get("next");

        // 并发写入者抢占同一版本号时由唯一约束拒绝，调用方重算后重试
        let row = sqlx::query(
            r#"INSERT INTO rule_versions
               (rule_id, version_number, content, created_by, changelog, status)
               VALUES ($1, $2, $3, $4, $5, 'draft')
               RETURNING rule_id, version_number, content, created_by, changelog,
                         status, created_at"#,
        )
        .bind(rule_id)
        .bind(next)
        .bind(&content)
        .bind(created_by)
        .bind(changelog)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DecisionError::DuplicateVersion {
                    rule_id: rule_id.to_string(),
                    version: next,
                }
            } else {
                DecisionError::Database(e)
            }
        })?;

        let version = Self::map_version_row(&row)?;
        tx.commit().await?;

        info!("版本已保存: {} v{}", rule_id, version.version_number);
        Ok(version)
    }

    #[instrument(skip(self))]
    async fn activate(&self, rule_id: &str, version_number: i32) -> Result<()> {
        self.ensure_rule_exists(rule_id).await?;

        let mut tx = self.pool.begin().await?;

        // 先归档再激活，避免和 one-active 部分唯一索引冲突
        sqlx::query(
            r#"UPDATE rule_versions SET status = 'archived'
               WHERE rule_id = $1 AND status = 'active' AND version_number <> $2"#,
        )
        .bind(rule_id)
        .bind(version_number)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            r#"UPDATE rule_versions SET status = 'active'
               WHERE rule_id = $1 AND version_number = $2"#,
        )
        .bind(rule_id)
        .bind(version_number)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // 事务随 drop 回滚，归档不会生效
            return Err(DecisionError::VersionNotFound {
                rule_id: rule_id.to_string(),
                version: version_number,
            });
        }

        sqlx::query("UPDATE rules SET updated_at = NOW() WHERE rule_id = $1")
            .bind(rule_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!("版本已激活: {} v{}", rule_id, version_number);
        Ok(())
    }

    async fn get_version(
        &self,
        rule_id: &str,
        version_number: i32,
    ) -> Result<Option<RuleVersion>> {
        self.ensure_rule_exists(rule_id).await?;

        let row = sqlx::query(
            r#"SELECT rule_id, version_number, content, created_by, changelog,
                      status, created_at
               FROM rule_versions
               WHERE rule_id = $1 AND version_number = $2"#,
        )
        .bind(rule_id)
        .bind(version_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::map_version_row(&r)).transpose()
    }

    async fn get_active_version(&self, rule_id: &str) -> Result<Option<RuleVersion>> {
        self.ensure_rule_exists(rule_id).await?;

        let row = sqlx::query(
            r#"SELECT rule_id, version_number, content, created_by, changelog,
                      status, created_at
               FROM rule_versions
               WHERE rule_id = $1 AND status = 'active'"#,
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::map_version_row(&r)).transpose()
    }

    async fn list_versions(&self, rule_id: &str, limit: i64) -> Result<Vec<RuleVersion>> {
        self.ensure_rule_exists(rule_id).await?;

        let rows = sqlx::query(
            r#"SELECT rule_id, version_number, content, created_by, changelog,
                      status, created_at
               FROM rule_versions
               WHERE rule_id = $1
               ORDER BY version_number DESC
               LIMIT $2"#,
        )
        .bind(rule_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_version_row).collect()
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>> {
        let row = sqlx::query(
            r#"SELECT rule_id, ruleset, description, status, created_at, updated_at
               FROM rules WHERE rule_id = $1"#,
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::map_rule_row(&r)).transpose()
    }

    #[instrument(skip(self))]
    async fn set_rule_status(&self, rule_id: &str, status: RuleStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE rules SET status = $2, updated_at = NOW() WHERE rule_id = $1",
        )
        .bind(rule_id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DecisionError::RuleNotFound(rule_id.to_string()));
        }

        info!("规则状态已更新: {} -> {}", rule_id, status);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reset(&self) -> Result<()> {
        sqlx::query("TRUNCATE rule_versions, rules")
            .execute(&self.pool)
            .await?;
        info!("规则表已清空");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn connect() -> PgVersionStore {
        let mut config = DatabaseConfig::default();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.url = url;
        }
        PgVersionStore::connect(&config).await.unwrap()
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_save_activate_round_trip() {
        let store = connect().await;
        store.reset().await.unwrap();

        let content = json!({"max_amount": 50000});
        let v1 = store
            .save_version("pg_rule", content.clone(), "tester", "init")
            .await
            .unwrap();
        assert_eq!(v1.version_number, 1);

        store.activate("pg_rule", 1).await.unwrap();
        let active = store.get_active_version("pg_rule").await.unwrap().unwrap();
        assert_eq!(active.content, content);
        assert_eq!(active.status, VersionStatus::Active);
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_activate_unknown_version_rolls_back() {
        let store = connect().await;
        store.reset().await.unwrap();

        store
            .save_version("pg_rule", json!({}), "tester", "")
            .await
            .unwrap();
        store.activate("pg_rule", 1).await.unwrap();

        let err = store.activate("pg_rule", 42).await.unwrap_err();
        assert!(matches!(err, DecisionError::VersionNotFound { .. }));

        // 失败的激活不能归档现有 active 版本
        let active = store.get_active_version("pg_rule").await.unwrap();
        assert_eq!(active.unwrap().version_number, 1);
    }
}
