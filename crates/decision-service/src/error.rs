//! 决策服务错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("规则未找到: {0}")]
    RuleNotFound(String),

    #[error("版本未找到: rule_id={rule_id} version={version}")]
    VersionNotFound { rule_id: String, version: i32 },

    #[error("版本号冲突: rule_id={rule_id} version={version} 已被并发写入占用")]
    DuplicateVersion { rule_id: String, version: i32 },

    #[error("规则没有激活版本: {0}")]
    NoActiveVersion(String),

    #[error("评估器执行失败: {0}")]
    Evaluator(#[source] anyhow::Error),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DecisionError>;

impl DecisionError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::RuleNotFound(_) => "RULE_NOT_FOUND",
            Self::VersionNotFound { .. } => "VERSION_NOT_FOUND",
            Self::DuplicateVersion { .. } => "DUPLICATE_VERSION",
            Self::NoActiveVersion(_) => "NO_ACTIVE_VERSION",
            Self::Evaluator(_) => "EVALUATOR_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// DuplicateVersion 重试前必须重新计算版本号，存储层不会代为重试。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::DuplicateVersion { .. })
    }
}
