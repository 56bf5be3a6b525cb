//! 决策服务领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 规则状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Active,
    Disabled,
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

impl std::str::FromStr for RuleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("未知规则状态: {}", other)),
        }
    }
}

/// 版本状态
///
/// 生命周期：draft -> active -> archived。
/// 版本一经创建不可变更内容，状态流转由激活操作驱动。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Active,
    Archived,
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Active => write!(f, "active"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for VersionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(format!("未知版本状态: {}", other)),
        }
    }
}

/// 规则定义（身份和元数据）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub ruleset: String,
    pub description: String,
    pub status: RuleStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn new(rule_id: impl Into<String>, ruleset: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            ruleset: ruleset.into(),
            description: String::new(),
            status: RuleStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

/// 规则版本（某一时刻规则内容的不可变快照）
///
/// version_number 由存储层分配，从 1 开始严格递增，客户端不得自行指定。
/// content 为评估器自解释的不透明载荷，核心不检查其内部结构。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleVersion {
    pub rule_id: String,
    pub version_number: i32,
    pub content: Value,
    pub created_by: String,
    pub changelog: String,
    pub status: VersionStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// 评估器返回的原始结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub decision: String,
    pub confidence: f64,
    pub explanations: Vec<String>,
}

/// 决策结果
///
/// 携带做出本次决策的版本号，保证"哪个版本决定的"可精确回答。
#[derive(Debug, Clone, Serialize)]
pub struct DecisionResult {
    pub rule_id: String,
    pub version_number: i32,
    pub decision: String,
    pub confidence: f64,
    pub explanations: Vec<String>,
    pub evaluation_time_ms: i64,
}

/// 批量评估请求项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub rule_id: String,
    pub context: Value,
}

impl BatchItem {
    pub fn new(rule_id: impl Into<String>, context: Value) -> Self {
        Self {
            rule_id: rule_id.into(),
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_status_round_trip() {
        for status in [
            VersionStatus::Draft,
            VersionStatus::Active,
            VersionStatus::Archived,
        ] {
            let text = status.to_string();
            let parsed: VersionStatus = text.parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("published".parse::<VersionStatus>().is_err());
        assert!("paused".parse::<RuleStatus>().is_err());
    }

    #[test]
    fn test_rule_version_serialization() {
        let version = RuleVersion {
            rule_id: "loan_approval".to_string(),
            version_number: 3,
            content: json!({"max_amount": 50000, "min_score": 650}),
            created_by: "risk-team".to_string(),
            changelog: "上调额度上限".to_string(),
            status: VersionStatus::Draft,
            created_at: Utc::now(),
        };

        let text = serde_json::to_string(&version).unwrap();
        let parsed: RuleVersion = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.version_number, 3);
        assert_eq!(parsed.status, VersionStatus::Draft);
        assert_eq!(parsed.content, version.content);
    }

    #[test]
    fn test_rule_new_defaults() {
        let rule = Rule::new("fraud_check", "risk");
        assert_eq!(rule.status, RuleStatus::Active);
        assert!(rule.description.is_empty());
    }
}
