//! 评估器契约
//!
//! 规则内容的解释由外部评估器承担，核心只通过此 trait 调用。
//! content 的内部结构对核心完全不透明。

use crate::models::Evaluation;
use async_trait::async_trait;
use serde_json::Value;

/// 外部评估器
///
/// 实现方拿到激活版本的 content 和调用方提供的 context，
/// 返回决策、置信度和解释列表。评估失败通过 anyhow::Error 上报，
/// 由决策服务包装为 EvaluatorError。
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, content: &Value, context: &Value) -> anyhow::Result<Evaluation>;
}
