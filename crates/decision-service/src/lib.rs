//! 版本化规则存储与决策服务
//!
//! 提供规则版本的持久化记账和高并发评估入口，支持：
//! - 按规则单调递增的版本号分配与 one-active 不变式
//! - 激活/回滚与缓存失效在同一临界区内的原子切换
//! - 命中路径无锁的评估缓存
//! - 顺序/并行两种模式的批量评估，逐项隔离失败
//! - 版本内容 diff 与审计历史

pub mod cache;
pub mod compare;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod models;
pub mod repository;
pub mod service;
pub mod store;

pub use cache::{CacheEntry, CacheStats, EvaluationCache};
pub use compare::{diff_contents, ContentDiff, FieldChange};
pub use dispatcher::BatchDispatcher;
pub use error::{DecisionError, Result};
pub use evaluator::Evaluator;
pub use models::{
    BatchItem, DecisionResult, Evaluation, Rule, RuleStatus, RuleVersion, VersionStatus,
};
pub use repository::PgVersionStore;
pub use service::DecisionService;
pub use store::{MemoryVersionStore, VersionStore};
