//! 批量调度器
//!
//! 把 N 个 (rule_id, context) 评估请求按顺序或并行分发，逐项收集
//! 结果。单项失败被转换为该项的错误结果，不会中断或污染同批次的
//! 其他项；输出序列与输入同长同序。

use crate::error::{DecisionError, Result};
use crate::models::{BatchItem, DecisionResult};
use crate::service::DecisionService;
use decision_shared::config::EngineConfig;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

const DEFAULT_CONCURRENCY: usize = 8;

/// 批量调度器
#[derive(Clone)]
pub struct BatchDispatcher {
    service: DecisionService,
    concurrency: usize,
}

impl BatchDispatcher {
    pub fn new(service: DecisionService) -> Self {
        Self {
            service,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// 按引擎配置构造
    pub fn from_config(service: DecisionService, config: &EngineConfig) -> Self {
        Self::new(service).with_concurrency(config.batch_concurrency)
    }

    /// 设置并行模式的并发上限
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// 批量评估
    ///
    /// 返回序列第 i 项对应输入第 i 项，与完成顺序无关。
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn evaluate_batch(
        &self,
        items: Vec<BatchItem>,
        parallel: bool,
    ) -> Vec<Result<DecisionResult>> {
        let results = if parallel {
            self.evaluate_parallel(items).await
        } else {
            self.evaluate_sequential(items).await
        };

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!("批量评估部分失败: {} 失败 / {} 总数", failed, results.len());
        }
        info!("批量评估完成: {} 项", results.len());
        results
    }

    /// 顺序模式：按输入顺序逐项评估，单项失败不阻断后续项
    async fn evaluate_sequential(&self, items: Vec<BatchItem>) -> Vec<Result<DecisionResult>> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(self.service.evaluate(&item.rule_id, &item.context).await);
        }
        results
    }

    /// 并行模式：信号量限制在途任务数，结果按输入位置写入预留槽位
    async fn evaluate_parallel(&self, items: Vec<BatchItem>) -> Vec<Result<DecisionResult>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            let service = self.service.clone();
            let semaphore = semaphore.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            Err(DecisionError::Internal("批量信号量已关闭".to_string())),
                        );
                    }
                };
                (index, service.evaluate(&item.rule_id, &item.context).await)
            }));
        }

        let mut results: Vec<Result<DecisionResult>> = Vec::with_capacity(handles.len());
        results.resize_with(handles.len(), || {
            Err(DecisionError::Internal("批量任务未完成".to_string()))
        });

        for outcome in futures::future::join_all(handles).await {
            match outcome {
                Ok((index, result)) => results[index] = result,
                Err(e) => {
                    // 任务 panic 只影响其自身槽位，兄弟任务照常完成
                    warn!("批量任务执行失败: {}", e);
                }
            }
        }

        results
    }
}
