//! 日志初始化模块
//!
//! 基于 tracing-subscriber 提供统一的日志初始化。
//! 所有进程通过单一入口点配置日志，确保一致的级别过滤和输出格式。

use crate::config::ObservabilityConfig;
use anyhow::Result;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// 初始化 tracing 日志
///
/// 级别优先取 RUST_LOG 环境变量，其次取配置中的 log_level。
/// log_format 为 "json" 时输出结构化日志，否则为人类可读格式。
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if config.log_format == "json" {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent_failure() {
        let config = ObservabilityConfig::default();
        // 第一次初始化可能成功也可能因测试并行已被占用，
        // 第二次必然失败且不 panic
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
