//! 日志初始化
//!
//! 使用 `tracing-subscriber` 输出到标准输出，级别由 `RUST_LOG` 控制，
//! 默认 `info,pos_webchat=debug`。宿主应用已安装全局订阅者时不会覆盖。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认日志过滤规则
const DEFAULT_FILTER: &str = "info,pos_webchat=debug";

/// 初始化日志，重复调用是安全的
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .compact();

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init()
        .is_ok()
    {
        tracing::debug!("日志已初始化");
    }
}
