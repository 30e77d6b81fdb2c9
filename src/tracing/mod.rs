//! 日志初始化模块
//!
//! 基于 `tracing-subscriber` 的 fmt layer，`RUST_LOG` 优先于配置文件中的级别

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// 从配置初始化日志系统
///
/// # 示例
/// ```rust,ignore
/// use flare_im_transport::config::LoggingConfig;
///
/// init_tracing_from_config(None);
/// init_tracing_from_config(Some(&LoggingConfig::default()));
/// ```
pub fn init_tracing_from_config(logging_config: Option<&LoggingConfig>) {
    let default_config = LoggingConfig::default();
    let config = logging_config.unwrap_or(&default_config);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(config.level.as_str()),
    };

    let builder = fmt::Subscriber::builder()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file)
        .with_line_number(config.with_line_number)
        .with_env_filter(env_filter);

    // 重复初始化（例如测试中）时忽略
    let _ = builder.try_init();
}
