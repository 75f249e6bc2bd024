//! 日志初始化
//!
//! 基于 `tracing-subscriber` 的 fmt 订阅者。设置了 `RUST_LOG` 时优先使用环境变量，
//! 否则使用配置中的级别。重复调用是安全的。

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// 日志目标名
pub const LOG_TARGET: &str = "worldbrush";

/// 安装全局日志订阅者
///
/// 返回本次调用是否实际安装了订阅者（已有订阅者时返回 `false`）。
pub fn init_logging(config: &LoggingConfig) -> bool {
    if !config.log_to_console {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(target: "worldbrush", level = config.level.as_filter(), "Logging initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig {
            level: LogLevel::Debug,
            log_to_console: true,
        };
        let _ = init_logging(&config);
        // 第二次安装一定失败，但不能panic
        assert!(!init_logging(&config));
    }

    #[test]
    fn test_console_disabled() {
        let config = LoggingConfig {
            level: LogLevel::Info,
            log_to_console: false,
        };
        assert!(!init_logging(&config));
    }
}
