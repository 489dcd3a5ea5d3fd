//! 日志初始化
//!
//! 安装 `tracing_subscriber::fmt` 订阅者，过滤规则取自 `RUST_LOG`（缺省 `info`），
//! 并把 `log` crate 的记录转发到 tracing。只有第一次调用生效。

use std::sync::Once;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

static INIT: Once = Once::new();

/// 以 `RUST_LOG` 或 `info` 初始化日志
///
/// 返回本次调用是否完成了安装；重复调用返回 `false`。
pub fn init_logger() -> bool {
    init_logger_with("info")
}

/// 以 `RUST_LOG` 或给定的默认过滤规则初始化日志
pub fn init_logger_with(default_filter: &str) -> bool {
    let mut installed = false;
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            // 宿主程序已安装了自己的订阅者
            return;
        }
        let _ = tracing_log::LogTracer::init();
        installed = true;
    });
    installed
}
