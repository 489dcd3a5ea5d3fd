//! 日志初始化测试（独立进程，全局订阅者只安装一次）

#[test]
fn test_init_logger_is_idempotent() {
    assert!(vesc_sdk::init_logger());
    assert!(!vesc_sdk::init_logger());
    assert!(!vesc_sdk::init_logger_with("debug"));

    // log 与 tracing 两条路径都不应 panic
    log::info!("log record bridged into tracing");
    tracing::info!("tracing event");
}
