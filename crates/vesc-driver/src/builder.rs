//! Builder 模式实现
//!
//! 链式覆盖 [`ServiceConfig`] 的个别字段，然后在 SocketCAN 或自备传输上启动服务。

use crate::DriverError;
use crate::config::ServiceConfig;
use crate::service::CanService;
use std::time::Duration;
use vesc_can::{CanError, SplittableTransport};

/// CAN 服务 Builder
///
/// ```no_run
/// use std::time::Duration;
/// use vesc_driver::VescServiceBuilder;
///
/// let service = VescServiceBuilder::new()
///     .channel("can0")
///     .node_id(100)
///     .discovery_interval(Duration::from_secs(10))
///     .start()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct VescServiceBuilder {
    config: ServiceConfig,
}

impl VescServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以已有配置（如从文件加载的）为起点
    pub fn from_config(config: ServiceConfig) -> Self {
        Self { config }
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.config.channel = channel.into();
        self
    }

    /// 固定本机节点 ID（默认由 MAC 推导）
    pub fn node_id(mut self, node_id: u8) -> Self {
        self.config.node_id = Some(node_id);
        self
    }

    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.config.receive_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn discovery_interval(mut self, interval: Duration) -> Self {
        self.config.discovery_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn heartbeat_enabled(mut self, enabled: bool) -> Self {
        self.config.heartbeat_enabled = enabled;
        self
    }

    pub fn respond_to_ping(mut self, enabled: bool) -> Self {
        self.config.respond_to_ping = enabled;
        self
    }

    pub fn node_ttl(mut self, ttl: Duration) -> Self {
        self.config.node_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn node_expiry(mut self, expiry: Duration) -> Self {
        self.config.node_expiry_ms = expiry.as_millis() as u64;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn max_consecutive_errors(mut self, count: u32) -> Self {
        self.config.max_consecutive_errors = count;
        self
    }

    pub fn reconnect_enabled(mut self, enabled: bool) -> Self {
        self.config.reconnect_enabled = enabled;
        self
    }

    /// 重连退避的初始等待与上限
    pub fn reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.reconnect_delay_ms = initial.as_millis() as u64;
        self.config.reconnect_max_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn history_len(mut self, len: usize) -> Self {
        self.config.history_len = len;
        self
    }

    /// 当前累积的配置
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// 在自备传输（如虚拟总线端点）上启动
    pub fn start_with<T>(self, transport: T) -> Result<CanService, DriverError>
    where
        T: SplittableTransport + Send + 'static,
        T::Rx: Send + 'static,
        T::Tx: Send + 'static,
    {
        CanService::start(transport, self.config)
    }

    /// 以连接器启动，断线后自动重连
    pub fn start_with_connector<F, T>(self, connect: F) -> Result<CanService, DriverError>
    where
        F: FnMut() -> Result<T, CanError> + Send + 'static,
        T: SplittableTransport + Send + 'static,
        T::Rx: Send + 'static,
        T::Tx: Send + 'static,
    {
        CanService::start_with_connector(connect, self.config)
    }

    /// 在同名 SocketCAN 接口上启动；接口掉线后按退避间隔重新打开
    #[cfg(target_os = "linux")]
    pub fn start(self) -> Result<CanService, DriverError> {
        let channel = self.config.channel.clone();
        CanService::start_with_connector(
            move || Ok(vesc_can::SocketCanTransport::new(channel.clone())),
            self.config,
        )
    }

    #[cfg(not(target_os = "linux"))]
    pub fn start(self) -> Result<CanService, DriverError> {
        Err(DriverError::Can(CanError::TransportUnavailable(
            "SocketCAN is only available on Linux".to_string(),
        )))
    }
}
