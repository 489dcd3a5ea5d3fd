//! 服务配置
//!
//! 所有时间字段以毫秒表示，便于写进 TOML：
//!
//! ```toml
//! channel = "can0"
//! node_id = 100
//! discovery_interval_ms = 30000
//! ```

use crate::DriverError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use vesc_protocol::BROADCAST_NODE_ID;

/// CAN 服务配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// CAN 通道名（如 "can0"），也是进程内独占的键
    pub channel: String,

    /// 本机节点 ID；为空时根据网卡 MAC 推导
    pub node_id: Option<u8>,

    /// 接收线程单次阻塞时长
    pub receive_timeout_ms: u64,

    /// 广播 PING 的周期
    pub discovery_interval_ms: u64,

    /// 心跳（STATUS_5）周期
    pub heartbeat_interval_ms: u64,

    pub heartbeat_enabled: bool,

    /// 收到 PING 时是否回 PONG
    ///
    /// 默认关闭：VESC Tool 等上位机会把应答的主机当成控制器。
    pub respond_to_ping: bool,

    /// 超过该时长无联系，节点转为 Stale
    pub node_ttl_ms: u64,

    /// Stale 之后再经过该时长，节点过期并移除
    pub node_expiry_ms: u64,

    /// stop() 等待每个后台线程退出的上限
    pub shutdown_grace_ms: u64,

    /// 连续接收错误达到该值时判定为不健康，并触发重连
    pub max_consecutive_errors: u32,

    /// 链路断开或持续出错时自动重连
    pub reconnect_enabled: bool,

    /// 首次重连前的等待，之后每次失败翻倍
    pub reconnect_delay_ms: u64,

    /// 重连等待的上限
    pub reconnect_max_delay_ms: u64,

    /// 每个节点保留的状态帧历史条数
    pub history_len: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            channel: "can0".to_string(),
            node_id: None,
            receive_timeout_ms: 100,
            discovery_interval_ms: 60_000,
            heartbeat_interval_ms: 5_000,
            heartbeat_enabled: true,
            respond_to_ping: false,
            node_ttl_ms: 2_000,
            node_expiry_ms: 60_000,
            shutdown_grace_ms: 2_000,
            max_consecutive_errors: 10,
            reconnect_enabled: true,
            reconnect_delay_ms: 1_000,
            reconnect_max_delay_ms: 10_000,
            history_len: 10,
        }
    }
}

impl ServiceConfig {
    /// 使用默认值创建指定通道的配置
    pub fn for_channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    /// 从 TOML 文件加载（缺失字段取默认值）
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, DriverError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, DriverError> {
        let config: Self =
            toml::from_str(content).map_err(|e| DriverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, DriverError> {
        toml::to_string_pretty(self).map_err(|e| DriverError::Config(e.to_string()))
    }

    /// 保存为 TOML 文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), DriverError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// 校验取值
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.channel.trim().is_empty() {
            return Err(DriverError::Config("channel must not be empty".to_string()));
        }
        if self.node_id == Some(BROADCAST_NODE_ID) {
            return Err(DriverError::InvalidArgument(format!(
                "node_id {} is reserved for broadcast",
                BROADCAST_NODE_ID
            )));
        }
        let positive = [
            ("receive_timeout_ms", self.receive_timeout_ms),
            ("discovery_interval_ms", self.discovery_interval_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("node_ttl_ms", self.node_ttl_ms),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(DriverError::Config(format!("{} must be greater than 0", field)));
            }
        }
        if self.max_consecutive_errors == 0 {
            return Err(DriverError::Config(
                "max_consecutive_errors must be greater than 0".to_string(),
            ));
        }
        if self.reconnect_max_delay_ms < self.reconnect_delay_ms {
            return Err(DriverError::Config(
                "reconnect_max_delay_ms must not be less than reconnect_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn node_ttl(&self) -> Duration {
        Duration::from_millis(self.node_ttl_ms)
    }

    pub fn node_expiry(&self) -> Duration {
        Duration::from_millis(self.node_expiry_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}
