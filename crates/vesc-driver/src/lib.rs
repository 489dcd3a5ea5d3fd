//! 驱动层模块
//!
//! 本模块提供 VESC 控制器总线的后台服务，包括：
//! - 接收线程与发现 / 心跳线程管理
//! - 节点注册表（Discovered / Active / Stale / Expired）
//! - 遥测缓存与状态帧历史
//! - 本机节点 ID 推导（MAC 哈希 / 随机）
//! - 断线重连与事件回调
//!
//! # 使用场景
//!
//! 适用于需要直接收发指令、查询节点表的场景。
//! 面向单台控制器的读写接口见 `vesc-client`。

mod builder;
pub mod config;
mod error;
pub mod hooks;
pub mod identity;
pub mod metrics;
mod pipeline;
pub mod registry;
mod service;
pub mod state;
pub mod telemetry;

pub use builder::VescServiceBuilder;
pub use config::ServiceConfig;
pub use error::DriverError;
pub use hooks::{HookManager, ServiceCallback};
pub use identity::{node_id_from_mac, resolve_local_id};
pub use metrics::{MetricsSnapshot, NetworkStats, ServiceMetrics};
pub use registry::{
    ContactOutcome, Node, NodeKind, NodeRegistry, NodeState, RegistryStats, StatusRecord,
    SweepReport,
};
pub use service::{CanService, is_channel_claimed};
pub use state::{AtomicServiceState, ServiceState};
pub use telemetry::Telemetry;
