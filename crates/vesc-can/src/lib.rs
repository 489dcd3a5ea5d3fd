//! # VESC CAN Transport Layer
//!
//! CAN 传输抽象层：统一 SocketCAN、内存虚拟总线的收发接口。
//!
//! - [`CanTransport`]：完整的连接/收发能力
//! - [`SplittableTransport`]：分离为独立的 RX / TX 半部，供接收线程和发送路径并发使用
//! - [`VirtualCanBus`]：进程内多端点总线（测试与 `--virtual` 模式）
//! - [`SimulatedVesc`]：挂在虚拟总线上的模拟控制器

use std::time::Duration;
use thiserror::Error;

pub use vesc_protocol::{ProtocolError, VescFrame};

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::{SocketCanRxTransport, SocketCanTransport, SocketCanTxTransport};

pub mod simulated;
mod stats;
pub mod virtual_bus;

pub use simulated::{SimulatedState, SimulatedVesc, SimulatorConfig};
pub use stats::{TransportCounters, TransportStats};
pub use virtual_bus::{VirtualCanBus, VirtualCanTransport, VirtualRxTransport, VirtualTxTransport};

/// CAN 传输层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    /// 通道无法打开（接口不存在、未 UP、权限不足）
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),
    /// 通道拒绝了帧（总线错误、未连接）
    #[error("Send failed: {0}")]
    SendFailed(String),
    /// 等待期间通道被拆除
    #[error("Transport closed")]
    TransportClosed,
    #[error("Read timeout")]
    Timeout,
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// 完整传输接口
///
/// `receive` 超时返回 `Ok(None)`，不视为错误。
pub trait CanTransport {
    /// 打开通道；已连接时直接返回成功
    fn connect(&mut self) -> Result<(), CanError>;

    /// 释放通道；可重复调用
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn send(&mut self, frame: VescFrame) -> Result<(), CanError>;

    /// 阻塞最多 `timeout` 等待一帧
    fn receive(&mut self, timeout: Duration) -> Result<Option<VescFrame>, CanError>;

    fn stats(&self) -> TransportStats;

    /// 等待一帧，超时返回 `CanError::Timeout`
    fn receive_frame(&mut self, timeout: Duration) -> Result<VescFrame, CanError> {
        self.receive(timeout)?.ok_or(CanError::Timeout)
    }
}

/// 只读半部（接收线程独占）
pub trait RxTransport {
    fn receive(&mut self, timeout: Duration) -> Result<Option<VescFrame>, CanError>;

    fn stats(&self) -> TransportStats;
}

/// 只写半部（发送路径独占，由上层加锁串行化）
pub trait TxTransport {
    fn send(&mut self, frame: VescFrame) -> Result<(), CanError>;

    fn stats(&self) -> TransportStats;
}

/// 可分离为 RX / TX 半部的传输
///
/// 分离前会自动 `connect()`。两个半部全部 drop 后通道被释放。
pub trait SplittableTransport: CanTransport {
    type Rx: RxTransport;
    type Tx: TxTransport;

    fn split(self) -> Result<(Self::Rx, Self::Tx), CanError>;
}
