//! 驱动层错误类型定义

use thiserror::Error;
use vesc_can::CanError;
use vesc_protocol::ProtocolError;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 同一通道上已有运行中的服务
    #[error("CAN service already running on channel '{0}'")]
    AlreadyRunning(String),

    /// 服务未处于 Running 状态，未进行任何 IO
    #[error("CAN service is not running")]
    NotRunning,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 配置文件读取或校验失败
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CAN transport error: {0}")]
    Can(#[from] CanError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
