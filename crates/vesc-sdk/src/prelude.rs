//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use vesc_sdk::prelude::*;
//! ```

// 客户端层
pub use crate::client::{
    NetworkStatus, Vesc, VescData, connect_to_vesc, get_network_status, list_active_vescs,
};

// 驱动层
pub use crate::driver::{CanService, NodeState, ServiceConfig, VescServiceBuilder};

// 协议层
pub use crate::protocol::{Command, FaultCode, StatusMessage};

// 错误类型
pub use crate::can::CanError;
pub use crate::client::ClientError;
pub use crate::driver::DriverError;
pub use crate::protocol::ProtocolError;
