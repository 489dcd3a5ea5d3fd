//! 客户端接口模块
//!
//! 面向单台控制器的读写接口：
//! - [`Vesc`]：绑定服务句柄与目标节点，读缓存、发指令
//! - [`connect_to_vesc`] / [`list_active_vescs`] / [`get_network_status`]：总线级便捷函数
//!
//! 如果需要直接收发指令或查询节点表，使用 `vesc-driver` 的 `CanService`。

mod error;
pub mod network;
pub mod vesc;

pub use error::ClientError;
pub use network::{NetworkStatus, connect_to_vesc, get_network_status, list_active_vescs};
pub use vesc::{Vesc, VescData};
