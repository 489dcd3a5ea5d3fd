//! VESC SDK - VESC 电机控制器 CAN 总线 Rust SDK
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 指令与状态帧的编解码
//! - **CAN 层** (`can`): SocketCAN、虚拟总线与模拟控制器
//! - **驱动层** (`driver`): 后台服务、节点注册表、遥测缓存
//! - **客户端层** (`client`): 单台控制器的读写接口
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vesc_sdk::prelude::*;
//!
//! vesc_sdk::init_logger();
//! let service = Arc::new(VescServiceBuilder::new().channel("can0").start().unwrap());
//! service.force_discovery().unwrap();
//!
//! if let Some(vesc) = connect_to_vesc(&service, None, Duration::from_secs(5)) {
//!     vesc.set_duty(0.1).unwrap();
//!     vesc.print_status();
//!     vesc.stop_motor().unwrap();
//! }
//! ```

pub use vesc_can as can;
pub use vesc_client as client;
pub use vesc_driver as driver;
pub use vesc_protocol as protocol;

mod logging;
pub mod prelude;

pub use logging::{init_logger, init_logger_with};

pub use can::CanError;
pub use client::{ClientError, Vesc, VescData};
pub use driver::{CanService, DriverError, ServiceConfig, VescServiceBuilder};
pub use protocol::{Command, ProtocolError};
