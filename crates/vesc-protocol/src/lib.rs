//! # VESC Protocol
//!
//! VESC 电机控制器 CAN 总线协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: CAN 包类型（opcode）定义与 ID 拼装
//! - `command`: 指令编解码（`encode` / `decode`）
//! - `status`: 状态帧（STATUS ~ STATUS_6）解析
//! - `fault`: 故障码
//!
//! ## 帧格式
//!
//! 29-bit 扩展帧，`id = (opcode << 8) | node_id`。
//! 负载为大端定点整数，比例系数见 `command` 模块常量。

pub mod command;
pub mod fault;
pub mod ids;
pub mod status;

// 重新导出常用类型
pub use command::*;
pub use fault::*;
pub use ids::*;
pub use status::*;

/// 广播节点 ID（用于发现）
pub const BROADCAST_NODE_ID: u8 = 255;

/// 主机（非控制器）节点 ID 下限
pub const NODE_ID_MIN: u8 = 64;

/// 主机（非控制器）节点 ID 上限
pub const NODE_ID_MAX: u8 = 127;

/// 29-bit 扩展 ID 掩码
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// CAN 2.0 帧的统一抽象
///
/// 协议层与传输层之间的中间类型：协议层通过 [`encode`] / [`decode`] 生成和解析，
/// 传输层（`vesc-can`）负责与 SocketCAN / 虚拟总线互相转换。
///
/// - **Copy**：按值跨越传输边界，不涉及所有权
/// - **固定 8 字节**：避免堆分配
/// - **时间戳**：`timestamp_us` 由接收端填写，0 表示不可用
///
/// ```rust
/// use vesc_protocol::VescFrame;
///
/// let frame = VescFrame::new_extended(0x0905, &[1, 2, 3, 4]);
/// assert_eq!(frame.node_id(), 0x05);
/// assert_eq!(frame.opcode_raw(), 0x09);
/// assert_eq!(frame.data_slice(), &[1, 2, 3, 4]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VescFrame {
    /// CAN ID（标准帧或扩展帧）
    pub id: u32,

    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],

    /// 有效数据长度 (0-8)
    pub len: u8,

    /// 是否为扩展帧（29-bit ID）
    pub is_extended: bool,

    /// 接收时间戳（微秒），0 表示不可用
    pub timestamp_us: u64,
}

impl VescFrame {
    /// 创建标准帧
    pub fn new_standard(id: u16, data: &[u8]) -> Self {
        Self::new(id as u32, data, false)
    }

    /// 创建扩展帧
    pub fn new_extended(id: u32, data: &[u8]) -> Self {
        Self::new(id & EXTENDED_ID_MASK, data, true)
    }

    fn new(id: u32, data: &[u8], is_extended: bool) -> Self {
        let mut fixed_data = [0u8; 8];
        let len = data.len().min(8);
        fixed_data[..len].copy_from_slice(&data[..len]);

        Self {
            id,
            data: fixed_data,
            len: len as u8,
            is_extended,
            timestamp_us: 0,
        }
    }

    /// 附加接收时间戳
    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// 获取 CAN ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// ID 低字节：发送时为目标节点，接收时为源节点
    pub fn node_id(&self) -> u8 {
        (self.id & 0xFF) as u8
    }

    /// ID 高位部分（未校验的 opcode）
    pub fn opcode_raw(&self) -> u32 {
        self.id >> 8
    }
}

use thiserror::Error;

/// 协议编解码错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// 指令参数越界或不可编码，编码前即拒绝
    #[error("Invalid argument for {field}: {value}")]
    InvalidArgument { field: &'static str, value: String },

    #[error("Invalid frame length for {opcode}: expected at least {expected}, got {actual}")]
    InvalidLength {
        opcode: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u32),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

impl ProtocolError {
    /// 是否为解码期错误（帧本身损坏，应计数后丢弃）
    pub fn is_malformed(&self) -> bool {
        !matches!(self, ProtocolError::InvalidArgument { .. })
    }

    pub(crate) fn invalid_argument(field: &'static str, value: impl ToString) -> Self {
        ProtocolError::InvalidArgument {
            field,
            value: value.to_string(),
        }
    }
}

/// 大端字节序转 i32
pub fn bytes_to_i32_be(bytes: [u8; 4]) -> i32 {
    i32::from_be_bytes(bytes)
}

/// 大端字节序转 i16
pub fn bytes_to_i16_be(bytes: [u8; 2]) -> i16 {
    i16::from_be_bytes(bytes)
}

/// 从切片偏移处读取大端 i32（调用方保证长度）
pub(crate) fn read_i32_be(data: &[u8], offset: usize) -> i32 {
    bytes_to_i32_be([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// 从切片偏移处读取大端 i16（调用方保证长度）
pub(crate) fn read_i16_be(data: &[u8], offset: usize) -> i16 {
    bytes_to_i16_be([data[offset], data[offset + 1]])
}
