//! 状态帧（STATUS ~ STATUS_6）定义
//!
//! 控制器以固定频率广播六类状态帧，每帧 8 字节、大端定点数。
//! 各字段的比例系数与控制器固件保持一致。

use crate::command::{fixed_i16, fixed_i32};
use crate::{CanPacketId, ProtocolError, read_i16_be, read_i32_be};

/// 状态帧最小负载长度
pub const STATUS_PAYLOAD_LEN: usize = 8;

/// 主机心跳在 STATUS_5 保留字段中的标记（ASCII "RP"）
pub const HOST_HEARTBEAT_MARKER: i16 = 0x5250;

/// STATUS (9): 转速、电机电流、占空比
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Status1 {
    /// 电转速 (ERPM)
    pub rpm: i32,
    /// 电机电流 (A)，分辨率 0.1A
    pub current: f64,
    /// 占空比 (-1.0 ~ 1.0)，分辨率 0.001
    pub duty: f64,
}

/// STATUS_2 (14): 安时计数
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Status2 {
    pub amp_hours: f64,
    pub amp_hours_charged: f64,
}

/// STATUS_3 (15): 瓦时计数
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Status3 {
    pub watt_hours: f64,
    pub watt_hours_charged: f64,
}

/// STATUS_4 (16): 温度、输入电流、位置环位置
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Status4 {
    /// MOSFET 温度 (°C)
    pub temp_fet: f64,
    /// 电机温度 (°C)
    pub temp_motor: f64,
    /// 输入电流 (A)
    pub current_in: f64,
    /// PID 位置 (度)，分辨率 0.02°
    pub pid_pos: f64,
}

/// STATUS_5 (27): 转速计、输入电压
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Status5 {
    pub tachometer: i32,
    /// 输入电压 (V)，分辨率 0.1V
    pub v_in: f64,
    pub reserved: i16,
}

impl Status5 {
    /// 是否为其他主机发出的心跳帧
    pub fn is_host_heartbeat(&self) -> bool {
        self.reserved == HOST_HEARTBEAT_MARKER
    }
}

/// STATUS_6 (58): ADC 与 PPM 输入
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Status6 {
    pub adc1: f64,
    pub adc2: f64,
    pub adc3: f64,
    pub ppm: f64,
}

/// 任一状态帧
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StatusMessage {
    Status1(Status1),
    Status2(Status2),
    Status3(Status3),
    Status4(Status4),
    Status5(Status5),
    Status6(Status6),
}

impl StatusMessage {
    /// 对应的 CAN 包类型
    pub fn packet_id(&self) -> CanPacketId {
        match self {
            StatusMessage::Status1(_) => CanPacketId::Status,
            StatusMessage::Status2(_) => CanPacketId::Status2,
            StatusMessage::Status3(_) => CanPacketId::Status3,
            StatusMessage::Status4(_) => CanPacketId::Status4,
            StatusMessage::Status5(_) => CanPacketId::Status5,
            StatusMessage::Status6(_) => CanPacketId::Status6,
        }
    }

    /// 解析状态帧负载
    ///
    /// `packet` 必须是状态类包，负载不足 8 字节时返回 `InvalidLength`。
    pub fn parse(packet: CanPacketId, data: &[u8]) -> Result<Self, ProtocolError> {
        if !packet.is_status() {
            return Err(ProtocolError::MalformedFrame(format!(
                "{} is not a status packet",
                packet.name()
            )));
        }
        if data.len() < STATUS_PAYLOAD_LEN {
            return Err(ProtocolError::InvalidLength {
                opcode: packet.name(),
                expected: STATUS_PAYLOAD_LEN,
                actual: data.len(),
            });
        }

        let msg = match packet {
            CanPacketId::Status => StatusMessage::Status1(Status1 {
                rpm: read_i32_be(data, 0),
                current: read_i16_be(data, 4) as f64 / 10.0,
                duty: read_i16_be(data, 6) as f64 / 1000.0,
            }),
            CanPacketId::Status2 => StatusMessage::Status2(Status2 {
                amp_hours: read_i32_be(data, 0) as f64 / 10000.0,
                amp_hours_charged: read_i32_be(data, 4) as f64 / 10000.0,
            }),
            CanPacketId::Status3 => StatusMessage::Status3(Status3 {
                watt_hours: read_i32_be(data, 0) as f64 / 10000.0,
                watt_hours_charged: read_i32_be(data, 4) as f64 / 10000.0,
            }),
            CanPacketId::Status4 => StatusMessage::Status4(Status4 {
                temp_fet: read_i16_be(data, 0) as f64 / 10.0,
                temp_motor: read_i16_be(data, 2) as f64 / 10.0,
                current_in: read_i16_be(data, 4) as f64 / 10.0,
                pid_pos: read_i16_be(data, 6) as f64 / 50.0,
            }),
            CanPacketId::Status5 => StatusMessage::Status5(Status5 {
                tachometer: read_i32_be(data, 0),
                v_in: read_i16_be(data, 4) as f64 / 10.0,
                reserved: read_i16_be(data, 6),
            }),
            // is_status() 已排除其他类型
            _ => StatusMessage::Status6(Status6 {
                adc1: read_i16_be(data, 0) as f64 / 1000.0,
                adc2: read_i16_be(data, 2) as f64 / 1000.0,
                adc3: read_i16_be(data, 4) as f64 / 1000.0,
                ppm: read_i16_be(data, 6) as f64 / 1000.0,
            }),
        };
        Ok(msg)
    }

    /// 编码为 8 字节负载
    pub fn to_payload(&self) -> Result<[u8; 8], ProtocolError> {
        let mut out = [0u8; 8];
        match *self {
            StatusMessage::Status1(s) => {
                out[0..4].copy_from_slice(&s.rpm.to_be_bytes());
                out[4..6].copy_from_slice(&fixed_i16("current", s.current, 10.0)?.to_be_bytes());
                out[6..8].copy_from_slice(&fixed_i16("duty", s.duty, 1000.0)?.to_be_bytes());
            },
            StatusMessage::Status2(s) => {
                out[0..4]
                    .copy_from_slice(&fixed_i32("amp_hours", s.amp_hours, 10000.0)?.to_be_bytes());
                out[4..8].copy_from_slice(
                    &fixed_i32("amp_hours_charged", s.amp_hours_charged, 10000.0)?.to_be_bytes(),
                );
            },
            StatusMessage::Status3(s) => {
                out[0..4].copy_from_slice(
                    &fixed_i32("watt_hours", s.watt_hours, 10000.0)?.to_be_bytes(),
                );
                out[4..8].copy_from_slice(
                    &fixed_i32("watt_hours_charged", s.watt_hours_charged, 10000.0)?.to_be_bytes(),
                );
            },
            StatusMessage::Status4(s) => {
                out[0..2].copy_from_slice(&fixed_i16("temp_fet", s.temp_fet, 10.0)?.to_be_bytes());
                out[2..4]
                    .copy_from_slice(&fixed_i16("temp_motor", s.temp_motor, 10.0)?.to_be_bytes());
                out[4..6]
                    .copy_from_slice(&fixed_i16("current_in", s.current_in, 10.0)?.to_be_bytes());
                out[6..8].copy_from_slice(&fixed_i16("pid_pos", s.pid_pos, 50.0)?.to_be_bytes());
            },
            StatusMessage::Status5(s) => {
                out[0..4].copy_from_slice(&s.tachometer.to_be_bytes());
                out[4..6].copy_from_slice(&fixed_i16("v_in", s.v_in, 10.0)?.to_be_bytes());
                out[6..8].copy_from_slice(&s.reserved.to_be_bytes());
            },
            StatusMessage::Status6(s) => {
                out[0..2].copy_from_slice(&fixed_i16("adc1", s.adc1, 1000.0)?.to_be_bytes());
                out[2..4].copy_from_slice(&fixed_i16("adc2", s.adc2, 1000.0)?.to_be_bytes());
                out[4..6].copy_from_slice(&fixed_i16("adc3", s.adc3, 1000.0)?.to_be_bytes());
                out[6..8].copy_from_slice(&fixed_i16("ppm", s.ppm, 1000.0)?.to_be_bytes());
            },
        }
        Ok(out)
    }
}
