//! CAN 包类型（opcode）定义和 ID 拼装
//!
//! ID 布局：`(opcode << 8) | node_id`，opcode 占据 29-bit 扩展 ID 的高 21 位。

use num_enum::TryFromPrimitive;

use crate::{EXTENDED_ID_MASK, ProtocolError};

/// 控制器 CAN 包类型
///
/// 覆盖控制器固件 CAN 命令表 0~63。并非全部类型都有对应的 [`crate::Command`]，
/// 见 [`CanPacketId::is_supported`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum CanPacketId {
    SetDuty = 0,
    SetCurrent = 1,
    SetCurrentBrake = 2,
    SetRpm = 3,
    SetPos = 4,
    FillRxBuffer = 5,
    FillRxBufferLong = 6,
    ProcessRxBuffer = 7,
    ProcessShortBuffer = 8,
    Status = 9,
    SetCurrentRel = 10,
    SetCurrentBrakeRel = 11,
    SetCurrentHandbrake = 12,
    SetCurrentHandbrakeRel = 13,
    Status2 = 14,
    Status3 = 15,
    Status4 = 16,
    Ping = 17,
    Pong = 18,
    DetectApplyAllFoc = 19,
    DetectApplyAllFocRes = 20,
    ConfCurrentLimits = 21,
    ConfStoreCurrentLimits = 22,
    ConfCurrentLimitsIn = 23,
    ConfStoreCurrentLimitsIn = 24,
    ConfFocErpms = 25,
    ConfStoreFocErpms = 26,
    Status5 = 27,
    PollTs5700n8501Status = 28,
    ConfBatteryCut = 29,
    ConfStoreBatteryCut = 30,
    Shutdown = 31,
    IoBoardAdc1To4 = 32,
    IoBoardAdc5To8 = 33,
    IoBoardAdc9To12 = 34,
    IoBoardDigitalIn = 35,
    IoBoardSetOutputDigital = 36,
    IoBoardSetOutputPwm = 37,
    BmsVTot = 38,
    BmsI = 39,
    BmsAhWh = 40,
    BmsVCell = 41,
    BmsBal = 42,
    BmsTemps = 43,
    BmsHum = 44,
    BmsSocSohTempStat = 45,
    PswStat = 46,
    PswSwitch = 47,
    BmsHwData1 = 48,
    BmsHwData2 = 49,
    BmsHwData3 = 50,
    BmsHwData4 = 51,
    BmsHwData5 = 52,
    BmsAhWhChgTotal = 53,
    BmsAhWhDisTotal = 54,
    UpdatePidPosOffset = 55,
    PollRotorPos = 56,
    NotifyBoot = 57,
    Status6 = 58,
    GnssTime = 59,
    GnssLat = 60,
    GnssLon = 61,
    GnssAltSpeedHdop = 62,
    UpdateBaud = 63,
}

impl CanPacketId {
    /// 是否有对应的 `Command` 编解码实现
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            CanPacketId::SetDuty
                | CanPacketId::SetCurrent
                | CanPacketId::SetCurrentBrake
                | CanPacketId::SetRpm
                | CanPacketId::SetPos
                | CanPacketId::Status
                | CanPacketId::SetCurrentRel
                | CanPacketId::SetCurrentBrakeRel
                | CanPacketId::SetCurrentHandbrake
                | CanPacketId::SetCurrentHandbrakeRel
                | CanPacketId::Status2
                | CanPacketId::Status3
                | CanPacketId::Status4
                | CanPacketId::Ping
                | CanPacketId::Pong
                | CanPacketId::Status5
                | CanPacketId::Shutdown
                | CanPacketId::Status6
        )
    }

    /// 是否为周期性状态帧
    pub fn is_status(self) -> bool {
        matches!(
            self,
            CanPacketId::Status
                | CanPacketId::Status2
                | CanPacketId::Status3
                | CanPacketId::Status4
                | CanPacketId::Status5
                | CanPacketId::Status6
        )
    }

    /// 协议中的名称（用于日志和错误信息）
    pub fn name(self) -> &'static str {
        match self {
            CanPacketId::SetDuty => "SET_DUTY",
            CanPacketId::SetCurrent => "SET_CURRENT",
            CanPacketId::SetCurrentBrake => "SET_CURRENT_BRAKE",
            CanPacketId::SetRpm => "SET_RPM",
            CanPacketId::SetPos => "SET_POS",
            CanPacketId::Status => "STATUS",
            CanPacketId::SetCurrentRel => "SET_CURRENT_REL",
            CanPacketId::SetCurrentBrakeRel => "SET_CURRENT_BRAKE_REL",
            CanPacketId::SetCurrentHandbrake => "SET_CURRENT_HANDBRAKE",
            CanPacketId::SetCurrentHandbrakeRel => "SET_CURRENT_HANDBRAKE_REL",
            CanPacketId::Status2 => "STATUS_2",
            CanPacketId::Status3 => "STATUS_3",
            CanPacketId::Status4 => "STATUS_4",
            CanPacketId::Ping => "PING",
            CanPacketId::Pong => "PONG",
            CanPacketId::Status5 => "STATUS_5",
            CanPacketId::Shutdown => "SHUTDOWN",
            CanPacketId::Status6 => "STATUS_6",
            _ => "UNSUPPORTED",
        }
    }
}

/// 拼装扩展 CAN ID
pub fn can_id(packet: CanPacketId, node_id: u8) -> u32 {
    (((packet as u32) << 8) | node_id as u32) & EXTENDED_ID_MASK
}

/// 拆分扩展 CAN ID 为 (包类型, 节点 ID)
///
/// opcode 超出一个字节或不在命令表中时返回 `UnknownOpcode`。
pub fn split_can_id(id: u32) -> Result<(CanPacketId, u8), ProtocolError> {
    let opcode = (id & EXTENDED_ID_MASK) >> 8;
    let node_id = (id & 0xFF) as u8;

    let raw = u8::try_from(opcode).map_err(|_| ProtocolError::UnknownOpcode(opcode))?;
    let packet = CanPacketId::try_from(raw).map_err(|_| ProtocolError::UnknownOpcode(opcode))?;
    Ok((packet, node_id))
}
