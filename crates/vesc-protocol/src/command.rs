//! 指令编解码
//!
//! [`Command`] 是封闭的指令集合，[`encode`] / [`decode`] 在其与 [`VescFrame`] 之间转换。
//! 两个函数都是纯函数，无共享状态。
//!
//! 定点比例：
//!
//! | 指令 | 比例 | 范围 |
//! |------|------|------|
//! | SetDuty | ×100000 | [-1, 1] |
//! | SetCurrent | ×1000 | i32 |
//! | SetBrakeCurrent / SetHandbrake | ×1000 | ≥ 0 |
//! | SetRpm | ×1 | i32 |
//! | SetPosition | ×1000000 | i32 |
//! | SetCurrentRel / SetBrakeCurrentRel / SetHandbrakeRel | ×100000 | [0, 1] |
//!
//! 编码时向零截断。

use crate::status::StatusMessage;
use crate::{CanPacketId, ProtocolError, VescFrame, can_id, read_i32_be, split_can_id};

/// 占空比比例系数
pub const DUTY_SCALE: f64 = 100_000.0;

/// 电流比例系数（A → mA）
pub const CURRENT_SCALE: f64 = 1_000.0;

/// 位置比例系数（度 → 微度）
pub const POSITION_SCALE: f64 = 1_000_000.0;

/// 相对电流比例系数
pub const RELATIVE_SCALE: f64 = 100_000.0;

/// 设置类指令的负载长度
pub const SET_PAYLOAD_LEN: usize = 4;

/// 控制器指令
///
/// 一经构造即不可变；由调用方产生，由编解码器消费。
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Command {
    /// 占空比 (-1.0 ~ 1.0)
    SetDuty(f64),
    /// 电机电流 (A)
    SetCurrent(f64),
    /// 刹车电流 (A)，按绝对值编码
    SetBrakeCurrent(f64),
    /// 电转速 (ERPM)
    SetRpm(i32),
    /// 位置 (度)
    SetPosition(f64),
    /// 相对电流 (0.0 ~ 1.0)
    SetCurrentRel(f64),
    /// 相对刹车电流 (0.0 ~ 1.0)
    SetBrakeCurrentRel(f64),
    /// 手刹电流 (A)
    SetHandbrake(f64),
    /// 相对手刹电流 (0.0 ~ 1.0)
    SetHandbrakeRel(f64),
    Ping,
    Pong,
    Shutdown,
    /// 周期性状态帧
    Status(StatusMessage),
}

impl Command {
    /// 从宽整数构造 `SetRpm`，超出 i32 时返回 `InvalidArgument`
    pub fn set_rpm_checked(rpm: i64) -> Result<Self, ProtocolError> {
        i32::try_from(rpm)
            .map(Command::SetRpm)
            .map_err(|_| ProtocolError::invalid_argument("rpm", rpm))
    }

    /// 对应的 CAN 包类型
    pub fn packet_id(&self) -> CanPacketId {
        match self {
            Command::SetDuty(_) => CanPacketId::SetDuty,
            Command::SetCurrent(_) => CanPacketId::SetCurrent,
            Command::SetBrakeCurrent(_) => CanPacketId::SetCurrentBrake,
            Command::SetRpm(_) => CanPacketId::SetRpm,
            Command::SetPosition(_) => CanPacketId::SetPos,
            Command::SetCurrentRel(_) => CanPacketId::SetCurrentRel,
            Command::SetBrakeCurrentRel(_) => CanPacketId::SetCurrentBrakeRel,
            Command::SetHandbrake(_) => CanPacketId::SetCurrentHandbrake,
            Command::SetHandbrakeRel(_) => CanPacketId::SetCurrentHandbrakeRel,
            Command::Ping => CanPacketId::Ping,
            Command::Pong => CanPacketId::Pong,
            Command::Shutdown => CanPacketId::Shutdown,
            Command::Status(status) => status.packet_id(),
        }
    }

    /// 协议名称
    pub fn name(&self) -> &'static str {
        self.packet_id().name()
    }

    /// 转换为 CAN 帧，等价于 [`encode`]
    pub fn to_frame(&self, node_id: u8) -> Result<VescFrame, ProtocolError> {
        encode(self, node_id)
    }
}

/// 将指令编码为发往 `node_id` 的扩展帧
///
/// 参数越界时返回 `InvalidArgument`，不产生任何帧。
pub fn encode(command: &Command, node_id: u8) -> Result<VescFrame, ProtocolError> {
    let id = can_id(command.packet_id(), node_id);

    let frame = match *command {
        Command::SetDuty(duty) => {
            check_range("duty", duty, -1.0, 1.0)?;
            set_frame(id, fixed_i32("duty", duty, DUTY_SCALE)?)
        },
        Command::SetCurrent(amps) => set_frame(id, fixed_i32("current", amps, CURRENT_SCALE)?),
        Command::SetBrakeCurrent(amps) => {
            check_range("brake_current", amps, 0.0, f64::INFINITY)?;
            set_frame(id, fixed_i32("brake_current", amps, CURRENT_SCALE)?)
        },
        Command::SetRpm(rpm) => set_frame(id, rpm),
        Command::SetPosition(deg) => set_frame(id, fixed_i32("position", deg, POSITION_SCALE)?),
        Command::SetCurrentRel(rel) => {
            check_range("current_rel", rel, 0.0, 1.0)?;
            set_frame(id, fixed_i32("current_rel", rel, RELATIVE_SCALE)?)
        },
        Command::SetBrakeCurrentRel(rel) => {
            check_range("brake_current_rel", rel, 0.0, 1.0)?;
            set_frame(id, fixed_i32("brake_current_rel", rel, RELATIVE_SCALE)?)
        },
        Command::SetHandbrake(amps) => {
            check_range("handbrake", amps, 0.0, f64::INFINITY)?;
            set_frame(id, fixed_i32("handbrake", amps, CURRENT_SCALE)?)
        },
        Command::SetHandbrakeRel(rel) => {
            check_range("handbrake_rel", rel, 0.0, 1.0)?;
            set_frame(id, fixed_i32("handbrake_rel", rel, RELATIVE_SCALE)?)
        },
        Command::Ping | Command::Pong | Command::Shutdown => VescFrame::new_extended(id, &[]),
        Command::Status(status) => VescFrame::new_extended(id, &status.to_payload()?),
    };

    Ok(frame)
}

/// 解码扩展帧为 (节点 ID, 指令)
///
/// 未知/不支持的 opcode、负载过短或解码值越界都属于损坏帧，
/// 调用方应计数并丢弃（见 [`ProtocolError::is_malformed`]）。
pub fn decode(frame: &VescFrame) -> Result<(u8, Command), ProtocolError> {
    if !frame.is_extended {
        return Err(ProtocolError::MalformedFrame(format!(
            "standard frame 0x{:03X} is not a controller packet",
            frame.id
        )));
    }

    let (packet, node_id) = split_can_id(frame.id)?;
    let data = frame.data_slice();

    let command = match packet {
        CanPacketId::SetDuty => {
            let duty = read_set_value(packet, data)? as f64 / DUTY_SCALE;
            Command::SetDuty(decoded_in_range(packet, duty, -1.0, 1.0)?)
        },
        CanPacketId::SetCurrent => {
            Command::SetCurrent(read_set_value(packet, data)? as f64 / CURRENT_SCALE)
        },
        CanPacketId::SetCurrentBrake => {
            Command::SetBrakeCurrent(read_set_value(packet, data)? as f64 / CURRENT_SCALE)
        },
        CanPacketId::SetRpm => Command::SetRpm(read_set_value(packet, data)?),
        CanPacketId::SetPos => {
            Command::SetPosition(read_set_value(packet, data)? as f64 / POSITION_SCALE)
        },
        CanPacketId::SetCurrentRel => {
            let rel = read_set_value(packet, data)? as f64 / RELATIVE_SCALE;
            Command::SetCurrentRel(decoded_in_range(packet, rel, 0.0, 1.0)?)
        },
        CanPacketId::SetCurrentBrakeRel => {
            let rel = read_set_value(packet, data)? as f64 / RELATIVE_SCALE;
            Command::SetBrakeCurrentRel(decoded_in_range(packet, rel, 0.0, 1.0)?)
        },
        CanPacketId::SetCurrentHandbrake => {
            Command::SetHandbrake(read_set_value(packet, data)? as f64 / CURRENT_SCALE)
        },
        CanPacketId::SetCurrentHandbrakeRel => {
            let rel = read_set_value(packet, data)? as f64 / RELATIVE_SCALE;
            Command::SetHandbrakeRel(decoded_in_range(packet, rel, 0.0, 1.0)?)
        },
        CanPacketId::Ping => Command::Ping,
        CanPacketId::Pong => Command::Pong,
        CanPacketId::Shutdown => Command::Shutdown,
        p if p.is_status() => Command::Status(StatusMessage::parse(p, data)?),
        other => {
            return Err(ProtocolError::MalformedFrame(format!(
                "unsupported packet type {:?} ({})",
                other, other as u8
            )));
        },
    };

    Ok((node_id, command))
}

fn set_frame(id: u32, value: i32) -> VescFrame {
    VescFrame::new_extended(id, &value.to_be_bytes())
}

fn read_set_value(packet: CanPacketId, data: &[u8]) -> Result<i32, ProtocolError> {
    if data.len() < SET_PAYLOAD_LEN {
        return Err(ProtocolError::InvalidLength {
            opcode: packet.name(),
            expected: SET_PAYLOAD_LEN,
            actual: data.len(),
        });
    }
    Ok(read_i32_be(data, 0))
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ProtocolError> {
    // NaN 比较恒为 false，一并拒绝
    if !(min..=max).contains(&value) {
        return Err(ProtocolError::invalid_argument(field, value));
    }
    Ok(())
}

fn decoded_in_range(
    packet: CanPacketId,
    value: f64,
    min: f64,
    max: f64,
) -> Result<f64, ProtocolError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ProtocolError::MalformedFrame(format!(
            "{} value {} outside [{}, {}]",
            packet.name(),
            value,
            min,
            max
        )))
    }
}

/// 浮点值按比例截断为 i32
pub(crate) fn fixed_i32(field: &'static str, value: f64, scale: f64) -> Result<i32, ProtocolError> {
    let scaled = (value * scale).trunc();
    if !scaled.is_finite() || scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
        return Err(ProtocolError::invalid_argument(field, value));
    }
    Ok(scaled as i32)
}

/// 浮点值按比例截断为 i16
pub(crate) fn fixed_i16(field: &'static str, value: f64, scale: f64) -> Result<i16, ProtocolError> {
    let scaled = (value * scale).trunc();
    if !scaled.is_finite() || scaled < i16::MIN as f64 || scaled > i16::MAX as f64 {
        return Err(ProtocolError::invalid_argument(field, value));
    }
    Ok(scaled as i16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{Status1, Status5};

    #[test]
    fn test_set_duty_wire_format() {
        let frame = encode(&Command::SetDuty(0.1), 0).unwrap();
        assert_eq!(frame.id, 0x0000);
        assert!(frame.is_extended);
        assert_eq!(frame.data_slice(), &[0x00, 0x00, 0x27, 0x10]);
    }

    #[test]
    fn test_set_duty_negative() {
        let frame = encode(&Command::SetDuty(-0.5), 7).unwrap();
        assert_eq!(frame.id, 0x0007);
        assert_eq!(frame.data_slice(), &(-50_000i32).to_be_bytes());
    }

    #[test]
    fn test_set_duty_out_of_range() {
        for duty in [1.5, -1.01, f64::NAN, f64::INFINITY] {
            let result = encode(&Command::SetDuty(duty), 1);
            assert!(
                matches!(result, Err(ProtocolError::InvalidArgument { field: "duty", .. })),
                "duty {} should be rejected",
                duty
            );
        }
    }

    #[test]
    fn test_set_duty_bounds_accepted() {
        assert!(encode(&Command::SetDuty(1.0), 1).is_ok());
        assert!(encode(&Command::SetDuty(-1.0), 1).is_ok());
    }

    #[test]
    fn test_set_current_scale() {
        let frame = encode(&Command::SetCurrent(-2.5), 0x10).unwrap();
        assert_eq!(frame.id, 0x0110);
        assert_eq!(frame.data_slice(), &(-2500i32).to_be_bytes());
    }

    #[test]
    fn test_brake_current_scale() {
        let frame = encode(&Command::SetBrakeCurrent(4.0), 3).unwrap();
        assert_eq!(frame.id, 0x0203);
        assert_eq!(frame.data_slice(), &4000i32.to_be_bytes());
    }

    #[test]
    fn test_negative_brake_rejected() {
        assert!(matches!(
            encode(&Command::SetBrakeCurrent(-4.0), 3),
            Err(ProtocolError::InvalidArgument { field: "brake_current", .. })
        ));
        assert!(matches!(
            encode(&Command::SetHandbrake(-0.5), 3),
            Err(ProtocolError::InvalidArgument { field: "handbrake", .. })
        ));
        assert!(encode(&Command::SetBrakeCurrent(f64::NAN), 3).is_err());
        assert!(encode(&Command::SetBrakeCurrent(0.0), 3).is_ok());
    }

    #[test]
    fn test_current_overflow_rejected() {
        // 3e6 A × 1000 超出 i32
        let result = encode(&Command::SetCurrent(3.0e6), 1);
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidArgument { field: "current", .. })
        ));
    }

    #[test]
    fn test_set_rpm_checked() {
        assert_eq!(Command::set_rpm_checked(-3000).unwrap(), Command::SetRpm(-3000));
        assert!(matches!(
            Command::set_rpm_checked(i64::from(i32::MAX) + 1),
            Err(ProtocolError::InvalidArgument { field: "rpm", .. })
        ));
    }

    #[test]
    fn test_relative_range() {
        assert!(encode(&Command::SetCurrentRel(0.5), 1).is_ok());
        assert!(encode(&Command::SetCurrentRel(-0.1), 1).is_err());
        assert!(encode(&Command::SetBrakeCurrentRel(1.1), 1).is_err());
        assert!(encode(&Command::SetHandbrakeRel(1.0), 1).is_ok());
    }

    #[test]
    fn test_ping_broadcast() {
        let frame = encode(&Command::Ping, crate::BROADCAST_NODE_ID).unwrap();
        assert_eq!(frame.id, (17 << 8) | 0xFF);
        assert_eq!(frame.len, 0);
    }

    #[test]
    fn test_decode_set_commands() {
        let cases = [
            Command::SetDuty(0.25),
            Command::SetCurrent(12.5),
            Command::SetBrakeCurrent(3.0),
            Command::SetRpm(-12000),
            Command::SetPosition(180.5),
            Command::SetCurrentRel(0.75),
            Command::SetBrakeCurrentRel(0.5),
            Command::SetHandbrake(1.5),
            Command::SetHandbrakeRel(0.25),
            Command::Ping,
            Command::Pong,
            Command::Shutdown,
        ];
        for command in cases {
            let frame = encode(&command, 42).unwrap();
            let (node, decoded) = decode(&frame).unwrap();
            assert_eq!(node, 42);
            assert_eq!(decoded, command);
        }
    }

    #[test]
    fn test_decode_status_frame() {
        let status = Command::Status(StatusMessage::Status1(Status1 {
            rpm: 2500,
            current: 1.5,
            duty: 0.5,
        }));
        let frame = encode(&status, 9).unwrap();
        assert_eq!(frame.id, 0x0909);
        assert_eq!(decode(&frame).unwrap(), (9, status));
    }

    #[test]
    fn test_decode_short_payload_is_malformed() {
        let frame = VescFrame::new_extended(can_id(CanPacketId::SetRpm, 1), &[0x00, 0x01]);
        let err = decode(&frame).unwrap_err();
        assert!(err.is_malformed());
        assert!(matches!(
            err,
            ProtocolError::InvalidLength {
                expected: 4,
                actual: 2,
                ..
            }
        ));

        let frame = VescFrame::new_extended(can_id(CanPacketId::Status5, 1), &[0; 4]);
        assert!(decode(&frame).unwrap_err().is_malformed());
    }

    #[test]
    fn test_decode_unknown_and_unsupported() {
        let unknown = VescFrame::new_extended(200 << 8, &[]);
        assert_eq!(decode(&unknown), Err(ProtocolError::UnknownOpcode(200)));

        let unsupported = VescFrame::new_extended(can_id(CanPacketId::FillRxBuffer, 1), &[0; 8]);
        assert!(matches!(
            decode(&unsupported),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_standard_frame_rejected() {
        let frame = VescFrame::new_standard(0x009, &[0; 8]);
        assert!(matches!(decode(&frame), Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_duty_out_of_range_is_malformed() {
        let frame = VescFrame::new_extended(0x0001, &200_000i32.to_be_bytes());
        assert!(matches!(decode(&frame), Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_heartbeat_payload() {
        let heartbeat = Command::Status(StatusMessage::Status5(Status5 {
            tachometer: 0x0102_0304,
            v_in: 3.3,
            reserved: crate::HOST_HEARTBEAT_MARKER,
        }));
        let frame = heartbeat.to_frame(0x45).unwrap();
        assert_eq!(frame.id, 0x1B45);
        assert_eq!(
            frame.data_slice(),
            &[0x01, 0x02, 0x03, 0x04, 0x00, 0x21, 0x52, 0x50]
        );
    }
}
