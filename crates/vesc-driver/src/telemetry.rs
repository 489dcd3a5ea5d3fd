//! 遥测快照
//!
//! 每个状态帧生成一份新的 [`Telemetry`]（在旧快照基础上合并），
//! 整体以 `Arc` 替换安装，读者拿到的要么是旧快照要么是新快照，不会出现新旧字段混合。

use std::time::Instant;
use vesc_protocol::{FaultCode, StatusMessage, describe_fault};

/// 某个节点最近一次的遥测数据（不可变）
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub duty: f64,
    pub rpm: i32,
    /// 输入电压 (V)
    pub voltage: f64,
    /// 电机电流 (A)
    pub current: f64,
    /// 状态帧不携带故障字段，始终为 0，除非其他来源填充
    pub fault_code: u8,
    pub captured_at: Instant,

    /// 输入电流 (A)
    pub current_in: f64,
    pub temp_fet: f64,
    pub temp_motor: f64,
    pub amp_hours: f64,
    pub amp_hours_charged: f64,
    pub watt_hours: f64,
    pub watt_hours_charged: f64,
    pub tachometer: i32,
    pub pid_pos: f64,
    pub adc1: f64,
    pub adc2: f64,
    pub adc3: f64,
    pub ppm: f64,
}

impl Telemetry {
    /// 全零快照
    pub fn empty(captured_at: Instant) -> Self {
        Self {
            duty: 0.0,
            rpm: 0,
            voltage: 0.0,
            current: 0.0,
            fault_code: 0,
            captured_at,
            current_in: 0.0,
            temp_fet: 0.0,
            temp_motor: 0.0,
            amp_hours: 0.0,
            amp_hours_charged: 0.0,
            watt_hours: 0.0,
            watt_hours_charged: 0.0,
            tachometer: 0,
            pid_pos: 0.0,
            adc1: 0.0,
            adc2: 0.0,
            adc3: 0.0,
            ppm: 0.0,
        }
    }

    /// 以 `self` 为底合并一个状态帧，返回新快照
    pub fn merged(&self, status: &StatusMessage, now: Instant) -> Self {
        let mut next = self.clone();
        next.captured_at = now;
        match *status {
            StatusMessage::Status1(s) => {
                next.rpm = s.rpm;
                next.current = s.current;
                next.duty = s.duty;
            },
            StatusMessage::Status2(s) => {
                next.amp_hours = s.amp_hours;
                next.amp_hours_charged = s.amp_hours_charged;
            },
            StatusMessage::Status3(s) => {
                next.watt_hours = s.watt_hours;
                next.watt_hours_charged = s.watt_hours_charged;
            },
            StatusMessage::Status4(s) => {
                next.temp_fet = s.temp_fet;
                next.temp_motor = s.temp_motor;
                next.current_in = s.current_in;
                next.pid_pos = s.pid_pos;
            },
            StatusMessage::Status5(s) => {
                next.tachometer = s.tachometer;
                next.voltage = s.v_in;
            },
            StatusMessage::Status6(s) => {
                next.adc1 = s.adc1;
                next.adc2 = s.adc2;
                next.adc3 = s.adc3;
                next.ppm = s.ppm;
            },
        }
        next
    }

    pub fn has_fault(&self) -> bool {
        self.fault_code != 0
    }

    /// 已知故障码返回枚举，未知值视为无故障
    pub fn fault(&self) -> FaultCode {
        FaultCode::try_from(self.fault_code).unwrap_or_default()
    }

    pub fn fault_description(&self) -> String {
        describe_fault(self.fault_code)
    }
}
