//! 控制器故障码

use num_enum::TryFromPrimitive;
use std::fmt;

/// 控制器故障码（`mc_fault_code`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FaultCode {
    None = 0,
    OverVoltage = 1,
    UnderVoltage = 2,
    Drv = 3,
    AbsOverCurrent = 4,
    OverTempFet = 5,
    OverTempMotor = 6,
    GateDriverOverVoltage = 7,
    GateDriverUnderVoltage = 8,
    McuUnderVoltage = 9,
    BootingFromWatchdogReset = 10,
    EncoderSpi = 11,
    EncoderSincosBelowMinAmplitude = 12,
    EncoderSincosAboveMaxAmplitude = 13,
    FlashCorruption = 14,
    HighOffsetCurrentSensor1 = 15,
    HighOffsetCurrentSensor2 = 16,
    HighOffsetCurrentSensor3 = 17,
    UnbalancedCurrents = 18,
    Brk = 19,
    ResolverLot = 20,
    ResolverDos = 21,
    ResolverLos = 22,
    FlashCorruptionAppCfg = 23,
    FlashCorruptionMcCfg = 24,
    EncoderNoMagnet = 25,
    EncoderMagnetTooStrong = 26,
    PhaseFilter = 27,
    EncoderFault = 28,
}

impl FaultCode {
    /// 人类可读描述
    pub fn description(self) -> &'static str {
        match self {
            FaultCode::None => "No fault",
            FaultCode::OverVoltage => "Over voltage",
            FaultCode::UnderVoltage => "Under voltage",
            FaultCode::Drv => "DRV fault",
            FaultCode::AbsOverCurrent => "Absolute over current",
            FaultCode::OverTempFet => "Over temperature FET",
            FaultCode::OverTempMotor => "Over temperature motor",
            FaultCode::GateDriverOverVoltage => "Gate driver over voltage",
            FaultCode::GateDriverUnderVoltage => "Gate driver under voltage",
            FaultCode::McuUnderVoltage => "MCU under voltage",
            FaultCode::BootingFromWatchdogReset => "Booting from watchdog reset",
            FaultCode::EncoderSpi => "Encoder SPI fault",
            FaultCode::EncoderSincosBelowMinAmplitude => "Encoder sin/cos below minimum amplitude",
            FaultCode::EncoderSincosAboveMaxAmplitude => "Encoder sin/cos above maximum amplitude",
            FaultCode::FlashCorruption => "Flash corruption",
            FaultCode::HighOffsetCurrentSensor1 => "High offset current sensor 1",
            FaultCode::HighOffsetCurrentSensor2 => "High offset current sensor 2",
            FaultCode::HighOffsetCurrentSensor3 => "High offset current sensor 3",
            FaultCode::UnbalancedCurrents => "Unbalanced currents",
            FaultCode::Brk => "BRK fault",
            FaultCode::ResolverLot => "Resolver LOT",
            FaultCode::ResolverDos => "Resolver DOS",
            FaultCode::ResolverLos => "Resolver LOS",
            FaultCode::FlashCorruptionAppCfg => "Flash corruption app config",
            FaultCode::FlashCorruptionMcCfg => "Flash corruption motor config",
            FaultCode::EncoderNoMagnet => "Encoder no magnet",
            FaultCode::EncoderMagnetTooStrong => "Encoder magnet too strong",
            FaultCode::PhaseFilter => "Phase filter fault",
            FaultCode::EncoderFault => "Encoder fault",
        }
    }

    pub fn is_fault(self) -> bool {
        self != FaultCode::None
    }
}

impl Default for FaultCode {
    fn default() -> Self {
        FaultCode::None
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// 原始故障码的描述，未知值也能给出文本
pub fn describe_fault(raw: u8) -> String {
    match FaultCode::try_from(raw) {
        Ok(code) => code.description().to_string(),
        Err(_) => format!("Unknown fault code: {}", raw),
    }
}
