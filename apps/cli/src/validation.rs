//! 输入验证模块
//!
//! 在连接总线之前拒绝明显越界的指令值。

use anyhow::{Result, bail};

/// CLI 允许的最大电流绝对值 (A)
pub const MAX_CURRENT_AMPS: f64 = 100.0;

/// 占空比必须是 [-1.0, 1.0] 内的有限数
pub fn validate_duty(duty: f64) -> Result<()> {
    if !duty.is_finite() {
        bail!("占空比必须是有限数值，得到 {}", duty);
    }
    if !(-1.0..=1.0).contains(&duty) {
        bail!("占空比 {:.3} 超出范围 [-1.0, 1.0]", duty);
    }
    Ok(())
}

/// 电流绝对值不超过 [`MAX_CURRENT_AMPS`]
pub fn validate_current(amps: f64) -> Result<()> {
    if !amps.is_finite() {
        bail!("电流必须是有限数值，得到 {}", amps);
    }
    if amps.abs() > MAX_CURRENT_AMPS {
        bail!(
            "电流 {:.2} A 超出范围 [-{:.0}, {:.0}] A",
            amps,
            MAX_CURRENT_AMPS,
            MAX_CURRENT_AMPS
        );
    }
    Ok(())
}

/// 刹车电流只接受非负值
pub fn validate_brake_current(amps: f64) -> Result<()> {
    validate_current(amps)?;
    if amps < 0.0 {
        bail!("刹车电流不能为负数: {:.2} A", amps);
    }
    Ok(())
}
