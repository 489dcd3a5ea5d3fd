//! 安全检查模块
//!
//! 大输出指令在发送前需要用户确认

use anyhow::Result;

/// 超过该占空比绝对值需要确认
pub const DUTY_CONFIRM_THRESHOLD: f64 = 0.5;

/// 超过该电流绝对值需要确认 (A)
pub const CURRENT_CONFIRM_THRESHOLD: f64 = 20.0;

pub fn duty_requires_confirmation(duty: f64) -> bool {
    duty.abs() > DUTY_CONFIRM_THRESHOLD
}

pub fn current_requires_confirmation(amps: f64) -> bool {
    amps.abs() > CURRENT_CONFIRM_THRESHOLD
}

/// 显示确认提示；`assume_yes` 时直接通过
pub fn confirm(message: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }

    println!("⚠️  {}", message);
    let confirmed = inquire::Confirm::new("确定要继续吗？")
        .with_default(false) // 默认为 No
        .prompt()
        .map_err(|e| anyhow::anyhow!("用户交互失败: {}", e))?;

    if !confirmed {
        println!("❌ 操作已取消");
    }
    Ok(confirmed)
}
