//! 控制命令：占空比、电流、刹车、停止
//!
//! 控制器在一段时间收不到指令后会自行停转，所以 `--hold-ms` 期间按固定周期重发。
//! 保持结束或收到 Ctrl+C 后发送停止指令。

use anyhow::Result;
use clap::Args;
use std::time::{Duration, Instant};
use vesc_sdk::client::{ClientError, Vesc};

use crate::safety;
use crate::session::Session;
use crate::validation;

/// 保持期间的指令重发周期
const COMMAND_REFRESH: Duration = Duration::from_millis(100);

/// 目标控制器参数
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// 目标控制器 ID（缺省选 ID 最小的）
    #[arg(short, long)]
    pub target: Option<u8>,

    /// 等待控制器出现的时长（毫秒）
    #[arg(long, default_value_t = 2000)]
    pub wait_ms: u64,
}

impl TargetArgs {
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }
}

/// 保持参数
#[derive(Args, Debug, Clone)]
pub struct HoldArgs {
    /// 保持时长（毫秒），0 表示只发送一次
    #[arg(long, default_value_t = 0)]
    pub hold_ms: u64,

    /// 跳过大输出确认
    #[arg(short, long)]
    pub yes: bool,
}

/// 占空比命令参数
#[derive(Args, Debug)]
pub struct DutyCommand {
    /// 占空比 (-1.0 ~ 1.0)
    #[arg(allow_negative_numbers = true)]
    pub duty: f64,

    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub hold: HoldArgs,
}

impl DutyCommand {
    pub async fn execute(&self, session: &Session) -> Result<()> {
        validation::validate_duty(self.duty)?;
        if safety::duty_requires_confirmation(self.duty)
            && !safety::confirm(&format!("占空比 {:.2} 较大", self.duty), self.hold.yes)?
        {
            return Ok(());
        }

        let vesc = session.target(self.target.target, self.target.wait()).await?;
        println!("⚡ 控制器 {}: 占空比 {:.3}", vesc.node_id(), self.duty);
        let duty = self.duty;
        hold(&vesc, self.hold.hold_ms, move |v| v.set_duty(duty)).await
    }
}

/// 电流命令参数
#[derive(Args, Debug)]
pub struct CurrentCommand {
    /// 电机电流 (A)
    #[arg(allow_negative_numbers = true)]
    pub amps: f64,

    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub hold: HoldArgs,
}

impl CurrentCommand {
    pub async fn execute(&self, session: &Session) -> Result<()> {
        validation::validate_current(self.amps)?;
        if safety::current_requires_confirmation(self.amps)
            && !safety::confirm(&format!("电流 {:.1} A 较大", self.amps), self.hold.yes)?
        {
            return Ok(());
        }

        let vesc = session.target(self.target.target, self.target.wait()).await?;
        println!("⚡ 控制器 {}: 电流 {:.2} A", vesc.node_id(), self.amps);
        let amps = self.amps;
        hold(&vesc, self.hold.hold_ms, move |v| v.set_current(amps)).await
    }
}

/// 刹车命令参数
#[derive(Args, Debug)]
pub struct BrakeCommand {
    /// 刹车电流 (A)
    pub amps: f64,

    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub hold: HoldArgs,
}

impl BrakeCommand {
    pub async fn execute(&self, session: &Session) -> Result<()> {
        validation::validate_brake_current(self.amps)?;

        let vesc = session.target(self.target.target, self.target.wait()).await?;
        println!("🧲 控制器 {}: 刹车电流 {:.2} A", vesc.node_id(), self.amps);
        let amps = self.amps;
        hold(&vesc, self.hold.hold_ms, move |v| v.set_brake_current(amps)).await
    }
}

/// 停止命令参数
#[derive(Args, Debug)]
pub struct StopCommand {
    #[command(flatten)]
    pub target: TargetArgs,

    /// 滑行停止（电流置 0），而不是占空比置 0
    #[arg(long)]
    pub coast: bool,
}

impl StopCommand {
    pub async fn execute(&self, session: &Session) -> Result<()> {
        let vesc = session.target(self.target.target, self.target.wait()).await?;
        if self.coast {
            vesc.coast_motor()?;
            println!("✅ 控制器 {} 已滑行停止", vesc.node_id());
        } else {
            vesc.stop_motor()?;
            println!("🛑 控制器 {} 已停止", vesc.node_id());
        }
        Ok(())
    }
}

/// 发送指令；`hold_ms > 0` 时周期重发，结束后停转
async fn hold(
    vesc: &Vesc,
    hold_ms: u64,
    send: impl Fn(&Vesc) -> Result<(), ClientError>,
) -> Result<()> {
    send(vesc)?;
    if hold_ms == 0 {
        println!("✅ 指令已发送");
        return Ok(());
    }

    println!("保持 {} ms，按 Ctrl+C 提前停止", hold_ms);
    let deadline = Instant::now() + Duration::from_millis(hold_ms);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while Instant::now() < deadline {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("\n收到退出信号，正在停止电机...");
                break;
            },
            _ = tokio::time::sleep(COMMAND_REFRESH) => send(vesc)?,
        }
    }

    vesc.stop_motor()?;
    println!("🛑 电机已停止");
    Ok(())
}
