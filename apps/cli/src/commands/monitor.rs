//! 监控命令
//!
//! 周期性打印所有节点（或单个节点）的缓存遥测，直到 Ctrl+C。

use anyhow::Result;
use clap::Args;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use vesc_sdk::driver::Telemetry;

use crate::session::Session;

/// 监控命令参数
#[derive(Args, Debug)]
pub struct MonitorCommand {
    /// 刷新频率（Hz）
    #[arg(short, long, default_value_t = 2)]
    pub frequency: u32,

    /// 只显示该控制器
    #[arg(short, long)]
    pub target: Option<u8>,

    /// 刷新若干次后退出（默认一直运行）
    #[arg(long)]
    pub count: Option<u64>,
}

impl MonitorCommand {
    fn interval(&self) -> Duration {
        if self.frequency > 0 {
            Duration::from_secs_f64(1.0 / self.frequency as f64)
        } else {
            Duration::from_secs(1)
        }
    }

    pub async fn execute(&self, session: &Session) -> Result<()> {
        session.service().force_discovery()?;
        println!("📊 监控中 ({} Hz)...", self.frequency);
        println!("按 Ctrl+C 停止\n");

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut iteration = 0u64;
        loop {
            iteration += 1;

            let mut snapshot = session.service().get_all_cached_status();
            if let Some(target) = self.target {
                snapshot.retain(|id, _| *id == target);
            }
            print_monitor_output(iteration, &snapshot);

            if self.count.is_some_and(|count| iteration >= count) {
                break;
            }

            tokio::select! {
                _ = &mut ctrl_c => {
                    println!("\n收到退出信号，正在关闭...");
                    break;
                },
                _ = tokio::time::sleep(self.interval()) => {},
            }
        }

        println!("✅ 监控已结束");
        Ok(())
    }
}

/// 打印监控输出
fn print_monitor_output(iteration: u64, snapshot: &HashMap<u8, Arc<Telemetry>>) {
    println!("======================================== #{}", iteration);
    if snapshot.is_empty() {
        println!("  (暂无遥测数据)");
        return;
    }

    println!(
        "  {:>4}  {:>7}  {:>8}  {:>8}  {:>7}  {:>6}  {:>6}  {}",
        "ID", "占空比", "RPM", "电流(A)", "电压(V)", "FET°C", "电机°C", "故障"
    );
    let mut ids: Vec<_> = snapshot.keys().copied().collect();
    ids.sort_unstable();
    for id in ids {
        let t = &snapshot[&id];
        println!(
            "  {:>4}  {:>7.3}  {:>8}  {:>8.2}  {:>7.1}  {:>6.1}  {:>6.1}  {}",
            id,
            t.duty,
            t.rpm,
            t.current,
            t.voltage,
            t.temp_fet,
            t.temp_motor,
            if t.has_fault() { t.fault_description() } else { "-".to_string() },
        );
    }
}
