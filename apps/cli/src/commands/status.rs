//! 状态命令

use anyhow::Result;
use clap::Args;
use std::time::Duration;
use vesc_sdk::client::get_network_status;

use crate::commands::control::TargetArgs;
use crate::session::Session;

/// 状态命令参数
#[derive(Args, Debug)]
pub struct StatusCommand {
    #[command(flatten)]
    pub target: TargetArgs,

    /// 等待第一份遥测的时长（毫秒）
    #[arg(long, default_value_t = 1000)]
    pub data_wait_ms: u64,
}

impl StatusCommand {
    pub async fn execute(&self, session: &Session) -> Result<()> {
        let vesc = session.target(self.target.target, self.target.wait()).await?;

        let wait = Duration::from_millis(self.data_wait_ms);
        let waiter = vesc.clone();
        let has_data = tokio::task::spawn_blocking(move || waiter.wait_for_data(wait)).await?;
        if !has_data {
            println!("⚠️ 控制器 {} 尚未广播状态帧，以下读数为 0", vesc.node_id());
        }

        vesc.print_status();
        if vesc.has_fault() {
            println!("❌ 故障: {}", vesc.get_fault_description());
        }

        let network = get_network_status(session.service());
        let metrics = session.service().metrics();
        println!("\n网络:");
        println!("  本机节点 ID: {}", network.my_node_id);
        println!("  活跃节点数: {}", network.peer_count);
        println!("  运行时长: {:.1} s", network.uptime.as_secs_f64());
        println!(
            "  收/发帧: {} / {}",
            network.messages_received, network.messages_sent
        );
        println!(
            "  解码错误: {} ({:.2}%)",
            metrics.decode_errors,
            metrics.decode_error_rate()
        );
        if metrics.id_collisions > 0 {
            println!("  ⚠️ 节点 ID 冲突: {} 次", metrics.id_collisions);
        }
        Ok(())
    }
}
