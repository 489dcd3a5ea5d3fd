//! 扫描命令
//!
//! 广播一次发现，列出应答的节点

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::time::Duration;
use vesc_sdk::driver::{Node, NodeKind};

use crate::session::Session;

/// 扫描命令参数
#[derive(Args, Debug)]
pub struct ScanCommand {
    /// 等待应答的时长（毫秒）
    #[arg(long, default_value_t = 1000)]
    pub wait_ms: u64,

    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,
}

/// 单个节点的扫描结果
#[derive(Debug, Serialize)]
struct ScanEntry {
    node_id: u8,
    state: String,
    kind: &'static str,
    voltage: Option<f64>,
    rpm: Option<i32>,
    messages: u64,
}

impl From<&Node> for ScanEntry {
    fn from(node: &Node) -> Self {
        Self {
            node_id: node.node_id,
            state: node.state.to_string(),
            kind: match node.kind {
                NodeKind::Controller => "controller",
                NodeKind::Host => "host",
            },
            voltage: node.telemetry.as_ref().map(|t| t.voltage),
            rpm: node.telemetry.as_ref().map(|t| t.rpm),
            messages: node.messages,
        }
    }
}

impl ScanCommand {
    pub async fn execute(&self, session: &Session) -> Result<()> {
        if !self.json {
            println!("🔍 扫描中 ({} ms)...", self.wait_ms);
        }
        let controllers = session.discover(Duration::from_millis(self.wait_ms)).await?;
        let entries: Vec<ScanEntry> =
            session.service().nodes().iter().map(ScanEntry::from).collect();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }

        println!("发现 {} 个控制器", controllers.len());
        if entries.is_empty() {
            return Ok(());
        }
        println!("\n  {:>4}  {:<10}  {:<10}  {:>8}  {:>8}", "ID", "状态", "类型", "电压", "RPM");
        for entry in &entries {
            println!(
                "  {:>4}  {:<10}  {:<10}  {:>8}  {:>8}",
                entry.node_id,
                entry.state,
                entry.kind,
                entry.voltage.map_or("-".to_string(), |v| format!("{:.1}V", v)),
                entry.rpm.map_or("-".to_string(), |r| r.to_string()),
            );
        }
        Ok(())
    }
}
