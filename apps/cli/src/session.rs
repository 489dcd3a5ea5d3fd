//! 总线会话
//!
//! 每个命令独立执行：
//! 1. 读取配置，叠加命令行覆盖项
//! 2. 在 SocketCAN 或虚拟总线上启动服务
//! 3. 执行操作
//! 4. 停止服务
//!
//! 连接信息写到 stderr，stdout 只保留命令结果。

use anyhow::{Context, Result, anyhow};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use vesc_sdk::can::{SimulatedVesc, SimulatorConfig, VirtualCanBus};
use vesc_sdk::client::{Vesc, connect_to_vesc};
use vesc_sdk::driver::{CanService, VescServiceBuilder};

use crate::commands::config::load_config;

/// 虚拟模式下模拟控制器的状态广播周期
const SIM_STATUS_INTERVAL: Duration = Duration::from_millis(50);

/// 连接参数（写在子命令之前）
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// 配置文件路径（默认 <config_dir>/vesc/config.toml）
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// CAN 接口（覆盖配置）
    #[arg(short, long)]
    pub channel: Option<String>,

    /// 本机节点 ID（覆盖配置，默认由 MAC 推导）
    #[arg(long)]
    pub node_id: Option<u8>,

    /// 使用内存虚拟总线，并挂上 N 台模拟控制器（ID 1..=N）
    #[arg(
        long = "virtual",
        value_name = "N",
        value_parser = clap::value_parser!(u8).range(1..=32)
    )]
    pub virtual_nodes: Option<u8>,
}

/// 一次命令执行期间的服务与（虚拟模式下的）模拟控制器
pub struct Session {
    service: Arc<CanService>,
    _sims: Vec<SimulatedVesc>,
}

impl Session {
    pub async fn open(args: &ConnectArgs) -> Result<Self> {
        let mut config = load_config(args.config.as_deref())?;
        if let Some(channel) = &args.channel {
            config.channel = channel.clone();
        }
        if let Some(node_id) = args.node_id {
            config.node_id = Some(node_id);
        }
        let builder = VescServiceBuilder::from_config(config);

        let (service, sims) = match args.virtual_nodes {
            Some(count) => {
                let bus = VirtualCanBus::new();
                let sim_config = SimulatorConfig {
                    status_interval: Some(SIM_STATUS_INTERVAL),
                    ..Default::default()
                };
                let sims = (1..=count)
                    .map(|id| SimulatedVesc::spawn(&bus, id, sim_config.clone()))
                    .collect::<Result<Vec<_>, _>>()
                    .context("启动模拟控制器失败")?;
                eprintln!("🧪 使用虚拟总线（{} 台模拟控制器）", count);
                let endpoints = bus.clone();
                let service = builder
                    .start_with_connector(move || Ok(endpoints.endpoint()))
                    .context("启动 CAN 服务失败")?;
                (service, sims)
            },
            None => {
                let channel = builder.config().channel.clone();
                eprintln!("🔌 使用 CAN 接口: {} (SocketCAN)", channel);
                let service = builder
                    .start()
                    .with_context(|| format!("无法在 {} 上启动 CAN 服务", channel))?;
                (service, Vec::new())
            },
        };

        eprintln!("✅ 已连接，本机节点 ID: {}", service.local_node_id());
        Ok(Self {
            service: Arc::new(service),
            _sims: sims,
        })
    }

    pub fn service(&self) -> &Arc<CanService> {
        &self.service
    }

    /// 立即广播一次发现，并等待应答
    pub async fn discover(&self, wait: Duration) -> Result<Vec<u8>> {
        self.service.force_discovery()?;
        tokio::time::sleep(wait).await;
        Ok(self.service.active_controllers())
    }

    /// 绑定目标控制器；`target` 为空时选 ID 最小的
    pub async fn target(&self, target: Option<u8>, wait: Duration) -> Result<Vesc> {
        self.service.force_discovery()?;
        let service = self.service.clone();
        let vesc = tokio::task::spawn_blocking(move || connect_to_vesc(&service, target, wait))
            .await
            .context("等待控制器失败")?;

        let vesc = vesc.ok_or_else(|| match target {
            Some(id) => anyhow!("未找到控制器 {}", id),
            None => anyhow!("总线上没有发现控制器"),
        })?;
        debug!("bound to VESC {}", vesc.node_id());
        Ok(vesc)
    }

    pub fn close(self) {
        self.service.stop();
    }
}
