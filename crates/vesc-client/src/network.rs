//! 总线级便捷函数

use crate::Vesc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use vesc_driver::CanService;

/// 自动连接时查询注册表的周期
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 网络概况
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStatus {
    pub my_node_id: u8,
    /// Active 节点数（控制器与其他主机）
    pub peer_count: usize,
    pub service_running: bool,
    pub uptime: Duration,
    pub messages_sent: u64,
    pub messages_received: u64,
}

/// 连接到一台控制器
///
/// - `target = Some(id)`：等待该节点变为 Active
/// - `target = None`：等待任意控制器出现，选 ID 最小的
///
/// 超时仍未找到返回 `None`。等待期间不会主动发起发现，
/// 如需立即发现，先调用 `CanService::force_discovery()`。
pub fn connect_to_vesc(
    service: &Arc<CanService>,
    target: Option<u8>,
    timeout: Duration,
) -> Option<Vesc> {
    let deadline = Instant::now() + timeout;
    loop {
        let active = service.active_controllers();
        let found = match target {
            Some(id) => active.contains(&id).then_some(id),
            None => active.first().copied(),
        };
        if let Some(node_id) = found {
            info!("Connected to VESC {}", node_id);
            return Some(Vesc::new(service.clone(), node_id));
        }
        if Instant::now() >= deadline || !service.is_running() {
            debug!("No VESC found within {:?}", timeout);
            return None;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(CONNECT_POLL_INTERVAL.min(remaining));
    }
}

/// 当前 Active 控制器 ID，升序
pub fn list_active_vescs(service: &CanService) -> Vec<u8> {
    service.active_controllers()
}

pub fn get_network_status(service: &CanService) -> NetworkStatus {
    let stats = service.get_network_stats();
    NetworkStatus {
        my_node_id: stats.local_node_id,
        peer_count: stats.active_count,
        service_running: stats.is_running,
        uptime: stats.uptime,
        messages_sent: stats.messages_sent,
        messages_received: stats.messages_received,
    }
}
