//! 服务运行指标
//!
//! 原子计数器，任意线程可无锁读取。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// CAN 服务实时指标
///
/// ```rust
/// use std::sync::atomic::Ordering;
/// use vesc_driver::ServiceMetrics;
///
/// let metrics = ServiceMetrics::new();
/// metrics.messages_received.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().messages_received, 1);
/// ```
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    /// 成功发出的帧数（含心跳、发现、PONG）
    pub messages_sent: AtomicU64,
    /// 收到的帧数（含无法解码的）
    pub messages_received: AtomicU64,
    /// 解码失败并丢弃的帧数
    pub decode_errors: AtomicU64,
    pub send_errors: AtomicU64,
    /// 传输层接收错误（不含超时）
    pub receive_errors: AtomicU64,
    pub pings_received: AtomicU64,
    pub pongs_sent: AtomicU64,
    pub status_messages: AtomicU64,
    pub heartbeats_sent: AtomicU64,
    /// 发出的广播 PING 次数
    pub discoveries: AtomicU64,
    /// 收到源 ID 与本机相同的 PONG / 状态帧的次数
    pub id_collisions: AtomicU64,
    /// 成功重连次数
    pub reconnects: AtomicU64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取快照（不同计数器之间可能有微小的时间差）
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            pings_received: self.pings_received.load(Ordering::Relaxed),
            pongs_sent: self.pongs_sent.load(Ordering::Relaxed),
            status_messages: self.status_messages.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            discoveries: self.discoveries.load(Ordering::Relaxed),
            id_collisions: self.id_collisions.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub decode_errors: u64,
    pub send_errors: u64,
    pub receive_errors: u64,
    pub pings_received: u64,
    pub pongs_sent: u64,
    pub status_messages: u64,
    pub heartbeats_sent: u64,
    pub discoveries: u64,
    pub id_collisions: u64,
    pub reconnects: u64,
}

impl MetricsSnapshot {
    /// 解码失败率（百分比），未收到帧时为 0
    pub fn decode_error_rate(&self) -> f64 {
        if self.messages_received == 0 {
            return 0.0;
        }
        (self.decode_errors as f64 / self.messages_received as f64) * 100.0
    }
}

/// 网络统计（`get_network_stats`）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStats {
    pub uptime: Duration,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub decode_errors: u64,
    pub local_node_id: u8,
    pub node_count: usize,
    pub active_count: usize,
    pub is_running: bool,
}
