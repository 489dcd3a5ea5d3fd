//! 进程内虚拟 CAN 总线
//!
//! 多个端点挂在同一条总线上，每个端点收到其他端点发送的所有帧，收不到自己发的帧
//! （与默认 SocketCAN 行为一致：RECV_OWN_MSGS 关闭）。
//!
//! ```rust
//! use std::time::Duration;
//! use vesc_can::{CanTransport, VirtualCanBus, VescFrame};
//!
//! let bus = VirtualCanBus::new();
//! let mut a = bus.endpoint();
//! let mut b = bus.endpoint();
//! a.connect().unwrap();
//! b.connect().unwrap();
//!
//! a.send(VescFrame::new_extended(0x1140, &[])).unwrap();
//! let frame = b.receive(Duration::from_millis(100)).unwrap().unwrap();
//! assert_eq!(frame.id, 0x1140);
//! assert!(a.receive(Duration::from_millis(10)).unwrap().is_none());
//! ```

use crate::{
    CanError, CanTransport, RxTransport, SplittableTransport, TransportCounters, TransportStats,
    TxTransport, VescFrame,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::trace;

struct BusInner {
    /// 已连接端点：(端点 ID, 投递通道)
    endpoints: Mutex<Vec<(u64, Sender<VescFrame>)>>,
    next_endpoint: AtomicU64,
    frames_carried: AtomicU64,
}

/// 虚拟总线句柄（Clone 共享同一条总线）
#[derive(Clone)]
pub struct VirtualCanBus {
    inner: Arc<BusInner>,
}

impl Default for VirtualCanBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VirtualCanBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualCanBus")
            .field("endpoints", &self.endpoint_count())
            .field("frames_carried", &self.frames_carried())
            .finish()
    }
}

impl VirtualCanBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                endpoints: Mutex::new(Vec::new()),
                next_endpoint: AtomicU64::new(1),
                frames_carried: AtomicU64::new(0),
            }),
        }
    }

    /// 创建一个新端点（未连接）
    pub fn endpoint(&self) -> VirtualCanTransport {
        let id = self.inner.next_endpoint.fetch_add(1, Ordering::Relaxed);
        VirtualCanTransport {
            bus: self.clone(),
            endpoint_id: id,
            receiver: None,
            counters: Arc::new(TransportCounters::new()),
        }
    }

    /// 当前已连接的端点数
    pub fn endpoint_count(&self) -> usize {
        self.inner.endpoints.lock().len()
    }

    /// 总线累计承载的帧数（按发送次数计）
    pub fn frames_carried(&self) -> u64 {
        self.inner.frames_carried.load(Ordering::Relaxed)
    }

    /// 模拟拔线：移除端点的投递通道
    ///
    /// 该端点上阻塞中的 `receive` 在下一次轮询时返回 `TransportClosed`。
    /// 返回端点原本是否在线。
    pub fn unplug(&self, endpoint_id: u64) -> bool {
        let mut endpoints = self.inner.endpoints.lock();
        let before = endpoints.len();
        endpoints.retain(|(id, _)| *id != endpoint_id);
        before != endpoints.len()
    }

    fn attach(&self, endpoint_id: u64) -> Receiver<VescFrame> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner.endpoints.lock().push((endpoint_id, tx));
        trace!("virtual bus: endpoint {} attached", endpoint_id);
        rx
    }

    fn is_attached(&self, endpoint_id: u64) -> bool {
        self.inner.endpoints.lock().iter().any(|(id, _)| *id == endpoint_id)
    }

    /// 投递给除发送者以外的所有端点
    fn deliver(&self, from: u64, frame: VescFrame) -> Result<(), CanError> {
        let frame = frame.with_timestamp(now_us());
        let endpoints = self.inner.endpoints.lock();
        if !endpoints.iter().any(|(id, _)| *id == from) {
            return Err(CanError::SendFailed("endpoint is not connected".to_string()));
        }
        for (id, sender) in endpoints.iter() {
            if *id != from {
                // 对端已 drop 接收端时忽略，由其 Drop 负责摘除
                let _ = sender.send(frame);
            }
        }
        self.inner.frames_carried.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

fn receive_from(
    receiver: &Receiver<VescFrame>,
    counters: &TransportCounters,
    timeout: Duration,
) -> Result<Option<VescFrame>, CanError> {
    match receiver.recv_timeout(timeout) {
        Ok(frame) => {
            counters.record_received();
            Ok(Some(frame))
        },
        Err(RecvTimeoutError::Timeout) => Ok(None),
        Err(RecvTimeoutError::Disconnected) => Err(CanError::TransportClosed),
    }
}

fn send_from(
    bus: &VirtualCanBus,
    endpoint_id: u64,
    counters: &TransportCounters,
    frame: VescFrame,
) -> Result<(), CanError> {
    match bus.deliver(endpoint_id, frame) {
        Ok(()) => {
            counters.record_sent();
            trace!("virtual bus: endpoint {} sent ID=0x{:X}", endpoint_id, frame.id);
            Ok(())
        },
        Err(e) => {
            counters.record_send_error();
            Err(e)
        },
    }
}

/// 虚拟总线上的一个端点
pub struct VirtualCanTransport {
    bus: VirtualCanBus,
    endpoint_id: u64,
    receiver: Option<Receiver<VescFrame>>,
    counters: Arc<TransportCounters>,
}

impl VirtualCanTransport {
    /// 端点 ID（用于 [`VirtualCanBus::unplug`]）
    pub fn endpoint_id(&self) -> u64 {
        self.endpoint_id
    }

    pub fn bus(&self) -> &VirtualCanBus {
        &self.bus
    }
}

impl CanTransport for VirtualCanTransport {
    fn connect(&mut self) -> Result<(), CanError> {
        if self.receiver.is_none() {
            self.receiver = Some(self.bus.attach(self.endpoint_id));
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.receiver.take().is_some() {
            self.bus.unplug(self.endpoint_id);
            trace!("virtual bus: endpoint {} disconnected", self.endpoint_id);
        }
    }

    fn is_connected(&self) -> bool {
        self.receiver.is_some() && self.bus.is_attached(self.endpoint_id)
    }

    fn send(&mut self, frame: VescFrame) -> Result<(), CanError> {
        send_from(&self.bus, self.endpoint_id, &self.counters, frame)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<VescFrame>, CanError> {
        let receiver = self.receiver.as_ref().ok_or(CanError::TransportClosed)?;
        receive_from(receiver, &self.counters, timeout)
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}

impl Drop for VirtualCanTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl SplittableTransport for VirtualCanTransport {
    type Rx = VirtualRxTransport;
    type Tx = VirtualTxTransport;

    fn split(mut self) -> Result<(Self::Rx, Self::Tx), CanError> {
        self.connect()?;
        let receiver = self.receiver.take().ok_or(CanError::TransportClosed)?;

        let rx = VirtualRxTransport {
            bus: self.bus.clone(),
            endpoint_id: self.endpoint_id,
            receiver,
            counters: self.counters.clone(),
        };
        let tx = VirtualTxTransport {
            bus: self.bus.clone(),
            endpoint_id: self.endpoint_id,
            counters: self.counters.clone(),
        };
        // receiver 已移出，self 的 Drop 不会摘除端点
        Ok((rx, tx))
    }
}

/// 虚拟端点的接收半部；drop 时从总线摘除
pub struct VirtualRxTransport {
    bus: VirtualCanBus,
    endpoint_id: u64,
    receiver: Receiver<VescFrame>,
    counters: Arc<TransportCounters>,
}

impl VirtualRxTransport {
    pub fn endpoint_id(&self) -> u64 {
        self.endpoint_id
    }
}

impl RxTransport for VirtualRxTransport {
    fn receive(&mut self, timeout: Duration) -> Result<Option<VescFrame>, CanError> {
        receive_from(&self.receiver, &self.counters, timeout)
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}

impl Drop for VirtualRxTransport {
    fn drop(&mut self) {
        self.bus.unplug(self.endpoint_id);
        trace!("[Auto-Drop] virtual endpoint {} detached", self.endpoint_id);
    }
}

/// 虚拟端点的发送半部
pub struct VirtualTxTransport {
    bus: VirtualCanBus,
    endpoint_id: u64,
    counters: Arc<TransportCounters>,
}

impl TxTransport for VirtualTxTransport {
    fn send(&mut self, frame: VescFrame) -> Result<(), CanError> {
        send_from(&self.bus, self.endpoint_id, &self.counters, frame)
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}
