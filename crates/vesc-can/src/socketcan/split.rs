//! SocketCAN 分离后的 RX / TX 半部
//!
//! RX 半部持有 `try_clone()` 得到的 socket，TX 半部持有原 socket。两者共享同一个
//! 打开文件描述，**严禁调用 `set_nonblocking()`**，超时只依赖 `SO_RCVTIMEO`。

use super::{read_frame, write_frame};
use crate::{CanError, RxTransport, TransportCounters, TransportStats, TxTransport, VescFrame};
use socketcan::CanSocket;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// 只读半部（接收线程独占）
pub struct SocketCanRxTransport {
    socket: CanSocket,
    interface: String,
    read_timeout: Option<Duration>,
    counters: Arc<TransportCounters>,
}

impl SocketCanRxTransport {
    pub(crate) fn new(
        socket: &CanSocket,
        interface: String,
        counters: Arc<TransportCounters>,
    ) -> Result<Self, CanError> {
        let socket = socket.as_fd().try_clone_to_owned().map(CanSocket::from).map_err(|e| {
            CanError::Io(std::io::Error::other(format!(
                "Failed to clone SocketCAN socket for RX: {}",
                e
            )))
        })?;
        Ok(Self {
            socket,
            interface,
            read_timeout: None,
            counters,
        })
    }
}

impl RxTransport for SocketCanRxTransport {
    fn receive(&mut self, timeout: Duration) -> Result<Option<VescFrame>, CanError> {
        read_frame(&self.socket, &mut self.read_timeout, &self.counters, timeout)
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}

impl Drop for SocketCanRxTransport {
    fn drop(&mut self) {
        trace!("[Auto-Drop] SocketCAN RX half on '{}' closed", self.interface);
    }
}

/// 只写半部
pub struct SocketCanTxTransport {
    socket: CanSocket,
    interface: String,
    counters: Arc<TransportCounters>,
}

impl SocketCanTxTransport {
    pub(crate) fn new(socket: CanSocket, interface: String, counters: Arc<TransportCounters>) -> Self {
        Self {
            socket,
            interface,
            counters,
        }
    }
}

impl TxTransport for SocketCanTxTransport {
    fn send(&mut self, frame: VescFrame) -> Result<(), CanError> {
        write_frame(&self.socket, &self.counters, frame)
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}

impl Drop for SocketCanTxTransport {
    fn drop(&mut self) {
        trace!("[Auto-Drop] SocketCAN TX half on '{}' closed", self.interface);
    }
}
