//! SocketCAN 传输实现
//!
//! 基于 Linux SocketCAN 子系统。波特率等接口配置由系统工具（`ip link`）完成，
//! 这里只负责打开、收发和释放。
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**
//! - **只发送扩展帧**：控制器协议使用 29-bit ID
//! - 接收端不过滤标准帧，交给协议层判定为损坏帧

use crate::{CanError, CanTransport, SplittableTransport, TransportCounters, TransportStats, VescFrame};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket};
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

mod interface_check;
pub mod split;

pub use interface_check::check_interface_status;
pub use split::{SocketCanRxTransport, SocketCanTxTransport};

/// SO_RCVTIMEO 为 0 表示永久阻塞，因此超时下限为 1ms
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// SocketCAN 传输
///
/// ```no_run
/// use std::time::Duration;
/// use vesc_can::{CanTransport, SocketCanTransport};
///
/// let mut can = SocketCanTransport::new("can0");
/// can.connect().unwrap();
/// if let Some(frame) = can.receive(Duration::from_millis(100)).unwrap() {
///     println!("0x{:X}", frame.id);
/// }
/// ```
#[derive(Debug)]
pub struct SocketCanTransport {
    interface: String,
    socket: Option<CanSocket>,
    read_timeout: Option<Duration>,
    counters: Arc<TransportCounters>,
}

impl SocketCanTransport {
    /// 创建传输（尚未打开接口，见 [`CanTransport::connect`]）
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            socket: None,
            read_timeout: None,
            counters: Arc::new(TransportCounters::new()),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn open(interface: &str) -> Result<CanSocket, CanError> {
        match check_interface_status(interface)? {
            true => trace!("CAN interface '{}' is UP", interface),
            false => {
                return Err(CanError::TransportUnavailable(format!(
                    "CAN interface '{}' exists but is not UP. Please start it first:\n  sudo ip link set up {}",
                    interface, interface
                )));
            },
        }

        let socket = CanSocket::open(interface).map_err(|e| {
            CanError::TransportUnavailable(format!(
                "Failed to open CAN interface '{}': {}",
                interface, e
            ))
        })?;

        // 保持内核默认：回环开启、RECV_OWN_MSGS 关闭，
        // 本 socket 收不到自己发出的帧，同机其它 socket 仍能收到
        Ok(socket)
    }
}

impl CanTransport for SocketCanTransport {
    fn connect(&mut self) -> Result<(), CanError> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = Self::open(&self.interface)?;
        self.socket = Some(socket);
        self.read_timeout = None;
        debug!("SocketCAN interface '{}' opened", self.interface);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            debug!("SocketCAN interface '{}' closed", self.interface);
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn send(&mut self, frame: VescFrame) -> Result<(), CanError> {
        let Some(socket) = self.socket.as_ref() else {
            self.counters.record_send_error();
            return Err(CanError::SendFailed(format!(
                "CAN interface '{}' is not connected",
                self.interface
            )));
        };
        write_frame(socket, &self.counters, frame)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<VescFrame>, CanError> {
        let socket = self.socket.as_ref().ok_or(CanError::TransportClosed)?;
        read_frame(socket, &mut self.read_timeout, &self.counters, timeout)
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}

impl Drop for SocketCanTransport {
    fn drop(&mut self) {
        if self.socket.is_some() {
            trace!(
                "[Auto-Drop] SocketCAN interface '{}' closed",
                self.interface
            );
        }
    }
}

impl SplittableTransport for SocketCanTransport {
    type Rx = SocketCanRxTransport;
    type Tx = SocketCanTxTransport;

    /// 分离为 RX / TX 半部
    ///
    /// RX 半部持有 `try_clone()`（`dup()`）得到的 socket，两者共享文件状态标志，
    /// 因此超时只通过 `SO_RCVTIMEO` 设置，不使用非阻塞模式。
    fn split(mut self) -> Result<(Self::Rx, Self::Tx), CanError> {
        self.connect()?;
        let socket = self.socket.take().ok_or(CanError::TransportClosed)?;
        let interface = std::mem::take(&mut self.interface);

        let rx = SocketCanRxTransport::new(&socket, interface.clone(), self.counters.clone())?;
        let tx = SocketCanTxTransport::new(socket, interface, self.counters.clone());

        trace!("SocketCanTransport split into RX and TX halves");
        Ok((rx, tx))
    }
}

/// VescFrame -> CanFrame（只接受扩展帧）
pub(crate) fn to_can_frame(frame: &VescFrame) -> Result<CanFrame, CanError> {
    if !frame.is_extended {
        return Err(CanError::SendFailed(format!(
            "standard frame 0x{:X} rejected, only extended ids are sent",
            frame.id
        )));
    }
    ExtendedId::new(frame.id)
        .and_then(|id| CanFrame::new(id, frame.data_slice()))
        .ok_or_else(|| {
            CanError::SendFailed(format!(
                "Failed to create extended frame with ID 0x{:X}",
                frame.id
            ))
        })
}

/// CanFrame -> VescFrame；错误帧和远程帧返回 `None`
pub(crate) fn from_can_frame(can_frame: &CanFrame) -> Option<VescFrame> {
    let CanFrame::Data(_) = can_frame else {
        return None;
    };
    let frame = if can_frame.is_extended() {
        VescFrame::new_extended(can_frame.raw_id() & 0x1FFF_FFFF, can_frame.data())
    } else {
        VescFrame::new_standard((can_frame.raw_id() & 0x7FF) as u16, can_frame.data())
    };
    Some(frame.with_timestamp(software_timestamp_us()))
}

fn software_timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

pub(crate) fn write_frame(
    socket: &CanSocket,
    counters: &TransportCounters,
    frame: VescFrame,
) -> Result<(), CanError> {
    let result = to_can_frame(&frame).and_then(|can_frame| {
        socket
            .write_frame(&can_frame)
            .map_err(|e| CanError::SendFailed(format!("SocketCAN transmit error: {}", e)))
    });
    match result {
        Ok(()) => {
            counters.record_sent();
            trace!("Sent CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
            Ok(())
        },
        Err(e) => {
            counters.record_send_error();
            Err(e)
        },
    }
}

/// 读一帧，跳过错误帧/远程帧，直到超时
pub(crate) fn read_frame(
    socket: &CanSocket,
    current_timeout: &mut Option<Duration>,
    counters: &TransportCounters,
    timeout: Duration,
) -> Result<Option<VescFrame>, CanError> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .saturating_duration_since(std::time::Instant::now())
            .max(MIN_READ_TIMEOUT);
        if *current_timeout != Some(remaining) {
            socket.set_read_timeout(remaining)?;
            *current_timeout = Some(remaining);
        }

        match socket.read_frame() {
            Ok(can_frame) => {
                if let Some(frame) = from_can_frame(&can_frame) {
                    counters.record_received();
                    trace!("Received CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
                    return Ok(Some(frame));
                }
                trace!("Skipped non-data CAN frame");
                if std::time::Instant::now() >= deadline {
                    return Ok(None);
                }
            },
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Ok(None);
            },
            Err(e) if is_link_gone(&e) => {
                counters.record_receive_error();
                return Err(CanError::TransportClosed);
            },
            Err(e) => {
                counters.record_receive_error();
                return Err(CanError::Io(e));
            },
        }
    }
}

fn is_link_gone(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENETDOWN) | Some(libc::ENODEV) | Some(libc::EBADF))
}

#[cfg(test)]
mod tests {
    use super::*;
    use socketcan::StandardId;

    #[test]
    fn test_connect_missing_interface_is_unavailable() {
        let mut can = SocketCanTransport::new("vescnope0");
        assert!(matches!(
            can.connect(),
            Err(CanError::TransportUnavailable(_))
        ));
        assert!(!can.is_connected());
    }

    #[test]
    fn test_send_without_connect_fails() {
        let mut can = SocketCanTransport::new("vescnope0");
        let result = can.send(VescFrame::new_extended(0x1140, &[]));
        assert!(matches!(result, Err(CanError::SendFailed(_))));
        assert_eq!(can.stats().send_errors, 1);
    }

    #[test]
    fn test_receive_without_connect_is_closed() {
        let mut can = SocketCanTransport::new("vescnope0");
        assert!(matches!(
            can.receive(Duration::from_millis(1)),
            Err(CanError::TransportClosed)
        ));
    }

    #[test]
    fn test_frame_conversion() {
        let frame = VescFrame::new_extended(0x0940, &[0, 0, 0x27, 0x10]);
        let can_frame = to_can_frame(&frame).unwrap();
        assert!(can_frame.is_extended());
        let back = from_can_frame(&can_frame).unwrap();
        assert_eq!(back.id, 0x0940);
        assert_eq!(back.data_slice(), &[0, 0, 0x27, 0x10]);
        assert!(back.is_extended);
    }

    #[test]
    fn test_standard_frame_not_sent() {
        let frame = VescFrame::new_standard(0x123, &[1]);
        assert!(matches!(to_can_frame(&frame), Err(CanError::SendFailed(_))));
    }

    #[test]
    fn test_standard_frame_received_as_is() {
        let can_frame = StandardId::new(0x123)
            .and_then(|id| CanFrame::new(id, &[9]))
            .unwrap();
        let frame = from_can_frame(&can_frame).unwrap();
        assert!(!frame.is_extended);
        assert_eq!(frame.id, 0x123);
    }

    /// 需要已配置的 vcan0
    #[test]
    #[ignore]
    fn test_vcan_roundtrip() {
        let mut a = SocketCanTransport::new("vcan0");
        let mut b = SocketCanTransport::new("vcan0");
        a.connect().unwrap();
        b.connect().unwrap();
        a.send(VescFrame::new_extended(0x1140, &[])).unwrap();
        let frame = b.receive(Duration::from_millis(200)).unwrap().unwrap();
        assert_eq!(frame.id, 0x1140);
        // 发送方自己收不到
        assert!(a.receive(Duration::from_millis(50)).unwrap().is_none());
    }
}
