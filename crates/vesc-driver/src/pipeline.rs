//! 后台线程主循环
//!
//! - `rx_loop`：接收、解码、写入注册表，每个 tick 执行一次 sweep
//! - `discovery_loop`：按周期广播 PING 和主机心跳，可被 `force_discovery()` / `stop()` 提前唤醒
//!
//! 两个循环只通过注册表和共享的发送路径交互。
//!
//! 链路断开（`TransportClosed`）或连续接收错误达到阈值时，接收线程通过连接器
//! 重新打开传输：等待 `reconnect_delay` 后重试，失败则等待翻倍（不超过
//! `reconnect_max_delay`），成功后替换 RX 半部和发送路径中的 TX 半部。

use crate::DriverError;
use crate::config::ServiceConfig;
use crate::hooks::HookManager;
use crate::metrics::ServiceMetrics;
use crate::registry::{ContactOutcome, NodeRegistry};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, trace, warn};
use vesc_can::{CanError, RxTransport, TransportStats, TxTransport};
use vesc_protocol::{
    BROADCAST_NODE_ID, Command, HOST_HEARTBEAT_MARKER, Status5, StatusMessage, VescFrame, decode,
    encode,
};

/// 心跳帧中的输入电压字段
const HEARTBEAT_VOLTAGE: f64 = 3.3;

/// 解码错误日志：前 N 次逐条 warn，之后每 N 次汇总一次
const DECODE_WARN_EVERY: u64 = 100;

/// 重连等待期间检查 `is_running` 的间隔
const RECONNECT_POLL: Duration = Duration::from_millis(10);

pub(crate) type BoxedRx = Box<dyn RxTransport + Send>;
pub(crate) type BoxedTx = Box<dyn TxTransport + Send>;

/// 打开一条新链路并分离为两个半部
pub(crate) type Connector = Box<dyn FnMut() -> Result<(BoxedRx, BoxedTx), CanError> + Send>;

/// 发送路径：唯一的出站通道，整帧加锁写入
///
/// 停止后内部 TX 半部被释放，此后发送返回 `NotRunning`。
pub(crate) struct TxPath {
    tx: Mutex<Option<BoxedTx>>,
    metrics: Arc<ServiceMetrics>,
}

impl TxPath {
    pub(crate) fn new(tx: BoxedTx, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            metrics,
        }
    }

    pub(crate) fn send(&self, frame: VescFrame) -> Result<(), DriverError> {
        let mut guard = self.tx.lock();
        let tx = guard.as_mut().ok_or(DriverError::NotRunning)?;
        match tx.send(frame) {
            Ok(()) => {
                self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(e) => {
                self.metrics.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            },
        }
    }

    pub(crate) fn encode_and_send(&self, command: &Command, node_id: u8) -> Result<(), DriverError> {
        let frame = encode(command, node_id)?;
        self.send(frame)
    }

    /// 重连后换上新的 TX 半部；已 close 时拒绝并返回 `false`
    pub(crate) fn replace(&self, tx: BoxedTx) -> bool {
        let mut guard = self.tx.lock();
        if guard.is_none() {
            return false;
        }
        *guard = Some(tx);
        true
    }

    /// 释放 TX 半部
    pub(crate) fn close(&self) {
        self.tx.lock().take();
    }

    pub(crate) fn stats(&self) -> Option<TransportStats> {
        self.tx.lock().as_ref().map(|tx| tx.stats())
    }
}

/// 后台线程共享的上下文
#[derive(Clone)]
pub(crate) struct LoopContext {
    pub config: ServiceConfig,
    pub local_id: u8,
    pub registry: Arc<NodeRegistry>,
    pub metrics: Arc<ServiceMetrics>,
    pub tx: Arc<TxPath>,
    pub is_running: Arc<AtomicBool>,
    pub consecutive_errors: Arc<AtomicU32>,
    pub hooks: Arc<RwLock<HookManager>>,
}

impl LoopContext {
    /// 在锁外触发错误回调
    fn notify_error(&self, error: &DriverError) {
        let callbacks = self.hooks.read().snapshot();
        for callback in &callbacks {
            callback.on_error(error);
        }
    }
}

/// 接收线程主循环
///
/// 单个坏帧或单次接收错误不会终止循环。链路断开或连续出错达到阈值时，
/// 有连接器则重连，没有则在断开时退出；`is_running == false` 时退出。
pub(crate) fn rx_loop(mut rx: BoxedRx, mut connector: Option<Connector>, ctx: LoopContext) {
    let timeout = ctx.config.receive_timeout();
    let ttl = ctx.config.node_ttl();
    let max_errors = ctx.config.max_consecutive_errors;

    while ctx.is_running.load(Ordering::Acquire) {
        match rx.receive(timeout) {
            Ok(Some(frame)) => {
                ctx.consecutive_errors.store(0, Ordering::Relaxed);
                handle_frame(&ctx, frame);
            },
            Ok(None) => {
                ctx.consecutive_errors.store(0, Ordering::Relaxed);
            },
            Err(CanError::TransportClosed) => {
                // 重连成功前保持不健康
                ctx.consecutive_errors.store(max_errors, Ordering::Relaxed);
                ctx.notify_error(&DriverError::Can(CanError::TransportClosed));
                let Some(connect) = connector.as_mut() else {
                    error!("CAN transport closed, receive loop exiting");
                    break;
                };
                warn!("CAN transport closed, reconnecting");
                rx = match reconnect(&ctx, connect, rx) {
                    Some(fresh) => fresh,
                    None => break,
                };
                continue;
            },
            Err(e) => {
                ctx.metrics.receive_errors.fetch_add(1, Ordering::Relaxed);
                let errors = ctx.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if errors == max_errors {
                    error!("{} consecutive receive errors, last: {}", errors, e);
                } else if errors < max_errors {
                    warn!("CAN receive error: {}", e);
                }
                ctx.notify_error(&DriverError::Can(e));

                if errors >= max_errors
                    && let Some(connect) = connector.as_mut()
                {
                    rx = match reconnect(&ctx, connect, rx) {
                        Some(fresh) => fresh,
                        None => break,
                    };
                    continue;
                }
                // 持续出错时避免空转
                std::thread::sleep(timeout.min(Duration::from_millis(10)));
            },
        }

        let report = ctx.registry.sweep(Instant::now(), ttl);
        for node in &report.went_stale {
            debug!("node {} is stale", node);
        }
        for node in &report.expired {
            info!("node {} expired and was removed", node);
        }
    }

    trace!("RX loop exited");
}

/// 丢弃旧链路，按退避间隔重试直到成功或服务停止
///
/// 成功时返回新的 RX 半部，TX 半部已换入发送路径。
fn reconnect(ctx: &LoopContext, connect: &mut Connector, stale: BoxedRx) -> Option<BoxedRx> {
    drop(stale);
    let mut delay = ctx.config.reconnect_delay();
    let mut attempt = 0u32;

    loop {
        if !sleep_while_running(ctx, delay) {
            return None;
        }
        attempt += 1;

        match connect() {
            Ok((rx, tx)) => {
                if !ctx.tx.replace(tx) {
                    return None;
                }
                ctx.consecutive_errors.store(0, Ordering::Relaxed);
                ctx.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
                info!("CAN transport reconnected after {} attempt(s)", attempt);
                return Some(rx);
            },
            Err(e) => {
                warn!("Reconnect attempt {} failed: {}", attempt, e);
                ctx.notify_error(&DriverError::Can(e));
                delay = delay.saturating_mul(2).min(ctx.config.reconnect_max_delay());
            },
        }
    }
}

/// 睡眠 `total`，期间服务停止则提前返回 `false`
fn sleep_while_running(ctx: &LoopContext, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    while ctx.is_running.load(Ordering::Acquire) {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return true;
        }
        std::thread::sleep(left.min(RECONNECT_POLL));
    }
    false
}

fn handle_frame(ctx: &LoopContext, frame: VescFrame) {
    let received = ctx.metrics.messages_received.fetch_add(1, Ordering::Relaxed) + 1;
    trace!("RX frame: ID=0x{:X}, len={}", frame.id, frame.len);

    let (node_id, command) = match decode(&frame) {
        Ok(decoded) => decoded,
        Err(e) => {
            let errors = ctx.metrics.decode_errors.fetch_add(1, Ordering::Relaxed) + 1;
            if errors <= DECODE_WARN_EVERY || errors % DECODE_WARN_EVERY == 0 {
                warn!(
                    "Dropped undecodable frame 0x{:X} ({} of {} frames): {}",
                    frame.id, errors, received, e
                );
            }
            ctx.notify_error(&DriverError::Protocol(e));
            return;
        },
    };

    let now = Instant::now();
    match command {
        Command::Ping => {
            ctx.metrics.pings_received.fetch_add(1, Ordering::Relaxed);
            let for_us = node_id == BROADCAST_NODE_ID || node_id == ctx.local_id;
            if for_us && ctx.config.respond_to_ping {
                match ctx.tx.encode_and_send(&Command::Pong, ctx.local_id) {
                    Ok(()) => {
                        ctx.metrics.pongs_sent.fetch_add(1, Ordering::Relaxed);
                    },
                    Err(e) => warn!("Failed to answer ping: {}", e),
                }
            }
        },
        Command::Pong => {
            record(ctx, node_id, None, now);
        },
        Command::Status(status) => {
            ctx.metrics.status_messages.fetch_add(1, Ordering::Relaxed);
            record(ctx, node_id, Some(&status), now);
        },
        other => {
            // 其他主机发给控制器的指令，与本机无关
            trace!("Ignoring {} addressed to node {}", other.name(), node_id);
        },
    }
}

fn record(ctx: &LoopContext, node_id: u8, status: Option<&StatusMessage>, now: Instant) {
    let outcome = ctx.registry.record_contact(node_id, status, now);
    match outcome {
        ContactOutcome::LocalId => {
            let count = ctx.metrics.id_collisions.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                "Node id collision: a peer is using local id {} ({} occurrences)",
                node_id, count
            );
            return;
        },
        ContactOutcome::Inserted => debug!("discovered node {}", node_id),
        ContactOutcome::Revived => debug!("node {} is active again", node_id),
        ContactOutcome::Refreshed => {},
    }

    // 注册表锁已释放
    let callbacks = ctx.hooks.read().snapshot();
    if callbacks.is_empty() {
        return;
    }
    if outcome == ContactOutcome::Inserted
        && let Some(node) = ctx.registry.node(node_id)
    {
        for callback in &callbacks {
            callback.on_discovery(node_id, node.kind);
        }
    }
    if status.is_some()
        && let Some(telemetry) = ctx.registry.telemetry(node_id)
    {
        for callback in &callbacks {
            callback.on_status(node_id, &telemetry);
        }
    }
}

/// 发现线程的唤醒事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Discover,
    Stop,
}

/// 发现 / 心跳线程主循环
///
/// 启动后立即发现一次；之后按各自周期执行，`Wake::Discover` 触发一次立即发现。
pub(crate) fn discovery_loop(wake_rx: Receiver<Wake>, ctx: LoopContext) {
    let discovery_interval = ctx.config.discovery_interval();
    let heartbeat_interval = ctx.config.heartbeat_interval();

    let mut next_discovery = Instant::now();
    let mut next_heartbeat = ctx.config.heartbeat_enabled.then(Instant::now);

    while ctx.is_running.load(Ordering::Acquire) {
        let now = Instant::now();

        if now >= next_discovery {
            send_discovery(&ctx);
            next_discovery = now + discovery_interval;
        }

        if let Some(at) = next_heartbeat
            && now >= at
        {
            send_heartbeat(&ctx);
            next_heartbeat = Some(now + heartbeat_interval);
        }

        let next_due = match next_heartbeat {
            Some(hb) => next_discovery.min(hb),
            None => next_discovery,
        };
        let wait = next_due.saturating_duration_since(Instant::now());

        match wake_rx.recv_timeout(wait) {
            Ok(Wake::Discover) => next_discovery = Instant::now(),
            Ok(Wake::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {},
        }
    }

    trace!("Discovery loop exited");
}

fn send_discovery(ctx: &LoopContext) {
    match ctx.tx.encode_and_send(&Command::Ping, BROADCAST_NODE_ID) {
        Ok(()) => {
            ctx.metrics.discoveries.fetch_add(1, Ordering::Relaxed);
            debug!("Discovery ping broadcast");
        },
        Err(e) => warn!("Discovery ping failed: {}", e),
    }
}

fn send_heartbeat(ctx: &LoopContext) {
    match ctx.tx.encode_and_send(&heartbeat_command(), ctx.local_id) {
        Ok(()) => {
            ctx.metrics.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
            trace!("Heartbeat sent from node {}", ctx.local_id);
        },
        Err(e) => warn!("Heartbeat failed: {}", e),
    }
}

/// 主机心跳：STATUS_5，tachometer 字段携带 Unix 秒数
pub(crate) fn heartbeat_command() -> Command {
    let unix_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Command::Status(StatusMessage::Status5(Status5 {
        tachometer: unix_secs as i32,
        v_in: HEARTBEAT_VOLTAGE,
        reserved: HOST_HEARTBEAT_MARKER,
    }))
}
