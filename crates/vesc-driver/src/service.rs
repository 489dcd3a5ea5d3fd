//! CAN 后台服务
//!
//! [`CanService`] 持有传输、节点注册表和本机 ID，运行两个后台线程：
//!
//! - `vesc-rx`：接收循环
//! - `vesc-discovery`：发现与心跳
//!
//! 所有查询接口只读注册表，不触碰总线，不会被总线 IO 阻塞。
//! 同一进程内每个通道名同时只能有一个运行中的服务。
//!
//! [`CanService::start`] 接管一个现成的传输，链路断开后无法重开；
//! [`CanService::start_with_connector`] 持有连接器，断线后按退避间隔自动重连。

use crate::DriverError;
use crate::config::ServiceConfig;
use crate::hooks::{HookManager, ServiceCallback};
use crate::identity::resolve_local_id;
use crate::metrics::{MetricsSnapshot, NetworkStats, ServiceMetrics};
use crate::pipeline::{
    BoxedRx, BoxedTx, Connector, LoopContext, TxPath, Wake, discovery_loop, rx_loop,
};
use crate::registry::{Node, NodeRegistry, NodeState, StatusRecord};
use crate::state::{AtomicServiceState, ServiceState};
use crate::telemetry::Telemetry;
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};
use vesc_can::{CanError, SplittableTransport, TransportStats};
use vesc_protocol::{BROADCAST_NODE_ID, Command};

/// 进程内已被占用的通道名
static CLAIMED_CHANNELS: Mutex<BTreeSet<String>> = parking_lot::const_mutex(BTreeSet::new());

/// 通道占用凭证，drop 时释放
#[derive(Debug)]
struct ChannelClaim(String);

impl ChannelClaim {
    fn acquire(channel: &str) -> Result<Self, DriverError> {
        let mut claimed = CLAIMED_CHANNELS.lock();
        if !claimed.insert(channel.to_string()) {
            return Err(DriverError::AlreadyRunning(channel.to_string()));
        }
        Ok(Self(channel.to_string()))
    }
}

impl Drop for ChannelClaim {
    fn drop(&mut self) {
        CLAIMED_CHANNELS.lock().remove(&self.0);
        trace!("channel '{}' released", self.0);
    }
}

/// 通道当前是否被某个运行中的服务占用
pub fn is_channel_claimed(channel: &str) -> bool {
    CLAIMED_CHANNELS.lock().contains(channel)
}

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();
        // 看门狗线程代为 join；超时后它继续等待，由系统在进程退出时回收
        std::thread::spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// CAN 后台服务
///
/// ```rust
/// use std::time::Duration;
/// use vesc_can::{SimulatedVesc, SimulatorConfig, VirtualCanBus};
/// use vesc_driver::{CanService, ServiceConfig};
///
/// let bus = VirtualCanBus::new();
/// let _sim = SimulatedVesc::spawn(&bus, 12, SimulatorConfig::default()).unwrap();
///
/// let config = ServiceConfig {
///     node_id: Some(100),
///     ..ServiceConfig::for_channel("doc-virtual")
/// };
/// let service = CanService::start(bus.endpoint(), config).unwrap();
/// std::thread::sleep(Duration::from_millis(100));
/// assert_eq!(service.active_controllers(), vec![12]);
/// service.stop();
/// ```
pub struct CanService {
    config: ServiceConfig,
    local_id: u8,
    state: AtomicServiceState,
    registry: Arc<NodeRegistry>,
    metrics: Arc<ServiceMetrics>,
    tx: Arc<TxPath>,
    is_running: Arc<AtomicBool>,
    rx_alive: Arc<AtomicBool>,
    consecutive_errors: Arc<AtomicU32>,
    wake_tx: Sender<Wake>,
    hooks: Arc<RwLock<HookManager>>,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
    discovery_thread: Mutex<Option<JoinHandle<()>>>,
    claim: Mutex<Option<ChannelClaim>>,
    started_at: Instant,
    stopped_at: Mutex<Option<Instant>>,
}

impl CanService {
    /// 在给定传输上启动服务：`Init -> Running`
    ///
    /// 传输只能打开一次，链路断开后服务保持 Running 但不再健康。
    ///
    /// # 错误
    /// - `DriverError::Config` / `InvalidArgument`: 配置非法
    /// - `DriverError::AlreadyRunning`: 同名通道已有服务在运行
    /// - `DriverError::Can`: 传输无法打开（`TransportUnavailable`）
    pub fn start<T>(transport: T, config: ServiceConfig) -> Result<Self, DriverError>
    where
        T: SplittableTransport + Send + 'static,
        T::Rx: Send + 'static,
        T::Tx: Send + 'static,
    {
        let mut transport = Some(transport);
        let connector: Connector = Box::new(move || {
            let transport = transport.take().ok_or_else(|| {
                CanError::TransportUnavailable("transport cannot be reopened".to_string())
            })?;
            split_boxed(transport)
        });
        Self::launch(connector, false, config)
    }

    /// 以连接器启动服务
    ///
    /// 每次调用 `connect` 产生一个新的（未连接的）传输。启动时调用一次；
    /// 之后链路断开或连续接收错误达到 `max_consecutive_errors` 时，接收线程
    /// 再次调用它重连（`reconnect_enabled = false` 时不重连）。
    ///
    /// ```rust
    /// use vesc_can::VirtualCanBus;
    /// use vesc_driver::{CanService, ServiceConfig};
    ///
    /// let bus = VirtualCanBus::new();
    /// let endpoints = bus.clone();
    /// let config = ServiceConfig {
    ///     node_id: Some(100),
    ///     ..ServiceConfig::for_channel("doc-connector")
    /// };
    /// let service = CanService::start_with_connector(move || Ok(endpoints.endpoint()), config)
    ///     .unwrap();
    /// assert!(service.is_healthy());
    /// service.stop();
    /// ```
    pub fn start_with_connector<F, T>(
        mut connect: F,
        config: ServiceConfig,
    ) -> Result<Self, DriverError>
    where
        F: FnMut() -> Result<T, CanError> + Send + 'static,
        T: SplittableTransport + Send + 'static,
        T::Rx: Send + 'static,
        T::Tx: Send + 'static,
    {
        let connector: Connector = Box::new(move || split_boxed(connect()?));
        Self::launch(connector, true, config)
    }

    fn launch(
        mut connector: Connector,
        reconnectable: bool,
        config: ServiceConfig,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        let claim = ChannelClaim::acquire(&config.channel)?;
        let local_id = resolve_local_id(config.node_id)?;

        let state = AtomicServiceState::new(ServiceState::Init);
        let (rx, tx) = connector()?;
        let connector = (reconnectable && config.reconnect_enabled).then_some(connector);

        let metrics = Arc::new(ServiceMetrics::new());
        let registry = Arc::new(NodeRegistry::new(
            local_id,
            config.node_expiry(),
            config.history_len,
        ));
        let tx = Arc::new(TxPath::new(tx, metrics.clone()));
        let hooks = Arc::new(RwLock::new(HookManager::new()));
        let is_running = Arc::new(AtomicBool::new(true));
        let rx_alive = Arc::new(AtomicBool::new(true));
        let consecutive_errors = Arc::new(AtomicU32::new(0));
        let (wake_tx, wake_rx) = crossbeam_channel::bounded::<Wake>(4);

        let ctx = LoopContext {
            config: config.clone(),
            local_id,
            registry: registry.clone(),
            metrics: metrics.clone(),
            tx: tx.clone(),
            is_running: is_running.clone(),
            consecutive_errors: consecutive_errors.clone(),
            hooks: hooks.clone(),
        };

        let rx_ctx = ctx.clone();
        let rx_alive_clone = rx_alive.clone();
        let rx_thread = std::thread::Builder::new()
            .name("vesc-rx".to_string())
            .spawn(move || {
                rx_loop(rx, connector, rx_ctx);
                rx_alive_clone.store(false, Ordering::Release);
            })?;

        let discovery_thread = match std::thread::Builder::new()
            .name("vesc-discovery".to_string())
            .spawn(move || discovery_loop(wake_rx, ctx))
        {
            Ok(handle) => handle,
            Err(e) => {
                is_running.store(false, Ordering::Release);
                tx.close();
                return Err(e.into());
            },
        };

        state.set(ServiceState::Running);
        info!(
            "CAN service started on '{}' as node {}",
            config.channel, local_id
        );

        Ok(Self {
            config,
            local_id,
            state,
            registry,
            metrics,
            tx,
            is_running,
            rx_alive,
            consecutive_errors,
            wake_tx,
            hooks,
            rx_thread: Mutex::new(Some(rx_thread)),
            discovery_thread: Mutex::new(Some(discovery_thread)),
            claim: Mutex::new(Some(claim)),
            started_at: Instant::now(),
            stopped_at: Mutex::new(None),
        })
    }

    /// 停止服务：`Running -> Stopping -> Stopped`
    ///
    /// 通知两个线程退出，各自最多等待 `shutdown_grace`，随后释放传输和通道占用。
    /// 可重复调用。
    pub fn stop(&self) {
        if !self.state.transition(ServiceState::Running, ServiceState::Stopping) {
            return;
        }
        info!("Stopping CAN service on '{}'", self.config.channel);

        self.is_running.store(false, Ordering::Release);
        let _ = self.wake_tx.try_send(Wake::Stop);

        let grace = self.config.shutdown_grace();
        if let Some(handle) = self.rx_thread.lock().take()
            && let Err(_e) = handle.join_timeout(grace)
        {
            error!("RX thread panicked or failed to shut down within {:?}", grace);
        }
        if let Some(handle) = self.discovery_thread.lock().take()
            && let Err(_e) = handle.join_timeout(grace)
        {
            error!(
                "Discovery thread panicked or failed to shut down within {:?}",
                grace
            );
        }

        self.tx.close();
        self.claim.lock().take();
        *self.stopped_at.lock() = Some(Instant::now());
        self.state.set(ServiceState::Stopped);
        info!("CAN service on '{}' stopped", self.config.channel);
    }

    /// 编码并发送一条指令
    ///
    /// 服务不在 Running 状态时直接返回 `NotRunning`，不做任何 IO。
    /// 定向 PING 会把目标登记为 Discovered，直到它应答。
    pub fn send_command(&self, command: &Command, target_node: u8) -> Result<(), DriverError> {
        if !self.state.get().is_running() {
            return Err(DriverError::NotRunning);
        }
        self.tx.encode_and_send(command, target_node)?;
        if *command == Command::Ping && target_node != BROADCAST_NODE_ID {
            self.registry.note_seen(target_node, Instant::now());
        }
        trace!("Sent {} to node {}", command.name(), target_node);
        Ok(())
    }

    /// 立即触发一次广播发现，不等待周期
    pub fn force_discovery(&self) -> Result<(), DriverError> {
        if !self.state.get().is_running() {
            return Err(DriverError::NotRunning);
        }
        match self.wake_tx.try_send(Wake::Discover) {
            // 队列已满说明已有待处理的唤醒
            Ok(()) | Err(TrySendError::Full(_)) => {
                debug!("Discovery requested");
                Ok(())
            },
            Err(TrySendError::Disconnected(_)) => Err(DriverError::NotRunning),
        }
    }

    /// 注册事件回调（状态更新、新节点、接收错误），在接收线程上触发
    pub fn add_callback(&self, callback: Arc<dyn ServiceCallback>) {
        self.hooks.write().add_callback(callback);
    }

    /// 移除先前注册的回调；返回是否找到
    pub fn remove_callback(&self, callback: &Arc<dyn ServiceCallback>) -> bool {
        self.hooks.write().remove_callback(callback)
    }

    pub fn clear_callbacks(&self) {
        self.hooks.write().clear();
    }

    pub fn callback_count(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn state(&self) -> ServiceState {
        self.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state.get().is_running()
    }

    /// Running、接收线程存活，且连续接收错误少于阈值（重连期间为 false）
    pub fn is_healthy(&self) -> bool {
        self.is_running()
            && self.rx_alive.load(Ordering::Acquire)
            && self.consecutive_errors.load(Ordering::Relaxed) < self.config.max_consecutive_errors
    }

    pub fn local_node_id(&self) -> u8 {
        self.local_id
    }

    pub fn channel(&self) -> &str {
        &self.config.channel
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn uptime(&self) -> Duration {
        let end = (*self.stopped_at.lock()).unwrap_or_else(Instant::now);
        end.saturating_duration_since(self.started_at)
    }

    /// 某节点的最新遥测快照
    pub fn get_cached_status(&self, node_id: u8) -> Option<Arc<Telemetry>> {
        self.registry.telemetry(node_id)
    }

    pub fn get_all_cached_status(&self) -> HashMap<u8, Arc<Telemetry>> {
        self.registry.all_telemetry()
    }

    /// 最近 `count` 条状态帧，旧的在前
    pub fn get_status_history(&self, node_id: u8, count: usize) -> Vec<StatusRecord> {
        self.registry.status_history(node_id, count)
    }

    /// 清空遥测缓存（节点列表保留）
    pub fn clear_cache(&self) {
        self.registry.clear_telemetry();
    }

    pub fn node_states(&self) -> BTreeMap<u8, NodeState> {
        self.registry.node_states()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.registry.nodes()
    }

    pub fn active_nodes(&self) -> HashMap<u8, Node> {
        self.registry.active_nodes()
    }

    /// Active 控制器 ID，升序
    pub fn active_controllers(&self) -> Vec<u8> {
        self.registry.controller_ids()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 端点级收发统计；停止后为 `None`
    pub fn transport_stats(&self) -> Option<TransportStats> {
        self.tx.stats()
    }

    pub fn get_network_stats(&self) -> NetworkStats {
        let metrics = self.metrics.snapshot();
        let registry = self.registry.stats();
        NetworkStats {
            uptime: self.uptime(),
            messages_sent: metrics.messages_sent,
            messages_received: metrics.messages_received,
            decode_errors: metrics.decode_errors,
            local_node_id: self.local_id,
            node_count: registry.node_count,
            active_count: registry.active_count,
            is_running: self.is_running(),
        }
    }
}

fn split_boxed<T>(transport: T) -> Result<(BoxedRx, BoxedTx), CanError>
where
    T: SplittableTransport,
    T::Rx: Send + 'static,
    T::Tx: Send + 'static,
{
    let (rx, tx) = transport.split()?;
    Ok((Box::new(rx), Box::new(tx)))
}

impl Drop for CanService {
    fn drop(&mut self) {
        self.stop();
        trace!("[Auto-Drop] CAN service on '{}' dropped", self.config.channel);
    }
}

impl std::fmt::Debug for CanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanService")
            .field("channel", &self.config.channel)
            .field("local_id", &self.local_id)
            .field("state", &self.state.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_channel_claim_is_exclusive() {
        let first = ChannelClaim::acquire("claim-test").unwrap();
        assert!(is_channel_claimed("claim-test"));
        assert!(matches!(
            ChannelClaim::acquire("claim-test"),
            Err(DriverError::AlreadyRunning(_))
        ));
        drop(first);
        assert!(!is_channel_claimed("claim-test"));
        assert!(ChannelClaim::acquire("claim-test").is_ok());
    }

    #[test]
    fn test_join_timeout_expires() {
        let handle = std::thread::spawn(|| std::thread::sleep(Duration::from_millis(300)));
        let started = Instant::now();
        assert!(handle.join_timeout(Duration::from_millis(20)).is_err());
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_join_timeout_ok() {
        let handle = std::thread::spawn(|| {});
        assert!(handle.join_timeout(Duration::from_secs(1)).is_ok());
    }
}
