//! 回调钩子
//!
//! 接收线程在注册表更新之后、注册表锁之外触发回调：
//!
//! - `on_status`：节点的遥测快照被新的状态帧替换
//! - `on_discovery`：新节点首次进入注册表
//! - `on_error`：解码失败、接收错误、重连失败
//!
//! 回调运行在接收线程上，应尽快返回，耗时处理请转发到 channel。
//!
//! ```rust
//! use crossbeam_channel::{Sender, bounded};
//! use std::sync::Arc;
//! use vesc_driver::{HookManager, NodeKind, ServiceCallback};
//!
//! struct DiscoveryLog {
//!     tx: Sender<u8>,
//! }
//!
//! impl ServiceCallback for DiscoveryLog {
//!     fn on_discovery(&self, node_id: u8, _kind: NodeKind) {
//!         let _ = self.tx.try_send(node_id);
//!     }
//! }
//!
//! let (tx, rx) = bounded(16);
//! let mut hooks = HookManager::new();
//! hooks.add_callback(Arc::new(DiscoveryLog { tx }));
//! hooks.trigger_discovery(12, NodeKind::Controller);
//! assert_eq!(rx.try_recv().unwrap(), 12);
//! ```

use crate::DriverError;
use crate::registry::NodeKind;
use crate::telemetry::Telemetry;
use std::sync::Arc;

/// 服务事件回调
///
/// 所有方法默认空实现，按需覆盖。
pub trait ServiceCallback: Send + Sync {
    /// 节点遥测更新
    fn on_status(&self, node_id: u8, telemetry: &Arc<Telemetry>) {
        let _ = (node_id, telemetry);
    }

    /// 新节点进入注册表
    fn on_discovery(&self, node_id: u8, kind: NodeKind) {
        let _ = (node_id, kind);
    }

    /// 接收路径上的错误（不会中断服务）
    fn on_error(&self, error: &DriverError) {
        let _ = error;
    }
}

/// 回调列表
///
/// 本身不加锁，服务内部以 `RwLock<HookManager>` 持有。
#[derive(Default)]
pub struct HookManager {
    callbacks: Vec<Arc<dyn ServiceCallback>>,
}

impl HookManager {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    pub fn add_callback(&mut self, callback: Arc<dyn ServiceCallback>) {
        self.callbacks.push(callback);
    }

    /// 按指针移除；返回是否找到
    pub fn remove_callback(&mut self, callback: &Arc<dyn ServiceCallback>) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|c| !Arc::ptr_eq(c, callback));
        before != self.callbacks.len()
    }

    pub fn clear(&mut self) {
        self.callbacks.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// 回调列表的副本，供锁外触发
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn ServiceCallback>> {
        self.callbacks.clone()
    }

    pub fn trigger_status(&self, node_id: u8, telemetry: &Arc<Telemetry>) {
        for callback in &self.callbacks {
            callback.on_status(node_id, telemetry);
        }
    }

    pub fn trigger_discovery(&self, node_id: u8, kind: NodeKind) {
        for callback in &self.callbacks {
            callback.on_discovery(node_id, kind);
        }
    }

    pub fn trigger_error(&self, error: &DriverError) {
        for callback in &self.callbacks {
            callback.on_error(error);
        }
    }
}

impl std::fmt::Debug for HookManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookManager")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}
