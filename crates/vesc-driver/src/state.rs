//! 服务生命周期状态
//!
//! `Init -> Running -> Stopping -> Stopped`，只前进不后退。

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// 服务生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ServiceState {
    #[default]
    Init = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl ServiceState {
    /// 从 u8 转换，无效值视为 Stopped
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Init,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// 生命周期状态（原子版本，用于线程间共享）
#[derive(Debug)]
pub struct AtomicServiceState {
    inner: AtomicU8,
}

impl AtomicServiceState {
    pub fn new(state: ServiceState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> ServiceState {
        ServiceState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ServiceState) {
        self.inner.store(state.as_u8(), Ordering::Release);
    }

    /// 仅当当前值为 `current` 时切换到 `new`
    pub fn transition(&self, current: ServiceState, new: ServiceState) -> bool {
        self.inner
            .compare_exchange(current.as_u8(), new.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
