//! 模拟控制器节点
//!
//! 挂在 [`VirtualCanBus`] 上的后台线程，行为近似一台真实控制器：
//! 应答 PING，执行设定类指令和 SHUTDOWN，并可周期性广播 STATUS / STATUS_4 / STATUS_5。

use crate::{CanError, CanTransport, VirtualCanBus, VirtualCanTransport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use vesc_protocol::{
    BROADCAST_NODE_ID, Command, Status1, Status4, Status5, StatusMessage, decode, encode,
};

/// 占空比 1.0 对应的电气转速
const ERPM_PER_DUTY: f64 = 50_000.0;

/// 模拟器参数
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// 状态帧广播周期，`None` 表示不主动广播
    pub status_interval: Option<Duration>,
    /// 是否应答 PING
    pub answer_ping: bool,
    /// 输入电压 (V)
    pub input_voltage: f64,
    pub temp_fet: f64,
    pub temp_motor: f64,
    /// 接收轮询周期
    pub poll_interval: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            status_interval: None,
            answer_ping: true,
            input_voltage: 24.0,
            temp_fet: 30.0,
            temp_motor: 28.0,
            poll_interval: Duration::from_millis(5),
        }
    }
}

/// 模拟器内部状态快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatedState {
    pub duty: f64,
    pub current: f64,
    pub brake_current: f64,
    pub rpm: i32,
    pub tachometer: i32,
    pub pings_answered: u64,
    /// 按接收顺序记录的指令
    pub commands: Vec<Command>,
    /// 收到 SHUTDOWN 后不再应答和广播
    pub shut_down: bool,
}

impl SimulatedState {
    fn apply(&mut self, command: Command) {
        match command {
            Command::SetDuty(duty) => {
                self.duty = duty;
                self.current = 0.0;
                self.rpm = (duty * ERPM_PER_DUTY) as i32;
            },
            Command::SetCurrent(amps) => {
                self.current = amps;
                self.brake_current = 0.0;
                if amps == 0.0 {
                    self.duty = 0.0;
                }
            },
            Command::SetBrakeCurrent(amps) => {
                self.brake_current = amps;
                self.current = 0.0;
                self.duty = 0.0;
                self.rpm = 0;
            },
            Command::SetRpm(rpm) => {
                self.rpm = rpm;
                self.duty = (rpm as f64 / ERPM_PER_DUTY).clamp(-1.0, 1.0);
            },
            Command::Shutdown => {
                self.duty = 0.0;
                self.current = 0.0;
                self.rpm = 0;
                self.shut_down = true;
            },
            _ => {},
        }
        self.commands.push(command);
    }
}

/// 模拟控制器句柄；drop 时停止线程
pub struct SimulatedVesc {
    node_id: u8,
    endpoint_id: u64,
    state: Arc<Mutex<SimulatedState>>,
    is_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SimulatedVesc {
    /// 在总线上启动一台模拟控制器
    pub fn spawn(
        bus: &VirtualCanBus,
        node_id: u8,
        config: SimulatorConfig,
    ) -> Result<Self, CanError> {
        let mut transport = bus.endpoint();
        transport.connect()?;
        let endpoint_id = transport.endpoint_id();

        let state = Arc::new(Mutex::new(SimulatedState::default()));
        let is_running = Arc::new(AtomicBool::new(true));

        let state_clone = state.clone();
        let is_running_clone = is_running.clone();
        let thread = std::thread::Builder::new()
            .name(format!("vesc-sim-{}", node_id))
            .spawn(move || {
                sim_loop(transport, node_id, config, state_clone, is_running_clone);
            })?;

        debug!("simulated controller {} attached to virtual bus", node_id);
        Ok(Self {
            node_id,
            endpoint_id,
            state,
            is_running,
            thread: Some(thread),
        })
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// 总线端点 ID（用于模拟拔线）
    pub fn endpoint_id(&self) -> u64 {
        self.endpoint_id
    }

    pub fn state(&self) -> SimulatedState {
        self.state.lock().clone()
    }

    /// 最近一条指令
    pub fn last_command(&self) -> Option<Command> {
        self.state.lock().commands.last().copied()
    }

    /// 停止模拟线程；可重复调用
    pub fn stop(&mut self) {
        self.is_running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            warn!("simulated controller {} thread panicked", self.node_id);
        }
    }
}

impl Drop for SimulatedVesc {
    fn drop(&mut self) {
        self.stop();
        trace!("[Auto-Drop] simulated controller {} stopped", self.node_id);
    }
}

fn sim_loop(
    mut transport: VirtualCanTransport,
    node_id: u8,
    config: SimulatorConfig,
    state: Arc<Mutex<SimulatedState>>,
    is_running: Arc<AtomicBool>,
) {
    let mut next_status = config.status_interval.map(|interval| Instant::now() + interval);

    while is_running.load(Ordering::Acquire) {
        match transport.receive(config.poll_interval) {
            Ok(Some(frame)) => {
                let Ok((target, command)) = decode(&frame) else {
                    continue;
                };
                if target != node_id && target != BROADCAST_NODE_ID {
                    continue;
                }
                if state.lock().shut_down {
                    continue;
                }
                match command {
                    Command::Ping if config.answer_ping => {
                        if let Err(e) = send(&mut transport, &Command::Pong, node_id) {
                            warn!("simulated controller {} failed to answer ping: {}", node_id, e);
                        } else {
                            state.lock().pings_answered += 1;
                        }
                    },
                    // 广播只用于发现，设定类指令必须点对点
                    _ if target == BROADCAST_NODE_ID => {},
                    Command::Ping | Command::Pong | Command::Status(_) => {},
                    other => state.lock().apply(other),
                }
            },
            Ok(None) => {},
            Err(CanError::TransportClosed) => break,
            Err(e) => warn!("simulated controller {} receive error: {}", node_id, e),
        }

        if let (Some(deadline), Some(interval)) = (next_status, config.status_interval)
            && Instant::now() >= deadline
        {
            next_status = Some(deadline + interval);
            broadcast_status(&mut transport, node_id, &config, &state);
        }
    }
    transport.disconnect();
}

fn send(transport: &mut VirtualCanTransport, command: &Command, node_id: u8) -> Result<(), CanError> {
    let frame = encode(command, node_id)?;
    transport.send(frame)
}

fn broadcast_status(
    transport: &mut VirtualCanTransport,
    node_id: u8,
    config: &SimulatorConfig,
    state: &Mutex<SimulatedState>,
) {
    let (status1, status4, status5) = {
        let mut s = state.lock();
        if s.shut_down {
            return;
        }
        s.tachometer = s.tachometer.wrapping_add(s.rpm / 100);
        (
            Status1 {
                rpm: s.rpm,
                current: s.current,
                duty: s.duty,
            },
            Status4 {
                temp_fet: config.temp_fet,
                temp_motor: config.temp_motor,
                current_in: s.current * s.duty.abs(),
                pid_pos: 0.0,
            },
            Status5 {
                tachometer: s.tachometer,
                v_in: config.input_voltage,
                reserved: 0,
            },
        )
    };

    for message in [
        StatusMessage::Status1(status1),
        StatusMessage::Status4(status4),
        StatusMessage::Status5(status5),
    ] {
        if let Err(e) = send(transport, &Command::Status(message), node_id) {
            warn!("simulated controller {} failed to send status: {}", node_id, e);
        }
    }
}
