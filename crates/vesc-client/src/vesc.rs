//! 单台控制器的读写接口
//!
//! [`Vesc`] 绑定一个服务句柄和一个目标节点 ID。
//! 读取全部来自服务的遥测缓存，不触碰总线；尚无数据时返回 0，而不是报错。
//! 写入委托给 `CanService::send_command`，错误原样返回。

use crate::ClientError;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use vesc_driver::{CanService, NodeState, Telemetry};
use vesc_protocol::{Command, FaultCode};

/// `wait_for_data` 的轮询周期
const DATA_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 一次性读取的全部缓存数据
#[derive(Debug, Clone, PartialEq)]
pub struct VescData {
    pub node_id: u8,
    pub duty: f64,
    pub rpm: i32,
    pub current: f64,
    pub current_in: f64,
    pub voltage: f64,
    pub temp_motor: f64,
    pub temp_fet: f64,
    pub amp_hours: f64,
    pub amp_hours_charged: f64,
    pub watt_hours: f64,
    pub watt_hours_charged: f64,
    pub tachometer: i32,
    pub position: f64,
    pub fault_code: FaultCode,
    pub has_fault: bool,
    /// 快照的采集时间，尚无数据时为 `None`
    pub captured_at: Option<Instant>,
}

impl VescData {
    fn from_telemetry(node_id: u8, t: Option<&Telemetry>) -> Self {
        let fault_code = t.map(Telemetry::fault).unwrap_or(FaultCode::None);
        VescData {
            node_id,
            duty: t.map_or(0.0, |t| t.duty),
            rpm: t.map_or(0, |t| t.rpm),
            current: t.map_or(0.0, |t| t.current),
            current_in: t.map_or(0.0, |t| t.current_in),
            voltage: t.map_or(0.0, |t| t.voltage),
            temp_motor: t.map_or(0.0, |t| t.temp_motor),
            temp_fet: t.map_or(0.0, |t| t.temp_fet),
            amp_hours: t.map_or(0.0, |t| t.amp_hours),
            amp_hours_charged: t.map_or(0.0, |t| t.amp_hours_charged),
            watt_hours: t.map_or(0.0, |t| t.watt_hours),
            watt_hours_charged: t.map_or(0.0, |t| t.watt_hours_charged),
            tachometer: t.map_or(0, |t| t.tachometer),
            position: t.map_or(0.0, |t| t.pid_pos),
            fault_code,
            has_fault: t.is_some_and(Telemetry::has_fault),
            captured_at: t.map(|t| t.captured_at),
        }
    }
}

/// 绑定到单个控制器的句柄
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use vesc_can::{SimulatedVesc, SimulatorConfig, VirtualCanBus};
/// use vesc_client::Vesc;
/// use vesc_driver::{CanService, ServiceConfig};
///
/// let bus = VirtualCanBus::new();
/// let sim = SimulatedVesc::spawn(&bus, 7, SimulatorConfig::default()).unwrap();
/// let config = ServiceConfig {
///     node_id: Some(100),
///     ..ServiceConfig::for_channel("doc-vesc")
/// };
/// let service = Arc::new(CanService::start(bus.endpoint(), config).unwrap());
///
/// let vesc = Vesc::new(service.clone(), 7);
/// // 尚无遥测时读数为 0
/// assert_eq!(vesc.get_rpm(), 0);
/// vesc.set_duty(0.2).unwrap();
/// std::thread::sleep(Duration::from_millis(50));
/// assert_eq!(sim.state().duty, 0.2);
/// ```
#[derive(Debug, Clone)]
pub struct Vesc {
    service: Arc<CanService>,
    node_id: u8,
}

impl Vesc {
    /// 绑定到指定节点
    pub fn new(service: Arc<CanService>, node_id: u8) -> Self {
        Self { service, node_id }
    }

    /// 绑定到 ID 最小的 Active 控制器
    ///
    /// # 错误
    /// 当前没有 Active 控制器时返回 `ClientError::NoTarget`
    pub fn first_active(service: Arc<CanService>) -> Result<Self, ClientError> {
        let node_id = service
            .active_controllers()
            .first()
            .copied()
            .ok_or(ClientError::NoTarget)?;
        debug!("auto-selected VESC {}", node_id);
        Ok(Self::new(service, node_id))
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    pub fn service(&self) -> &Arc<CanService> {
        &self.service
    }

    fn telemetry(&self) -> Option<Arc<Telemetry>> {
        self.service.get_cached_status(self.node_id)
    }

    fn read<T: Default>(&self, f: impl FnOnce(&Telemetry) -> T) -> T {
        self.telemetry().map(|t| f(&t)).unwrap_or_default()
    }

    // ==================== 读取（缓存） ====================

    pub fn get_duty(&self) -> f64 {
        self.read(|t| t.duty)
    }

    /// 电转速 (ERPM)
    pub fn get_rpm(&self) -> i32 {
        self.read(|t| t.rpm)
    }

    /// 电机电流 (A)
    pub fn get_current(&self) -> f64 {
        self.read(|t| t.current)
    }

    /// 输入电流 (A)
    pub fn get_current_in(&self) -> f64 {
        self.read(|t| t.current_in)
    }

    /// 输入电压 (V)
    pub fn get_voltage(&self) -> f64 {
        self.read(|t| t.voltage)
    }

    pub fn get_temp_motor(&self) -> f64 {
        self.read(|t| t.temp_motor)
    }

    pub fn get_temp_fet(&self) -> f64 {
        self.read(|t| t.temp_fet)
    }

    pub fn get_amp_hours(&self) -> f64 {
        self.read(|t| t.amp_hours)
    }

    pub fn get_amp_hours_charged(&self) -> f64 {
        self.read(|t| t.amp_hours_charged)
    }

    pub fn get_watt_hours(&self) -> f64 {
        self.read(|t| t.watt_hours)
    }

    pub fn get_watt_hours_charged(&self) -> f64 {
        self.read(|t| t.watt_hours_charged)
    }

    pub fn get_tachometer(&self) -> i32 {
        self.read(|t| t.tachometer)
    }

    /// PID 位置 (度)
    pub fn get_position(&self) -> f64 {
        self.read(|t| t.pid_pos)
    }

    pub fn get_fault_code(&self) -> FaultCode {
        self.telemetry().map(|t| t.fault()).unwrap_or(FaultCode::None)
    }

    pub fn get_fault_description(&self) -> String {
        self.telemetry()
            .map(|t| t.fault_description())
            .unwrap_or_else(|| FaultCode::None.description().to_string())
    }

    /// 原始故障码非零即为故障，包括未知故障码
    pub fn has_fault(&self) -> bool {
        self.read(|t| t.has_fault())
    }

    pub fn get_all_data(&self) -> VescData {
        VescData::from_telemetry(self.node_id, self.telemetry().as_deref())
    }

    /// 服务在运行，且目标节点当前为 Active
    pub fn is_connected(&self) -> bool {
        self.service.is_running()
            && self.service.node_states().get(&self.node_id) == Some(&NodeState::Active)
    }

    /// 等待目标节点的第一份遥测；超时返回 false
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.telemetry().is_some() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(DATA_POLL_INTERVAL);
        }
    }

    // ==================== 控制 ====================

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.service.send_command(&command, self.node_id)?;
        Ok(())
    }

    /// 占空比 (-1.0 ~ 1.0)，超出范围返回 InvalidArgument，不发送
    pub fn set_duty(&self, duty: f64) -> Result<(), ClientError> {
        self.send(Command::SetDuty(duty))
    }

    /// 电机电流 (A)
    pub fn set_current(&self, amps: f64) -> Result<(), ClientError> {
        self.send(Command::SetCurrent(amps))
    }

    /// 刹车电流 (A)，负值返回 InvalidArgument
    pub fn set_brake_current(&self, amps: f64) -> Result<(), ClientError> {
        self.send(Command::SetBrakeCurrent(amps))
    }

    /// 电转速 (ERPM)
    pub fn set_rpm(&self, rpm: i32) -> Result<(), ClientError> {
        self.send(Command::SetRpm(rpm))
    }

    /// 位置 (度)
    pub fn set_position(&self, degrees: f64) -> Result<(), ClientError> {
        self.send(Command::SetPosition(degrees))
    }

    /// 手刹电流 (A)
    pub fn set_handbrake(&self, amps: f64) -> Result<(), ClientError> {
        self.send(Command::SetHandbrake(amps))
    }

    /// 停转：占空比置 0
    pub fn stop_motor(&self) -> Result<(), ClientError> {
        self.set_duty(0.0)
    }

    /// 滑行：电流置 0，不主动制动
    pub fn coast_motor(&self) -> Result<(), ClientError> {
        self.set_current(0.0)
    }

    // ==================== 输出 ====================

    /// 人类可读的状态摘要
    pub fn status_report(&self) -> String {
        let data = self.get_all_data();
        let mut out = String::new();
        let _ = writeln!(out, "VESC Status:");
        let _ = writeln!(out, "  ID: {}", data.node_id);
        let _ = writeln!(out, "  Duty: {:.3}", data.duty);
        let _ = writeln!(out, "  RPM: {}", data.rpm);
        let _ = writeln!(out, "  Current: {:.2} A", data.current);
        let _ = writeln!(out, "  Voltage: {:.2} V", data.voltage);
        let _ = writeln!(out, "  Temp Motor: {:.1} °C", data.temp_motor);
        let _ = writeln!(out, "  Temp FET: {:.1} °C", data.temp_fet);
        let _ = write!(
            out,
            "  Fault: {} ({})",
            self.get_fault_description(),
            self.read(|t| t.fault_code)
        );
        out
    }

    pub fn print_status(&self) {
        println!("{}", self.status_report());
    }
}
