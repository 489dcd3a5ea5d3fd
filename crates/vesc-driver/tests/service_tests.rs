//! CAN 服务集成测试
//!
//! 服务与模拟控制器挂在同一条虚拟总线上，验证发现、遥测缓存、
//! 坏帧隔离、停止时限、通道独占、ID 冲突检测、断线重连和事件回调。

use crossbeam_channel::{Sender, bounded};
use parking_lot::Mutex;
use serial_test::serial;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use vesc_can::{CanError, CanTransport, SimulatedVesc, SimulatorConfig, VirtualCanBus};
use vesc_driver::{
    CanService, DriverError, NodeKind, NodeState, ServiceCallback, ServiceConfig, ServiceState,
    Telemetry, VescServiceBuilder,
};
use vesc_protocol::{Command, HOST_HEARTBEAT_MARKER, Status5, StatusMessage, VescFrame, encode};

const LOCAL_ID: u8 = 100;

fn test_config(channel: &str) -> ServiceConfig {
    ServiceConfig {
        node_id: Some(LOCAL_ID),
        receive_timeout_ms: 20,
        heartbeat_enabled: false,
        ..ServiceConfig::for_channel(channel)
    }
}

fn streaming() -> SimulatorConfig {
    SimulatorConfig {
        status_interval: Some(Duration::from_millis(20)),
        ..Default::default()
    }
}

/// 轮询直到条件成立或超时
fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn peer(bus: &VirtualCanBus) -> vesc_can::VirtualCanTransport {
    let mut ep = bus.endpoint();
    ep.connect().unwrap();
    ep
}

#[test]
fn test_discovers_every_controller() {
    let bus = VirtualCanBus::new();
    let _sims: Vec<_> = [10u8, 11, 12]
        .into_iter()
        .map(|id| SimulatedVesc::spawn(&bus, id, streaming()).unwrap())
        .collect();

    let service = CanService::start(bus.endpoint(), test_config("it-discover")).unwrap();
    assert_eq!(service.state(), ServiceState::Running);
    assert_eq!(service.local_node_id(), LOCAL_ID);

    service.force_discovery().unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        service.active_controllers() == vec![10, 11, 12]
    }));

    let states = service.node_states();
    assert_eq!(states.len(), 3);
    assert!(states.values().all(|s| *s == NodeState::Active));
    assert!(!states.contains_key(&LOCAL_ID));
    assert!(service.metrics().discoveries >= 1);
}

#[test]
fn test_caches_streamed_telemetry() {
    let bus = VirtualCanBus::new();
    let mut sim = SimulatedVesc::spawn(&bus, 21, streaming()).unwrap();
    let service = CanService::start(bus.endpoint(), test_config("it-telemetry")).unwrap();

    service.send_command(&Command::SetDuty(0.25), 21).unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        service
            .get_cached_status(21)
            .is_some_and(|t| t.rpm == 12_500 && t.voltage == 24.0)
    }));

    let telemetry = service.get_cached_status(21).unwrap();
    assert_eq!(telemetry.duty, 0.25);
    assert_eq!(telemetry.temp_fet, 30.0);
    assert_eq!(sim.last_command(), Some(Command::SetDuty(0.25)));

    let history = service.get_status_history(21, 3);
    assert!(!history.is_empty() && history.len() <= 3);
    assert!(history.windows(2).all(|w| w[0].received_at <= w[1].received_at));

    // 停止广播后再清缓存，避免新状态帧立即回填
    sim.stop();
    std::thread::sleep(Duration::from_millis(50));
    service.clear_cache();
    assert!(service.get_cached_status(21).is_none());
    assert!(service.node_states().contains_key(&21));
}

#[test]
fn test_malformed_frame_is_counted_and_dropped() {
    let bus = VirtualCanBus::new();
    let _sim = SimulatedVesc::spawn(&bus, 30, streaming()).unwrap();
    let service = CanService::start(bus.endpoint(), test_config("it-malformed")).unwrap();
    service.force_discovery().unwrap();
    assert!(wait_until(Duration::from_secs(1), || service.active_controllers() == vec![30]));

    let before = service.metrics();
    let mut rogue = peer(&bus);
    // STATUS 帧只有 3 字节
    rogue.send(VescFrame::new_extended((9 << 8) | 31, &[1, 2, 3])).unwrap();

    assert!(wait_until(Duration::from_millis(500), || {
        service.metrics().decode_errors == before.decode_errors + 1
    }));
    // 坏帧来源不会被登记，其他节点不受影响
    assert!(!service.node_states().contains_key(&31));
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(service.active_controllers(), vec![30]);
    assert!(service.is_healthy());
}

#[test]
fn test_stop_is_bounded_by_receive_timeout() {
    let bus = VirtualCanBus::new();
    let config = ServiceConfig {
        receive_timeout_ms: 1_000,
        ..test_config("it-stop")
    };
    let service = CanService::start(bus.endpoint(), config).unwrap();
    std::thread::sleep(Duration::from_millis(300));

    let started = Instant::now();
    service.stop();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(service.state(), ServiceState::Stopped);

    assert!(matches!(
        service.send_command(&Command::Ping, 12),
        Err(DriverError::NotRunning)
    ));
    assert!(matches!(service.force_discovery(), Err(DriverError::NotRunning)));
    assert!(service.transport_stats().is_none());

    // 重复调用无副作用
    service.stop();
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[test]
#[serial]
fn test_channel_is_exclusive_until_stopped() {
    let bus = VirtualCanBus::new();
    let first = CanService::start(bus.endpoint(), test_config("it-exclusive")).unwrap();
    assert!(vesc_driver::is_channel_claimed("it-exclusive"));

    let second = CanService::start(bus.endpoint(), test_config("it-exclusive"));
    assert!(matches!(second, Err(DriverError::AlreadyRunning(ref c)) if c == "it-exclusive"));

    first.stop();
    assert!(!vesc_driver::is_channel_claimed("it-exclusive"));
    let again = CanService::start(bus.endpoint(), test_config("it-exclusive")).unwrap();
    assert!(again.is_running());
}

#[test]
fn test_invalid_config_is_rejected() {
    let bus = VirtualCanBus::new();
    let config = ServiceConfig {
        node_id: Some(255),
        ..ServiceConfig::for_channel("it-invalid")
    };
    assert!(matches!(
        CanService::start(bus.endpoint(), config),
        Err(DriverError::InvalidArgument(_))
    ));
    assert!(!vesc_driver::is_channel_claimed("it-invalid"));
}

#[test]
fn test_answers_pings_from_local_id() {
    let bus = VirtualCanBus::new();
    let config = ServiceConfig {
        respond_to_ping: true,
        ..test_config("it-ping")
    };
    let service = CanService::start(bus.endpoint(), config).unwrap();
    let mut other_host = peer(&bus);
    // 丢弃服务启动时的发现广播
    while other_host.receive(Duration::from_millis(50)).unwrap().is_some() {}

    other_host.send(encode(&Command::Ping, LOCAL_ID).unwrap()).unwrap();
    let pong = other_host.receive_frame(Duration::from_millis(500)).unwrap();
    assert_eq!(vesc_protocol::decode(&pong).unwrap(), (LOCAL_ID, Command::Pong));

    // 发给别的节点的 PING 不应答
    other_host.send(encode(&Command::Ping, 42).unwrap()).unwrap();
    assert!(other_host.receive(Duration::from_millis(100)).unwrap().is_none());

    let metrics = service.metrics();
    assert_eq!(metrics.pings_received, 2);
    assert_eq!(metrics.pongs_sent, 1);
}

#[test]
fn test_detects_local_id_collision() {
    let bus = VirtualCanBus::new();
    let service = CanService::start(bus.endpoint(), test_config("it-collision")).unwrap();
    let mut impostor = peer(&bus);

    impostor.send(encode(&Command::Pong, LOCAL_ID).unwrap()).unwrap();
    assert!(wait_until(Duration::from_millis(500), || service.metrics().id_collisions == 1));
    assert!(service.nodes().iter().all(|n| n.node_id != LOCAL_ID));
}

#[test]
fn test_heartbeat_and_foreign_hosts() {
    let bus = VirtualCanBus::new();
    let config = ServiceConfig {
        heartbeat_enabled: true,
        heartbeat_interval_ms: 50,
        ..test_config("it-heartbeat")
    };
    let service = CanService::start(bus.endpoint(), config).unwrap();
    let mut other_host = peer(&bus);

    let deadline = Instant::now() + Duration::from_secs(1);
    let heartbeat = loop {
        assert!(Instant::now() < deadline, "no heartbeat observed");
        let Some(frame) = other_host.receive(Duration::from_millis(100)).unwrap() else {
            continue;
        };
        if let Ok((LOCAL_ID, Command::Status(StatusMessage::Status5(s)))) =
            vesc_protocol::decode(&frame)
        {
            break s;
        }
    };
    assert!(heartbeat.is_host_heartbeat());
    assert!((heartbeat.v_in - 3.3).abs() < 0.05);

    // 另一台主机的心跳登记为 Host，不计入控制器
    let foreign = Command::Status(StatusMessage::Status5(Status5 {
        tachometer: 1,
        v_in: 3.3,
        reserved: HOST_HEARTBEAT_MARKER,
    }));
    other_host.send(encode(&foreign, 101).unwrap()).unwrap();
    assert!(wait_until(Duration::from_millis(500), || {
        service.nodes().iter().any(|n| n.node_id == 101 && n.kind == NodeKind::Host)
    }));
    assert!(service.active_controllers().is_empty());
    assert!(service.metrics().heartbeats_sent >= 1);
}

#[test]
fn test_targeted_ping_marks_node_discovered() {
    let bus = VirtualCanBus::new();
    let service = CanService::start(bus.endpoint(), test_config("it-targeted")).unwrap();

    service.send_command(&Command::Ping, 77).unwrap();
    assert_eq!(service.node_states().get(&77), Some(&NodeState::Discovered));
    assert!(service.active_controllers().is_empty());
}

#[test]
fn test_silent_node_goes_stale() {
    let bus = VirtualCanBus::new();
    let mut sim = SimulatedVesc::spawn(&bus, 40, streaming()).unwrap();
    let config = ServiceConfig {
        node_ttl_ms: 150,
        ..test_config("it-stale")
    };
    let service = CanService::start(bus.endpoint(), config).unwrap();
    assert!(wait_until(Duration::from_secs(1), || service.active_controllers() == vec![40]));

    sim.stop();
    assert!(wait_until(Duration::from_secs(1), || {
        service.node_states().get(&40) == Some(&NodeState::Stale)
    }));
    assert!(service.active_controllers().is_empty());
}

#[test]
fn test_unplugged_transport_makes_service_unhealthy() {
    let bus = VirtualCanBus::new();
    let endpoint = bus.endpoint();
    let endpoint_id = endpoint.endpoint_id();
    let service = CanService::start(endpoint, test_config("it-unplug")).unwrap();
    assert!(service.is_healthy());

    assert!(bus.unplug(endpoint_id));
    assert!(wait_until(Duration::from_millis(500), || !service.is_healthy()));
    // 服务仍处于 Running，直到显式 stop
    assert!(service.is_running());
    service.stop();
}

#[test]
fn test_network_stats() {
    let bus = VirtualCanBus::new();
    let _sim = SimulatedVesc::spawn(&bus, 50, streaming()).unwrap();
    let service = CanService::start(bus.endpoint(), test_config("it-stats")).unwrap();
    assert!(wait_until(Duration::from_secs(1), || service.active_controllers() == vec![50]));

    let stats = service.get_network_stats();
    assert!(stats.is_running);
    assert_eq!(stats.local_node_id, LOCAL_ID);
    assert_eq!(stats.node_count, 1);
    assert_eq!(stats.active_count, 1);
    assert!(stats.messages_sent >= 1);
    assert!(stats.messages_received >= 1);

    service.stop();
    let frozen = service.uptime();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(service.uptime(), frozen);
    assert!(!service.get_network_stats().is_running);
}

#[test]
fn test_other_hosts_are_not_listed_as_controllers() {
    let bus = VirtualCanBus::new();
    let _sim = SimulatedVesc::spawn(&bus, 3, streaming()).unwrap();

    // 默认配置的主机：启动时的心跳发生在 B 上线之前
    let host_a = VescServiceBuilder::from_config(ServiceConfig {
        node_id: Some(70),
        ..ServiceConfig::for_channel("it-host-a")
    })
    .start_with(bus.endpoint())
    .unwrap();
    std::thread::sleep(Duration::from_millis(300));

    let host_b = CanService::start(
        bus.endpoint(),
        ServiceConfig {
            node_id: Some(71),
            ..ServiceConfig::for_channel("it-host-b")
        },
    )
    .unwrap();
    assert!(wait_until(Duration::from_secs(1), || host_b.active_controllers() == vec![3]));
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(host_b.active_controllers(), vec![3]);
    assert!(host_b.nodes().iter().all(|n| n.node_id != 70));

    let a_metrics = host_a.metrics();
    assert!(a_metrics.pings_received >= 1);
    assert_eq!(a_metrics.pongs_sent, 0);

    // 显式开启应答的主机只回 PONG，也不会被当成控制器
    let host_c = CanService::start(
        bus.endpoint(),
        ServiceConfig {
            node_id: Some(72),
            respond_to_ping: true,
            heartbeat_enabled: false,
            ..ServiceConfig::for_channel("it-host-c")
        },
    )
    .unwrap();
    host_b.force_discovery().unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        host_b.nodes().iter().any(|n| n.node_id == 72 && n.kind == NodeKind::Host)
    }));
    assert!(host_c.metrics().pongs_sent >= 1);
    assert_eq!(host_b.active_controllers(), vec![3]);
}

#[test]
fn test_reconnects_after_unplug() {
    let bus = VirtualCanBus::new();
    let _sim = SimulatedVesc::spawn(&bus, 60, streaming()).unwrap();

    let plugged = Arc::new(AtomicBool::new(true));
    let endpoint_ids = Arc::new(Mutex::new(Vec::new()));
    let connector = {
        let bus = bus.clone();
        let plugged = plugged.clone();
        let endpoint_ids = endpoint_ids.clone();
        move || {
            if !plugged.load(Ordering::Acquire) {
                return Err(CanError::TransportUnavailable("cable unplugged".to_string()));
            }
            let endpoint = bus.endpoint();
            endpoint_ids.lock().push(endpoint.endpoint_id());
            Ok(endpoint)
        }
    };
    let config = ServiceConfig {
        reconnect_delay_ms: 20,
        reconnect_max_delay_ms: 80,
        ..test_config("it-reconnect")
    };
    let service = CanService::start_with_connector(connector, config).unwrap();
    assert!(wait_until(Duration::from_secs(1), || service.active_controllers() == vec![60]));

    let (events, errors) = bounded(256);
    service.add_callback(Arc::new(Recorder { events }));

    plugged.store(false, Ordering::Release);
    let first = endpoint_ids.lock()[0];
    assert!(bus.unplug(first));
    assert!(wait_until(Duration::from_millis(500), || !service.is_healthy()));

    // 断线本身加上至少一次失败的重连
    let mut error_events = 0;
    let deadline = Instant::now() + Duration::from_secs(1);
    while error_events < 2 && Instant::now() < deadline {
        if let Ok(Event::Error) = errors.recv_timeout(Duration::from_millis(50)) {
            error_events += 1;
        }
    }
    assert!(error_events >= 2);
    assert_eq!(service.metrics().reconnects, 0);
    assert!(service.is_running());

    plugged.store(true, Ordering::Release);
    assert!(wait_until(Duration::from_secs(1), || {
        service.metrics().reconnects == 1 && service.is_healthy()
    }));
    assert_eq!(endpoint_ids.lock().len(), 2);

    // 新链路收发都可用
    service.send_command(&Command::SetDuty(0.3), 60).unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        service.get_cached_status(60).is_some_and(|t| (t.duty - 0.3).abs() < 1e-9)
    }));
    service.stop();
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[test]
fn test_single_transport_is_not_reopened() {
    let bus = VirtualCanBus::new();
    let endpoint = bus.endpoint();
    let endpoint_id = endpoint.endpoint_id();
    let config = ServiceConfig {
        reconnect_delay_ms: 10,
        reconnect_max_delay_ms: 10,
        ..test_config("it-no-reopen")
    };
    let service = CanService::start(endpoint, config).unwrap();

    assert!(bus.unplug(endpoint_id));
    assert!(wait_until(Duration::from_millis(500), || !service.is_healthy()));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(service.metrics().reconnects, 0);
    assert_eq!(bus.endpoint_count(), 0);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Event {
    Status(u8, f64),
    Discovery(u8, NodeKind),
    Error,
}

struct Recorder {
    events: Sender<Event>,
}

impl ServiceCallback for Recorder {
    fn on_status(&self, node_id: u8, telemetry: &Arc<Telemetry>) {
        let _ = self.events.try_send(Event::Status(node_id, telemetry.voltage));
    }

    fn on_discovery(&self, node_id: u8, kind: NodeKind) {
        let _ = self.events.try_send(Event::Discovery(node_id, kind));
    }

    fn on_error(&self, _error: &DriverError) {
        let _ = self.events.try_send(Event::Error);
    }
}

#[test]
fn test_callbacks_observe_discovery_status_and_errors() {
    let bus = VirtualCanBus::new();
    let service = CanService::start(bus.endpoint(), test_config("it-callbacks")).unwrap();

    let (events, received) = bounded(1024);
    let recorder: Arc<dyn ServiceCallback> = Arc::new(Recorder { events });
    service.add_callback(recorder.clone());
    assert_eq!(service.callback_count(), 1);

    let _sim = SimulatedVesc::spawn(&bus, 8, streaming()).unwrap();
    let mut rogue = peer(&bus);
    rogue.send(VescFrame::new_extended((9 << 8) | 9, &[1, 2])).unwrap();

    let mut discovered = None;
    let mut status_seen = false;
    let mut error_seen = false;
    let deadline = Instant::now() + Duration::from_secs(1);
    while !(discovered.is_some() && status_seen && error_seen) && Instant::now() < deadline {
        match received.recv_timeout(Duration::from_millis(50)) {
            Ok(Event::Discovery(8, kind)) => discovered = Some(kind),
            Ok(Event::Status(8, voltage)) => status_seen = voltage == 24.0,
            Ok(Event::Error) => error_seen = true,
            _ => {},
        }
    }
    assert_eq!(discovered, Some(NodeKind::Controller));
    assert!(status_seen);
    assert!(error_seen);

    assert!(service.remove_callback(&recorder));
    assert_eq!(service.callback_count(), 0);
}
