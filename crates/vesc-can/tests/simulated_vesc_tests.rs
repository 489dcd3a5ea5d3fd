//! 模拟控制器在虚拟总线上的行为测试

use std::time::{Duration, Instant};
use vesc_can::{CanTransport, SimulatedVesc, SimulatorConfig, VirtualCanBus, VirtualCanTransport};
use vesc_protocol::{BROADCAST_NODE_ID, Command, StatusMessage, decode, encode};

fn host(bus: &VirtualCanBus) -> VirtualCanTransport {
    let mut ep = bus.endpoint();
    ep.connect().unwrap();
    ep
}

/// 在期限内收集所有可解码的帧
fn collect(ep: &mut VirtualCanTransport, window: Duration) -> Vec<(u8, Command)> {
    let deadline = Instant::now() + window;
    let mut out = Vec::new();
    while Instant::now() < deadline {
        if let Some(frame) = ep.receive(Duration::from_millis(10)).unwrap()
            && let Ok(decoded) = decode(&frame)
        {
            out.push(decoded);
        }
    }
    out
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn broadcast_ping_is_answered_by_every_node() {
    let bus = VirtualCanBus::new();
    let _a = SimulatedVesc::spawn(&bus, 10, SimulatorConfig::default()).unwrap();
    let _b = SimulatedVesc::spawn(&bus, 20, SimulatorConfig::default()).unwrap();
    let mut ep = host(&bus);

    ep.send(encode(&Command::Ping, BROADCAST_NODE_ID).unwrap()).unwrap();

    let mut pongs: Vec<u8> = collect(&mut ep, Duration::from_millis(200))
        .into_iter()
        .filter(|(_, c)| *c == Command::Pong)
        .map(|(node, _)| node)
        .collect();
    pongs.sort_unstable();
    assert_eq!(pongs, vec![10, 20]);
}

#[test]
fn targeted_ping_only_reaches_its_node() {
    let bus = VirtualCanBus::new();
    let a = SimulatedVesc::spawn(&bus, 10, SimulatorConfig::default()).unwrap();
    let b = SimulatedVesc::spawn(&bus, 20, SimulatorConfig::default()).unwrap();
    let mut ep = host(&bus);

    ep.send(encode(&Command::Ping, 20).unwrap()).unwrap();
    let frames = collect(&mut ep, Duration::from_millis(150));

    assert_eq!(frames, vec![(20, Command::Pong)]);
    assert_eq!(a.state().pings_answered, 0);
    assert_eq!(b.state().pings_answered, 1);
}

#[test]
fn set_commands_are_applied() {
    let bus = VirtualCanBus::new();
    let sim = SimulatedVesc::spawn(&bus, 7, SimulatorConfig::default()).unwrap();
    let mut ep = host(&bus);

    ep.send(encode(&Command::SetDuty(0.25), 7).unwrap()).unwrap();
    assert!(wait_until(Duration::from_millis(500), || sim.state().duty == 0.25));

    ep.send(encode(&Command::SetCurrent(3.5), 7).unwrap()).unwrap();
    assert!(wait_until(Duration::from_millis(500), || sim.state().current == 3.5));
    assert_eq!(sim.last_command(), Some(Command::SetCurrent(3.5)));

    // 发给其他节点的指令被忽略
    ep.send(encode(&Command::SetRpm(1000), 8).unwrap()).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_ne!(sim.state().rpm, 1000);
}

#[test]
fn shutdown_silences_the_node() {
    let bus = VirtualCanBus::new();
    let sim = SimulatedVesc::spawn(&bus, 3, SimulatorConfig::default()).unwrap();
    let mut ep = host(&bus);

    ep.send(encode(&Command::Shutdown, 3).unwrap()).unwrap();
    assert!(wait_until(Duration::from_millis(500), || sim.state().shut_down));

    ep.send(encode(&Command::Ping, BROADCAST_NODE_ID).unwrap()).unwrap();
    assert!(collect(&mut ep, Duration::from_millis(100)).is_empty());
}

#[test]
fn periodic_status_is_broadcast() {
    let bus = VirtualCanBus::new();
    let config = SimulatorConfig {
        status_interval: Some(Duration::from_millis(20)),
        input_voltage: 36.0,
        ..Default::default()
    };
    let _sim = SimulatedVesc::spawn(&bus, 42, config).unwrap();
    let mut ep = host(&bus);

    let frames = collect(&mut ep, Duration::from_millis(150));
    let voltages: Vec<f64> = frames
        .iter()
        .filter_map(|(node, c)| match c {
            Command::Status(StatusMessage::Status5(s)) if *node == 42 => Some(s.v_in),
            _ => None,
        })
        .collect();
    assert!(!voltages.is_empty());
    assert!(voltages.iter().all(|v| (*v - 36.0).abs() < 1e-9));
    assert!(
        frames
            .iter()
            .any(|(_, c)| matches!(c, Command::Status(StatusMessage::Status4(_))))
    );
}

#[test]
fn stopping_the_simulator_detaches_it() {
    let bus = VirtualCanBus::new();
    let mut sim = SimulatedVesc::spawn(&bus, 9, SimulatorConfig::default()).unwrap();
    assert_eq!(bus.endpoint_count(), 1);
    sim.stop();
    sim.stop();
    assert_eq!(bus.endpoint_count(), 0);
}
