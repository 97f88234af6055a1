//! Enumeration against the simulated chain, then the post-enumeration
//! query commands a Controller uses to learn what each node carries.

use terrahub::adapters::time::SimClock;
use terrahub::bus::sim::{SimFault, SimulatedChain};
use terrahub::bus::{self, decode_sensor_values, Command, NodeInfo, Request, PROTOCOL_VERSION};
use terrahub::config::SystemConfig;
use terrahub::enumeration::{Enumerator, Outcome};
use terrahub::error::BusError;
use terrahub::rules::SensorKey;

const TIMEOUT: u32 = 50;

fn enumerated(count: usize) -> (SystemConfig, SimulatedChain) {
    let cfg = SystemConfig::default();
    let mut chain = SimulatedChain::new(&cfg, count);
    let report = Enumerator::new(&cfg).run(&mut chain, &mut SimClock::new());
    assert_eq!(report.outcome, Outcome::Done);
    assert_eq!(report.table.len(), count);
    (cfg, chain)
}

#[test]
fn wire_sequence_for_two_nodes() {
    let cfg = SystemConfig::default();
    let mut chain = SimulatedChain::new(&cfg, 2);
    Enumerator::new(&cfg).run(&mut chain, &mut SimClock::new());

    let wire: Vec<(u8, u8, bool)> = chain
        .transactions()
        .iter()
        .map(|t| (t.address, t.command, t.answered))
        .collect();
    assert_eq!(
        wire,
        vec![
            (0x30, Command::AssignAddress as u8, true),
            (0x31, Command::Ping as u8, true),
            (0x30, Command::AssignAddress as u8, true),
            (0x32, Command::Ping as u8, true),
            // Nobody left on the default address: end of chain.
            (0x30, Command::AssignAddress as u8, false),
        ]
    );
}

#[test]
fn node_info_reports_position_and_ports() {
    let (_, mut chain) = enumerated(3);
    let resp = bus::transact(&mut chain, 0x32, &Request::new(Command::GetNodeInfo), TIMEOUT).unwrap();
    let info = NodeInfo::from_bytes(&resp.payload).unwrap();
    assert_eq!(info.node_id, 2);
    assert_eq!(info.port_count, 5);
    assert_eq!(info.flags >> 8, u16::from(PROTOCOL_VERSION.0));

    let ports = bus::transact(&mut chain, 0x32, &Request::new(Command::GetPorts), TIMEOUT).unwrap();
    assert_eq!(ports.payload[0], 5);
    assert_eq!(ports.payload.len(), 1 + 5 * 2);
}

#[test]
fn port_state_follows_set_port_state() {
    let (_, mut chain) = enumerated(1);
    let set = Request::with_payload(Command::SetPortState, &[2, 1]).unwrap();
    bus::transact(&mut chain, 0x31, &set, TIMEOUT).unwrap();

    let get = Request::with_payload(Command::GetPortState, &[2]).unwrap();
    let resp = bus::transact(&mut chain, 0x31, &get, TIMEOUT).unwrap();
    assert_eq!(&resp.payload[..2], &[2, 1]);

    let bad = Request::with_payload(Command::SetPortState, &[9, 1]).unwrap();
    assert_eq!(bus::transact(&mut chain, 0x31, &bad, TIMEOUT), Err(BusError::Nack(0x02)));
}

#[test]
fn sensor_values_cross_the_bus() {
    let (_, mut chain) = enumerated(2);
    let board = &mut chain.node_mut(2).unwrap().board;
    board.sensors_mut().record(SensorKey::TemperatureC, -3.5);
    board.sensors_mut().record(SensorKey::HumidityPercent, 71.2);

    let resp = bus::transact(&mut chain, 0x32, &Request::new(Command::GetSensorValues), TIMEOUT).unwrap();
    let snapshot = decode_sensor_values(&resp.payload).unwrap();
    assert_eq!(snapshot.get(SensorKey::TemperatureC), Some(-3.5));
    assert!((snapshot.get(SensorKey::HumidityPercent).unwrap() - 71.2).abs() < 0.05);
    assert_eq!(snapshot.get(SensorKey::LightLevelLux), None);
}

#[test]
fn assigned_node_refuses_second_hello() {
    let (_, mut chain) = enumerated(1);
    // The node keeps its downstream enabled, so nobody is on 0x30 now.
    let hello = Request::new(Command::HelloUnassigned);
    assert_eq!(bus::transact(&mut chain, 0x30, &hello, TIMEOUT), Err(BusError::Timeout));
    assert_eq!(
        bus::transact(&mut chain, 0x31, &hello, TIMEOUT),
        Err(BusError::Nack(0x03))
    );
}

#[test]
fn deaf_middle_node_with_continue_keeps_tail_addressable() {
    let cfg = SystemConfig {
        continue_past_unreachable: true,
        ..SystemConfig::default()
    };
    let mut chain = SimulatedChain::new(&cfg, 4);
    chain.set_fault(2, SimFault::DeafAfterAssign);
    let report = Enumerator::new(&cfg).run(&mut chain, &mut SimClock::new());

    assert_eq!(report.unreachable, vec![2]);
    assert_eq!(report.table.len(), 4);
    let ping = Request::new(Command::Ping);
    for addr in [0x31, 0x33, 0x34] {
        assert!(bus::transact(&mut chain, addr, &ping, TIMEOUT).is_ok(), "0x{addr:02x}");
    }
    assert_eq!(bus::transact(&mut chain, 0x32, &ping, TIMEOUT), Err(BusError::Timeout));
}
