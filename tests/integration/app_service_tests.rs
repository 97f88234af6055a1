//! End-to-end tests for the Controller pipeline: sensor snapshot → rule
//! engine → relay routing (local pins or a simulated Slave) → persistence.

use terrahub::adapters::nvs::NvsAdapter;
use terrahub::adapters::time::SimClock;
use terrahub::app::commands::AppCommand;
use terrahub::app::events::{ActuationSource, AppEvent};
use terrahub::app::ports::{RelayPort, RuleStore};
use terrahub::app::service::AppService;
use terrahub::bus::sim::{SimFault, SimulatedChain};
use terrahub::config::{RelayPolarity, SystemConfig};
use terrahub::rules::{parse_rules, Rule, SensorKey};
use terrahub::sensors::SensorReadings;

use crate::mock_hw::{recording_board, EventLog, MemRuleStore};

fn rules(json: &str) -> Vec<Rule> {
    parse_rules(json).expect("valid rules json")
}

/// Fan on node 2 above 28 °C, held for 10 s.
const FAN_ON_NODE_2: &str = r#"[{
    "id": "fan", "name": "Vent fan", "enabled": true,
    "condition": { "sensor": "temperatureC", "op": "gt", "threshold": 28.0 },
    "action": { "relayIndex": 1, "turnOn": true, "minDurationMs": 10000, "node": 2 }
}]"#;

/// Mister on the Controller while humidity is below 60 %.
const MIST_LOCAL: &str = r#"[{
    "id": "mist", "name": "Mister", "enabled": true,
    "condition": { "sensor": "humidityPercent", "op": "lt", "threshold": 60.0 },
    "action": { "relayIndex": 0, "turnOn": true, "minDurationMs": 0, "node": 0 }
}]"#;

fn temperature(v: f32) -> AppCommand {
    AppCommand::InjectSensorReadings(SensorReadings {
        temperature_c: Some(v),
        ..Default::default()
    })
}

// ── Active-low relay board ───────────────────────────────────

#[test]
fn active_low_board_never_glitches_on() {
    let cfg = SystemConfig {
        relay_polarity: RelayPolarity::ActiveLow,
        ..SystemConfig::default()
    };
    let (mut hw, pins) = recording_board(&cfg);
    let mut chain = SimulatedChain::new(&cfg, 0);
    let mut sink = EventLog::default();
    let store = MemRuleStore {
        rules: Some(rules(MIST_LOCAL)),
        saves: 0,
    };
    let mut app = AppService::new(cfg, 0);
    app.start(&store, &mut sink);

    // Every pin comes up at the "off" level (high) before anything else.
    assert!(pins.iter().all(|p| p.writes() == vec![true]));

    app.handle_command(
        AppCommand::InjectSensorReadings(SensorReadings {
            humidity_percent: Some(40.0),
            ..Default::default()
        }),
        0,
        &mut hw,
        &mut chain,
        &mut sink,
    )
    .unwrap();

    for t in [0, 1_000, 2_000, 3_000] {
        app.poll(t, &mut hw, &mut chain, &mut sink);
    }

    // One physical transition despite four ticks asserting the same state.
    assert_eq!(pins[0].writes(), vec![true, false]);
    assert_eq!(hw.relay_state(0), Some(true));
    assert_eq!(hw.relays().transitions(), 1);
    assert!(pins[1..].iter().all(|p| p.level() == Some(true)));
}

// ── Forwarding with a hold window ────────────────────────────

#[test]
fn forwarded_rule_holds_slave_relay_for_min_duration() {
    let cfg = SystemConfig::default();
    let (mut hw, _) = recording_board(&cfg);
    let mut chain = SimulatedChain::new(&cfg, 2);
    let mut clock = SimClock::new();
    let mut sink = EventLog::default();
    let mut app = AppService::new(cfg, 0);
    app.enumerate(&mut chain, &mut clock, &mut sink);
    app.start(
        &MemRuleStore {
            rules: Some(rules(FAN_ON_NODE_2)),
            saves: 0,
        },
        &mut sink,
    );

    app.handle_command(temperature(31.0), 0, &mut hw, &mut chain, &mut sink).unwrap();
    app.poll(0, &mut hw, &mut chain, &mut sink);
    assert_eq!(chain.node(2).unwrap().board.relay_state(1), Some(true));
    assert_eq!(hw.relay_state(1), Some(false), "controller relay untouched");

    // Condition clears at 2 s but the lock holds until 10 s.
    app.handle_command(temperature(22.0), 2_000, &mut hw, &mut chain, &mut sink).unwrap();
    for t in [2_000, 5_000, 9_000] {
        app.poll(t, &mut hw, &mut chain, &mut sink);
        assert_eq!(chain.node(2).unwrap().board.relay_state(1), Some(true), "released early at {t}");
    }

    app.poll(10_000, &mut hw, &mut chain, &mut sink);
    assert_eq!(chain.node(2).unwrap().board.relay_state(1), Some(false));
    assert!(app.engine().locks().is_empty());
    assert_eq!(
        sink.count(|e| matches!(
            e,
            AppEvent::RelayChanged { node: 2, channel: 1, source: ActuationSource::Rule, .. }
        )),
        // On at 0 s, off at 10 s.
        2
    );
}

/// Shade cloth on node 1 channel 2 below 20 °C, held for 5 s.
const SHADE_ON_NODE_1: &str = r#"[{
    "id": "shade", "name": "Shade", "enabled": true,
    "condition": { "sensor": "temperatureC", "op": "lt", "threshold": 20.0 },
    "action": { "relayIndex": 2, "turnOn": true, "minDurationMs": 5000, "node": 1 }
}]"#;

#[test]
fn missed_release_is_resent_once_slave_answers_again() {
    let cfg = SystemConfig::default();
    let health = u64::from(cfg.node_health_interval_ms);
    let (mut hw, _) = recording_board(&cfg);
    let mut chain = SimulatedChain::new(&cfg, 1);
    let mut clock = SimClock::new();
    let mut sink = EventLog::default();
    let mut app = AppService::new(cfg, 0);
    app.enumerate(&mut chain, &mut clock, &mut sink);
    app.handle_command(AppCommand::ReplaceRules(rules(SHADE_ON_NODE_1)), 0, &mut hw, &mut chain, &mut sink)
        .unwrap();

    app.handle_command(temperature(18.0), 0, &mut hw, &mut chain, &mut sink).unwrap();
    app.poll(0, &mut hw, &mut chain, &mut sink);
    assert_eq!(chain.node(1).unwrap().board.relay_state(2), Some(true));

    // The release falls due while the Slave is not answering.
    app.handle_command(temperature(25.0), 5_000, &mut hw, &mut chain, &mut sink).unwrap();
    chain.set_fault(1, SimFault::Silent);
    app.poll(5_000, &mut hw, &mut chain, &mut sink);
    app.poll(6_000, &mut hw, &mut chain, &mut sink);
    assert!(app.engine().lock_for("shade").is_some(), "lock kept while release is pending");
    assert!(!app.status(&hw).nodes.records()[0].healthy);

    chain.set_fault(1, SimFault::None);
    app.poll(health, &mut hw, &mut chain, &mut sink);
    assert!(app.status(&hw).nodes.records()[0].healthy);
    assert_eq!(chain.node(1).unwrap().board.relay_state(2), Some(false));
    assert!(app.engine().locks().is_empty());
}

#[test]
fn reasserted_remote_relay_reports_one_change() {
    let cfg = SystemConfig::default();
    let (mut hw, _) = recording_board(&cfg);
    let mut chain = SimulatedChain::new(&cfg, 1);
    let mut clock = SimClock::new();
    let mut sink = EventLog::default();
    let mut app = AppService::new(cfg, 0);
    app.enumerate(&mut chain, &mut clock, &mut sink);
    app.handle_command(AppCommand::ReplaceRules(rules(SHADE_ON_NODE_1)), 0, &mut hw, &mut chain, &mut sink)
        .unwrap();

    app.handle_command(temperature(15.0), 0, &mut hw, &mut chain, &mut sink).unwrap();
    for t in [0, 1_000, 2_000, 3_000] {
        app.poll(t, &mut hw, &mut chain, &mut sink);
    }
    assert_eq!(chain.node(1).unwrap().board.relay_state(2), Some(true));
    assert_eq!(
        sink.count(|e| matches!(e, AppEvent::RelayChanged { node: 1, channel: 2, on: true, .. })),
        1
    );
}

// ── Persistence through the NVS adapter ──────────────────────

#[test]
fn rules_survive_restart_through_nvs() {
    let cfg = SystemConfig::default();
    let (mut hw, _) = recording_board(&cfg);
    let mut chain = SimulatedChain::new(&cfg, 0);
    let mut sink = EventLog::default();
    let mut nvs = NvsAdapter::new().unwrap();

    let mut app = AppService::new(cfg.clone(), 0);
    app.start(&nvs, &mut sink);
    assert!(app.engine().rules().is_empty());

    app.handle_command(AppCommand::ReplaceRules(rules(MIST_LOCAL)), 500, &mut hw, &mut chain, &mut sink)
        .unwrap();
    let quiet = u64::from(cfg.rules_save_debounce_ms);
    app.poll(500 + quiet, &mut hw, &mut chain, &mut sink);
    assert!(app.auto_save_if_needed(500 + quiet, &mut nvs, &mut sink));
    assert!(sink.events.contains(&AppEvent::RulesSaved { count: 1 }));

    // "Reboot": fresh service, same store.
    let mut rebooted = AppService::new(cfg, 0);
    rebooted.start(&nvs, &mut sink);
    assert_eq!(rebooted.engine().rules(), nvs.load_rules().unwrap().as_slice());
    assert_eq!(rebooted.engine().rules()[0].id, "mist");
}

// ── Hot-plug ─────────────────────────────────────────────────

#[test]
fn attached_node_becomes_addressable_after_reenumeration() {
    let cfg = SystemConfig::default();
    let health = u64::from(cfg.node_health_interval_ms);
    let (mut hw, _) = recording_board(&cfg);
    let mut chain = SimulatedChain::new(&cfg, 1);
    let mut clock = SimClock::new();
    let mut sink = EventLog::default();
    let mut app = AppService::new(cfg, 0);
    app.enumerate(&mut chain, &mut clock, &mut sink);

    let set_on_node_2 = AppCommand::SetRelay { node: 2, channel: 3, on: true };
    assert!(app
        .handle_command(set_on_node_2.clone(), 0, &mut hw, &mut chain, &mut sink)
        .is_err());

    chain.attach();
    app.poll(health, &mut hw, &mut chain, &mut sink);
    assert!(app.reenumerate_if_needed(&mut chain, &mut clock, &mut sink));
    assert_eq!(chain.assigned_addresses(), vec![Some(0x31), Some(0x32)]);

    app.handle_command(set_on_node_2, health, &mut hw, &mut chain, &mut sink)
        .unwrap();
    assert_eq!(chain.node(2).unwrap().board.relay_state(3), Some(true));
    assert_eq!(hw.relays().transitions(), 0);
}

#[test]
fn unplugged_tail_drops_out_of_status() {
    let cfg = SystemConfig::default();
    let health = u64::from(cfg.node_health_interval_ms);
    let (mut hw, _) = recording_board(&cfg);
    let mut chain = SimulatedChain::new(&cfg, 3);
    let mut clock = SimClock::new();
    let mut sink = EventLog::default();
    let mut app = AppService::new(cfg, 0);
    app.enumerate(&mut chain, &mut clock, &mut sink);
    assert_eq!(app.status(&hw).nodes.len(), 3);

    chain.disconnect_from(2);
    app.poll(health, &mut hw, &mut chain, &mut sink);
    assert_eq!(sink.count(|e| matches!(e, AppEvent::NodeUnreachable { .. })), 2);
    assert_eq!(sink.count(|e| *e == AppEvent::TopologyChanged), 1);

    app.reenumerate_if_needed(&mut chain, &mut clock, &mut sink);
    let status = app.status(&hw);
    assert_eq!(status.nodes.len(), 1);
    assert_eq!(status.nodes.records()[0].assigned_address, 0x31);
    assert_eq!(status.relays, vec![false; 5]);
}

#[test]
fn sensor_key_lookup_matches_rule_vocabulary() {
    for key in SensorKey::ALL {
        assert_eq!(SensorKey::from_name(key.as_str()), Some(key));
    }
}
