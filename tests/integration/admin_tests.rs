//! Administrative API through the request/response queues, against a
//! Controller with Slaves attached.

use terrahub::adapters::admin::{self, AdminRequest, ADMIN_REQUESTS, ADMIN_RESPONSES};
use terrahub::adapters::hardware::HardwareAdapter;
use terrahub::adapters::time::SimClock;
use terrahub::app::ports::RelayPort;
use terrahub::app::service::AppService;
use terrahub::bus::sim::{SimFault, SimulatedChain};
use terrahub::config::SystemConfig;
use terrahub::drivers::gpio::GpioPin;

use crate::mock_hw::EventLog;

struct Controller {
    app: AppService,
    hw: HardwareAdapter<GpioPin>,
    chain: SimulatedChain,
    clock: SimClock,
    sink: EventLog,
}

impl Controller {
    fn with_slaves(count: usize) -> Self {
        let cfg = SystemConfig::default();
        let mut ctl = Self {
            hw: HardwareAdapter::from_pins(GpioPin::relay_outputs(), &cfg),
            chain: SimulatedChain::new(&cfg, count),
            clock: SimClock::new(),
            sink: EventLog::default(),
            app: AppService::new(cfg, 0),
        };
        ctl.app.enumerate(&mut ctl.chain, &mut ctl.clock, &mut ctl.sink);
        ctl
    }

    fn call(&mut self, req: AdminRequest) -> admin::AdminResponse {
        admin::handle(&req, 0, &mut self.app, &mut self.hw, &mut self.chain, &mut self.sink)
    }
}

// The queues are process-wide statics; only this test touches them.
#[test]
fn queued_requests_are_answered_in_order() {
    let mut ctl = Controller::with_slaves(1);

    let mut status = AdminRequest::get("/api/status");
    status.id = 7;
    let mut relay = AdminRequest::post("/api/relays", r#"{"relayIndex":1,"turnOn":true,"node":1}"#);
    relay.id = 8;
    ADMIN_REQUESTS.try_send(status).unwrap();
    ADMIN_REQUESTS.try_send(relay).unwrap();

    let served = admin::drain_queue(0, &mut ctl.app, &mut ctl.hw, &mut ctl.chain, &mut ctl.sink);
    assert_eq!(served, 2);

    let first = ADMIN_RESPONSES.try_receive().unwrap();
    let second = ADMIN_RESPONSES.try_receive().unwrap();
    assert!(ADMIN_RESPONSES.try_receive().is_err());
    assert_eq!((first.id, first.status), (7, 200));
    assert_eq!((second.id, second.status), (8, 200));
    assert_eq!(first.body_json().unwrap()["nodes"].as_array().unwrap().len(), 1);
    assert_eq!(ctl.chain.node(1).unwrap().board.relay_state(1), Some(true));
}

#[test]
fn remote_relay_errors_map_to_gateway_statuses() {
    let mut ctl = Controller::with_slaves(1);

    let unknown = ctl.call(AdminRequest::post("/api/relays", r#"{"relayIndex":0,"turnOn":true,"node":3}"#));
    assert_eq!(unknown.status, 400);

    ctl.chain.set_fault(1, SimFault::Silent);
    let silent = ctl.call(AdminRequest::post("/api/relays", r#"{"relayIndex":0,"turnOn":true,"node":1}"#));
    assert_eq!(silent.status, 504);
    assert_eq!(silent.body_json().unwrap()["error"], "Node did not answer");

    // The node is now marked unreachable, so it is refused up front.
    let again = ctl.call(AdminRequest::post("/api/relays", r#"{"relayIndex":0,"turnOn":true,"node":1}"#));
    assert_eq!(again.status, 400);

    let status = ctl.call(AdminRequest::get("/api/status")).body_json().unwrap();
    assert_eq!(status["nodes"][0]["healthy"], false);
}

#[test]
fn enumerate_request_runs_on_next_pass() {
    let mut ctl = Controller::with_slaves(1);
    ctl.chain.attach();

    assert_eq!(ctl.call(AdminRequest::post("/api/enumerate", "")).status, 202);
    assert!(ctl
        .app
        .reenumerate_if_needed(&mut ctl.chain, &mut ctl.clock, &mut ctl.sink));

    let status = ctl.call(AdminRequest::get("/api/status")).body_json().unwrap();
    assert_eq!(status["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(status["enumeration"]["truncated"], false);
}

#[test]
fn posted_rules_drive_relays_on_next_poll() {
    let mut ctl = Controller::with_slaves(0);
    let body = r#"[{"id":"lamp","condition":{"sensor":"lightLevelLux","op":"lte","threshold":100},
                   "action":{"relayIndex":4,"turnOn":true,"minDurationMs":0}}]"#;
    let resp = ctl.call(AdminRequest::post("/api/rules", body));
    assert_eq!(resp.body_json().unwrap()["issues"].as_array().unwrap().len(), 0);

    assert_eq!(ctl.call(AdminRequest::post("/api/sensors/mock", r#"{"lightLevelLux":40}"#)).status, 204);
    ctl.app.poll(0, &mut ctl.hw, &mut ctl.chain, &mut ctl.sink);
    assert_eq!(ctl.hw.relay_state(4), Some(true));

    let status = ctl.call(AdminRequest::get("/api/status")).body_json().unwrap();
    assert_eq!(status["relays"][4], true);
    assert_eq!(status["activeLocks"][0]["ruleId"], "lamp");
    assert_eq!(status["sensors"]["lightLevelLux"], 40.0);
}

#[test]
fn duplicate_rule_ids_do_not_chatter() {
    let mut ctl = Controller::with_slaves(0);
    let body = r#"[
        {"id":"dup","condition":{"sensor":"temperatureC","op":"gt","threshold":30},
         "action":{"relayIndex":0,"turnOn":true,"minDurationMs":5000}},
        {"id":"dup","condition":{"sensor":"temperatureC","op":"lt","threshold":10},
         "action":{"relayIndex":1,"turnOn":true,"minDurationMs":0}}
    ]"#;
    let resp = ctl.call(AdminRequest::post("/api/rules", body)).body_json().unwrap();
    assert_eq!(resp["count"], 1);
    assert_eq!(resp["issues"][0]["problem"], "duplicate id");

    ctl.call(AdminRequest::post("/api/sensors/mock", r#"{"temperatureC":35}"#));
    for t in (0..=12_000).step_by(1_000) {
        ctl.app.poll(t, &mut ctl.hw, &mut ctl.chain, &mut ctl.sink);
        assert_eq!(ctl.hw.relay_state(0), Some(true), "ch0 dropped at t={t}");
    }
    assert_eq!(ctl.hw.relays().transitions(), 1);
}
