//! Administrative API edge.
//!
//! **Transport-decoupled**: this module does not own an HTTP server.  A
//! server task pushes [`AdminRequest`]s into [`ADMIN_REQUESTS`]; the
//! control loop drains them with [`drain_queue`], runs each through
//! [`handle`] and posts the [`AdminResponse`] to [`ADMIN_RESPONSES`].
//!
//! ```text
//! ┌──────────────┐ AdminRequest  ┌──────────────┐
//! │  HTTP task   │─────────────▶│ Control Loop  │
//! │              │◀─────────────│  (AppService) │
//! └──────────────┘ AdminResponse └──────────────┘
//! ```
//!
//! | Route                    | Effect                                  |
//! |--------------------------|-----------------------------------------|
//! | `GET  /api/status`       | [`StatusReport`](crate::app::service::StatusReport) |
//! | `GET  /api/rules`        | current rule set as JSON                |
//! | `POST /api/rules`        | replace rule set, report issues         |
//! | `POST /api/relays`       | manual relay override                   |
//! | `POST /api/sensors/mock` | inject sensor readings                  |
//! | `POST /api/enumerate`    | re-enumerate on the next loop pass      |

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;

use crate::app::commands::AppCommand;
use crate::app::ports::{EventSink, RelayPort, SensorPort};
use crate::app::service::AppService;
use crate::bus::BusPort;
use crate::error::{BusError, Error};
use crate::rules::{parse_rules, validate_rules};
use crate::sensors::SensorReadings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One request from the HTTP side.  `id` is echoed in the response.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminRequest {
    pub id: u32,
    pub method: Method,
    pub path: String,
    pub body: Option<String>,
}

impl AdminRequest {
    pub fn get(path: &str) -> Self {
        Self {
            id: 0,
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: &str, body: &str) -> Self {
        Self {
            id: 0,
            method: Method::Post,
            path: path.into(),
            body: Some(body.into()),
        }
    }
}

/// JSON body plus an HTTP status code.  An empty body goes with 204.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminResponse {
    pub id: u32,
    pub status: u16,
    pub body: String,
}

impl AdminResponse {
    fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            id: 0,
            status,
            body: value.to_string(),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, &json!({ "error": message }))
    }

    fn no_content() -> Self {
        Self {
            id: 0,
            status: 204,
            body: String::new(),
        }
    }

    pub fn body_json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Channel depth for inbound admin requests.
const REQUEST_DEPTH: usize = 4;
/// Channel depth for outbound admin responses.
const RESPONSE_DEPTH: usize = 4;

/// Inbound: HTTP task → control loop.
pub static ADMIN_REQUESTS: Channel<CriticalSectionRawMutex, AdminRequest, REQUEST_DEPTH> = Channel::new();

/// Outbound: control loop → HTTP task.
pub static ADMIN_RESPONSES: Channel<CriticalSectionRawMutex, AdminResponse, RESPONSE_DEPTH> =
    Channel::new();

/// `POST /api/relays` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest {
    #[serde(default)]
    relay_index: u8,
    #[serde(default)]
    turn_on: bool,
    #[serde(default)]
    node: u8,
}

/// Route one request.  Never panics; every failure maps to a status code.
pub fn handle(
    req: &AdminRequest,
    now: u64,
    app: &mut AppService,
    hw: &mut (impl SensorPort + RelayPort),
    bus: &mut impl BusPort,
    sink: &mut impl EventSink,
) -> AdminResponse {
    let mut resp = route(req, now, app, hw, bus, sink);
    resp.id = req.id;
    if resp.status >= 400 {
        warn!("Admin: {:?} {} -> {}", req.method, req.path, resp.status);
    } else {
        info!("Admin: {:?} {} -> {}", req.method, req.path, resp.status);
    }
    resp
}

fn route(
    req: &AdminRequest,
    now: u64,
    app: &mut AppService,
    hw: &mut (impl SensorPort + RelayPort),
    bus: &mut impl BusPort,
    sink: &mut impl EventSink,
) -> AdminResponse {
    match (req.method, req.path.as_str()) {
        (Method::Get, "/api/status") => match serde_json::to_value(app.status(hw)) {
            Ok(v) => AdminResponse::json(200, &v),
            Err(_) => AdminResponse::error(500, "Status unavailable"),
        },

        (Method::Get, "/api/rules") => match serde_json::to_value(app.engine().rules()) {
            Ok(v) => AdminResponse::json(200, &v),
            Err(_) => AdminResponse::error(500, "Rules unavailable"),
        },

        (Method::Post, "/api/rules") => {
            let Some(body) = req.body.as_deref() else {
                return AdminResponse::error(400, "Missing body");
            };
            let Ok(rules) = parse_rules(body) else {
                return AdminResponse::error(400, "Invalid JSON");
            };
            let issues: Vec<_> = validate_rules(&rules, hw.channel_count())
                .into_iter()
                .map(|i| json!({ "index": i.index, "id": i.rule_id, "problem": i.problem.to_string() }))
                .collect();
            dispatch(app, AppCommand::ReplaceRules(rules), now, hw, bus, sink);
            let count = app.engine().rules().len();
            AdminResponse::json(200, &json!({ "count": count, "issues": issues }))
        }

        (Method::Post, "/api/relays") => {
            let relay: RelayRequest = match parse_body(req) {
                Ok(r) => r,
                Err(resp) => return resp,
            };
            let cmd = AppCommand::SetRelay {
                node: relay.node,
                channel: relay.relay_index,
                on: relay.turn_on,
            };
            match app.handle_command(cmd, now, hw, bus, sink) {
                Ok(()) => AdminResponse::json(
                    200,
                    &json!({ "relayIndex": relay.relay_index, "turnOn": relay.turn_on, "node": relay.node }),
                ),
                Err(Error::Relay(e)) => AdminResponse::error(400, &e.to_string()),
                Err(Error::Bus(BusError::Timeout)) => AdminResponse::error(504, "Node did not answer"),
                Err(e) => AdminResponse::error(502, &e.to_string()),
            }
        }

        (Method::Post, "/api/sensors/mock") => {
            let readings: SensorReadings = match parse_body(req) {
                Ok(r) => r,
                Err(resp) => return resp,
            };
            dispatch(app, AppCommand::InjectSensorReadings(readings), now, hw, bus, sink);
            AdminResponse::no_content()
        }

        (Method::Post, "/api/enumerate") => {
            dispatch(app, AppCommand::Reenumerate, now, hw, bus, sink);
            AdminResponse::json(202, &json!({ "scheduled": true }))
        }

        (_, "/api/status" | "/api/relays" | "/api/sensors/mock" | "/api/enumerate") => {
            AdminResponse::error(405, "Method not allowed")
        }

        _ => AdminResponse::error(404, "Not found"),
    }
}

fn parse_body<T: for<'de> Deserialize<'de>>(req: &AdminRequest) -> Result<T, AdminResponse> {
    let body = req
        .body
        .as_deref()
        .ok_or_else(|| AdminResponse::error(400, "Missing body"))?;
    serde_json::from_str(body).map_err(|_| AdminResponse::error(400, "Invalid JSON"))
}

/// Commands that cannot fail at the service level.
fn dispatch(
    app: &mut AppService,
    cmd: AppCommand,
    now: u64,
    hw: &mut (impl SensorPort + RelayPort),
    bus: &mut impl BusPort,
    sink: &mut impl EventSink,
) {
    if let Err(e) = app.handle_command(cmd, now, hw, bus, sink) {
        warn!("Admin: command failed: {}", e);
    }
}

/// Serve every queued request.  Returns how many were handled.
pub fn drain_queue(
    now: u64,
    app: &mut AppService,
    hw: &mut (impl SensorPort + RelayPort),
    bus: &mut impl BusPort,
    sink: &mut impl EventSink,
) -> usize {
    let mut served = 0;
    while let Ok(req) = ADMIN_REQUESTS.try_receive() {
        let resp = handle(&req, now, app, hw, bus, sink);
        if ADMIN_RESPONSES.try_send(resp).is_err() {
            warn!("Admin: response queue full, dropping reply to #{}", req.id);
        }
        served += 1;
    }
    served
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::adapters::hardware::HardwareAdapter;
    use crate::app::events::AppEvent;
    use crate::bus::sim::SimulatedChain;
    use crate::config::SystemConfig;
    use crate::drivers::gpio::GpioPin;
    use crate::rules::SensorKey;

    struct NullSink;

    impl EventSink for NullSink {
        fn emit(&mut self, _: &AppEvent) {}
    }

    fn fixture() -> (AppService, HardwareAdapter<GpioPin>, SimulatedChain) {
        let cfg = SystemConfig::default();
        let hw = HardwareAdapter::from_pins(GpioPin::relay_outputs(), &cfg);
        let chain = SimulatedChain::new(&cfg, 0);
        (AppService::new(cfg, 0), hw, chain)
    }

    fn call(req: AdminRequest, app: &mut AppService, hw: &mut HardwareAdapter<GpioPin>, chain: &mut SimulatedChain) -> AdminResponse {
        handle(&req, 0, app, hw, chain, &mut NullSink)
    }

    #[test]
    fn status_reports_relays_and_role() {
        let (mut app, mut hw, mut chain) = fixture();
        let resp = call(AdminRequest::get("/api/status"), &mut app, &mut hw, &mut chain);
        assert_eq!(resp.status, 200);
        let v = resp.body_json().unwrap();
        assert_eq!(v["role"], "controller");
        assert_eq!(v["relays"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn post_rules_replaces_and_reports_issues() {
        let (mut app, mut hw, mut chain) = fixture();
        let body = r#"[
            {"id":"a","condition":{"sensor":"temperatureC","op":"gt","threshold":30},"action":{"relayIndex":0,"turnOn":true}},
            {"id":"a","condition":{"sensor":"co2","op":"gt","threshold":1},"action":{"relayIndex":9,"turnOn":true}}
        ]"#;
        let resp = call(AdminRequest::post("/api/rules", body), &mut app, &mut hw, &mut chain);
        assert_eq!(resp.status, 200);
        let v = resp.body_json().unwrap();
        // The second "a" is reported and kept out of the active set.
        assert_eq!(v["count"], 1);
        assert_eq!(v["issues"].as_array().unwrap().len(), 3);
        assert_eq!(app.engine().rules().len(), 1);

        let listed = call(AdminRequest::get("/api/rules"), &mut app, &mut hw, &mut chain);
        assert_eq!(listed.body_json().unwrap()[0]["action"]["relayIndex"], 0);
    }

    #[test]
    fn missing_and_invalid_bodies_are_400() {
        let (mut app, mut hw, mut chain) = fixture();
        let mut req = AdminRequest::post("/api/relays", "");
        req.body = None;
        let resp = call(req, &mut app, &mut hw, &mut chain);
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body_json().unwrap()["error"], "Missing body");

        let resp = call(AdminRequest::post("/api/rules", "{oops"), &mut app, &mut hw, &mut chain);
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body_json().unwrap()["error"], "Invalid JSON");
    }

    #[test]
    fn relay_override_switches_local_channel() {
        let (mut app, mut hw, mut chain) = fixture();
        let resp = call(
            AdminRequest::post("/api/relays", r#"{"relayIndex":3,"turnOn":true}"#),
            &mut app,
            &mut hw,
            &mut chain,
        );
        assert_eq!(resp.status, 200);
        assert_eq!(hw.relay_state(3), Some(true));

        let resp = call(
            AdminRequest::post("/api/relays", r#"{"relayIndex":7,"turnOn":true}"#),
            &mut app,
            &mut hw,
            &mut chain,
        );
        assert_eq!(resp.status, 400);
    }

    #[test]
    fn sensor_mock_injects_readings() {
        let (mut app, mut hw, mut chain) = fixture();
        let resp = call(
            AdminRequest::post("/api/sensors/mock", r#"{"humidityPercent":64.5}"#),
            &mut app,
            &mut hw,
            &mut chain,
        );
        assert_eq!(resp.status, 204);
        assert!(resp.body.is_empty());
        assert_eq!(hw.read_snapshot().get(SensorKey::HumidityPercent), Some(64.5));
    }

    #[test]
    fn enumerate_is_scheduled() {
        let (mut app, mut hw, mut chain) = fixture();
        let resp = call(AdminRequest::post("/api/enumerate", "{}"), &mut app, &mut hw, &mut chain);
        assert_eq!(resp.status, 202);
        assert!(app.needs_enumeration());
    }

    #[test]
    fn unknown_routes() {
        let (mut app, mut hw, mut chain) = fixture();
        assert_eq!(call(AdminRequest::get("/api/nope"), &mut app, &mut hw, &mut chain).status, 404);
        assert_eq!(call(AdminRequest::get("/api/relays"), &mut app, &mut hw, &mut chain).status, 405);
        assert_eq!(call(AdminRequest::get("/api/enumerate"), &mut app, &mut hw, &mut chain).status, 405);
        // Both methods are served on the rules route.
        assert_eq!(call(AdminRequest::get("/api/rules"), &mut app, &mut hw, &mut chain).status, 200);
    }
}
