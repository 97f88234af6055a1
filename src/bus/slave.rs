//! Slave side of the bus protocol.
//!
//! [`SlaveNode`] is the pure protocol state of one Slave: which address it
//! answers on, whether it is enabled by its upstream neighbour, and whether
//! it is gating its downstream neighbour on.  Frame I/O is done by the
//! caller (I²C slave pump on target, [`SimulatedChain`](super::sim) on host).
//!
//! Lifecycle:
//!
//! ```text
//!  upstream low ──▶ Disabled (hears nothing, downstream low)
//!       │ upstream high
//!       ▼
//!  Unassigned @ default address ── AssignAddress(a) ──▶ Assigned @ a, downstream high
//!       ▲                                                   │
//!       └─────────────── upstream drops ────────────────────┘
//! ```
//!
//! Dropping upstream always forgets the address, so a re-enumeration run
//! can never meet a node holding a stale assignment.

use log::{info, warn};

use crate::app::ports::{RelayPort, SensorPort};
use crate::config::{SystemConfig, MAX_BUS_ADDRESS};
use crate::error::FrameError;

use super::codec::{self, Frame, Payload, Request, Response};
use super::{encode_sensor_values, Command, NodeInfo, Status, PROTOCOL_VERSION};

/// Port type reported by `GetPorts` until per-port configuration exists.
const PORT_TYPE_OTHER: u8 = 0xFF;

/// Static description of this node's hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIdentity {
    pub firmware: (u8, u8, u8),
    pub hardware_revision: u8,
    pub sensor_count: u8,
}

impl NodeIdentity {
    /// Identity built from the crate version.
    pub fn from_build(hardware_revision: u8, sensor_count: u8) -> Self {
        let part = |s: &str| s.parse::<u8>().unwrap_or(0);
        Self {
            firmware: (
                part(env!("CARGO_PKG_VERSION_MAJOR")),
                part(env!("CARGO_PKG_VERSION_MINOR")),
                part(env!("CARGO_PKG_VERSION_PATCH")),
            ),
            hardware_revision,
            sensor_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlaveNode {
    default_address: u8,
    address_base: u8,
    identity: NodeIdentity,
    assigned: Option<u8>,
    upstream: bool,
    downstream: bool,
}

impl SlaveNode {
    pub fn new(config: &SystemConfig, identity: NodeIdentity) -> Self {
        Self {
            default_address: config.default_address,
            address_base: config.address_base,
            identity,
            assigned: None,
            upstream: false,
            downstream: false,
        }
    }

    pub fn assigned_address(&self) -> Option<u8> {
        self.assigned
    }

    /// Address this node currently answers on (default while unassigned).
    pub fn listening_address(&self) -> u8 {
        self.assigned.unwrap_or(self.default_address)
    }

    pub fn downstream_asserted(&self) -> bool {
        self.downstream
    }

    /// Whether a frame sent to `address` reaches this node.
    pub fn accepts(&self, address: u8) -> bool {
        self.upstream && address == self.listening_address()
    }

    /// Feed the current upstream input level.
    ///
    /// Returns `true` when the downstream output changed as a result.
    pub fn set_upstream(&mut self, asserted: bool) -> bool {
        if asserted == self.upstream {
            return false;
        }
        self.upstream = asserted;
        if asserted {
            info!("Slave: enabled by upstream, listening on 0x{:02x}", self.default_address);
            return false;
        }
        let was_downstream = self.downstream;
        if let Some(addr) = self.assigned.take() {
            info!("Slave: upstream dropped, releasing address 0x{:02x}", addr);
        }
        self.downstream = false;
        was_downstream
    }

    /// Handle one raw request frame and return the encoded response.
    pub fn handle_frame(
        &mut self,
        bytes: &[u8],
        uptime_ms: u64,
        hw: &mut (impl RelayPort + SensorPort),
    ) -> Frame {
        let response = match codec::decode_request(bytes) {
            Ok(request) => self.handle(&request, uptime_ms, hw),
            Err(FrameError::UnknownCode(code)) => {
                warn!("Slave: unknown command 0x{:02x}", code);
                Response::status(Status::UnknownCommand)
            }
            Err(e) => {
                warn!("Slave: rejected frame ({})", e);
                Response::status(Status::InvalidParameters)
            }
        };
        // Responses are built from bounded payloads; an empty frame is the
        // fallback the master will read as a timeout.
        codec::encode_response(&response).unwrap_or_default()
    }

    /// Handle one decoded request.
    pub fn handle(
        &mut self,
        request: &Request,
        uptime_ms: u64,
        hw: &mut (impl RelayPort + SensorPort),
    ) -> Response {
        let p = request.payload.as_slice();
        match request.command {
            Command::HelloUnassigned => {
                if self.assigned.is_some() {
                    return Response::status(Status::Busy);
                }
                let (major, minor, patch) = self.identity.firmware;
                Response::ok(&[
                    major,
                    minor,
                    patch,
                    self.identity.hardware_revision,
                    hw.channel_count(),
                ])
            }
            Command::AssignAddress => match p {
                [addr] if self.valid_assignment(*addr) => {
                    self.assigned = Some(*addr);
                    self.downstream = true;
                    info!("Slave: adopted address 0x{:02x}, downstream enabled", addr);
                    Response::ok(&[*addr])
                }
                _ => Response::status(Status::InvalidParameters),
            },
            Command::EnableDownstream => match (p, self.assigned) {
                ([flag], Some(_)) => {
                    self.downstream = *flag != 0;
                    Response::ok(&[u8::from(self.downstream)])
                }
                _ => Response::status(Status::InvalidParameters),
            },
            Command::Ping => Response::ok(&[]),
            Command::GetNodeInfo => {
                let info = NodeInfo {
                    node_id: self
                        .assigned
                        .map_or(0, |a| a.saturating_sub(self.address_base)),
                    firmware: self.identity.firmware,
                    hardware_revision: self.identity.hardware_revision,
                    port_count: hw.channel_count(),
                    sensor_count: self.identity.sensor_count,
                    flags: (u16::from(PROTOCOL_VERSION.0) << 8) | u16::from(PROTOCOL_VERSION.1),
                    uptime_hours: (uptime_ms / 3_600_000).min(255) as u8,
                };
                Response::ok(&info.to_bytes())
            }
            Command::GetPorts => {
                let mut out = Payload::new();
                let _ = out.push(hw.channel_count());
                for ch in 0..hw.channel_count() {
                    if out.extend_from_slice(&[ch, PORT_TYPE_OTHER]).is_err() {
                        break;
                    }
                }
                Response::ok(&out)
            }
            Command::GetPortState => match p {
                [ch] => match hw.relay_state(*ch) {
                    // Current sensing is not fitted; report 0 mA.
                    Some(on) => Response::ok(&[*ch, u8::from(on), 0, 0]),
                    None => Response::status(Status::InvalidParameters),
                },
                _ => Response::status(Status::InvalidParameters),
            },
            Command::SetPortState => match p {
                [ch, on] if *ch < hw.channel_count() => {
                    hw.set_relay(*ch, *on != 0);
                    match hw.relay_state(*ch) {
                        Some(state) if state == (*on != 0) => {
                            Response::ok(&[*ch, u8::from(state)])
                        }
                        _ => Response::status(Status::HardwareError),
                    }
                }
                _ => Response::status(Status::InvalidParameters),
            },
            Command::GetSensorValues => {
                let snapshot = hw.read_snapshot();
                Response::ok(&encode_sensor_values(&snapshot))
            }
        }
    }

    fn valid_assignment(&self, addr: u8) -> bool {
        addr != self.default_address && (0x08..=MAX_BUS_ADDRESS).contains(&addr)
    }
}
