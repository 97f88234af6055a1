//! Inter-node bus protocol.
//!
//! Every exchange is a single request/response pair addressed to one
//! 7-bit bus address:
//!
//! ```text
//!  request : [ command | len | payload (len bytes) | xor ]
//!  response: [ status  | len | payload (len bytes) | xor ]
//! ```
//!
//! `xor` is the XOR of every preceding byte in the frame.  Unassigned Slaves
//! all listen on the same default address; the presence-detect line (see
//! [`presence`]) guarantees only one of them is enabled at a time.
//!
//! The transport ([`BusPort`]) moves raw frames and never retries.  Retry
//! policy belongs to the caller (the enumeration state machine, the health
//! check).

pub mod codec;
pub mod presence;
pub mod slave;
#[cfg(not(target_os = "espidf"))]
pub mod sim;

use core::fmt;

use crate::error::BusError;
use crate::rules::{SensorKey, SensorSnapshot};

pub use codec::{Frame, Payload, Request, Response, MAX_FRAME, MAX_PAYLOAD};
pub use presence::{detect_role, PresenceLine, Role};
pub use slave::{NodeIdentity, SlaveNode};

/// Protocol version advertised in node info.
pub const PROTOCOL_VERSION: (u8, u8) = (1, 0);

// ───────────────────────────────────────────────────────────────
// Command / status codes
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Sent to the default address: "is an unassigned node listening?"
    HelloUnassigned = 0x01,
    /// Sent to the default address with `[new_address]`.
    AssignAddress = 0x02,
    /// `[1|0]`: explicitly drive the node's downstream presence output.
    EnableDownstream = 0x03,
    Ping = 0x10,
    GetNodeInfo = 0x11,
    GetPorts = 0x12,
    /// `[channel]` → `[channel, on, current_lo, current_hi]`
    GetPortState = 0x13,
    /// `[channel, on]` → `[channel, on]`
    SetPortState = 0x14,
    GetSensorValues = 0x20,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        Ok(match code {
            0x01 => Self::HelloUnassigned,
            0x02 => Self::AssignAddress,
            0x03 => Self::EnableDownstream,
            0x10 => Self::Ping,
            0x11 => Self::GetNodeInfo,
            0x12 => Self::GetPorts,
            0x13 => Self::GetPortState,
            0x14 => Self::SetPortState,
            0x20 => Self::GetSensorValues,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    UnknownCommand = 0x01,
    InvalidParameters = 0x02,
    Busy = 0x03,
    HardwareError = 0x04,
    GeneralError = 0xFF,
}

impl TryFrom<u8> for Status {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        Ok(match code {
            0x00 => Self::Ok,
            0x01 => Self::UnknownCommand,
            0x02 => Self::InvalidParameters,
            0x03 => Self::Busy,
            0x04 => Self::HardwareError,
            0xFF => Self::GeneralError,
            other => return Err(other),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02x})", self, *self as u8)
    }
}

// ───────────────────────────────────────────────────────────────
// Transport port
// ───────────────────────────────────────────────────────────────

/// Raw frame transport owned exclusively by the Controller.
///
/// One call is one bus transaction: write `request` to `address`, then read
/// the response frame.  `Err(BusError::Timeout)` means nobody answered.
pub trait BusPort {
    fn send(&mut self, address: u8, request: &[u8], timeout_ms: u32) -> Result<Frame, BusError>;
}

/// The Controller's whole view of the chain: the shared bus plus its own
/// presence-detect pins.  Enumeration needs both at once.
pub struct ChainLink<B, P> {
    pub bus: B,
    pub presence: P,
}

impl<B, P> ChainLink<B, P> {
    pub fn new(bus: B, presence: P) -> Self {
        Self { bus, presence }
    }
}

impl<B: BusPort, P> BusPort for ChainLink<B, P> {
    fn send(&mut self, address: u8, request: &[u8], timeout_ms: u32) -> Result<Frame, BusError> {
        self.bus.send(address, request, timeout_ms)
    }
}

impl<B, P: PresenceLine> PresenceLine for ChainLink<B, P> {
    fn upstream_asserted(&mut self) -> bool {
        self.presence.upstream_asserted()
    }

    fn set_downstream(&mut self, asserted: bool) {
        self.presence.set_downstream(asserted);
    }
}

/// Encode, send, decode, and map a non-OK status to [`BusError::Nack`].
pub fn transact(
    bus: &mut impl BusPort,
    address: u8,
    request: &Request,
    timeout_ms: u32,
) -> Result<Response, BusError> {
    let frame = codec::encode_request(request)?;
    let raw = bus.send(address, &frame, timeout_ms)?;
    let response = codec::decode_response(&raw)?;
    if response.status != Status::Ok {
        return Err(BusError::Nack(response.status as u8));
    }
    Ok(response)
}

// ───────────────────────────────────────────────────────────────
// Typed payloads
// ───────────────────────────────────────────────────────────────

/// `GetNodeInfo` response body (10 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: u8,
    pub firmware: (u8, u8, u8),
    pub hardware_revision: u8,
    pub port_count: u8,
    pub sensor_count: u8,
    pub flags: u16,
    pub uptime_hours: u8,
}

impl NodeInfo {
    pub const LEN: usize = 10;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let [flags_lo, flags_hi] = self.flags.to_le_bytes();
        [
            self.node_id,
            self.firmware.0,
            self.firmware.1,
            self.firmware.2,
            self.hardware_revision,
            self.port_count,
            self.sensor_count,
            flags_lo,
            flags_hi,
            self.uptime_hours,
        ]
    }

    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        if b.len() < Self::LEN {
            return None;
        }
        Some(Self {
            node_id: b[0],
            firmware: (b[1], b[2], b[3]),
            hardware_revision: b[4],
            port_count: b[5],
            sensor_count: b[6],
            flags: u16::from_le_bytes([b[7], b[8]]),
            uptime_hours: b[9],
        })
    }
}

/// Sensor type codes used in `GetSensorValues` records.
const SENSOR_TEMPERATURE: u8 = 0x01;
const SENSOR_HUMIDITY: u8 = 0x02;
const SENSOR_LIGHT: u8 = 0x03;

/// Bytes per record: `[type, value_lo, value_hi, reserved]`.
const SENSOR_RECORD_LEN: usize = 4;

/// Encode a snapshot as `[count, records…]`.
///
/// Temperature is a signed value in tenths of a degree, humidity unsigned
/// tenths of a percent, light whole lux (saturating at `u16::MAX`).
pub fn encode_sensor_values(snapshot: &SensorSnapshot) -> Payload {
    let mut out = Payload::new();
    let _ = out.push(0);
    let mut count = 0u8;
    for (key, value) in snapshot.iter() {
        let (code, raw) = match key {
            SensorKey::TemperatureC => (SENSOR_TEMPERATURE, ((value * 10.0).round() as i16) as u16),
            SensorKey::HumidityPercent => (SENSOR_HUMIDITY, (value * 10.0).round() as u16),
            SensorKey::LightLevelLux => (SENSOR_LIGHT, value.round() as u16),
        };
        let [lo, hi] = raw.to_le_bytes();
        if out.extend_from_slice(&[code, lo, hi, 0]).is_err() {
            break;
        }
        count += 1;
    }
    out[0] = count;
    out
}

/// Decode a `GetSensorValues` body.  Unknown sensor types are skipped.
pub fn decode_sensor_values(payload: &[u8]) -> Option<SensorSnapshot> {
    let (&count, records) = payload.split_first()?;
    if records.len() < usize::from(count) * SENSOR_RECORD_LEN {
        return None;
    }
    let mut snapshot = SensorSnapshot::new();
    for rec in records.chunks_exact(SENSOR_RECORD_LEN).take(usize::from(count)) {
        let raw = u16::from_le_bytes([rec[1], rec[2]]);
        match rec[0] {
            SENSOR_TEMPERATURE => snapshot.insert(SensorKey::TemperatureC, f32::from(raw as i16) / 10.0),
            SENSOR_HUMIDITY => snapshot.insert(SensorKey::HumidityPercent, f32::from(raw) / 10.0),
            SENSOR_LIGHT => snapshot.insert(SensorKey::LightLevelLux, f32::from(raw)),
            _ => {}
        }
    }
    Some(snapshot)
}
