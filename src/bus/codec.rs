//! Frame encoding and decoding.
//!
//! Frames are fixed-capacity (`heapless`) so the codec never allocates and
//! can run on the Slave's receive path unchanged.

use crate::error::FrameError;

use super::{Command, Status};

/// Largest payload either direction may carry.
pub const MAX_PAYLOAD: usize = 32;
/// Header (code + len) + payload + checksum.
pub const MAX_FRAME: usize = MAX_PAYLOAD + 3;

pub type Payload = heapless::Vec<u8, MAX_PAYLOAD>;
pub type Frame = heapless::Vec<u8, MAX_FRAME>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub payload: Payload,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            payload: Payload::new(),
        }
    }

    /// Request with a payload.  Fails only if `payload` exceeds [`MAX_PAYLOAD`].
    pub fn with_payload(command: Command, payload: &[u8]) -> Result<Self, FrameError> {
        Ok(Self {
            command,
            payload: Payload::from_slice(payload).map_err(|()| FrameError::Oversize)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub payload: Payload,
}

impl Response {
    pub fn ok(payload: &[u8]) -> Self {
        Self {
            status: Status::Ok,
            // Callers build payloads from fixed-size records well under the cap.
            payload: Payload::from_slice(payload).unwrap_or_default(),
        }
    }

    pub fn status(status: Status) -> Self {
        Self {
            status,
            payload: Payload::new(),
        }
    }
}

/// XOR of every byte.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

fn encode(code: u8, payload: &[u8]) -> Result<Frame, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::Oversize);
    }
    let mut frame = Frame::new();
    // Capacity was checked above; the pushes cannot fail.
    let _ = frame.push(code);
    let _ = frame.push(payload.len() as u8);
    let _ = frame.extend_from_slice(payload);
    let sum = checksum(&frame);
    let _ = frame.push(sum);
    Ok(frame)
}

/// Validate framing and return `(code, payload)`.
fn decode(bytes: &[u8]) -> Result<(u8, &[u8]), FrameError> {
    if bytes.len() < 3 {
        return Err(FrameError::TooShort);
    }
    let len = usize::from(bytes[1]);
    if len > MAX_PAYLOAD {
        return Err(FrameError::Oversize);
    }
    if bytes.len() < len + 3 {
        return Err(FrameError::Truncated);
    }
    // Trailing bytes beyond the checksum are ignored (I²C reads are padded).
    if checksum(&bytes[..len + 2]) != bytes[len + 2] {
        return Err(FrameError::Checksum);
    }
    Ok((bytes[0], &bytes[2..2 + len]))
}

pub fn encode_request(request: &Request) -> Result<Frame, FrameError> {
    encode(request.command as u8, &request.payload)
}

pub fn encode_response(response: &Response) -> Result<Frame, FrameError> {
    encode(response.status as u8, &response.payload)
}

pub fn decode_request(bytes: &[u8]) -> Result<Request, FrameError> {
    let (code, payload) = decode(bytes)?;
    let command = Command::try_from(code).map_err(FrameError::UnknownCode)?;
    Request::with_payload(command, payload)
}

pub fn decode_response(bytes: &[u8]) -> Result<Response, FrameError> {
    let (code, payload) = decode(bytes)?;
    let status = Status::try_from(code).map_err(FrameError::UnknownCode)?;
    Ok(Response {
        status,
        payload: Payload::from_slice(payload).map_err(|()| FrameError::Oversize)?,
    })
}
