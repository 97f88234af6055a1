//! Unified error types for the TerraHub firmware.
//!
//! A single `Error` enum that every subsystem can convert into, keeping
//! the control loop's error handling uniform.  All variants are `Copy` so
//! they can be passed through the enumeration state machine and the rule
//! router without allocation.
//!
//! None of these ever terminate the process: callers log them and fall
//! back to a safe state (relay left as-is, node marked unreachable, rule
//! skipped).

use core::fmt;

use crate::app::ports::{ConfigError, StorageError};

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A bus transaction failed.
    Bus(BusError),
    /// A relay command could not be carried out.
    Relay(RelayError),
    /// Persistent storage failed.
    Storage(StorageError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "bus: {e}"),
            Self::Relay(e) => write!(f, "relay: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Bus errors
// ---------------------------------------------------------------------------

/// Failure of a single request/response exchange on the shared bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// Nobody answered within the transaction timeout.
    Timeout,
    /// The address was acknowledged but the node reported a non-OK status.
    Nack(u8),
    /// More than one node drove a response (should be impossible while
    /// presence gating works).
    Collision,
    /// A response arrived but failed framing checks.
    Corrupt(FrameError),
    /// Driver-level failure (ESP-IDF error code or simulated fault).
    Io(i32),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Nack(status) => write!(f, "nack (status 0x{status:02x})"),
            Self::Collision => write!(f, "bus collision"),
            Self::Corrupt(e) => write!(f, "corrupt frame: {e}"),
            Self::Io(rc) => write!(f, "driver error {rc}"),
        }
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

impl From<FrameError> for BusError {
    fn from(e: FrameError) -> Self {
        Self::Corrupt(e)
    }
}

/// Framing problems detected while decoding a bus frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the fixed header + checksum.
    TooShort,
    /// Length byte promises more payload than was received.
    Truncated,
    /// Length byte exceeds the protocol maximum.
    Oversize,
    /// XOR checksum mismatch.
    Checksum,
    /// Command or status byte is not part of the protocol.
    UnknownCode(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "frame too short"),
            Self::Truncated => write!(f, "frame truncated"),
            Self::Oversize => write!(f, "payload too large"),
            Self::Checksum => write!(f, "checksum mismatch"),
            Self::UnknownCode(c) => write!(f, "unknown code 0x{c:02x}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Relay errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    /// Channel index is not below the configured channel count.
    ChannelOutOfRange(u8),
    /// The output pin rejected the write.
    PinWriteFailed(u8),
    /// Forward target is not a healthy node in the Node Table.
    UnknownNode(u8),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelOutOfRange(ch) => write!(f, "channel {ch} out of range"),
            Self::PinWriteFailed(ch) => write!(f, "pin write failed on channel {ch}"),
            Self::UnknownNode(pos) => write!(f, "no healthy node at chain position {pos}"),
        }
    }
}

impl From<RelayError> for Error {
    fn from(e: RelayError) -> Self {
        Self::Relay(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
