//! GPIO / peripheral pin assignments for the TerraHub node board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.  Controller and Slave nodes share one board, so
//! there is a single map for both roles.

// ---------------------------------------------------------------------------
// Inter-node bus (I²C)
// ---------------------------------------------------------------------------

pub const I2C_SDA_GPIO: i32 = 21;
pub const I2C_SCL_GPIO: i32 = 22;
/// Bus clock.  Conservative because the chain runs over board-to-board cable.
pub const I2C_FREQ_HZ: u32 = 100_000;

// ---------------------------------------------------------------------------
// Relay outputs OUT1..OUT5
// ---------------------------------------------------------------------------

/// Relay coil drivers, indexed by channel.
pub const RELAY_GPIOS: [i32; 5] = [32, 33, 25, 26, 27];

// ---------------------------------------------------------------------------
// Daisy-chain presence detect
// ---------------------------------------------------------------------------

/// Upstream presence input, pulled up.  Floating high means nothing is
/// connected upstream, i.e. this node is the Controller.
pub const SYNC_IN_GPIO: i32 = 16;
/// Downstream presence output into the next node's SYNC_IN.
pub const SYNC_OUT_GPIO: i32 = 17;

// ---------------------------------------------------------------------------
// Local sensors
// ---------------------------------------------------------------------------

/// DHT22 temperature / humidity data line.
pub const DHT_DATA_GPIO: i32 = 4;
