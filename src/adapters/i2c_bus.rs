//! I²C transport for the inter-node bus (ESP-IDF legacy I²C driver).
//!
//! - [`I2cMaster`] is the Controller's [`BusPort`]: write the request,
//!   then poll-read a full-size frame until the Slave has loaded its
//!   response or the timeout expires.  An address NACK is reported as
//!   [`BusError::Timeout`] ("nobody answered").
//! - [`I2cSlavePump`] is the Slave side: it keeps the driver's own address
//!   in step with [`SlaveNode::listening_address`], feeds received frames
//!   through the node and loads the response into the TX FIFO.  While the
//!   node is gated off by its upstream neighbour the driver is removed
//!   entirely so the node does not even ACK.
//!
//! Reads are always [`MAX_FRAME`] bytes; the frame decoder ignores the
//! padding after the checksum.

use esp_idf_svc::sys::*;
use log::{debug, info, warn};

use crate::app::ports::{RelayPort, SensorPort};
use crate::bus::{BusPort, Frame, SlaveNode, MAX_FRAME};
use crate::error::BusError;
use crate::pins;

const PORT: i2c_port_t = 0;
const SLAVE_BUF_LEN: usize = 128;
/// First two bytes of an unloaded slave TX FIFO.
const IDLE_BYTE: u8 = 0xFF;
/// Gap between response polls.
const POLL_GAP_MS: u32 = 1;
/// How long a Slave keeps its old address after acknowledging a new one,
/// so the master can still read the acknowledgement.
const MOVE_GRACE_MS: u64 = 10;

fn ticks(ms: u32) -> u32 {
    ((u64::from(ms) * u64::from(configTICK_RATE_HZ)) / 1000).max(1) as u32
}

/// Install the driver on [`PORT`] as master or, with `Some(addr)`, slave.
fn install(slave_address: Option<u8>) -> Result<(), esp_err_t> {
    // SAFETY: the config struct is fully initialised before use and the
    // driver is only touched from the main task.
    unsafe {
        let mut conf = i2c_config_t::default();
        conf.sda_io_num = pins::I2C_SDA_GPIO;
        conf.scl_io_num = pins::I2C_SCL_GPIO;
        conf.sda_pullup_en = true;
        conf.scl_pullup_en = true;
        let (mode, rx, tx) = match slave_address {
            Some(addr) => {
                conf.mode = i2c_mode_t_I2C_MODE_SLAVE;
                conf.__bindgen_anon_1.slave.addr_10bit_en = 0;
                conf.__bindgen_anon_1.slave.slave_addr = u16::from(addr);
                conf.__bindgen_anon_1.slave.maximum_speed = pins::I2C_FREQ_HZ;
                (i2c_mode_t_I2C_MODE_SLAVE, SLAVE_BUF_LEN, SLAVE_BUF_LEN)
            }
            None => {
                conf.mode = i2c_mode_t_I2C_MODE_MASTER;
                conf.__bindgen_anon_1.master.clk_speed = pins::I2C_FREQ_HZ;
                (i2c_mode_t_I2C_MODE_MASTER, 0, 0)
            }
        };
        let ret = i2c_param_config(PORT, &conf);
        if ret != ESP_OK as esp_err_t {
            return Err(ret);
        }
        let ret = i2c_driver_install(PORT, mode, rx, tx, 0);
        if ret != ESP_OK as esp_err_t {
            return Err(ret);
        }
    }
    Ok(())
}

fn uninstall() {
    // SAFETY: deleting an installed driver from the owning task.
    let ret = unsafe { i2c_driver_delete(PORT) };
    if ret != ESP_OK as esp_err_t {
        warn!("I2C: driver delete returned {}", ret);
    }
}

// ── Master ────────────────────────────────────────────────────

pub struct I2cMaster {
    _private: (),
}

impl I2cMaster {
    pub fn new() -> Result<Self, BusError> {
        install(None).map_err(BusError::Io)?;
        info!("I2C: master on SDA={} SCL={} @ {} Hz", pins::I2C_SDA_GPIO, pins::I2C_SCL_GPIO, pins::I2C_FREQ_HZ);
        Ok(Self { _private: () })
    }
}

impl Drop for I2cMaster {
    fn drop(&mut self) {
        uninstall();
    }
}

fn map_err(ret: esp_err_t) -> BusError {
    // ESP_FAIL is a NACK on the address byte: nobody is listening there.
    if ret == ESP_FAIL as esp_err_t || ret == ESP_ERR_TIMEOUT as esp_err_t {
        BusError::Timeout
    } else {
        BusError::Io(ret)
    }
}

impl BusPort for I2cMaster {
    fn send(&mut self, address: u8, request: &[u8], timeout_ms: u32) -> Result<Frame, BusError> {
        // SAFETY: buffers outlive the blocking calls; master driver installed.
        let ret = unsafe {
            i2c_master_write_to_device(PORT, address, request.as_ptr(), request.len(), ticks(timeout_ms))
        };
        if ret != ESP_OK as esp_err_t {
            return Err(map_err(ret));
        }

        let mut buf = [0u8; MAX_FRAME];
        let mut waited = 0;
        loop {
            esp_idf_hal::delay::FreeRtos::delay_ms(POLL_GAP_MS);
            waited += POLL_GAP_MS;
            let ret = unsafe {
                i2c_master_read_from_device(PORT, address, buf.as_mut_ptr(), buf.len(), ticks(timeout_ms))
            };
            if ret != ESP_OK as esp_err_t {
                return Err(map_err(ret));
            }
            if buf[0] != IDLE_BYTE || buf[1] != IDLE_BYTE {
                return Ok(Frame::from_slice(&buf).unwrap_or_default());
            }
            if waited >= timeout_ms {
                debug!("I2C: 0x{:02x} never loaded a response", address);
                return Err(BusError::Timeout);
            }
        }
    }
}

// ── Slave ─────────────────────────────────────────────────────

pub struct I2cSlavePump {
    /// Address the driver is installed with; `None` while gated off.
    installed: Option<u8>,
    hold_until: u64,
}

impl Default for I2cSlavePump {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cSlavePump {
    pub fn new() -> Self {
        Self {
            installed: None,
            hold_until: 0,
        }
    }

    /// Bring the driver in line with the node's current state.
    fn sync(&mut self, node: &SlaveNode) {
        let wanted = Some(node.listening_address()).filter(|&a| node.accepts(a));
        if wanted == self.installed {
            return;
        }
        if self.installed.is_some() {
            uninstall();
            self.installed = None;
        }
        if let Some(addr) = wanted {
            match install(Some(addr)) {
                Ok(()) => {
                    info!("I2C: slave listening on 0x{:02x}", addr);
                    self.installed = Some(addr);
                }
                Err(e) => warn!("I2C: slave install at 0x{:02x} failed ({})", addr, e),
            }
        }
    }

    /// Serve at most one request.  Returns `true` if a frame was handled.
    pub fn poll(&mut self, node: &mut SlaveNode, uptime_ms: u64, hw: &mut (impl RelayPort + SensorPort)) -> bool {
        if uptime_ms >= self.hold_until {
            self.sync(node);
        }
        if self.installed.is_none() {
            return false;
        }

        let mut buf = [0u8; MAX_FRAME];
        // SAFETY: buffer outlives the call; slave driver installed above.
        let n = unsafe { i2c_slave_read_buffer(PORT, buf.as_mut_ptr(), buf.len(), ticks(POLL_GAP_MS)) };
        if n <= 0 {
            return false;
        }

        let before = node.listening_address();
        let frame = node.handle_frame(&buf[..n as usize], uptime_ms, hw);
        if !frame.is_empty() {
            unsafe {
                i2c_reset_tx_fifo(PORT);
                i2c_slave_write_buffer(PORT, frame.as_ptr(), frame.len() as i32, ticks(POLL_GAP_MS));
            }
        }
        if node.listening_address() != before {
            self.hold_until = uptime_ms + MOVE_GRACE_MS;
        }
        true
    }
}
