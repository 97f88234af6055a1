//! TerraHub Firmware — Main Entry Point
//!
//! One image runs on every board; the presence-detect input decides at
//! boot whether this node is the chain's Controller or one of its Slaves.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  HardwareAdapter   LogEventSink   NvsAdapter    Esp32Time      │
//! │  (Sensor+Relay)    (EventSink)    (Config+Rules) (TimePort)    │
//! │  I2cMaster + PresenceGpio (ChainLink)   admin queue            │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              AppService (pure logic)                   │    │
//! │  │  RuleEngine · Enumerator · NodeTable · LoopScheduler   │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{anyhow, Result};
use esp_idf_hal::delay::FreeRtos;
use log::{error, info, warn};

use terrahub::adapters::admin;
use terrahub::adapters::hardware::HardwareAdapter;
use terrahub::adapters::i2c_bus::{I2cMaster, I2cSlavePump};
use terrahub::adapters::log_sink::LogEventSink;
use terrahub::adapters::nvs::NvsAdapter;
use terrahub::adapters::presence_gpio::PresenceGpio;
use terrahub::adapters::time::Esp32TimeAdapter;
use terrahub::app::ports::{RelayPort, TimePort};
use terrahub::app::service::AppService;
use terrahub::bus::{detect_role, ChainLink, NodeIdentity, PresenceLine, Role, SlaveNode};
use terrahub::config::{self, SystemConfig};
use terrahub::drivers::gpio::{self, GpioPin};
use terrahub::drivers::watchdog::Watchdog;
use terrahub::pins;

/// Controller loop yield.
const LOOP_YIELD_MS: u32 = 10;
/// Slaves poll faster so responses land inside the master's timeout.
const SLAVE_YIELD_MS: u32 = 1;
const HARDWARE_REVISION: u8 = 1;
/// Sensors fitted on this board revision.
const SENSOR_COUNT: u8 = 0;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  TerraHub v{}                        ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Config (polarity is needed before any pin moves) ───
    let mut nvs = match NvsAdapter::new() {
        Ok(n) => Some(n),
        Err(e) => {
            warn!("NVS init failed ({}), running with defaults and no persistence", e);
            None
        }
    };
    let config = nvs
        .as_ref()
        .map(config::load_or_default)
        .unwrap_or_default();

    // ── 3. Pins: relays off, downstream released ──────────────
    if let Err(e) = gpio::init_peripherals(&config) {
        // In production the watchdog resets us after its timeout.
        error!("GPIO init failed: {} — halting", e);
        #[allow(clippy::empty_loop)]
        loop {}
    }
    let mut hw = HardwareAdapter::from_pins(GpioPin::relay_outputs(), &config);
    hw.all_off();
    let mut watchdog = Watchdog::default();

    // ── 4. Role ───────────────────────────────────────────────
    let mut presence = PresenceGpio::new(
        GpioPin::input_pullup(pins::SYNC_IN_GPIO),
        GpioPin::output(pins::SYNC_OUT_GPIO),
        config.presence_active_low,
    );
    let clock = Esp32TimeAdapter::new();

    match detect_role(&mut presence) {
        Role::Controller => run_controller(config, hw, presence, clock, nvs.as_mut(), watchdog),
        Role::Slave => {
            run_slave(&config, &mut hw, &mut presence, &clock, &mut watchdog);
            Ok(())
        }
    }
}

fn run_controller(
    config: SystemConfig,
    mut hw: HardwareAdapter<GpioPin>,
    presence: PresenceGpio<GpioPin, GpioPin>,
    mut clock: Esp32TimeAdapter,
    mut nvs: Option<&mut NvsAdapter>,
    mut watchdog: Watchdog,
) -> Result<()> {
    let master = I2cMaster::new().map_err(|e| anyhow!("I2C master init failed: {e}"))?;
    let mut link = ChainLink::new(master, presence);
    let mut sink = LogEventSink::new();
    let mut app = AppService::new(config, clock.now_ms());

    // ── Enumerate, then rules ─────────────────────────────────
    app.enumerate(&mut link, &mut clock, &mut sink);
    match nvs.as_deref() {
        Some(store) => app.start(store, &mut sink),
        None => warn!("No rule store, starting with an empty rule set"),
    }

    info!("Controller ready. Entering loop.");
    loop {
        let now = clock.now_ms();
        admin::drain_queue(now, &mut app, &mut hw, &mut link, &mut sink);
        app.poll(now, &mut hw, &mut link, &mut sink);
        app.reenumerate_if_needed(&mut link, &mut clock, &mut sink);
        if let Some(store) = nvs.as_deref_mut() {
            app.auto_save_if_needed(now, store, &mut sink);
        }
        watchdog.feed();
        FreeRtos::delay_ms(LOOP_YIELD_MS);
    }
}

fn run_slave(
    config: &SystemConfig,
    hw: &mut HardwareAdapter<GpioPin>,
    presence: &mut PresenceGpio<GpioPin, GpioPin>,
    clock: &Esp32TimeAdapter,
    watchdog: &mut Watchdog,
) {
    let mut node = SlaveNode::new(config, NodeIdentity::from_build(HARDWARE_REVISION, SENSOR_COUNT));
    let mut pump = I2cSlavePump::new();
    info!("Slave ready. Waiting for enumeration.");

    loop {
        node.set_upstream(presence.upstream_asserted());
        if presence.downstream_asserted() != node.downstream_asserted() {
            presence.set_downstream(node.downstream_asserted());
        }
        pump.poll(&mut node, clock.now_ms(), hw);
        watchdog.feed();
        FreeRtos::delay_ms(SLAVE_YIELD_MS);
    }
}
