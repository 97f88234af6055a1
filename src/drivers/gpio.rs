//! One-shot GPIO configuration and an `embedded-hal` pin over raw ESP-IDF
//! calls.
//!
//! Relay outputs and the presence-detect pins are plain digital I/O, so
//! they are configured once at boot with `gpio_config` and driven through
//! [`GpioPin`], which implements `embedded_hal::digital::{OutputPin,
//! InputPin}`.  Drivers above this layer are generic over those traits.
//!
//! On host builds the pin keeps its level in memory; tests can drive an
//! input with [`GpioPin::set_level`].

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use embedded_hal::digital::{ErrorKind, ErrorType, InputPin, OutputPin};

use crate::config::SystemConfig;
use crate::pins;

// ── Error types ───────────────────────────────────────────────

/// Errors during one-shot peripheral initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    GpioConfigFailed(i32),
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::GpioConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
        }
    }
}

/// A rejected level write or read (ESP-IDF return code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioError(pub i32);

impl embedded_hal::digital::Error for GpioError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

// ── Init ──────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
use log::info;

/// Configure relay outputs and the presence-detect pins.
///
/// Every output is latched at its idle level (relay off, downstream
/// released) before it is switched to output mode, so nothing glitches
/// on at boot.
#[cfg(target_os = "espidf")]
pub fn init_peripherals(config: &SystemConfig) -> Result<(), HwInitError> {
    let relay_idle = u32::from(config.relay_polarity.level_for(false));
    let sync_idle = u32::from(config.presence_active_low);
    let outputs = pins::RELAY_GPIOS
        .iter()
        .map(|&pin| (pin, relay_idle))
        .chain([(pins::SYNC_OUT_GPIO, sync_idle)]);

    // SAFETY: Called once from main() before the loop starts; single-threaded.
    unsafe {
        for (pin, idle) in outputs {
            gpio_set_level(pin, idle);
            let cfg = gpio_config_t {
                pin_bit_mask: 1u64 << pin,
                mode: gpio_mode_t_GPIO_MODE_OUTPUT,
                pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
                pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
                intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
            };
            let ret = gpio_config(&cfg);
            if ret != ESP_OK as esp_err_t {
                return Err(HwInitError::GpioConfigFailed(ret));
            }
            gpio_set_level(pin, idle);
        }

        let sync_in = gpio_config_t {
            pin_bit_mask: 1u64 << pins::SYNC_IN_GPIO,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        let ret = gpio_config(&sync_in);
        if ret != ESP_OK as esp_err_t {
            return Err(HwInitError::GpioConfigFailed(ret));
        }
    }
    info!("gpio: relays + presence pins configured");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals(_config: &SystemConfig) -> Result<(), HwInitError> {
    log::info!("gpio(sim): peripheral init skipped");
    Ok(())
}

// ── Pin ───────────────────────────────────────────────────────

/// A configured GPIO, usable as either direction.
#[derive(Debug)]
pub struct GpioPin {
    gpio: i32,
    #[cfg(not(target_os = "espidf"))]
    level: bool,
}

impl GpioPin {
    /// Output pin; initial level low.
    pub fn output(gpio: i32) -> Self {
        Self {
            gpio,
            #[cfg(not(target_os = "espidf"))]
            level: false,
        }
    }

    /// Input pin with pull-up; idles high.
    pub fn input_pullup(gpio: i32) -> Self {
        Self {
            gpio,
            #[cfg(not(target_os = "espidf"))]
            level: true,
        }
    }

    pub fn gpio(&self) -> i32 {
        self.gpio
    }

    /// One output pin per relay channel, in channel order.
    pub fn relay_outputs() -> Vec<Self> {
        pins::RELAY_GPIOS.iter().map(|&g| Self::output(g)).collect()
    }

    #[cfg(target_os = "espidf")]
    fn write(&mut self, high: bool) -> Result<(), GpioError> {
        // SAFETY: the pin was configured as an output in init_peripherals();
        // main-loop access only.
        let ret = unsafe { gpio_set_level(self.gpio, u32::from(high)) };
        if ret != ESP_OK as esp_err_t {
            return Err(GpioError(ret));
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn write(&mut self, high: bool) -> Result<(), GpioError> {
        self.level = high;
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn read(&self) -> bool {
        // SAFETY: gpio_get_level is a read-only register access.
        (unsafe { gpio_get_level(self.gpio) }) != 0
    }

    #[cfg(not(target_os = "espidf"))]
    fn read(&self) -> bool {
        self.level
    }

    /// Current level as last written (host only).
    #[cfg(not(target_os = "espidf"))]
    pub fn level(&self) -> bool {
        self.level
    }

    /// Drive the simulated level of an input (host only).
    #[cfg(not(target_os = "espidf"))]
    pub fn set_level(&mut self, high: bool) {
        self.level = high;
    }
}

impl ErrorType for GpioPin {
    type Error = GpioError;
}

impl OutputPin for GpioPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true)
    }
}

impl InputPin for GpioPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.read())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.read())
    }
}
