//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter         | Implements            | Connects to                 |
//! |-----------------|-----------------------|-----------------------------|
//! | `admin`         | (drives AppService)   | HTTP task via channels      |
//! | `hardware`      | SensorPort, RelayPort | Relay GPIOs, SensorHub      |
//! | `i2c_bus`       | BusPort               | ESP32 I²C (master / slave)  |
//! | `log_sink`      | EventSink             | Serial log output           |
//! | `nvs`           | ConfigPort, RuleStore | NVS / in-memory store       |
//! |                 | StoragePort           |                             |
//! | `presence_gpio` | PresenceLine          | SYNC_IN / SYNC_OUT GPIOs    |
//! | `time`          | TimePort              | ESP32 system timer          |

pub mod admin;
pub mod hardware;
#[cfg(target_os = "espidf")]
pub mod i2c_bus;
pub mod log_sink;
pub mod nvs;
pub mod presence_gpio;
pub mod time;
