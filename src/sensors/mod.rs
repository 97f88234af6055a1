//! Sensor subsystem — the aggregating [`SensorHub`].
//!
//! The hub caches the latest value per [`SensorKey`].  Values arrive from
//! two directions: local drivers call [`SensorHub::record`], and the
//! Administrative API can inject readings for boards without sensors
//! fitted.  Each poll tick takes an immutable [`SensorSnapshot`] copy.
//!
//! A key with no reading yet is simply absent from the snapshot.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::app::ports::SensorPort;
use crate::rules::{SensorKey, SensorSnapshot};

/// Partial set of readings, as sent by the UI's sensor override form.
/// Fields left out keep their previous value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SensorReadings {
    pub temperature_c: Option<f32>,
    pub humidity_percent: Option<f32>,
    pub light_level_lux: Option<f32>,
}

impl SensorReadings {
    fn entries(&self) -> [(SensorKey, Option<f32>); 3] {
        [
            (SensorKey::TemperatureC, self.temperature_c),
            (SensorKey::HumidityPercent, self.humidity_percent),
            (SensorKey::LightLevelLux, self.light_level_lux),
        ]
    }
}

#[derive(Debug, Default)]
pub struct SensorHub {
    latest: SensorSnapshot,
}

impl SensorHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fresh reading.  NaN (a failed conversion) clears the key.
    pub fn record(&mut self, key: SensorKey, value: f32) {
        self.latest.insert(key, value);
    }

    /// Merge injected readings over the cache.
    pub fn inject(&mut self, readings: &SensorReadings) {
        for (key, value) in readings.entries() {
            if let Some(v) = value {
                debug!("Sensors: injected {} = {:.2}", key, v);
                self.record(key, v);
            }
        }
    }

    /// Immutable copy for one poll cycle.
    pub fn snapshot(&self) -> SensorSnapshot {
        self.latest.clone()
    }
}

impl SensorPort for SensorHub {
    fn read_snapshot(&mut self) -> SensorSnapshot {
        self.snapshot()
    }

    fn inject_readings(&mut self, readings: &SensorReadings) {
        self.inject(readings);
    }
}
