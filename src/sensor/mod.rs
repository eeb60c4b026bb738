//! # Sensor Module
//!
//! Temperature sources for the uplink scheduler, selected at startup.
//!
//! Real sensor drivers live outside this crate; the sources here are a
//! deterministic simulation and the Linux thermal-zone interface.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{SensorConfig, SensorKind};
use crate::error::{Result, UplinkError};

/// Capability to read one temperature sample
#[cfg_attr(test, mockall::automock)]
pub trait TemperatureSensor {
    /// Current temperature in degrees Celsius
    fn read_temperature(&mut self) -> Result<f32>;
}

/// Deterministic temperature source drifting around a baseline
///
/// Produces a slow triangle wave of ±1 °C in 0.1 °C steps so consecutive
/// uplinks are distinguishable on the network server.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    baseline: f32,
    readings: u32,
}

impl SimulatedSensor {
    /// Half-period of the drift, in readings
    const DRIFT_STEPS: u32 = 10;

    pub fn new(baseline: f32) -> Self {
        Self { baseline, readings: 0 }
    }
}

impl TemperatureSensor for SimulatedSensor {
    fn read_temperature(&mut self) -> Result<f32> {
        let phase = self.readings % (2 * Self::DRIFT_STEPS);
        self.readings = self.readings.wrapping_add(1);

        let offset = if phase <= Self::DRIFT_STEPS {
            phase as f32
        } else {
            (2 * Self::DRIFT_STEPS - phase) as f32
        };
        Ok(self.baseline + offset / 10.0)
    }
}

/// Linux thermal zone (`/sys/class/thermal/thermal_zoneN/temp`, millidegrees)
#[derive(Debug, Clone)]
pub struct ThermalZoneSensor {
    path: PathBuf,
}

impl ThermalZoneSensor {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl TemperatureSensor for ThermalZoneSensor {
    fn read_temperature(&mut self) -> Result<f32> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            UplinkError::Sensor(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        let millidegrees: i64 = raw.trim().parse().map_err(|e| {
            UplinkError::Sensor(format!(
                "Invalid reading {:?} from {}: {}",
                raw.trim(),
                self.path.display(),
                e
            ))
        })?;

        Ok(millidegrees as f32 / 1000.0)
    }
}

/// Build the sensor selected by configuration
pub fn from_config(config: &SensorConfig) -> Box<dyn TemperatureSensor> {
    match config.kind {
        SensorKind::Simulated => {
            info!("Using simulated temperature sensor (baseline {} °C)", config.baseline_celsius);
            Box::new(SimulatedSensor::new(config.baseline_celsius))
        }
        SensorKind::ThermalZone => {
            info!("Reading temperature from {}", config.path);
            Box::new(ThermalZoneSensor::new(&config.path))
        }
    }
}
