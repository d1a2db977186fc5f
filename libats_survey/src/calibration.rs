//! Calibration value objects and the collaborator interfaces this crate
//! consumes but does not implement.
//!
//! Calibration curve mathematics, XML measurement documents and the SQL
//! lookup store live in other tools; the traits here fix the data handed
//! across those seams.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::IoError;
use super::header::AtsHeader;

/// Sensor operating mode affecting calibration. Metronix coils use the
/// chopper in LF mode only; everything else defaults to off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChopperStatus {
    #[default]
    Off,
    On,
}

impl From<u8> for ChopperStatus {
    fn from(value: u8) -> Self {
        if value == 1 {
            Self::On
        } else {
            Self::Off
        }
    }
}

/// One calibration curve for a sensor at a chopper state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Calibration {
    pub sensor: String,
    pub serial: usize,
    pub chopper: ChopperStatus,
    pub units_frequency: String,
    pub units_amplitude: String,
    pub units_phase: String,
    #[serde(default)]
    pub frequencies: Vec<f64>,
    #[serde(default)]
    pub amplitudes: Vec<f64>,
    #[serde(default)]
    pub phases: Vec<f64>,
}

impl Calibration {
    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

/// Lookup of calibration curves, implemented by the calibration tools.
/// Returns None when no curve is on file for the sensor/serial/chopper
/// combination.
pub trait CalibrationSource {
    fn get_calibration(
        &self,
        sensor: &str,
        serial: usize,
        chopper: ChopperStatus,
    ) -> Option<Calibration>;
}

/// Writer of XML measurement documents, implemented by the XML tools.
pub trait MeasurementDocWriter {
    fn write_measurement_doc(&self, headers: &[AtsHeader]) -> Result<PathBuf, IoError>;
}

/// Small-value SQL lookup store, implemented by the database tools.
pub trait SqlLookup {
    fn query(&self, sql: &str) -> Vec<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chopper_from_header_byte() {
        assert_eq!(ChopperStatus::from(1), ChopperStatus::On);
        assert_eq!(ChopperStatus::from(0), ChopperStatus::Off);
        assert_eq!(ChopperStatus::from(7), ChopperStatus::Off);
    }

    #[test]
    fn test_empty_calibration() {
        let cal = Calibration::default();
        assert!(cal.is_empty());
    }
}
