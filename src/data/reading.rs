//! Decoded measurement values.

use std::fmt;

use super::MeasurementMode;

/// A decoded measurement.
///
/// `value` is `None` when the response could not be decoded, for example
/// because it was too short. `unit` and `mode` are plain strings so that
/// selector bytes outside the known table can still be reported (as the
/// hex byte and `"Unknown"`).
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reading {
    /// Calibrated value, rounded to two decimal places.
    pub value: Option<f64>,

    /// Unit of `value`, e.g. `mV`.
    pub unit: String,

    /// Measurement mode name, e.g. `DC Voltage`.
    pub mode: String,
}

impl Reading {
    /// Create a reading with a present value.
    pub fn new(value: f64, unit: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            value: Some(value),
            unit: unit.into(),
            mode: mode.into(),
        }
    }

    /// A reading with no value, unit or mode.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Whether a value was decoded.
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    /// The measurement mode, if `mode` names one of the supported modes.
    pub fn measurement_mode(&self) -> Option<MeasurementMode> {
        MeasurementMode::ALL
            .iter()
            .copied()
            .find(|m| m.name() == self.mode)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(value) => write!(f, "[{}] {} {}", self.mode, value, self.unit),
            None => write!(f, "[{}] --", self.mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent() {
        let reading = Reading::absent();
        assert!(!reading.is_present());
        assert!(reading.unit.is_empty());
        assert!(reading.mode.is_empty());
    }

    #[test]
    fn test_measurement_mode() {
        let reading = Reading::new(1.5, "mA", "DC Current");
        assert_eq!(reading.measurement_mode(), Some(MeasurementMode::DcCurrent));

        let unknown = Reading::new(1.0, "0x99", "Unknown");
        assert_eq!(unknown.measurement_mode(), None);
    }

    #[test]
    fn test_display() {
        let reading = Reading::new(12.34, "mV", "DC Voltage");
        assert_eq!(reading.to_string(), "[DC Voltage] 12.34 mV");
    }
}
