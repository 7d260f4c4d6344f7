//! Vital-sign readings as seen through the replica join

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A numeric vital captured on a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vital {
    PulseRate,
    Temperature,
    Systolic,
    Diastolic,
}

impl Vital {
    /// Column holding this vital in the replicated `vitals` table
    pub fn source_column(&self) -> &'static str {
        match self {
            Vital::PulseRate => "pulse_rate",
            Vital::Temperature => "temperature",
            Vital::Systolic => "blood_pressure_systolic",
            Vital::Diastolic => "blood_pressure_diastolic",
        }
    }

    /// Column holding the rounded mean in the aggregate relation
    pub fn average_column(&self) -> &'static str {
        match self {
            Vital::PulseRate => "avg_pulse_rate",
            Vital::Temperature => "avg_temperature",
            Vital::Systolic => "avg_systolic",
            Vital::Diastolic => "avg_diastolic",
        }
    }
}

impl fmt::Display for Vital {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source_column())
    }
}

/// One patient × reading row from the replica join, values as text.
///
/// Values stay raw so the builder can drop unparseable ones per row instead
/// of failing the whole join.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinedReading {
    pub patient_id: String,
    pub date_of_birth: Option<String>,
    pub pulse_rate: Option<String>,
    pub temperature: Option<String>,
    pub systolic: Option<String>,
    pub diastolic: Option<String>,
}

impl JoinedReading {
    pub fn new(patient_id: impl Into<String>, date_of_birth: Option<&str>) -> Self {
        Self {
            patient_id: patient_id.into(),
            date_of_birth: date_of_birth.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn with_vital(mut self, vital: Vital, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        match vital {
            Vital::PulseRate => self.pulse_rate = value,
            Vital::Temperature => self.temperature = value,
            Vital::Systolic => self.systolic = value,
            Vital::Diastolic => self.diastolic = value,
        }
        self
    }

    /// Raw text of a vital, if present
    pub fn raw(&self, vital: Vital) -> Option<&str> {
        match vital {
            Vital::PulseRate => self.pulse_rate.as_deref(),
            Vital::Temperature => self.temperature.as_deref(),
            Vital::Systolic => self.systolic.as_deref(),
            Vital::Diastolic => self.diastolic.as_deref(),
        }
    }

    /// Parsed value of a vital.
    ///
    /// `Ok(None)` when absent, `Err(raw)` when present but not numeric.
    pub fn value(&self, vital: Vital) -> Result<Option<Decimal>, &str> {
        match self.raw(vital) {
            None => Ok(None),
            Some(raw) => parse_decimal(raw).map(Some).ok_or(raw),
        }
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_vital_values() {
        let reading = JoinedReading::new("p-1", Some("1990-01-01"))
            .with_vital(Vital::PulseRate, "72")
            .with_vital(Vital::Temperature, " 36.6 ")
            .with_vital(Vital::Systolic, "n/a");

        assert_eq!(reading.value(Vital::PulseRate), Ok(Some(dec!(72))));
        assert_eq!(reading.value(Vital::Temperature), Ok(Some(dec!(36.6))));
        assert_eq!(reading.value(Vital::Systolic), Err("n/a"));
        assert_eq!(reading.value(Vital::Diastolic), Ok(None));
    }

    #[test]
    fn test_columns() {
        assert_eq!(Vital::Systolic.source_column(), "blood_pressure_systolic");
        assert_eq!(Vital::Systolic.average_column(), "avg_systolic");
        assert_eq!(Vital::PulseRate.to_string(), "pulse_rate");
    }
}
