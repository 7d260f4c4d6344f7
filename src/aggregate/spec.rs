//! Aggregate shapes
//!
//! An [`AggregateSpec`] names the published relation and fixes its columns:
//! whether distinct patients are counted, which vitals are averaged and to how
//! many decimal places.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{AgeGroup, Vital};
use crate::error::{PipelineError, PipelineResult};
use crate::store::is_valid_identifier;

/// Largest scale a rounded mean may carry
pub const MAX_DECIMALS: u32 = 28;

/// One averaged vital and its rounding precision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSpec {
    pub vital: Vital,
    pub decimals: u32,
}

impl MetricSpec {
    pub const fn new(vital: Vital, decimals: u32) -> Self {
        Self { vital, decimals }
    }
}

/// Shape of a published aggregate relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSpec {
    /// Relation name inside the destination namespace
    pub relation: String,
    pub include_unique_patients: bool,
    pub metrics: Vec<MetricSpec>,
}

impl AggregateSpec {
    /// Average pulse rate per age group with distinct patient counts
    pub fn pulse_by_age_group() -> Self {
        Self {
            relation: "mv_pulse_rate_by_age_group".to_string(),
            include_unique_patients: true,
            metrics: vec![MetricSpec::new(Vital::PulseRate, 1)],
        }
    }

    /// All four vitals per age group, temperature to one decimal and the
    /// rest to whole numbers
    pub fn vitals_by_age_group() -> Self {
        Self {
            relation: "mv_vitals_by_age_group".to_string(),
            include_unique_patients: false,
            metrics: vec![
                MetricSpec::new(Vital::Temperature, 1),
                MetricSpec::new(Vital::PulseRate, 0),
                MetricSpec::new(Vital::Systolic, 0),
                MetricSpec::new(Vital::Diastolic, 0),
            ],
        }
    }

    /// Vitals the builder needs from the replica join
    pub fn vitals(&self) -> Vec<Vital> {
        self.metrics.iter().map(|m| m.vital).collect()
    }

    /// Name of the secondary age-group index
    pub fn index_name(&self) -> String {
        format!("idx_{}_age_group", self.relation)
    }

    /// Column names of the relation, in order
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec!["age_group", "total_readings"];
        if self.include_unique_patients {
            columns.push("unique_patients");
        }
        columns.extend(self.metrics.iter().map(|m| m.vital.average_column()));
        columns
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if !is_valid_identifier(&self.relation) || self.relation.len() > 49 {
            return Err(PipelineError::computation(format!(
                "invalid aggregate relation name: {}",
                self.relation
            )));
        }
        if self.metrics.is_empty() {
            return Err(PipelineError::computation("aggregate defines no metrics"));
        }
        for (i, metric) in self.metrics.iter().enumerate() {
            if metric.decimals > MAX_DECIMALS {
                return Err(PipelineError::computation(format!(
                    "precision {} for {} exceeds {}",
                    metric.decimals, metric.vital, MAX_DECIMALS
                )));
            }
            if self.metrics[..i].iter().any(|m| m.vital == metric.vital) {
                return Err(PipelineError::computation(format!(
                    "{} is averaged more than once",
                    metric.vital
                )));
            }
        }
        Ok(())
    }
}

/// One published row: everything known about one age group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateRow {
    pub age_group: AgeGroup,
    pub total_readings: i64,
    pub unique_patients: Option<i64>,
    /// Rounded means in metric order; `None` when no numeric value existed
    pub averages: Vec<(Vital, Option<Decimal>)>,
}

impl AggregateRow {
    pub fn average(&self, vital: Vital) -> Option<Decimal> {
        self.averages
            .iter()
            .find(|(v, _)| *v == vital)
            .and_then(|(_, avg)| *avg)
    }
}
