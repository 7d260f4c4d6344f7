//! Aggregate Builder
//!
//! Rebuilds the age-group summary from the replica. The join happens in the
//! destination store; bucketing, averaging and rounding happen here so the
//! policy is independent of SQL text.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use super::spec::{AggregateRow, AggregateSpec};
use crate::domain::{parse_birth_date, AgeGroup, JoinedReading};
use crate::error::{PipelineError, PipelineResult};
use crate::store::{DestinationStore, PATIENTS_TABLE, VITALS_TABLE};

/// Counters describing what went into an aggregate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    /// Joined readings that contributed to a group
    pub readings_used: u64,
    /// Joined readings dropped because the patient had no usable birth date
    pub readings_without_birth_date: u64,
    /// Distinct patients dropped for the same reason
    pub patients_without_birth_date: u64,
    /// Individual vital values ignored because they were not numeric
    pub non_numeric_values: u64,
}

/// Outcome of one rebuild
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub relation: String,
    pub rows_published: usize,
    pub as_of: NaiveDate,
    pub stats: AggregateStats,
    pub completed_at: DateTime<Utc>,
}

#[derive(Default)]
struct GroupAccumulator {
    readings: i64,
    patients: HashSet<String>,
    /// (sum, count) per metric, in spec order
    sums: Vec<(Decimal, i64)>,
}

/// Group joined readings by age group and compute rounded means.
///
/// Rows come back in fixed category order, one per group that has at least
/// one reading. Pure function of its inputs.
pub fn compute_aggregate(
    spec: &AggregateSpec,
    readings: &[JoinedReading],
    today: NaiveDate,
) -> PipelineResult<(Vec<AggregateRow>, AggregateStats)> {
    spec.validate()?;

    let mut stats = AggregateStats::default();
    let mut without_birth_date: HashSet<&str> = HashSet::new();
    let mut groups: BTreeMap<AgeGroup, GroupAccumulator> = BTreeMap::new();

    for reading in readings {
        let Some(dob) = reading.date_of_birth.as_deref().and_then(parse_birth_date) else {
            stats.readings_without_birth_date += 1;
            without_birth_date.insert(reading.patient_id.as_str());
            continue;
        };

        let group = groups.entry(AgeGroup::for_birth_date(dob, today)).or_insert_with(|| {
            GroupAccumulator {
                sums: vec![(Decimal::ZERO, 0); spec.metrics.len()],
                ..Default::default()
            }
        });

        group.readings += 1;
        if spec.include_unique_patients {
            group.patients.insert(reading.patient_id.clone());
        }

        for (metric, (sum, count)) in spec.metrics.iter().zip(group.sums.iter_mut()) {
            match reading.value(metric.vital) {
                Ok(Some(value)) => {
                    *sum = sum.checked_add(value).ok_or_else(|| {
                        PipelineError::computation(format!("sum of {} overflowed", metric.vital))
                    })?;
                    *count += 1;
                }
                Ok(None) => {}
                Err(raw) => {
                    tracing::debug!(
                        patient_id = %reading.patient_id,
                        vital = %metric.vital,
                        value = raw,
                        "Ignoring non-numeric vital value"
                    );
                    stats.non_numeric_values += 1;
                }
            }
        }

        stats.readings_used += 1;
    }

    stats.patients_without_birth_date = without_birth_date.len() as u64;

    let mut rows = Vec::with_capacity(groups.len());
    for (age_group, acc) in groups {
        let mut averages = Vec::with_capacity(spec.metrics.len());
        for (metric, (sum, count)) in spec.metrics.iter().zip(acc.sums) {
            let average = if count == 0 {
                None
            } else {
                Some(rounded_mean(sum, count, metric.decimals).ok_or_else(|| {
                    PipelineError::computation(format!("mean of {} is not representable", metric.vital))
                })?)
            };
            averages.push((metric.vital, average));
        }

        rows.push(AggregateRow {
            age_group,
            total_readings: acc.readings,
            unique_patients: spec
                .include_unique_patients
                .then(|| acc.patients.len() as i64),
            averages,
        });
    }

    Ok((rows, stats))
}

/// Mean rounded half away from zero, carrying exactly `decimals` places
fn rounded_mean(sum: Decimal, count: i64, decimals: u32) -> Option<Decimal> {
    let mean = sum.checked_div(Decimal::from(count))?;
    let mut rounded = mean.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(decimals);
    Some(rounded)
}

/// Rebuilds one aggregate relation in the destination store
#[derive(Clone)]
pub struct AggregateBuilder {
    destination: Arc<dyn DestinationStore>,
    spec: AggregateSpec,
}

impl AggregateBuilder {
    pub fn new(destination: Arc<dyn DestinationStore>, spec: AggregateSpec) -> Self {
        Self { destination, spec }
    }

    pub fn spec(&self) -> &AggregateSpec {
        &self.spec
    }

    /// Rebuild using today's UTC date
    pub async fn rebuild(&self) -> PipelineResult<BuildReport> {
        self.rebuild_as_of(Utc::now().date_naive()).await
    }

    /// Rebuild with ages computed as of `today`.
    ///
    /// On any error the previously published relation is left untouched.
    pub async fn rebuild_as_of(&self, today: NaiveDate) -> PipelineResult<BuildReport> {
        self.spec.validate()?;

        for table in [PATIENTS_TABLE, VITALS_TABLE] {
            if !self.destination.table_exists(table).await? {
                return Err(PipelineError::schema(format!(
                    "replica table {}.{} does not exist; replication has not run",
                    self.destination.namespace(),
                    table
                )));
            }
        }

        let readings = self.destination.joined_readings(&self.spec.vitals()).await?;
        tracing::debug!(
            relation = %self.spec.relation,
            joined_rows = readings.len(),
            "Fetched joined readings"
        );

        let (rows, stats) = compute_aggregate(&self.spec, &readings, today)?;

        if stats.patients_without_birth_date > 0 {
            tracing::warn!(
                patients = stats.patients_without_birth_date,
                readings = stats.readings_without_birth_date,
                "Excluded patients without a usable date of birth"
            );
        }

        self.destination.publish_aggregate(&self.spec, &rows).await?;

        tracing::info!(
            relation = %self.spec.relation,
            rows = rows.len(),
            readings = stats.readings_used,
            as_of = %today,
            "Aggregate relation rebuilt"
        );

        Ok(BuildReport {
            relation: self.spec.relation.clone(),
            rows_published: rows.len(),
            as_of: today,
            stats,
            completed_at: Utc::now(),
        })
    }
}
