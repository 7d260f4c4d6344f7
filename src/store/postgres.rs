//! PostgreSQL stores
//!
//! Source extraction, replica loading and aggregate publication over sqlx.
//! Every replace (replica table or aggregate relation) runs in a single
//! transaction; PostgreSQL DDL is transactional, so readers never observe a
//! half-built relation.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use super::{
    is_valid_identifier, qualified, quote_ident, ColumnSpec, Connector, DestinationStore, SourceStore,
    TableSnapshot, PATIENTS_TABLE, VITALS_TABLE,
};
use crate::aggregate::{AggregateRow, AggregateSpec};
use crate::connection::{ConnectionDescriptor, DestinationDescriptor, Endpoint, SourceDescriptor};
use crate::domain::{AgeGroup, JoinedReading, Vital};
use crate::error::{PipelineError, PipelineResult};

/// Rows bound per INSERT when loading a replica table
const LOAD_BATCH_ROWS: usize = 5_000;

fn check_identifier(kind: &str, name: &str) -> PipelineResult<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(PipelineError::schema(format!("invalid {} name: {:?}", kind, name)))
    }
}

async fn relation_exists(pool: &PgPool, schema: &str, table: &str, endpoint: Endpoint) -> PipelineResult<bool> {
    sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
        .bind(qualified(schema, table))
        .fetch_one(pool)
        .await
        .map_err(|e| PipelineError::from_sqlx(endpoint, e))
}

/// Read a whole table as JSON objects, ordered by every orderable column
async fn fetch_snapshot(
    pool: &PgPool,
    schema: &str,
    table: &str,
    endpoint: Endpoint,
) -> PipelineResult<TableSnapshot> {
    check_identifier("table", table)?;

    if !relation_exists(pool, schema, table, endpoint).await? {
        return Err(PipelineError::schema(format!(
            "{} table {}.{} does not exist",
            endpoint, schema, table
        )));
    }

    let columns: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT a.attname::text, format_type(a.atttypid, a.atttypmod)
        FROM pg_attribute a
        WHERE a.attrelid = to_regclass($1)
          AND a.attnum > 0
          AND NOT a.attisdropped
        ORDER BY a.attnum
        "#,
    )
    .bind(qualified(schema, table))
    .fetch_all(pool)
    .await
    .map_err(|e| PipelineError::from_sqlx(endpoint, e))?;

    // json has no equality operator, so it cannot take part in ORDER BY
    let order_by: Vec<String> = columns
        .iter()
        .filter(|(_, sql_type)| sql_type != "json")
        .map(|(name, _)| format!("t.{}", quote_ident(name)))
        .collect();

    let mut sql = format!("SELECT to_jsonb(t) FROM {} t", qualified(schema, table));
    if !order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by.join(", "));
    }

    let rows: Vec<Value> = sqlx::query_scalar(&sql)
        .fetch_all(pool)
        .await
        .map_err(|e| PipelineError::from_sqlx(endpoint, e))?;

    let rows = rows
        .into_iter()
        .map(|row| match row {
            Value::Object(map) => Ok(map),
            other => Err(PipelineError::computation(format!(
                "unexpected row shape in {}: {}",
                table, other
            ))),
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    Ok(TableSnapshot {
        name: table.to_string(),
        columns: columns
            .into_iter()
            .map(|(name, sql_type)| ColumnSpec { name, sql_type })
            .collect(),
        rows,
    })
}

/// DROP statement for an existing relation of `relkind` (`pg_class.relkind`)
fn drop_relation_sql(relkind: Option<&str>, target: &str) -> String {
    match relkind {
        Some("m") => format!("DROP MATERIALIZED VIEW IF EXISTS {}", target),
        Some("v") => format!("DROP VIEW IF EXISTS {}", target),
        _ => format!("DROP TABLE IF EXISTS {}", target),
    }
}

// =========================================================================
// Source
// =========================================================================

/// Operational source database
#[derive(Debug, Clone)]
pub struct PgSource {
    pool: PgPool,
    schema: String,
}

impl PgSource {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }
}

#[async_trait]
impl SourceStore for PgSource {
    async fn fetch_table(&self, table: &str) -> PipelineResult<TableSnapshot> {
        fetch_snapshot(&self.pool, &self.schema, table, Endpoint::Source).await
    }

    fn describe(&self) -> String {
        format!("postgres source (schema {})", self.schema)
    }
}

// =========================================================================
// Destination
// =========================================================================

/// Analytics destination database
#[derive(Debug, Clone)]
pub struct PgDestination {
    pool: PgPool,
    namespace: String,
}

impl PgDestination {
    pub fn new(pool: PgPool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    fn db_err(e: sqlx::Error) -> PipelineError {
        PipelineError::from_sqlx(Endpoint::Destination, e)
    }

    fn order_by_category() -> String {
        let arms: Vec<String> = AgeGroup::ALL
            .iter()
            .map(|g| format!("WHEN '{}' THEN {}", g.label(), g.position()))
            .collect();
        format!("CASE age_group {} END", arms.join(" "))
    }
}

#[async_trait]
impl DestinationStore for PgDestination {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn load_table(&self, snapshot: &TableSnapshot) -> PipelineResult<u64> {
        check_identifier("table", &snapshot.name)?;
        if snapshot.columns.is_empty() {
            return Err(PipelineError::schema(format!("table {} has no columns", snapshot.name)));
        }

        let target = qualified(&self.namespace, &snapshot.name);
        let column_defs: Vec<String> = snapshot
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.sql_type))
            .collect();

        let mut tx = self.pool.begin().await.map_err(Self::db_err)?;

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.namespace)))
            .execute(&mut *tx)
            .await
            .map_err(Self::db_err)?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", target))
            .execute(&mut *tx)
            .await
            .map_err(Self::db_err)?;

        sqlx::query(&format!("CREATE TABLE {} ({})", target, column_defs.join(", ")))
            .execute(&mut *tx)
            .await
            .map_err(Self::db_err)?;

        let insert = format!(
            "INSERT INTO {target} SELECT * FROM jsonb_populate_recordset(NULL::{target}, $1)",
            target = target
        );
        for batch in snapshot.rows.chunks(LOAD_BATCH_ROWS) {
            let payload = Value::Array(batch.iter().cloned().map(Value::Object).collect());
            sqlx::query(&insert)
                .bind(payload)
                .execute(&mut *tx)
                .await
                .map_err(Self::db_err)?;
        }

        tx.commit().await.map_err(Self::db_err)?;

        tracing::debug!(table = %target, rows = snapshot.rows.len(), "Replica table loaded");
        Ok(snapshot.row_count())
    }

    async fn fetch_table(&self, table: &str) -> PipelineResult<TableSnapshot> {
        fetch_snapshot(&self.pool, &self.namespace, table, Endpoint::Destination).await
    }

    async fn table_exists(&self, table: &str) -> PipelineResult<bool> {
        check_identifier("table", table)?;
        relation_exists(&self.pool, &self.namespace, table, Endpoint::Destination).await
    }

    async fn joined_readings(&self, vitals: &[Vital]) -> PipelineResult<Vec<JoinedReading>> {
        let column = |vital: Vital| {
            if vitals.contains(&vital) {
                format!("v.{}::text", quote_ident(vital.source_column()))
            } else {
                "NULL::text".to_string()
            }
        };

        let sql = format!(
            r#"
            SELECT p.patient_id::text, p.date_of_birth::text, {}, {}, {}, {}
            FROM {} p
            JOIN {} v ON p.patient_id = v.patient_id
            "#,
            column(Vital::PulseRate),
            column(Vital::Temperature),
            column(Vital::Systolic),
            column(Vital::Diastolic),
            qualified(&self.namespace, PATIENTS_TABLE),
            qualified(&self.namespace, VITALS_TABLE),
        );

        type JoinedRow = (
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
        );

        let rows: Vec<JoinedRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::db_err)?;

        Ok(rows
            .into_iter()
            .map(
                |(patient_id, date_of_birth, pulse_rate, temperature, systolic, diastolic)| JoinedReading {
                    patient_id,
                    date_of_birth,
                    pulse_rate,
                    temperature,
                    systolic,
                    diastolic,
                },
            )
            .collect())
    }

    async fn publish_aggregate(&self, spec: &AggregateSpec, rows: &[AggregateRow]) -> PipelineResult<()> {
        spec.validate()?;

        let target = qualified(&self.namespace, &spec.relation);
        let staging_name = format!("{}__staging", spec.relation);
        let staging = qualified(&self.namespace, &staging_name);

        let mut column_defs = vec![
            "age_group TEXT NOT NULL".to_string(),
            "total_readings BIGINT NOT NULL".to_string(),
        ];
        if spec.include_unique_patients {
            column_defs.push("unique_patients BIGINT NOT NULL".to_string());
        }
        for metric in &spec.metrics {
            column_defs.push(format!("{} NUMERIC", metric.vital.average_column()));
        }

        let mut tx = self.pool.begin().await.map_err(Self::db_err)?;

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.namespace)))
            .execute(&mut *tx)
            .await
            .map_err(Self::db_err)?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", staging))
            .execute(&mut *tx)
            .await
            .map_err(Self::db_err)?;

        sqlx::query(&format!("CREATE TABLE {} ({})", staging, column_defs.join(", ")))
            .execute(&mut *tx)
            .await
            .map_err(Self::db_err)?;

        if !rows.is_empty() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                staging,
                spec.columns().join(", ")
            ));
            builder.push_values(rows, |mut b, row| {
                b.push_bind(row.age_group.label());
                b.push_bind(row.total_readings);
                if spec.include_unique_patients {
                    b.push_bind(row.unique_patients.unwrap_or(0));
                }
                for metric in &spec.metrics {
                    b.push_bind(row.average(metric.vital));
                }
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(Self::db_err)?;
        }

        // Older deployments published the relation as a materialized view
        let relkind: Option<String> =
            sqlx::query_scalar("SELECT relkind::text FROM pg_class WHERE oid = to_regclass($1)")
                .bind(&target)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Self::db_err)?;

        sqlx::query(&drop_relation_sql(relkind.as_deref(), &target))
            .execute(&mut *tx)
            .await
            .map_err(Self::db_err)?;

        sqlx::query(&format!(
            "ALTER TABLE {} RENAME TO {}",
            staging,
            quote_ident(&spec.relation)
        ))
        .execute(&mut *tx)
        .await
        .map_err(Self::db_err)?;

        sqlx::query(&format!(
            "CREATE INDEX {} ON {} (age_group)",
            quote_ident(&spec.index_name()),
            target
        ))
        .execute(&mut *tx)
        .await
        .map_err(Self::db_err)?;

        tx.commit().await.map_err(Self::db_err)?;

        Ok(())
    }

    async fn read_aggregate(&self, spec: &AggregateSpec) -> PipelineResult<Vec<AggregateRow>> {
        check_identifier("relation", &spec.relation)?;

        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            spec.columns().join(", "),
            qualified(&self.namespace, &spec.relation),
            Self::order_by_category()
        );

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::db_err)?;

        rows.iter()
            .map(|row| -> PipelineResult<AggregateRow> {
                let label: String = row.try_get("age_group").map_err(Self::db_err)?;
                let age_group = label.parse::<AgeGroup>().map_err(PipelineError::Computation)?;
                let total_readings: i64 = row.try_get("total_readings").map_err(Self::db_err)?;
                let unique_patients = if spec.include_unique_patients {
                    Some(row.try_get::<i64, _>("unique_patients").map_err(Self::db_err)?)
                } else {
                    None
                };
                let averages = spec
                    .metrics
                    .iter()
                    .map(|m| {
                        row.try_get::<Option<Decimal>, _>(m.vital.average_column())
                            .map(|avg| (m.vital, avg))
                            .map_err(Self::db_err)
                    })
                    .collect::<PipelineResult<Vec<_>>>()?;

                Ok(AggregateRow {
                    age_group,
                    total_readings,
                    unique_patients,
                    averages,
                })
            })
            .collect()
    }
}

// =========================================================================
// Connector
// =========================================================================

/// Opens sqlx pools for resolved endpoints
#[derive(Debug, Clone)]
pub struct PgConnector {
    max_connections: u32,
}

impl PgConnector {
    pub fn new(max_connections: u32) -> Self {
        Self { max_connections }
    }

    async fn open(&self, descriptor: &ConnectionDescriptor, endpoint: Endpoint) -> PipelineResult<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(descriptor.connect_options())
            .await
            // Failing to connect at all is always a reachability problem
            .map_err(|e| PipelineError::connection(endpoint, e.to_string()))?;

        tracing::info!(endpoint = %endpoint, target = %descriptor, "Connected");
        Ok(pool)
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect_source(
        &self,
        descriptor: &SourceDescriptor,
        schema: &str,
    ) -> PipelineResult<Arc<dyn SourceStore>> {
        let pool = self.open(descriptor.connection(), Endpoint::Source).await?;
        Ok(Arc::new(PgSource::new(pool, schema)))
    }

    async fn connect_destination(
        &self,
        descriptor: &DestinationDescriptor,
        namespace: &str,
    ) -> PipelineResult<Arc<dyn DestinationStore>> {
        let pool = self.open(descriptor.connection(), Endpoint::Destination).await?;
        Ok(Arc::new(PgDestination::new(pool, namespace)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_by_category() {
        assert_eq!(
            PgDestination::order_by_category(),
            "CASE age_group WHEN '0-17' THEN 1 WHEN '18-34' THEN 2 WHEN '35-49' THEN 3 \
             WHEN '50-64' THEN 4 WHEN '65+' THEN 5 END"
        );
    }

    #[test]
    fn test_drop_relation_matches_relkind() {
        let target = "\"analytics\".\"mv_pulse_rate_by_age_group\"";
        assert_eq!(
            drop_relation_sql(Some("m"), target),
            format!("DROP MATERIALIZED VIEW IF EXISTS {}", target)
        );
        assert_eq!(
            drop_relation_sql(Some("v"), target),
            format!("DROP VIEW IF EXISTS {}", target)
        );
        assert_eq!(
            drop_relation_sql(Some("r"), target),
            format!("DROP TABLE IF EXISTS {}", target)
        );
        assert_eq!(drop_relation_sql(None, target), format!("DROP TABLE IF EXISTS {}", target));
    }

    #[test]
    fn test_check_identifier() {
        assert!(check_identifier("table", "vitals").is_ok());
        let err = check_identifier("table", "vitals--").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Schema);
    }
}
