//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use health_analytics::connection::{DestinationDescriptor, SourceDescriptor};
use health_analytics::store::{
    ColumnSpec, Connector, DestinationStore, MemoryConnector, MemoryDestination, MemorySource, PgDestination,
    PgSource, SourceStore, TableSnapshot,
};
use health_analytics::{Config, ConfigValues, PipelineResult};

/// Date the fixtures compute ages against
pub fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

/// Config values with every source and destination key set
pub fn test_values() -> ConfigValues {
    ConfigValues::from_pairs([
        ("SOURCE_POSTGRES_HOST", "source.internal"),
        ("SOURCE_POSTGRES_PORT", "5432"),
        ("SOURCE_POSTGRES_USER", "reader"),
        ("SOURCE_POSTGRES_PASSWORD", "secret"),
        ("SOURCE_POSTGRES_DATABASE", "clinic"),
        ("POSTGRES_HOST", "analytics.internal"),
        ("POSTGRES_DATABASE", "analytics"),
    ])
}

pub fn test_config() -> Config {
    Config::from_values(test_values()).expect("test config must be valid")
}

pub fn patients_table() -> TableSnapshot {
    TableSnapshot::new(
        "patients",
        vec![
            ColumnSpec::new("patient_id", "text"),
            ColumnSpec::new("name", "text"),
            ColumnSpec::new("date_of_birth", "date"),
        ],
    )
}

pub fn vitals_table() -> TableSnapshot {
    TableSnapshot::new(
        "vitals",
        vec![
            ColumnSpec::new("vital_id", "integer"),
            ColumnSpec::new("patient_id", "text"),
            ColumnSpec::new("temperature", "numeric(4,1)"),
            ColumnSpec::new("pulse_rate", "integer"),
            ColumnSpec::new("blood_pressure_systolic", "integer"),
            ColumnSpec::new("blood_pressure_diastolic", "integer"),
        ],
    )
}

/// P1 is 25 with pulses 70 and 74, P2 is 74 with a single pulse of 60
pub fn scenario_patients() -> TableSnapshot {
    patients_table()
        .with_row(json!({"patient_id": "P1", "name": "Ada", "date_of_birth": "1999-01-15"}))
        .with_row(json!({"patient_id": "P2", "name": "Ben", "date_of_birth": "1950-03-10"}))
}

pub fn scenario_vitals() -> TableSnapshot {
    vitals_table()
        .with_row(json!({"vital_id": 1, "patient_id": "P1", "temperature": 36.6, "pulse_rate": 70, "blood_pressure_systolic": 120, "blood_pressure_diastolic": 80}))
        .with_row(json!({"vital_id": 2, "patient_id": "P1", "temperature": 36.8, "pulse_rate": 74, "blood_pressure_systolic": 118, "blood_pressure_diastolic": 76}))
        .with_row(json!({"vital_id": 3, "patient_id": "P2", "temperature": 36.4, "pulse_rate": 60, "blood_pressure_systolic": 140, "blood_pressure_diastolic": 90}))
}

/// Source and destination seeded for the two-patient scenario
pub struct TestStores {
    pub source: Arc<MemorySource>,
    pub destination: Arc<MemoryDestination>,
    pub connector: Arc<MemoryConnector>,
}

pub fn scenario_stores() -> TestStores {
    stores_with(scenario_patients(), scenario_vitals())
}

pub fn stores_with(patients: TableSnapshot, vitals: TableSnapshot) -> TestStores {
    let source = Arc::new(MemorySource::new().with_table(patients).with_table(vitals));
    let destination = Arc::new(MemoryDestination::new("analytics"));
    let connector = Arc::new(MemoryConnector::new(source.clone(), destination.clone()));
    TestStores {
        source,
        destination,
        connector,
    }
}

// =========================================================================
// PostgreSQL
// =========================================================================

/// Source and analytics schemas in the `DATABASE_URL` database, unique per test
pub struct PgTestDb {
    pub pool: PgPool,
    pub source_schema: String,
    pub namespace: String,
}

impl PgTestDb {
    pub fn destination(&self) -> PgDestination {
        PgDestination::new(self.pool.clone(), self.namespace.clone())
    }

    pub fn connector(&self) -> Arc<PgTestConnector> {
        Arc::new(PgTestConnector { pool: self.pool.clone() })
    }

    /// Pipeline config pointing at this test's schemas
    pub fn config(&self) -> Config {
        let values = test_values()
            .with("SOURCE_SCHEMA", self.source_schema.clone())
            .with("REPLICA_NAMESPACE", self.namespace.clone());
        Config::from_values(values).expect("test config must be valid")
    }

    pub async fn execute(&self, sql: &str) {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .unwrap_or_else(|e| panic!("{} failed: {}", sql, e));
    }

    /// Drop both schemas
    pub async fn teardown(self) {
        for schema in [&self.source_schema, &self.namespace] {
            sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema))
                .execute(&self.pool)
                .await
                .ok();
        }
        self.pool.close().await;
    }
}

/// Setup test database - fresh schemas seeded with the two-patient scenario.
///
/// Returns `None` when `DATABASE_URL` is not set, so these tests are skipped.
pub async fn setup_pg_test_db() -> Option<PgTestDb> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping PostgreSQL test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let db = PgTestDb {
        pool,
        source_schema: format!("ha_src_{}", suffix),
        namespace: format!("ha_dst_{}", suffix),
    };

    let src = &db.source_schema;
    db.execute(&format!("CREATE SCHEMA {}", src)).await;
    db.execute(&format!(
        "CREATE TABLE {}.patients (patient_id TEXT PRIMARY KEY, name TEXT, date_of_birth DATE)",
        src
    ))
    .await;
    db.execute(&format!(
        r#"
        CREATE TABLE {}.vitals (
            vital_id INTEGER PRIMARY KEY,
            patient_id TEXT NOT NULL,
            temperature NUMERIC(4,1),
            pulse_rate INTEGER,
            blood_pressure_systolic INTEGER,
            blood_pressure_diastolic INTEGER
        )
        "#,
        src
    ))
    .await;
    db.execute(&format!(
        "INSERT INTO {}.patients VALUES ('P1', 'Ada', '1999-01-15'), ('P2', 'Ben', '1950-03-10')",
        src
    ))
    .await;
    db.execute(&format!(
        r#"
        INSERT INTO {}.vitals VALUES
            (1, 'P1', 36.6, 70, 120, 80),
            (2, 'P1', 36.8, 74, 118, 76),
            (3, 'P2', 36.4, 60, 140, 90)
        "#,
        src
    ))
    .await;

    Some(db)
}

/// Opens PostgreSQL stores over the shared test pool, whatever the descriptor
pub struct PgTestConnector {
    pool: PgPool,
}

#[async_trait]
impl Connector for PgTestConnector {
    async fn connect_source(
        &self,
        _descriptor: &SourceDescriptor,
        schema: &str,
    ) -> PipelineResult<Arc<dyn SourceStore>> {
        Ok(Arc::new(PgSource::new(self.pool.clone(), schema)))
    }

    async fn connect_destination(
        &self,
        _descriptor: &DestinationDescriptor,
        namespace: &str,
    ) -> PipelineResult<Arc<dyn DestinationStore>> {
        Ok(Arc::new(PgDestination::new(self.pool.clone(), namespace)))
    }
}
