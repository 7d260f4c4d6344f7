//! Store module
//!
//! Seams between the pipeline core and the source/destination databases.
//! `postgres` talks to real servers through sqlx; `memory` keeps everything
//! in-process for tests and dry runs.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::aggregate::{AggregateRow, AggregateSpec};
use crate::connection::{DestinationDescriptor, SourceDescriptor};
use crate::domain::{JoinedReading, Vital};
use crate::error::PipelineResult;

pub use memory::{MemoryConnector, MemoryDestination, MemorySource};
pub use postgres::{PgConnector, PgDestination, PgSource};

/// Name of the replicated patients table
pub const PATIENTS_TABLE: &str = "patients";

/// Name of the replicated vital readings table
pub const VITALS_TABLE: &str = "vitals";

/// Tables the replicator copies by default, in extract order
pub const DEFAULT_TABLES: [&str; 2] = [PATIENTS_TABLE, VITALS_TABLE];

/// Column definition carried with a table snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    /// SQL type as rendered by the source (e.g. `numeric(4,1)`)
    pub sql_type: String,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }
}

/// Full contents of one table at extraction time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    /// Rows as column-name → value objects, in deterministic order
    pub rows: Vec<Map<String, Value>>,
}

impl TableSnapshot {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row given as a JSON object. Non-object values are ignored.
    pub fn with_row(mut self, row: Value) -> Self {
        if let Value::Object(map) = row {
            self.rows.push(map);
        }
        self
    }

    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }
}

/// Read side of the operational source
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Read a table in full, with its column definitions
    async fn fetch_table(&self, table: &str) -> PipelineResult<TableSnapshot>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// The analytics store holding the replica and the published aggregates
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Namespace the replica and aggregates live under
    fn namespace(&self) -> &str;

    /// Replace any prior copy of the table with the snapshot, atomically.
    /// Returns the number of rows loaded.
    async fn load_table(&self, snapshot: &TableSnapshot) -> PipelineResult<u64>;

    /// Read back a replicated table
    async fn fetch_table(&self, table: &str) -> PipelineResult<TableSnapshot>;

    async fn table_exists(&self, table: &str) -> PipelineResult<bool>;

    /// Inner join of replicated patients and vitals, carrying only the
    /// requested vitals
    async fn joined_readings(&self, vitals: &[Vital]) -> PipelineResult<Vec<JoinedReading>>;

    /// Replace the aggregate relation wholesale. Readers see either the old
    /// or the new rows, never a mix.
    async fn publish_aggregate(&self, spec: &AggregateSpec, rows: &[AggregateRow]) -> PipelineResult<()>;

    /// Ordered scan of the published aggregate relation
    async fn read_aggregate(&self, spec: &AggregateSpec) -> PipelineResult<Vec<AggregateRow>>;
}

/// Opens stores for resolved endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_source(
        &self,
        descriptor: &SourceDescriptor,
        schema: &str,
    ) -> PipelineResult<Arc<dyn SourceStore>>;

    async fn connect_destination(
        &self,
        descriptor: &DestinationDescriptor,
        namespace: &str,
    ) -> PipelineResult<Arc<dyn DestinationStore>>;
}

/// Whether `name` is a plain lowercase SQL identifier
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Double-quote an identifier for interpolation into SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Render a JSON cell as the text SQL would produce for it
pub(crate) fn cell_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("patients"));
        assert!(is_valid_identifier("mv_pulse_rate_by_age_group"));
        assert!(is_valid_identifier("_staging2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2fast"));
        assert!(!is_valid_identifier("Patients"));
        assert!(!is_valid_identifier("vitals; DROP TABLE patients"));
        assert!(!is_valid_identifier(&"a".repeat(64)));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("vitals"), "\"vitals\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
        assert_eq!(qualified("analytics", "patients"), "\"analytics\".\"patients\"");
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(Some(&json!("1990-01-01"))), Some("1990-01-01".to_string()));
        assert_eq!(cell_text(Some(&json!(72))), Some("72".to_string()));
        assert_eq!(cell_text(Some(&json!(36.6))), Some("36.6".to_string()));
        assert_eq!(cell_text(Some(&Value::Null)), None);
        assert_eq!(cell_text(None), None);
    }

    #[test]
    fn test_snapshot_rows() {
        let snapshot = TableSnapshot::new("patients", vec![ColumnSpec::new("patient_id", "integer")])
            .with_row(json!({"patient_id": 1}))
            .with_row(json!([1, 2]))
            .with_row(json!({"patient_id": 2}));

        assert_eq!(snapshot.row_count(), 2);
    }
}
