//! In-memory stores
//!
//! Stand-ins for the source and destination databases. They honour the same
//! contracts as the PostgreSQL stores: loads replace tables wholesale and
//! aggregate publication swaps the whole relation under one lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use super::{cell_text, Connector, DestinationStore, SourceStore, TableSnapshot, PATIENTS_TABLE, VITALS_TABLE};
use crate::aggregate::{AggregateRow, AggregateSpec};
use crate::connection::{DestinationDescriptor, Endpoint, SourceDescriptor};
use crate::domain::{JoinedReading, Vital};
use crate::error::{PipelineError, PipelineResult};

fn lock_poisoned(endpoint: Endpoint) -> PipelineError {
    PipelineError::connection(endpoint, "in-memory store lock poisoned")
}

// =========================================================================
// Source
// =========================================================================

/// In-memory source tables
#[derive(Debug)]
pub struct MemorySource {
    tables: RwLock<BTreeMap<String, TableSnapshot>>,
    reachable: AtomicBool,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            reachable: AtomicBool::new(true),
        }
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a source table
    pub fn with_table(self, snapshot: TableSnapshot) -> Self {
        self.put_table(snapshot);
        self
    }

    pub fn put_table(&self, snapshot: TableSnapshot) {
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(snapshot.name.clone(), snapshot);
        }
    }

    /// Simulate the source going down or coming back
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> PipelineResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PipelineError::connection(Endpoint::Source, "source store unreachable"))
        }
    }
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn fetch_table(&self, table: &str) -> PipelineResult<TableSnapshot> {
        self.ensure_reachable()?;
        let tables = self.tables.read().map_err(|_| lock_poisoned(Endpoint::Source))?;
        tables
            .get(table)
            .cloned()
            .ok_or_else(|| PipelineError::schema(format!("source table {} does not exist", table)))
    }

    fn describe(&self) -> String {
        "in-memory source".to_string()
    }
}

// =========================================================================
// Destination
// =========================================================================

/// In-memory replica and aggregate relations
#[derive(Debug)]
pub struct MemoryDestination {
    namespace: String,
    tables: RwLock<BTreeMap<String, TableSnapshot>>,
    aggregates: RwLock<BTreeMap<String, Vec<AggregateRow>>>,
    reachable: AtomicBool,
    failing_loads: Mutex<Vec<String>>,
}

impl MemoryDestination {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            tables: RwLock::new(BTreeMap::new()),
            aggregates: RwLock::new(BTreeMap::new()),
            reachable: AtomicBool::new(true),
            failing_loads: Mutex::new(Vec::new()),
        }
    }

    /// Simulate the destination going down or coming back
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make every load of `table` fail as if the connection dropped
    pub fn fail_loads_of(&self, table: &str) {
        if let Ok(mut failing) = self.failing_loads.lock() {
            failing.push(table.to_string());
        }
    }

    /// Drop a replica table, as if it had never been loaded
    pub fn drop_table(&self, table: &str) {
        if let Ok(mut tables) = self.tables.write() {
            tables.remove(table);
        }
    }

    /// Names of the replica tables currently present
    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .read()
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn ensure_reachable(&self) -> PipelineResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PipelineError::connection(Endpoint::Destination, "destination store unreachable"))
        }
    }

    fn require_table<'a>(
        &self,
        tables: &'a BTreeMap<String, TableSnapshot>,
        table: &str,
    ) -> PipelineResult<&'a TableSnapshot> {
        tables.get(table).ok_or_else(|| {
            PipelineError::schema(format!("relation {}.{} does not exist", self.namespace, table))
        })
    }
}

#[async_trait]
impl DestinationStore for MemoryDestination {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn load_table(&self, snapshot: &TableSnapshot) -> PipelineResult<u64> {
        self.ensure_reachable()?;

        let failing = self
            .failing_loads
            .lock()
            .map_err(|_| lock_poisoned(Endpoint::Destination))?
            .contains(&snapshot.name);
        if failing {
            return Err(PipelineError::connection(
                Endpoint::Destination,
                format!("connection lost while loading {}", snapshot.name),
            ));
        }

        let mut tables = self.tables.write().map_err(|_| lock_poisoned(Endpoint::Destination))?;
        tables.insert(snapshot.name.clone(), snapshot.clone());
        Ok(snapshot.row_count())
    }

    async fn fetch_table(&self, table: &str) -> PipelineResult<TableSnapshot> {
        self.ensure_reachable()?;
        let tables = self.tables.read().map_err(|_| lock_poisoned(Endpoint::Destination))?;
        self.require_table(&tables, table).cloned()
    }

    async fn table_exists(&self, table: &str) -> PipelineResult<bool> {
        self.ensure_reachable()?;
        let tables = self.tables.read().map_err(|_| lock_poisoned(Endpoint::Destination))?;
        Ok(tables.contains_key(table))
    }

    async fn joined_readings(&self, vitals: &[Vital]) -> PipelineResult<Vec<JoinedReading>> {
        self.ensure_reachable()?;
        let tables = self.tables.read().map_err(|_| lock_poisoned(Endpoint::Destination))?;
        let patients = self.require_table(&tables, PATIENTS_TABLE)?;
        let readings = self.require_table(&tables, VITALS_TABLE)?;

        // Patients keyed by id; a duplicated id joins once per copy, as in SQL
        let mut by_id: BTreeMap<String, Vec<Option<String>>> = BTreeMap::new();
        for patient in &patients.rows {
            if let Some(id) = cell_text(patient.get("patient_id")) {
                by_id
                    .entry(id)
                    .or_default()
                    .push(cell_text(patient.get("date_of_birth")));
            }
        }

        let mut joined = Vec::new();
        for reading in &readings.rows {
            let Some(id) = cell_text(reading.get("patient_id")) else {
                continue;
            };
            let Some(dobs) = by_id.get(&id) else {
                continue;
            };

            for dob in dobs {
                let mut row = JoinedReading::new(id.clone(), dob.as_deref());
                for vital in vitals {
                    if let Some(value) = cell_text(reading.get(vital.source_column())) {
                        row = row.with_vital(*vital, value);
                    }
                }
                joined.push(row);
            }
        }

        Ok(joined)
    }

    async fn publish_aggregate(&self, spec: &AggregateSpec, rows: &[AggregateRow]) -> PipelineResult<()> {
        self.ensure_reachable()?;
        spec.validate()?;
        let mut aggregates = self
            .aggregates
            .write()
            .map_err(|_| lock_poisoned(Endpoint::Destination))?;
        aggregates.insert(spec.relation.clone(), rows.to_vec());
        Ok(())
    }

    async fn read_aggregate(&self, spec: &AggregateSpec) -> PipelineResult<Vec<AggregateRow>> {
        self.ensure_reachable()?;
        let aggregates = self
            .aggregates
            .read()
            .map_err(|_| lock_poisoned(Endpoint::Destination))?;
        let mut rows = aggregates.get(&spec.relation).cloned().ok_or_else(|| {
            PipelineError::schema(format!(
                "relation {}.{} does not exist",
                self.namespace, spec.relation
            ))
        })?;
        rows.sort_by_key(|row| row.age_group);
        Ok(rows)
    }
}

// =========================================================================
// Connector
// =========================================================================

/// Hands out shared in-memory stores regardless of descriptor
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    source: Arc<MemorySource>,
    destination: Arc<MemoryDestination>,
}

impl MemoryConnector {
    pub fn new(source: Arc<MemorySource>, destination: Arc<MemoryDestination>) -> Self {
        Self { source, destination }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect_source(
        &self,
        _descriptor: &SourceDescriptor,
        _schema: &str,
    ) -> PipelineResult<Arc<dyn SourceStore>> {
        self.source.ensure_reachable()?;
        Ok(self.source.clone())
    }

    async fn connect_destination(
        &self,
        _descriptor: &DestinationDescriptor,
        _namespace: &str,
    ) -> PipelineResult<Arc<dyn DestinationStore>> {
        self.destination.ensure_reachable()?;
        Ok(self.destination.clone())
    }
}
