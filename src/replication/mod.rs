//! Replication module
//!
//! Full-refresh extract/load of source tables into the destination namespace.
//! Extraction runs concurrently; loading starts only once every table has been
//! extracted, and each table is replaced in its own transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;

use crate::error::{PipelineError, PipelineResult};
use crate::store::{DestinationStore, SourceStore, TableSnapshot};

/// Per-table outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: String,
    pub rows: u64,
}

/// Outcome of a replication run
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationReport {
    pub namespace: String,
    pub tables: Vec<TableReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ReplicationReport {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.table.clone()).collect()
    }
}

/// Copies named source tables into the destination
#[derive(Clone)]
pub struct Replicator {
    source: Arc<dyn SourceStore>,
    destination: Arc<dyn DestinationStore>,
}

impl Replicator {
    pub fn new(source: Arc<dyn SourceStore>, destination: Arc<dyn DestinationStore>) -> Self {
        Self { source, destination }
    }

    /// Replicate `tables` in full.
    ///
    /// Fails without touching the destination if any extraction fails. If a
    /// load fails after earlier tables were replaced, the error is
    /// [`PipelineError::PartialReplication`] naming the tables already loaded.
    pub async fn replicate(&self, tables: &[&str]) -> PipelineResult<ReplicationReport> {
        let started_at = Utc::now();
        tracing::info!(
            source = %self.source.describe(),
            namespace = %self.destination.namespace(),
            tables = ?tables,
            "Starting replication"
        );

        let snapshots = self.extract_all(tables).await?;

        let mut reports = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            match self.destination.load_table(snapshot).await {
                Ok(rows) => {
                    tracing::info!(table = %snapshot.name, rows = rows, "Table replicated");
                    reports.push(TableReport {
                        table: snapshot.name.clone(),
                        rows,
                    });
                }
                Err(cause) => {
                    tracing::error!(table = %snapshot.name, error = %cause, "Table load failed");
                    if reports.is_empty() {
                        return Err(cause);
                    }
                    return Err(PipelineError::PartialReplication {
                        completed: reports.into_iter().map(|r| r.table).collect(),
                        table: snapshot.name.clone(),
                        cause: Box::new(cause),
                    });
                }
            }
        }

        let report = ReplicationReport {
            namespace: self.destination.namespace().to_string(),
            tables: reports,
            started_at,
            completed_at: Utc::now(),
        };

        tracing::info!(
            tables = report.tables.len(),
            rows = report.total_rows(),
            "Replication complete"
        );

        Ok(report)
    }

    /// Extract every table concurrently, returning snapshots in request order
    async fn extract_all(&self, tables: &[&str]) -> PipelineResult<Vec<TableSnapshot>> {
        let mut set = JoinSet::new();
        for (index, table) in tables.iter().enumerate() {
            let source = Arc::clone(&self.source);
            let table = table.to_string();
            set.spawn(async move {
                let result = source.fetch_table(&table).await;
                (index, table, result)
            });
        }

        let mut snapshots: Vec<Option<TableSnapshot>> = vec![None; tables.len()];
        let mut first_error: Option<(usize, PipelineError)> = None;

        while let Some(joined) = set.join_next().await {
            let (index, table, result) = joined.map_err(|e| {
                PipelineError::computation(format!("extraction task failed: {}", e))
            })?;

            match result {
                Ok(snapshot) => {
                    tracing::debug!(table = %table, rows = snapshot.rows.len(), "Table extracted");
                    snapshots[index] = Some(snapshot);
                }
                Err(e) => {
                    tracing::error!(table = %table, error = %e, "Table extraction failed");
                    // Report the earliest table in request order
                    if first_error.as_ref().map_or(true, |(i, _)| index < *i) {
                        first_error = Some((index, e));
                    }
                }
            }
        }

        if let Some((_, e)) = first_error {
            return Err(e);
        }

        Ok(snapshots.into_iter().flatten().collect())
    }
}
