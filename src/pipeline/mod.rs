//! Pipeline Orchestrator
//!
//! Sequences connection resolution, replication and the aggregate rebuild as
//! an explicit state machine:
//!
//! `Idle → Resolving → Replicating → Aggregating → Done`, with
//! `Failed { stage, .. }` reachable from every non-terminal state.
//!
//! No retries happen here. A caller that wants another attempt builds a new
//! [`Pipeline`] and runs it from `Idle`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::{AggregateBuilder, BuildReport};
use crate::config::Config;
use crate::connection::ConnectionResolver;
use crate::error::PipelineError;
use crate::replication::{ReplicationReport, Replicator};
use crate::store::{Connector, DEFAULT_TABLES};

/// Stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolving,
    Replicating,
    Aggregating,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Resolving => write!(f, "resolving"),
            Stage::Replicating => write!(f, "replicating"),
            Stage::Aggregating => write!(f, "aggregating"),
        }
    }
}

/// Where a pipeline run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Resolving,
    Replicating,
    Aggregating,
    Done,
    Failed(Stage),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed(_))
    }
}

/// A pipeline run that stopped in `stage`
#[derive(Debug, thiserror::Error)]
#[error("Pipeline failed while {stage}: {cause}")]
pub struct StageFailure {
    pub run_id: Uuid,
    pub stage: Stage,
    #[source]
    pub cause: PipelineError,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub replication: ReplicationReport,
    pub aggregate: BuildReport,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// One end-to-end run from live source tables to a refreshed aggregate
pub struct Pipeline<'a> {
    config: &'a Config,
    connector: Arc<dyn Connector>,
    tables: Vec<String>,
    as_of: Option<NaiveDate>,
    run_id: Uuid,
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            tables: DEFAULT_TABLES.iter().map(|t| t.to_string()).collect(),
            as_of: None,
            run_id: Uuid::new_v4(),
            state: PipelineState::Idle,
            history: vec![PipelineState::Idle],
        }
    }

    /// Compute ages as of a fixed date instead of today
    pub fn as_of(mut self, today: NaiveDate) -> Self {
        self.as_of = Some(today);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::debug!(run_id = %self.run_id, from = ?self.state, to = ?next, "Pipeline state change");
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, stage: Stage, cause: PipelineError) -> StageFailure {
        tracing::error!(run_id = %self.run_id, stage = %stage, error = %cause, "Pipeline failed");
        self.transition(PipelineState::Failed(stage));
        StageFailure {
            run_id: self.run_id,
            stage,
            cause,
        }
    }

    /// Run every stage. A pipeline runs at most once.
    pub async fn run(&mut self) -> Result<PipelineReport, StageFailure> {
        if self.state != PipelineState::Idle {
            let stage = match self.state {
                PipelineState::Failed(stage) => stage,
                _ => Stage::Resolving,
            };
            return Err(StageFailure {
                run_id: self.run_id,
                stage,
                cause: PipelineError::computation(format!(
                    "pipeline run {} already left Idle; start a new run",
                    self.run_id
                )),
            });
        }

        let started_at = Utc::now();
        tracing::info!(run_id = %self.run_id, "Pipeline started");

        // Resolving
        self.transition(PipelineState::Resolving);
        let endpoints = match ConnectionResolver::resolve(&self.config.values) {
            Ok(endpoints) => endpoints,
            Err(e) => return Err(self.fail(Stage::Resolving, e.into())),
        };
        tracing::info!(
            source = %endpoints.source.connection(),
            destination = %endpoints.destination.connection(),
            "Endpoints resolved"
        );

        // Replicating
        self.transition(PipelineState::Replicating);
        let source = self
            .connector
            .connect_source(&endpoints.source, &self.config.source_schema)
            .await;
        let source = match source {
            Ok(source) => source,
            Err(e) => return Err(self.fail(Stage::Replicating, e)),
        };
        let destination = self
            .connector
            .connect_destination(&endpoints.destination, &self.config.replica_namespace)
            .await;
        let destination = match destination {
            Ok(destination) => destination,
            Err(e) => return Err(self.fail(Stage::Replicating, e)),
        };

        let tables: Vec<&str> = self.tables.iter().map(String::as_str).collect();
        let result = Replicator::new(source, destination.clone())
            .replicate(&tables)
            .await;
        let replication = match result {
            Ok(report) => report,
            Err(e) => return Err(self.fail(Stage::Replicating, e)),
        };

        // Aggregating
        self.transition(PipelineState::Aggregating);
        let builder = AggregateBuilder::new(destination, self.config.aggregate.clone());
        let result = match self.as_of {
            Some(today) => builder.rebuild_as_of(today).await,
            None => builder.rebuild().await,
        };
        let aggregate = match result {
            Ok(report) => report,
            Err(e) => return Err(self.fail(Stage::Aggregating, e)),
        };

        self.transition(PipelineState::Done);
        let report = PipelineReport {
            run_id: self.run_id,
            replication,
            aggregate,
            started_at,
            completed_at: Utc::now(),
        };

        tracing::info!(
            run_id = %self.run_id,
            rows_replicated = report.replication.total_rows(),
            aggregate_rows = report.aggregate.rows_published,
            "Pipeline finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Resolving.to_string(), "resolving");
        assert_eq!(Stage::Aggregating.to_string(), "aggregating");
    }

    #[test]
    fn test_terminal_states() {
        assert!(PipelineState::Done.is_terminal());
        assert!(PipelineState::Failed(Stage::Replicating).is_terminal());
        assert!(!PipelineState::Idle.is_terminal());
        assert!(!PipelineState::Aggregating.is_terminal());
    }

    #[test]
    fn test_stage_failure_message() {
        let failure = StageFailure {
            run_id: Uuid::nil(),
            stage: Stage::Replicating,
            cause: PipelineError::schema("source table public.vitals does not exist"),
        };
        assert_eq!(
            failure.to_string(),
            "Pipeline failed while replicating: Schema error: source table public.vitals does not exist"
        );
    }
}
