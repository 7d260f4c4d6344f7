//! Pipeline runner
//!
//! Replicates the source tables and rebuilds the aggregate once.
//! Run with: cargo run --bin pipeline --release

use std::sync::Arc;

use health_analytics::store::PgConnector;
use health_analytics::{init_tracing, Config, Pipeline};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let connector = Arc::new(PgConnector::new(config.database_max_connections));

    let mut pipeline = Pipeline::new(&config, connector);
    tracing::info!(run_id = %pipeline.run_id(), "Starting health analytics pipeline");

    match pipeline.run().await {
        Ok(report) => {
            for table in &report.replication.tables {
                tracing::info!(table = %table.table, rows = table.rows, "Replica table refreshed");
            }
            tracing::info!(
                relation = %report.aggregate.relation,
                rows = report.aggregate.rows_published,
                excluded_patients = report.aggregate.stats.patients_without_birth_date,
                "Pipeline completed successfully"
            );
            Ok(())
        }
        Err(failure) => {
            tracing::error!(
                run_id = %failure.run_id,
                stage = %failure.stage,
                retryable = failure.cause.is_retryable(),
                "{}",
                failure
            );
            Err(failure.into())
        }
    }
}
