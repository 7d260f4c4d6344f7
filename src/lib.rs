//! Health Analytics Library
//!
//! Replicates patients and vital readings from an operational PostgreSQL
//! database into an analytics namespace, then rebuilds an age-group summary
//! that a read-only dashboard API serves.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod connection;
pub mod domain;
mod error;
pub mod pipeline;
pub mod replication;
pub mod store;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use aggregate::{AggregateBuilder, AggregateSpec, BuildReport};
pub use config::{Config, ConfigError, ConfigValues};
pub use connection::{ConnectionResolver, Endpoint};
pub use domain::{AgeGroup, Vital};
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use pipeline::{Pipeline, PipelineReport, PipelineState, Stage, StageFailure};
pub use replication::{ReplicationReport, Replicator};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "health_analytics=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
