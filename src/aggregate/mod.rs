//! Aggregate module
//!
//! Derived, queryable summaries built from the replica.
//! Aggregate relations are destroyed and recreated on every rebuild.

mod builder;
mod spec;

pub use builder::{compute_aggregate, AggregateBuilder, AggregateStats, BuildReport};
pub use spec::{AggregateRow, AggregateSpec, MetricSpec, MAX_DECIMALS};
