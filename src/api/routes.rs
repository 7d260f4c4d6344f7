//! API Routes
//!
//! Read-only dashboard endpoints over the published aggregate relation.
//! Every JSON endpoint answers 200 with a `success` flag; failures carry a
//! readable message and a default payload of the same shape.

use std::sync::Arc;

use axum::{extract::State, response::Html, routing::get, Json, Router};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::aggregate::{AggregateBuilder, AggregateRow, AggregateSpec};
use crate::domain::{AgeGroup, Vital};
use crate::error::{ErrorKind, PipelineError};
use crate::store::DestinationStore;

// =========================================================================
// State
// =========================================================================

/// Shared state for the dashboard routes
#[derive(Clone)]
pub struct AppState {
    destination: Arc<dyn DestinationStore>,
    builder: AggregateBuilder,
    /// Serializes rebuilds triggered through this process
    refresh_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(destination: Arc<dyn DestinationStore>, spec: AggregateSpec) -> Self {
        Self {
            builder: AggregateBuilder::new(destination.clone(), spec),
            destination,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn spec(&self) -> &AggregateSpec {
        self.builder.spec()
    }
}

// =========================================================================
// Request/Response types
// =========================================================================

/// One age group as served to the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeGroupSummary {
    pub age_group: String,
    pub total_readings: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_patients: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_pulse_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_systolic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_diastolic: Option<f64>,
}

impl AgeGroupSummary {
    /// Summary for a published row. Averages the shape defines but the row
    /// lacks are reported as zero.
    pub fn from_row(spec: &AggregateSpec, row: &AggregateRow) -> Self {
        let mut summary = Self {
            age_group: row.age_group.label().to_string(),
            total_readings: row.total_readings,
            unique_patients: spec
                .include_unique_patients
                .then(|| row.unique_patients.unwrap_or(0)),
            avg_temperature: None,
            avg_pulse_rate: None,
            avg_systolic: None,
            avg_diastolic: None,
        };

        for metric in &spec.metrics {
            let value = row
                .average(metric.vital)
                .as_ref()
                .and_then(Decimal::to_f64)
                .unwrap_or(0.0);
            let slot = match metric.vital {
                Vital::Temperature => &mut summary.avg_temperature,
                Vital::PulseRate => &mut summary.avg_pulse_rate,
                Vital::Systolic => &mut summary.avg_systolic,
                Vital::Diastolic => &mut summary.avg_diastolic,
            };
            *slot = Some(value);
        }

        summary
    }

    /// Zeroed placeholder with the same fields as a real row
    pub fn placeholder(spec: &AggregateSpec, age_group: AgeGroup) -> Self {
        let row = AggregateRow {
            age_group,
            total_readings: 0,
            unique_patients: spec.include_unique_patients.then_some(0),
            averages: spec.metrics.iter().map(|m| (m.vital, None)).collect(),
        };
        Self::from_row(spec, &row)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VitalsByAgeGroupResponse {
    pub success: bool,
    pub data: Vec<AgeGroupSummary>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub success: bool,
    pub message: String,
}

/// Message shown to dashboard users for a failure; details stay in the logs
fn user_message(err: &PipelineError) -> &'static str {
    match err.kind() {
        ErrorKind::Schema => "Analytics data is not available yet (run the pipeline first)",
        ErrorKind::Connection => "Analytics database is not reachable",
        ErrorKind::Configuration => "Analytics service is misconfigured",
        ErrorKind::Computation => "Analytics data could not be computed",
    }
}

// =========================================================================
// API Router
// =========================================================================

/// Create the dashboard router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard))
        .route("/api/vitals-by-age-group", get(vitals_by_age_group))
        .route("/api/refresh", get(refresh).post(refresh))
}

// =========================================================================
// GET /
// =========================================================================

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Health Analytics Dashboard</title>
    <style>
        body { font-family: Arial, sans-serif; margin: 40px; }
        .container { max-width: 800px; margin: 0 auto; }
        .endpoint { background: #f5f5f5; padding: 15px; margin: 10px 0; border-radius: 5px; }
        .endpoint h3 { margin: 0 0 10px 0; color: #333; }
        .endpoint a { color: #007bff; text-decoration: none; }
        .endpoint a:hover { text-decoration: underline; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Pulse Rate Analytics Dashboard</h1>
        <p>Average pulse rate by age group</p>

        <div class="endpoint">
            <h3>Pulse Rate by Age Group</h3>
            <a href="/api/vitals-by-age-group" target="_blank">View Pulse Rate Analytics</a>
            <p>Average pulse rate data grouped by age range</p>
        </div>

        <div class="endpoint">
            <h3>Refresh Data</h3>
            <a href="/api/refresh" target="_blank">Refresh Analytics Data</a>
            <p>Rebuild the analytics from the latest replicated data</p>
        </div>
    </div>
</body>
</html>
"#;

/// Serve the dashboard page
async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

// =========================================================================
// GET /api/vitals-by-age-group
// =========================================================================

/// Published aggregate rows in category order
async fn vitals_by_age_group(State(state): State<AppState>) -> Json<VitalsByAgeGroupResponse> {
    let spec = state.spec();

    match state.destination.read_aggregate(spec).await {
        Ok(rows) => Json(VitalsByAgeGroupResponse {
            success: true,
            data: rows.iter().map(|row| AgeGroupSummary::from_row(spec, row)).collect(),
            message: "Pulse rate by age group retrieved successfully".to_string(),
        }),
        Err(e) => {
            tracing::warn!(relation = %spec.relation, error = %e, "Aggregate read failed");
            Json(VitalsByAgeGroupResponse {
                success: false,
                data: vec![AgeGroupSummary::placeholder(spec, AgeGroup::Minor)],
                message: user_message(&e).to_string(),
            })
        }
    }
}

// =========================================================================
// GET|POST /api/refresh
// =========================================================================

/// Rebuild the aggregate relation from the current replica
async fn refresh(State(state): State<AppState>) -> Json<RefreshResponse> {
    let _guard = state.refresh_lock.lock().await;

    match state.builder.rebuild().await {
        Ok(report) => Json(RefreshResponse {
            success: true,
            message: format!(
                "Pulse rate analytics refreshed successfully ({} age groups)",
                report.rows_published
            ),
        }),
        Err(e) => {
            tracing::error!(relation = %state.spec().relation, error = %e, "Aggregate refresh failed");
            Json(RefreshResponse {
                success: false,
                message: format!("Failed to refresh analytics: {}", user_message(&e)),
            })
        }
    }
}
