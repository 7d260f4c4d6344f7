//! API Integration Tests

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::util::ServiceExt;

use health_analytics::aggregate::AggregateSpec;
use health_analytics::api::{self, AppState};
use health_analytics::store::MemoryDestination;
use health_analytics::Pipeline;

mod common;

fn app(destination: Arc<MemoryDestination>, spec: AggregateSpec) -> Router {
    api::build_router(AppState::new(destination, spec))
}

async fn get_json(app: &Router, uri: &str) -> Value {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK, "{} should answer 200", uri);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_vitals_by_age_group_after_pipeline() {
    let config = common::test_config();
    let stores = common::scenario_stores();
    Pipeline::new(&config, stores.connector.clone())
        .as_of(common::as_of())
        .run()
        .await
        .unwrap();

    let app = app(stores.destination.clone(), config.aggregate.clone());
    let json = get_json(&app, "/api/vitals-by-age-group").await;

    assert_eq!(json["success"], true);
    assert_eq!(
        json["data"],
        serde_json::json!([
            {"ageGroup": "18-34", "totalReadings": 2, "uniquePatients": 1, "avgPulseRate": 72.0},
            {"ageGroup": "65+", "totalReadings": 1, "uniquePatients": 1, "avgPulseRate": 60.0}
        ])
    );
}

#[tokio::test]
async fn test_vitals_by_age_group_before_pipeline_falls_back() {
    let destination = Arc::new(MemoryDestination::new("analytics"));
    let app = app(destination, AggregateSpec::pulse_by_age_group());

    let json = get_json(&app, "/api/vitals-by-age-group").await;

    assert_eq!(json["success"], false);
    assert_eq!(
        json["data"],
        serde_json::json!([
            {"ageGroup": "0-17", "totalReadings": 0, "uniquePatients": 0, "avgPulseRate": 0.0}
        ])
    );
    let message = json["message"].as_str().unwrap();
    assert!(!message.is_empty());
    assert!(!message.contains("mv_pulse_rate_by_age_group"));
}

#[tokio::test]
async fn test_unreachable_destination_falls_back() {
    let destination = Arc::new(MemoryDestination::new("analytics"));
    destination.set_reachable(false);
    let app = app(destination, AggregateSpec::vitals_by_age_group());

    let json = get_json(&app, "/api/vitals-by-age-group").await;

    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Analytics database is not reachable");
    let placeholder = &json["data"][0];
    assert_eq!(placeholder["ageGroup"], "0-17");
    assert_eq!(placeholder["avgTemperature"], 0.0);
    assert_eq!(placeholder["avgDiastolic"], 0.0);
    assert!(placeholder.get("uniquePatients").is_none());
}

#[tokio::test]
async fn test_refresh_rebuilds_from_replica() {
    let config = common::test_config();
    let stores = common::scenario_stores();
    Pipeline::new(&config, stores.connector.clone())
        .as_of(common::as_of())
        .run()
        .await
        .unwrap();

    // A second shape over the same replica is only published on refresh
    let app = app(stores.destination.clone(), AggregateSpec::vitals_by_age_group());
    let before = get_json(&app, "/api/vitals-by-age-group").await;
    assert_eq!(before["success"], false);

    let req = Request::builder()
        .method("POST")
        .uri("/api/refresh")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], true);

    let after = get_json(&app, "/api/vitals-by-age-group").await;
    assert_eq!(after["success"], true);
    assert!(!after["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_refresh_without_replica_reports_failure() {
    let destination = Arc::new(MemoryDestination::new("analytics"));
    let app = app(destination, AggregateSpec::pulse_by_age_group());

    let json = get_json(&app, "/api/refresh").await;

    assert_eq!(json["success"], false);
    assert!(json["message"].as_str().unwrap().starts_with("Failed to refresh analytics"));
}

#[tokio::test]
async fn test_health_and_dashboard() {
    let destination = Arc::new(MemoryDestination::new("analytics"));
    let app = app(destination, AggregateSpec::pulse_by_age_group());

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"OK");

    let req = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("/api/vitals-by-age-group"));
}
