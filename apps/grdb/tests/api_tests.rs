//! Integration tests for the grdb HTTP API.
//!
//! Uses axum-test to test the API handlers without starting a real server.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum_test::TestServer;
use grdb::api::{
    AppState, CreatedResponse, ErrorResponse, HealthResponse, MetricDefinitionJson,
    MetricResponse, SearchResponse, StatusResponse, create_router, create_router_with_limit,
};
use grdb_core::{
    Catalog, EquivalenceReport, ExperimentReport, MetricValue, RecipeReport, Strategy,
    store_from_bytes,
};
use serde_json::{Value, json};
use tower::ServiceExt;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Create a test server with a fresh in-memory catalog.
fn create_test_server() -> TestServer {
    let state = AppState::new(Catalog::new().unwrap()).unwrap();
    TestServer::new(create_router(state)).unwrap()
}

fn measurement(value: f64, unit: &str) -> Value {
    json!({ "value": value, "unit": unit })
}

/// Recipe 1: a full CH4 growth. Recipe 2: no growing step, argon at zero.
fn sample_recipes() -> Value {
    json!([
        {
            "carbon_source": "CH4",
            "base_pressure": measurement(500.0, "mTorr"),
            "preparation_steps": [
                {
                    "name": "Ramp",
                    "furnace_temperature": measurement(700.0, "C"),
                    "hydrogen_flow_rate": measurement(100.0, "sccm"),
                    "duration": measurement(20.0, "min")
                },
                {
                    "name": "Growing",
                    "furnace_temperature": measurement(1050.0, "C"),
                    "carbon_source_flow_rate": measurement(5.0, "sccm"),
                    "argon_flow_rate": measurement(0.5, "slm"),
                    "duration": measurement(0.5, "h")
                }
            ]
        },
        {
            "preparation_steps": [
                { "name": "Annealing", "argon_flow_rate": measurement(0.0, "sccm") }
            ]
        }
    ])
}

async fn create_populated_test_server() -> TestServer {
    let server = create_test_server();
    let response = server.post("/recipes").json(&sample_recipes()).await;
    response.assert_status(StatusCode::CREATED);
    server
}

// =============================================================================
// HEALTH / STATUS TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let server = create_test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_counts() {
    let server = create_populated_test_server().await;

    let status: StatusResponse = server.get("/status").await.json();
    assert!(!status.persistent);
    assert_eq!(status.recipes, 2);
    assert_eq!(status.steps, 3);
    assert_eq!(status.metrics, 10);
}

#[tokio::test]
async fn test_metric_definitions_carry_sql() {
    let server = create_test_server();

    let defs: Vec<MetricDefinitionJson> = server.get("/metrics/definitions").await.json();
    let growth = defs.iter().find(|d| d.name == "growth_duration").unwrap();
    assert_eq!(growth.unit.as_deref(), Some("min"));
    assert_eq!(growth.aggregate, "max");
    assert!(growth.sql.contains("Growing"));
    let helium = defs.iter().find(|d| d.name == "uses_helium").unwrap();
    assert_eq!(helium.unit, None);
}

// =============================================================================
// RECIPE TESTS
// =============================================================================

#[tokio::test]
async fn test_create_single_and_batch() {
    let server = create_test_server();

    let one: CreatedResponse = server
        .post("/recipes")
        .json(&json!({ "preparation_steps": [] }))
        .await
        .json();
    assert_eq!(one.ids, vec![1]);

    let batch: CreatedResponse = server.post("/recipes").json(&sample_recipes()).await.json();
    assert_eq!(batch.ids, vec![2, 3]);
}

#[tokio::test]
async fn test_invalid_batch_stores_nothing() {
    let server = create_test_server();

    let response = server
        .post("/recipes")
        .json(&json!([
            { "preparation_steps": [] },
            { "preparation_steps": [ { "duration": measurement(1.0, "fortnight") } ] }
        ]))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let error: ErrorResponse = response.json();
    assert!(error.error.contains("fortnight"));

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.recipes, 0);
}

#[tokio::test]
async fn test_get_recipe_reports_value_and_unit() {
    let server = create_populated_test_server().await;

    let report: RecipeReport = server.get("/recipes/1").await.json();
    assert_eq!(report.carbon_source.as_deref(), Some("CH4"));
    assert_eq!(report.base_pressure.unit, "Torr");
    assert!((report.base_pressure.value.unwrap() - 0.5).abs() < 1e-12);

    let growth = &report.metrics["growth_duration"];
    assert_eq!(growth.value, Some(MetricValue::Number(30.0)));
    assert_eq!(growth.unit.as_deref(), Some("min"));
    assert_eq!(
        report.metrics["max_flow_rate"].value,
        Some(MetricValue::Number(500.0))
    );
    assert_eq!(report.preparation_steps.as_ref().unwrap().len(), 2);
}

#[tokio::test]
async fn test_strategies_agree() {
    let server = create_populated_test_server().await;

    let memory: Vec<RecipeReport> = server
        .get("/recipes")
        .add_query_param("strategy", "memory")
        .await
        .json();
    let pushdown: Vec<RecipeReport> = server.get("/recipes").await.json();
    assert_eq!(memory.len(), 2);
    assert_eq!(memory, pushdown);
}

#[tokio::test]
async fn test_unknown_strategy_is_rejected() {
    let server = create_test_server();

    let response = server.get("/recipes").add_query_param("strategy", "sql").await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_recipe_is_404() {
    let server = create_test_server();

    server.get("/recipes/42").await.assert_status(StatusCode::NOT_FOUND);
    server
        .delete("/recipes/42")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_recipe() {
    let server = create_populated_test_server().await;

    server
        .delete("/recipes/2")
        .await
        .assert_status(StatusCode::NO_CONTENT);
    let list: Vec<RecipeReport> = server.get("/recipes").await.json();
    assert_eq!(list.len(), 1);
}

// =============================================================================
// METRIC TESTS
// =============================================================================

#[tokio::test]
async fn test_single_metric() {
    let server = create_populated_test_server().await;

    let metric: MetricResponse = server
        .get("/recipes/1/metrics/maximum_temperature")
        .add_query_param("strategy", "memory")
        .await
        .json();
    assert_eq!(metric.strategy, Strategy::InMemory);
    assert_eq!(metric.value, Some(MetricValue::Number(1050.0)));
    assert_eq!(metric.unit.as_deref(), Some("C"));
    assert!(metric.error.is_none());
}

#[tokio::test]
async fn test_zero_flow_is_not_use() {
    let server = create_populated_test_server().await;

    let metric: MetricResponse = server.get("/recipes/2/metrics/uses_argon").await.json();
    assert_eq!(metric.value, Some(MetricValue::Flag(false)));
    let metric: MetricResponse = server.get("/recipes/2/metrics/growth_duration").await.json();
    assert_eq!(metric.value, None);
}

#[tokio::test]
async fn test_unknown_metric_is_404() {
    let server = create_populated_test_server().await;

    let response = server.get("/recipes/1/metrics/average_mood").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

// =============================================================================
// SEARCH TESTS
// =============================================================================

#[tokio::test]
async fn test_search_by_expression_and_structure() {
    let server = create_populated_test_server().await;

    let found: SearchResponse = server
        .post("/recipes/search")
        .json(&json!({
            "expressions": ["growth_duration>=30"],
            "conditions": [ { "metric": "uses_argon", "op": "==", "value": true } ]
        }))
        .await
        .json();
    assert_eq!(found.ids, vec![1]);

    let none: SearchResponse = server
        .post("/recipes/search")
        .json(&json!({ "expressions": ["maximum_temperature>2000"] }))
        .await
        .json();
    assert_eq!(none.count, 0);
}

#[tokio::test]
async fn test_search_rejects_bad_condition() {
    let server = create_test_server();

    server
        .post("/recipes/search")
        .json(&json!({ "expressions": ["uses_argon>1"] }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .post("/recipes/search")
        .json(&json!({ "expressions": ["nothing=1"] }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

// =============================================================================
// EXPERIMENT TESTS
// =============================================================================

#[tokio::test]
async fn test_experiment_lifecycle() {
    let server = create_populated_test_server().await;

    let created: CreatedResponse = server
        .post("/experiments")
        .json(&json!({
            "recipe_id": 1,
            "substrate": { "catalyst": "Copper", "thickness": measurement(25.0, "um") },
            "raman_files": [
                { "filename": "a.txt", "wavelength": measurement(532.0, "nm") }
            ]
        }))
        .await
        .json();
    assert_eq!(created.ids, vec![1]);

    let report: ExperimentReport = server.get("/experiments/1").await.json();
    assert_eq!(report.raman_files.len(), 1);
    assert_eq!(report.raman_files[0].wavelength.unit, "nm");
    assert_eq!(report.substrate.as_ref().unwrap().thickness.unit, "um");

    // Referenced recipe cannot be deleted until the experiment is gone.
    server
        .delete("/recipes/1")
        .await
        .assert_status(StatusCode::CONFLICT);
    server
        .delete("/experiments/1")
        .await
        .assert_status(StatusCode::NO_CONTENT);
    server
        .delete("/recipes/1")
        .await
        .assert_status(StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_experiment_for_missing_recipe_is_404() {
    let server = create_test_server();

    server
        .post("/experiments")
        .json(&json!({ "recipe_id": 9 }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_raman_data_for_missing_file_is_404() {
    let server = create_test_server();

    server
        .get("/raman/5/data")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

// =============================================================================
// VERIFY TESTS
// =============================================================================

#[tokio::test]
async fn test_verify_reports_equivalence() {
    let server = create_populated_test_server().await;

    let report: EquivalenceReport = server.get("/verify").await.json();
    assert!(report.is_equivalent());
    assert_eq!(report.recipes_checked, 2);
    assert_eq!(report.metrics_checked, 20);
}

#[tokio::test]
async fn test_redb_backed_server() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::with_redb(dir.path().join("api.redb")).unwrap();
    let server = TestServer::new(create_router(AppState::new(catalog).unwrap())).unwrap();

    server
        .post("/recipes")
        .json(&sample_recipes())
        .await
        .assert_status(StatusCode::CREATED);
    let report: RecipeReport = server.get("/recipes/1").await.json();
    assert_eq!(
        report.metrics["carbon_source_flow_rate"].value,
        Some(MetricValue::Number(5.0))
    );
    let verify: EquivalenceReport = server.get("/verify").await.json();
    assert!(verify.is_equivalent());
}

// =============================================================================
// SNAPSHOT TESTS
// =============================================================================

#[tokio::test]
async fn test_snapshot_written_after_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grdb.snapshot");
    let state = AppState::new(Catalog::new().unwrap())
        .unwrap()
        .with_snapshot(path.clone());
    let server = TestServer::new(create_router(state)).unwrap();

    server
        .post("/recipes")
        .json(&sample_recipes())
        .await
        .assert_status(StatusCode::CREATED);

    let store = store_from_bytes(&std::fs::read(&path).unwrap()).unwrap();
    let restored = Catalog::with_store(store).unwrap();
    assert_eq!(restored.stats().unwrap().recipes, 2);
}

#[tokio::test]
async fn test_failed_snapshot_write_keeps_catalog_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    // A directory cannot be written as a file.
    let state = AppState::new(Catalog::new().unwrap())
        .unwrap()
        .with_snapshot(dir.path().to_path_buf());
    let server = TestServer::new(create_router(state)).unwrap();

    let single = json!([{ "preparation_steps": [] }]);
    for _ in 0..2 {
        server
            .post("/recipes")
            .json(&single)
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let list: Vec<RecipeReport> = server.get("/recipes").await.json();
    assert!(list.is_empty());
    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.recipes, 0);
}

// =============================================================================
// ROUTER TESTS
// =============================================================================

#[tokio::test]
async fn test_body_limit_rejects_large_payload() {
    let state = AppState::new(Catalog::new().unwrap()).unwrap();
    let router = create_router_with_limit(state, 64);
    let body = serde_json::to_vec(&sample_recipes()).unwrap();
    assert!(body.len() > 64);

    let response = router
        .oneshot(
            Request::post("/recipes")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
