use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;
use violations_tracker::apis::seed::SeedAdapter;
use violations_tracker::config::{SeedSourceConfig, ServerConfig};
use violations_tracker::pipeline::{IngestOptions, IngestPipeline};
use violations_tracker::query::QueryService;
use violations_tracker::server::{create_server, AppState};
use violations_tracker::storage::{SqliteStore, ViolationStore};
use violations_tracker::types::SourceAdapter;

fn repo_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(relative)
}

struct TestApp {
    router: Router,
    pipeline: Arc<IngestPipeline>,
}

/// Router over an in-memory store loaded from the shipped seed dataset.
async fn seeded_app() -> TestApp {
    let store: Arc<dyn ViolationStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let seed = SeedAdapter::new(&SeedSourceConfig {
        enabled: true,
        path: repo_path("data/seed_violations.json"),
    })
    .unwrap();
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(seed)];
    let pipeline = Arc::new(
        IngestPipeline::new(store.clone(), adapters, IngestOptions::default()).unwrap(),
    );
    pipeline.run(false).await.unwrap();

    let config = ServerConfig {
        static_dir: repo_path("static"),
        ..ServerConfig::default()
    };
    let query = Arc::new(QueryService::new(store, config.default_per_page, config.max_per_page));
    let router = create_server(
        AppState {
            query,
            pipeline: pipeline.clone(),
        },
        &config,
    );
    TestApp { router, pipeline }
}

async fn send(router: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().method(method).uri(uri).body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    send(router, Method::GET, uri, Body::empty()).await
}

#[tokio::test]
async fn health_reports_healthy() {
    let app = seeded_app().await;
    let (status, body) = get(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn state_filter_returns_newest_first_with_undated_last() {
    let app = seeded_app().await;
    let (status, body) = get(&app.router, "/api/violations?state=TX&page=1&per_page=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 5);
    assert_eq!(body["page"], 1);
    assert_eq!(body["per_page"], 10);
    assert_eq!(body["pages"], 1);

    let results = body["results"].as_array().unwrap();
    assert!(results.iter().all(|v| v["state"] == "TX"));
    let ids: Vec<&str> = results.iter().map(|v| v["source_id"].as_str().unwrap()).collect();
    assert_eq!(
        ids,
        vec!["seed-tx-001", "seed-tx-002", "seed-tx-003", "seed-tx-004", "seed-tx-005"]
    );
    assert!(results[4]["date"].is_null());
}

#[tokio::test]
async fn pages_cover_every_record_exactly_once() {
    let app = seeded_app().await;
    let mut seen = HashSet::new();
    let mut page = 1;
    loop {
        let (status, body) = get(&app.router, &format!("/api/violations?per_page=3&page={page}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 14);
        assert_eq!(body["pages"], 5);
        let results = body["results"].as_array().unwrap();
        if results.is_empty() {
            break;
        }
        for v in results {
            assert!(seen.insert(v["id"].as_str().unwrap().to_string()), "repeated {v}");
        }
        page += 1;
    }
    assert_eq!(seen.len(), 14);
    assert_eq!(page, 6);
}

#[tokio::test]
async fn filters_combine_as_a_conjunction() {
    let app = seeded_app().await;
    let (status, body) = get(
        &app.router,
        "/api/violations?state=tx&severity=high&date_from=2023-01-01&date_to=2023-12-31",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["results"][0]["source_id"], "seed-tx-003");

    let (_, body) = get(&app.router, "/api/violations?search=hog&source=seed").await;
    let names: Vec<&str> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["facility_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Sample Hog Confinement H", "Sample Hog Operation G"]);

    // full state names in the seed file were normalized on the way in
    let (_, body) = get(&app.router, "/api/violations?state=IA").await;
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn invalid_parameters_are_rejected_with_error_body() {
    let app = seeded_app().await;
    for uri in [
        "/api/violations?date_from=2024-02-01&date_to=2024-01-01",
        "/api/violations?per_page=0",
        "/api/violations?per_page=500",
        "/api/violations?state=Texas",
        "/api/violations?severity=Critical",
        "/api/violations?page=-1",
        "/api/violations?state=TX&state=AR",
        "/api/runs?limit=1&limit=2",
    ] {
        let (status, body) = get(&app.router, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"], "validation_error", "{uri}");
        assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()), "{uri}");
    }
}

#[tokio::test]
async fn single_violation_lookup() {
    let app = seeded_app().await;
    let (_, body) = get(&app.router, "/api/violations?state=AR&severity=High").await;
    let id = body["results"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = get(&app.router, &format!("/api/violations/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source_id"], "tyson-001");
    assert_eq!(body["source"], "SEED");

    let (status, body) = get(&app.router, "/api/violations/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = get(
        &app.router,
        "/api/violations/00000000-0000-4000-8000-000000000000",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn stats_and_states_summarize_the_store() {
    let app = seeded_app().await;
    let (status, stats) = get(&app.router, "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_violations"], 14);
    assert_eq!(stats["by_source"]["SEED"], 14);
    assert_eq!(stats["by_severity"]["High"], 6);
    assert_eq!(stats["by_severity"]["Medium"], 5);
    assert_eq!(stats["by_severity"]["Low"], 3);
    assert_eq!(stats["by_state"]["TX"], 5);
    assert_eq!(stats["states_count"], 8);

    let (status, states) = get(&app.router, "/api/states").await;
    assert_eq!(status, StatusCode::OK);
    let codes: Vec<&str> = states
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["state"].as_str().unwrap())
        .collect();
    assert_eq!(codes, vec!["AR", "CA", "GA", "IA", "MN", "NC", "NE", "TX"]);
    assert_eq!(states[5]["count"], 2);
}

#[tokio::test]
async fn runs_endpoint_lists_the_seed_run() {
    let app = seeded_app().await;
    let (status, runs) = get(&app.router, "/api/runs?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["status"], "completed");
    assert_eq!(runs[0]["adapters"][0]["adapter"], "seed");
    assert_eq!(runs[0]["adapters"][0]["inserted"], 14);

    let (status, _) = get(&app.router, "/api/runs?limit=1000").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ingest_trigger_conflicts_while_a_run_is_active() {
    let app = seeded_app().await;

    let held = app.pipeline.try_begin(false).await.unwrap();
    let (status, body) = send(&app.router, Method::POST, "/admin/ingest", Body::empty()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "run_in_progress");
    held.execute().await.unwrap();

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/admin/ingest",
        Body::from(r#"{"full": true}"#),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "started");
    assert!(body["run_id"].as_str().is_some());

    let (status, body) = send(&app.router, Method::POST, "/admin/ingest", Body::from("{nope")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn frontend_is_served_from_the_root() {
    let app = seeded_app().await;
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("/api/violations"));
}
