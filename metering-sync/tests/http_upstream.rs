//! `HttpUpstream` against a mock metering API.

use std::{sync::Arc, time::Duration};

use metering_client::domain::{MeasurementKind, Series};
use metering_sync::{
    clock::FixedClock,
    store::MemoryStore,
    sync::{SeriesPlan, SyncError, SyncRunner},
    upstream::{HttpUpstream, UpstreamClient},
};
use time::macros::datetime;
use wiremock::{
    matchers::{header, method, path, path_regex},
    Mock, MockServer, ResponseTemplate,
};

fn upstream(server: &MockServer) -> Arc<HttpUpstream> {
    Arc::new(HttpUpstream::new(&server.uri(), "secret-token", Duration::from_secs(5)).unwrap())
}

fn short_plan() -> SeriesPlan {
    SeriesPlan {
        chunk_days: 10,
        max_history_days: 5,
        activation_date: None,
        upstream_cache: true,
    }
}

#[tokio::test]
async fn sends_token_and_returns_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/consumption_load_curve/pdl-1/start/2024-03-10/end/2024-03-17/"))
        .and(header("Authorization", "secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"meter_reading": {}}"#))
        .expect(1)
        .mount(&server)
        .await;

    let response = upstream(&server)
        .get("consumption_load_curve/pdl-1/start/2024-03-10/end/2024-03-17")
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, r#"{"meter_reading": {}}"#);
}

#[tokio::test]
async fn error_statuses_are_responses_not_transport_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let response = upstream(&server).get("anything").await.unwrap();

    assert_eq!(response.status_code, 500);
    assert_eq!(response.body, "boom");
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error() {
    let upstream = HttpUpstream::new("http://127.0.0.1:1", "secret-token", Duration::from_secs(2)).unwrap();

    assert!(upstream.get("consumption_load_curve/pdl-1/start/2024-03-10/end/2024-03-17").await.is_err());
}

#[tokio::test]
async fn sync_stores_fetched_load_curve() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/consumption_load_curve/pdl-1/start/2024-03-10/end/2024-03-17/cache/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "meter_reading": {
                "interval_reading": [
                    {"value": "412", "date": "2024-03-12 00:30:00", "interval_length": "PT30M"},
                    {"value": "388", "date": "2024-03-12 01:00:00", "interval_length": "PT30M"}
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let runner = SyncRunner::new(store.clone(), upstream(&server), FixedClock(datetime!(2024-03-15 10:00:00)));
    let series = Series::detail("pdl-1", MeasurementKind::Consumption);

    let report = runner.sync(&series, &short_plan()).await;

    assert!(report.is_complete());
    let stored = store.records(&series);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].ts, datetime!(2024-03-12 00:00:00));
    assert_eq!(stored[1].value, 388.0);
}

#[tokio::test]
async fn forbidden_answer_ends_the_sync() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex("^/daily_consumption_max_power/.*"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({"detail": "no consent"})))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let runner = SyncRunner::new(store, upstream(&server), FixedClock(datetime!(2024-03-15 10:00:00)));
    let series = Series::power("pdl-1", MeasurementKind::Consumption);
    let plan = SeriesPlan {
        chunk_days: 7,
        max_history_days: 30,
        activation_date: None,
        upstream_cache: false,
    };

    let report = runner.sync(&series, &plan).await;

    assert!(matches!(report.fatal, Some(SyncError::UpstreamForbidden { status: 403, .. })));
    assert_eq!(report.windows, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
