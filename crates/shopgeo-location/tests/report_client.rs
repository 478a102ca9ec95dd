//! Integration tests for `LocationApiClient` and background reporting using
//! wiremock HTTP mocks.

use std::sync::Arc;
use std::time::Duration;

use shopgeo_core::{Coordinate, ManualClock, MemoryStore};
use shopgeo_location::{
    LocationApiClient, LocationReport, LocationStore, PositionAcquirer, ReportError, StoreConfig,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOW: i64 = 1_700_000_000_000;

fn test_client(base_url: &str) -> LocationApiClient {
    LocationApiClient::with_base_url(base_url, 30).expect("client construction should not fail")
}

fn sample_report() -> LocationReport {
    LocationReport {
        latitude: 40.7128,
        longitude: -74.006,
        accuracy_meters: Some(25.0),
        session_id: Some("sess-1".to_owned()),
    }
}

#[tokio::test]
async fn record_location_posts_with_bearer_and_parses_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/location/record/"))
        .and(header("authorization", "Bearer secret-token"))
        .and(body_json(serde_json::json!({
            "latitude": 40.7128,
            "longitude": -74.006,
            "accuracy_meters": 25.0,
            "session_id": "sess-1"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": 77,
            "latitude": 40.7128,
            "longitude": -74.006,
            "accuracy_meters": 25.0,
            "session_id": "sess-1",
            "created_at": "2025-03-01T12:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let stored = test_client(&server.uri())
        .record_location("secret-token", &sample_report())
        .await
        .expect("should parse stored location");

    assert_eq!(stored.id, Some(77));
    assert_eq!(stored.session_id.as_deref(), Some("sess-1"));
    assert!(stored.created_at.is_some());
}

#[tokio::test]
async fn unauthorized_maps_to_dedicated_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/location/record/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = test_client(&server.uri())
        .record_location("expired", &sample_report())
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::Unauthorized), "got {err:?}");
}

#[tokio::test]
async fn server_error_maps_to_unexpected_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = test_client(&server.uri())
        .record_location("tok", &sample_report())
        .await
        .unwrap_err();
    assert!(
        matches!(err, ReportError::UnexpectedStatus { status: 503, .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn malformed_body_maps_to_deserialize_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = test_client(&server.uri())
        .record_location("tok", &sample_report())
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::Deserialize { .. }), "got {err:?}");
}

fn reporting_store(server: &MockServer, token: &str) -> LocationStore {
    let client = Arc::new(test_client(&server.uri()));
    LocationStore::builder(PositionAcquirer::unsupported(), Arc::new(MemoryStore::new()))
        .config(StoreConfig {
            auto_refresh: false,
            ..StoreConfig::default()
        })
        .clock(Arc::new(ManualClock::new(NOW)))
        .reporter(client, Some("sess-9".to_owned()))
        .auth_token(Some(token.to_owned()))
        .build()
}

async fn wait_for_requests(server: &MockServer, expected: usize) {
    for _ in 0..100 {
        let seen = server.received_requests().await.map_or(0, |r| r.len());
        if seen >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn store_reports_recorded_location_in_background() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/location/record/"))
        .and(header("authorization", "Bearer live-token"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": 1,
            "latitude": 10.0,
            "longitude": 20.0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = reporting_store(&server, "live-token");
    store
        .record_location(Coordinate::new(10.0, 20.0, NOW))
        .expect("valid coordinate");

    wait_for_requests(&server, 1).await;
    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["session_id"], "sess-9");
    assert_eq!(store.current().unwrap().coordinate.latitude, 10.0);
}

#[tokio::test]
async fn failed_report_leaves_local_snapshot_intact() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = reporting_store(&server, "tok");
    store
        .record_location(Coordinate::new(1.5, 2.5, NOW))
        .expect("valid coordinate");

    wait_for_requests(&server, 1).await;
    assert_eq!(store.current().unwrap().coordinate.longitude, 2.5);
    assert_eq!(store.last_error(), None);
}
