//! Playback failure reports against a mock collector.

mod common;

use onair_metadata::{MetadataError, PlaybackReporter};
use onair_proto::protocol::PlaybackError;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dropped_stream() -> PlaybackError {
    PlaybackError {
        station_id: "bbc_radio_one".into(),
        url: "http://as-hls-ww-live.akamaized.net/radio_one.m3u8".into(),
        code: "network".into(),
    }
}

#[tokio::test]
async fn test_report_is_posted_as_json() {
    common::init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/report"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "station_id": "bbc_radio_one",
            "stream_url": "http://as-hls-ww-live.akamaized.net/radio_one.m3u8",
            "error_code": 2001,
            "app_version": "0.1.0"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status": "success", "message": "Report received" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let reporter = PlaybackReporter::new(reqwest::Client::new(), &common::config_for(&server), "0.1.0");
    let receipt = reporter.report_playback_error(&dropped_stream()).await.unwrap();
    assert_eq!(receipt.status, "success");
    assert_eq!(receipt.message.as_deref(), Some("Report received"));
}

#[tokio::test]
async fn test_rejected_report_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/report"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let reporter = PlaybackReporter::new(reqwest::Client::new(), &common::config_for(&server), "0.1.0");
    match reporter.report_playback_error(&dropped_stream()).await {
        Err(MetadataError::Status { status, .. }) => assert_eq!(status, 422),
        other => panic!("expected status error, got {:?}", other),
    }
}
