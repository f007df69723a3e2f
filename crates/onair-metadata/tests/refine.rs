//! MusicBrainz refinement against a mock search endpoint.

mod common;

use onair_metadata::refine::{MusicBrainzRefiner, RecordingLookup};
use onair_proto::protocol::{MetadataKind, MetadataRecord};
use serde_json::json;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn refiner(server: &MockServer) -> MusicBrainzRefiner {
    let config = common::config_for(server);
    let client = onair_metadata::transport::build_client(&config).unwrap();
    MusicBrainzRefiner::new(client, &config)
}

#[tokio::test]
async fn test_best_release_cover_is_used() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ws/2/recording/"))
        .and(query_param("fmt", "json"))
        .and(query_param("query", common::mb_query("daft punk", "one more time")))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::mb_recording(
            "Daft Punk",
            "One More Time",
            json!([
                common::mb_release("comp-1", "Album", &["Compilation"]),
                common::mb_release("album-1", "Album", &[]),
                common::mb_release("single-1", "Single", &[]),
            ]),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let refined = refiner(&server)
        .refine("daft punk", "one more time", MetadataKind::Song)
        .await
        .unwrap();
    assert_eq!(refined.artist.as_deref(), Some("Daft Punk"));
    assert_eq!(refined.title.as_deref(), Some("One More Time"));
    assert_eq!(
        refined.artwork_url,
        Some(format!("{}/caa/release/album-1/front-500", server.uri()))
    );
}

#[tokio::test]
async fn test_no_releases_still_standardizes_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ws/2/recording/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::mb_recording(
            "Four Tet",
            "Baby",
            json!([]),
        )))
        .mount(&server)
        .await;

    let refined = refiner(&server)
        .refine("four tet", "baby", MetadataKind::Song)
        .await
        .unwrap();
    assert_eq!(refined, MetadataRecord::song("Four Tet", "Baby"));
}

#[tokio::test]
async fn test_no_recording_and_errors_pass_input_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ws/2/recording/"))
        .and(query_param("query", common::mb_query("Nobody", "Nothing")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 0, "recordings": [] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ws/2/recording/"))
        .and(query_param("query", common::mb_query("Busy", "Server")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let refiner = refiner(&server);
    assert_eq!(
        refiner.refine("Nobody", "Nothing", MetadataKind::Song).await,
        Some(MetadataRecord::song("Nobody", "Nothing"))
    );
    assert_eq!(
        refiner.refine("Busy", "Server", MetadataKind::Song).await,
        Some(MetadataRecord::song("Busy", "Server"))
    );
}
