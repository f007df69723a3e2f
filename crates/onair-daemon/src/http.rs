use crate::core::DaemonEvent;
use crate::BroadcastMessage;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures_util::stream::{self, Stream};
use onair_metadata::PlaybackReporter;
use onair_proto::catalog::{StationEntry, StationFilter, StationRepository};
use onair_proto::protocol::{Command, DaemonState, NowPlaying};
use onair_proto::state::StateManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct HttpState {
    pub state_manager: Arc<StateManager>,
    pub event_tx: mpsc::Sender<DaemonEvent>,
    pub broadcast_tx: broadcast::Sender<BroadcastMessage>,
    pub reporter: PlaybackReporter,
}

#[derive(Debug, Default, Deserialize)]
struct StationsQuery {
    region: Option<String>,
    /// Comma-separated genre ids.
    style: Option<String>,
    #[serde(default)]
    favorites: bool,
    q: Option<String>,
}

impl From<StationsQuery> for StationFilter {
    fn from(query: StationsQuery) -> Self {
        StationFilter {
            region: query.region,
            styles: query
                .style
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            favorites_only: query.favorites,
            query: query.q,
        }
    }
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/now-playing", get(now_playing))
        .route("/api/now-playing/artwork", get(now_playing_artwork))
        .route("/api/stations", get(stations))
        .route("/api/events", get(events))
        .route("/api/play/:id", get(play_station).post(play_station))
        .route("/api/stop", get(stop).post(stop))
        .route("/api/next", get(next_station).post(next_station))
        .route("/api/prev", get(prev_station).post(prev_station))
        .route("/api/random", get(random_station).post(random_station))
        .route("/api/pause", get(toggle_pause).post(toggle_pause))
        .route("/api/volume/:volume", get(set_volume).post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/favorites/:id", get(toggle_favorite).post(toggle_favorite))
        .route("/api/report", post(report_error))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(bind_address: String, port: u16, state: HttpState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn send_command(state: &HttpState, cmd: Command) -> StatusCode {
    if state.event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
        error!("Failed to send command to daemon core");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<DaemonState> {
    Json(state.state_manager.get_state().await)
}

async fn now_playing(State(state): State<HttpState>) -> Json<Option<NowPlaying>> {
    Json(state.state_manager.get_state().await.now_playing)
}

async fn now_playing_artwork(State(state): State<HttpState>) -> Response {
    let artwork = state
        .state_manager
        .get_state()
        .await
        .now_playing
        .and_then(|np| np.artwork)
        .filter(|a| !a.bytes.is_empty());
    match artwork {
        Some(artwork) => (
            [(header::CONTENT_TYPE, artwork.content_type)],
            artwork.bytes,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn stations(
    State(state): State<HttpState>,
    Query(query): Query<StationsQuery>,
) -> Json<Vec<StationEntry>> {
    let filter = StationFilter::from(query);
    Json(state.state_manager.browse(&filter).await)
}

/// Server-sent events: one JSON message per broadcast.
async fn events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    info!("HTTP API: event stream subscriber");
    let rx = state.broadcast_tx.subscribe();
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(msg) => return Some((Event::default().json_data(&msg), rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("HTTP API: event subscriber lagged by {}", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn play_station(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    info!("HTTP API: Play station {}", id);
    if state.state_manager.station(&id).is_none() {
        return StatusCode::NOT_FOUND;
    }
    send_command(&state, Command::Play { station_id: id }).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Stop");
    send_command(&state, Command::Stop).await
}

async fn next_station(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Next station");
    send_command(&state, Command::Next).await
}

async fn prev_station(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Previous station");
    send_command(&state, Command::Prev).await
}

async fn random_station(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Random station");
    send_command(&state, Command::Random).await
}

async fn toggle_pause(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle pause");
    send_command(&state, Command::TogglePause).await
}

async fn set_volume(State(state): State<HttpState>, Path(volume): Path<i32>) -> StatusCode {
    let vol = (volume as f32 / 100.0).clamp(0.0, 1.0);
    info!("HTTP API: Set volume to {}%", volume);
    send_command(&state, Command::Volume { value: vol }).await
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    let daemon_state = state.state_manager.get_state().await;
    let volume = (daemon_state.volume * 100.0).round() as u8;
    Json(VolumeStatus { volume })
}

async fn toggle_favorite(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    info!("HTTP API: Toggle favorite {}", id);
    if state.state_manager.station(&id).is_none() {
        return StatusCode::NOT_FOUND;
    }
    send_command(&state, Command::ToggleFavorite { station_id: id }).await
}

/// Forward the last playback failure to the report collector.
async fn report_error(State(state): State<HttpState>) -> Response {
    let Some(last_error) = state.state_manager.get_state().await.last_error else {
        return StatusCode::NOT_FOUND.into_response();
    };
    info!("HTTP API: Report playback error on {}", last_error.station_id);
    match state.reporter.report_playback_error(&last_error).await {
        Ok(receipt) => Json(receipt).into_response(),
        Err(e) => {
            warn!("HTTP API: report failed: {}", e);
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}
