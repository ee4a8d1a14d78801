use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use airwave_proto::eq::EqPreset;
use airwave_proto::protocol::{Command, DaemonState, TrackInfo};
use airwave_proto::state::StateManager;

use crate::core::DaemonEvent;
use crate::session::{self, SessionAction, SessionMetadata};

#[derive(Clone)]
pub struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
}

impl HttpState {
    pub fn new(state_manager: Arc<StateManager>, event_tx: mpsc::Sender<DaemonEvent>) -> Self {
        Self {
            state_manager,
            event_tx,
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
        .route("/api/play/:id", get(play_station).post(play_station))
        .route("/api/toggle", get(toggle).post(toggle))
        .route("/api/stop", get(stop).post(stop))
        .route("/api/next", get(next_station).post(next_station))
        .route("/api/prev", get(prev_station).post(prev_station))
        .route("/api/volume/:volume", get(set_volume).post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/eq/:preset", get(set_eq).post(set_eq))
        .route("/api/track", get(get_track))
        .route("/api/session", get(get_session))
        .route("/api/session/:action", post(session_action))
        .route("/api/catalog/refresh", post(refresh_catalog))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState::new(state_manager, event_tx));
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

async fn dispatch(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state
        .event_tx
        .send(DaemonEvent::ClientCommand(cmd))
        .await
        .is_err()
    {
        error!("HTTP API: daemon event channel closed");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<DaemonState> {
    Json(state.state_manager.get_state().await)
}

async fn play_station(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    if state.state_manager.station(&id).await.is_none() {
        return StatusCode::NOT_FOUND;
    }
    dispatch(&state, Command::Play { station_id: id }).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::TogglePause).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Stop).await
}

async fn next_station(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Next).await
}

async fn prev_station(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Prev).await
}

async fn set_volume(State(state): State<HttpState>, Path(volume): Path<i32>) -> StatusCode {
    let value = (volume as f32 / 100.0).clamp(0.0, 1.0);
    dispatch(&state, Command::Volume { value }).await
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    let daemon_state = state.state_manager.get_state().await;
    let volume = (daemon_state.volume * 100.0).round() as u8;
    Json(VolumeStatus { volume })
}

async fn set_eq(State(state): State<HttpState>, Path(preset): Path<String>) -> StatusCode {
    match EqPreset::from_slug(&preset) {
        Some(preset) => dispatch(&state, Command::SetEqPreset { preset }).await,
        None => StatusCode::BAD_REQUEST,
    }
}

async fn get_track(State(state): State<HttpState>) -> Json<TrackInfo> {
    Json(state.state_manager.get_state().await.track)
}

async fn get_session(State(state): State<HttpState>) -> Json<Option<SessionMetadata>> {
    Json(session::metadata(&state.state_manager.get_state().await))
}

async fn session_action(State(state): State<HttpState>, Path(action): Path<String>) -> StatusCode {
    let Some(action) = SessionAction::from_slug(&action) else {
        return StatusCode::BAD_REQUEST;
    };
    let playback = state.state_manager.get_state().await.playback;
    match action.to_command(&playback) {
        Some(cmd) => dispatch(&state, cmd).await,
        None => StatusCode::NO_CONTENT,
    }
}

async fn refresh_catalog(State(state): State<HttpState>) -> StatusCode {
    match dispatch(&state, Command::RefreshCatalog).await {
        StatusCode::OK => StatusCode::ACCEPTED,
        other => other,
    }
}
