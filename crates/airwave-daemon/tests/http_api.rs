mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use tokio::sync::mpsc;
use tower::ServiceExt;

use airwave_daemon::core::DaemonEvent;
use airwave_daemon::http::{router, HttpState};
use airwave_proto::eq::EqPreset;
use airwave_proto::protocol::{Command, PlaybackState, TrackInfo};
use airwave_proto::state::StateManager;

fn app() -> (Router, Arc<StateManager>, mpsc::Receiver<DaemonEvent>) {
    let state = Arc::new(StateManager::new(
        vec![
            common::station("kan-88", "כאן 88"),
            common::station("eco-99", "אקו 99"),
        ],
        0.4,
    ));
    let (tx, rx) = mpsc::channel(16);
    (router(HttpState::new(state.clone(), tx)), state, rx)
}

async fn call(app: &Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn next_command(rx: &mut mpsc::Receiver<DaemonEvent>) -> Command {
    match rx.try_recv() {
        Ok(DaemonEvent::ClientCommand(cmd)) => cmd,
        other => panic!("expected a command, got {other:?}"),
    }
}

#[tokio::test]
async fn test_transport_routes_send_commands() {
    let (app, _state, mut rx) = app();

    let (status, _) = call(&app, Method::POST, "/api/play/eco-99").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        next_command(&mut rx),
        Command::Play {
            station_id: "eco-99".into()
        }
    );

    for (uri, expected) in [
        ("/api/toggle", Command::TogglePause),
        ("/api/stop", Command::Stop),
        ("/api/next", Command::Next),
        ("/api/prev", Command::Prev),
    ] {
        let (status, _) = call(&app, Method::GET, uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(next_command(&mut rx), expected);
    }
}

#[tokio::test]
async fn test_unknown_station_is_404() {
    let (app, _state, mut rx) = app();
    let (status, _) = call(&app, Method::GET, "/api/play/nowhere").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_volume_is_percent_and_clamped() {
    let (app, _state, mut rx) = app();

    let (_, body) = call(&app, Method::GET, "/api/volume").await;
    let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["volume"], 40);

    call(&app, Method::POST, "/api/volume/150").await;
    assert_eq!(next_command(&mut rx), Command::Volume { value: 1.0 });
    call(&app, Method::POST, "/api/volume/25").await;
    assert_eq!(next_command(&mut rx), Command::Volume { value: 0.25 });
}

#[tokio::test]
async fn test_eq_preset_by_slug() {
    let (app, _state, mut rx) = app();
    let (status, _) = call(&app, Method::POST, "/api/eq/bass-boost").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        next_command(&mut rx),
        Command::SetEqPreset {
            preset: EqPreset::BassBoost
        }
    );

    let (status, _) = call(&app, Method::POST, "/api/eq/loudness").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_state_track_and_session_reads() {
    let (app, state, mut rx) = app();

    let (_, body) = call(&app, Method::GET, "/api/session").await;
    assert_eq!(body, b"null");

    let station = state.station("kan-88").await.unwrap();
    state
        .set_playback(PlaybackState::Playing { station })
        .await;
    state
        .set_track(
            "kan-88",
            TrackInfo {
                program: Some("ג'ז".into()),
                current: Some("Miles Davis - So What".into()),
                next: None,
            },
        )
        .await;

    let (status, body) = call(&app, Method::GET, "/api/state").await;
    assert_eq!(status, StatusCode::OK);
    let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["stations"].as_array().unwrap().len(), 2);
    assert_eq!(v["playback"]["status"], "Playing");

    let (_, body) = call(&app, Method::GET, "/api/track").await;
    let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["current"], "Miles Davis - So What");

    let (_, body) = call(&app, Method::GET, "/api/session").await;
    let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["title"], "Miles Davis - So What");
    assert_eq!(v["artist"], "כאן 88");

    // pause while playing toggles, play while playing is a no-op
    let (status, _) = call(&app, Method::POST, "/api/session/pause").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next_command(&mut rx), Command::TogglePause);
    let (status, _) = call(&app, Method::POST, "/api/session/play").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, Method::POST, "/api/session/seekto").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_catalog_refresh_is_accepted() {
    let (app, _state, mut rx) = app();
    let (status, _) = call(&app, Method::POST, "/api/catalog/refresh").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(next_command(&mut rx), Command::RefreshCatalog);
}

#[tokio::test]
async fn test_closed_core_is_a_server_error() {
    let (app, _state, rx) = app();
    drop(rx);
    let (status, _) = call(&app, Method::POST, "/api/stop").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
