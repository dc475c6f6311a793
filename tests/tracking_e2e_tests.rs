//! End-to-end attention streaming over a real socket.

mod common;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use lefocus_server::{
    api::create_router,
    settings::{ServerSettings, TrackingSettings},
    AppState,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        http::StatusCode,
        protocol::frame::{
            coding::{CloseCode, Data, OpCode},
            CloseFrame, Frame,
        },
        Error as WsError, Message,
    },
    MaybeTlsStream, WebSocketStream,
};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const WAIT: Duration = Duration::from_secs(10);

fn fast_settings() -> ServerSettings {
    ServerSettings {
        tracking: TrackingSettings {
            tick_interval_ms: 50,
            frame_wait_ms: 200,
            ..TrackingSettings::default()
        },
        ..ServerSettings::default()
    }
}

async fn start_test_server(state: AppState) -> String {
    let app = create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("127.0.0.1:{}", addr.port())
}

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for message")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_frame(socket: &mut Socket, text: String) {
    socket.send(Message::Text(text)).await.unwrap();
}

async fn next_close(socket: &mut Socket) -> Option<CloseFrame<'static>> {
    loop {
        let message = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for close")
            .expect("socket closed without close frame")
            .unwrap();
        if let Message::Close(frame) = message {
            return frame;
        }
    }
}

#[tokio::test]
async fn test_three_tick_session_scenario() {
    let state = common::test_state(fast_settings());
    let lifecycle = state.lifecycle.clone();
    let store = state.store.clone();
    let host = start_test_server(state).await;

    let started = lifecycle.start("u1", 30).await.unwrap();
    let id = started.session_id;

    let (mut socket, _) = connect_async(format!("ws://{host}/ws/session/{id}/track"))
        .await
        .unwrap();

    let face = common::face_frame();

    // tick 1: well-formed frame
    send_frame(&mut socket, common::frame_message(&face)).await;
    let first = next_json(&mut socket).await;
    let horizontal = first["gaze"]["horizontal"].as_f64().unwrap();
    let vertical = first["gaze"]["vertical"].as_f64().unwrap();
    assert!(horizontal.abs() <= 0.05, "horizontal {horizontal}");
    assert!((vertical - 0.5).abs() <= 0.1, "vertical {vertical}");
    assert!(first["face"].is_object());
    assert_eq!(first["activity"], "focused");

    // tick 2: garbage is reported and the stream survives
    send_frame(&mut socket, json!({ "image": "not-base64" }).to_string()).await;
    let second = next_json(&mut socket).await;
    assert!(second["error"].is_string());

    // tick 3: the stream keeps estimating after the error
    send_frame(&mut socket, common::frame_message(&face)).await;
    let third = next_json(&mut socket).await;
    assert_eq!(third["gaze"], first["gaze"]);

    socket.close(None).await.unwrap();

    let report = lifecycle.end(&id).await.unwrap();
    let session = lifecycle.get(&id).await.unwrap();
    assert_eq!(session.status.as_str(), "completed");
    assert!(session.end_time.is_some());
    assert_eq!(session.report.as_ref(), Some(&report));
    assert!(report.focus_time + report.distraction_time <= 60);

    let activity = store.get_activity(&id).await.unwrap().unwrap();
    assert!(activity.gaze.is_some());
}

#[tokio::test]
async fn test_shutdown_closes_streams_with_going_away() {
    let state = common::test_state(fast_settings());
    let tracking = state.tracking.clone();
    let host = start_test_server(state).await;

    let (mut socket, _) = connect_async(format!("ws://{host}/ws/session/anything/track"))
        .await
        .unwrap();

    send_frame(&mut socket, common::frame_message(&common::face_frame())).await;
    next_json(&mut socket).await;
    assert_eq!(tracking.active_streams(), 1);

    tracking.shutdown();

    let close = next_close(&mut socket).await;
    assert_eq!(close.map(|f| f.code), Some(CloseCode::Away));

    // no new streams once shutdown has begun
    match connect_async(format!("ws://{host}/ws/session/anything/track")).await {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE)
        }
        other => panic!("expected upgrade to be refused, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_transport_fault_closes_with_internal_error() {
    let state = common::test_state(fast_settings());
    let tracking = state.tracking.clone();
    let host = start_test_server(state).await;

    let (mut socket, _) = connect_async(format!("ws://{host}/ws/session/anything/track"))
        .await
        .unwrap();

    send_frame(&mut socket, common::frame_message(&common::face_frame())).await;
    next_json(&mut socket).await;

    // a text frame that is not valid UTF-8 fails the server's read
    let broken = Frame::message(vec![0xff, 0xfe, 0xfd], OpCode::Data(Data::Text), true);
    socket.send(Message::Frame(broken)).await.unwrap();

    let close = next_close(&mut socket).await;
    assert_eq!(close.map(|f| f.code), Some(CloseCode::Error));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tracking.active_streams(), 0);
}

#[tokio::test]
async fn test_client_close_completes_handshake() {
    let state = common::test_state(fast_settings());
    let tracking = state.tracking.clone();
    let host = start_test_server(state).await;

    let (mut socket, _) = connect_async(format!("ws://{host}/ws/session/anything/track"))
        .await
        .unwrap();
    send_frame(&mut socket, common::frame_message(&common::face_frame())).await;
    next_json(&mut socket).await;

    socket.close(None).await.unwrap();

    // the server echoes the close, then the stream ends cleanly
    let echoed = next_close(&mut socket).await;
    assert!(echoed.map_or(true, |f| f.code == CloseCode::Normal));
    let rest = tokio::time::timeout(WAIT, socket.next())
        .await
        .expect("timed out waiting for end of stream");
    assert!(rest.is_none(), "unexpected trailing item {rest:?}");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tracking.active_streams(), 0);
}
