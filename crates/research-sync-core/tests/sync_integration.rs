//! End-to-end tests against an in-process research API (HTTP + WebSocket).

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::timeout;

use research_sync_core::{
    ApiRoutes, PullClient, PushClient, PushEvent, ResearchRequest, SyncConfig, SyncController,
    SyncEvent, SyncState,
};

const SID: &str = "abc123";

#[derive(Default)]
struct Script {
    /// Frames sent on every push connection; `None` rejects the handshake
    ws_frames: Option<Vec<String>>,
    /// Close the socket after the frames instead of holding it open
    ws_close: bool,
    progress: Mutex<VecDeque<(StatusCode, String)>>,
    progress_calls: AtomicUsize,
    ws_opens: AtomicUsize,
}

fn snapshot_json(session_id: &str, percentage: f64, complete: bool) -> String {
    json!({
        "session_id": session_id,
        "status": if complete { "completed" } else { "running" },
        "step": "analysis",
        "step_number": 3,
        "total_steps": 6,
        "percentage": percentage,
        "search_queries": ["rust websocket fallback"],
        "sources": [{"text": "RFC 6455", "url": "https://www.rfc-editor.org/rfc/rfc6455"}],
        "status_updates": ["Searching"],
        "start_time": 1_700_000_000.0,
        "complete": complete,
    })
    .to_string()
}

async fn progress(State(script): State<Arc<Script>>, Path(_id): Path<String>) -> Response {
    script.progress_calls.fetch_add(1, Ordering::SeqCst);
    let next = script.progress.lock().unwrap().pop_front();
    match next {
        Some((status, body)) => (status, body).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no scripted response").into_response(),
    }
}

async fn active_sessions() -> Json<Value> {
    Json(json!([SID, "def456"]))
}

async fn start(Json(body): Json<Value>) -> Response {
    match body.get("question").and_then(Value::as_str) {
        Some(q) if !q.is_empty() => Json(json!({
            "session_id": SID,
            "message": "Research started",
        }))
        .into_response(),
        _ => StatusCode::UNPROCESSABLE_ENTITY.into_response(),
    }
}

async fn ws_progress(
    State(script): State<Arc<Script>>,
    Path(_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    script.ws_opens.fetch_add(1, Ordering::SeqCst);
    let Some(frames) = script.ws_frames.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let close = script.ws_close;
    ws.on_upgrade(move |socket| serve_frames(socket, frames, close))
}

async fn serve_frames(mut socket: WebSocket, frames: Vec<String>, close: bool) {
    for frame in frames {
        if socket.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }
    if close {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    while let Some(Ok(_)) = socket.recv().await {}
}

async fn serve(script: Script) -> (SocketAddr, Arc<Script>) {
    let script = Arc::new(script);
    let app = Router::new()
        .route("/v1/research/start", post(start))
        .route("/v1/research/progress/:id", get(progress))
        .route("/v1/research/active-sessions", get(active_sessions))
        .route("/v1/research/ws/progress/:id", get(ws_progress))
        .with_state(script.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, script)
}

fn routes(addr: SocketAddr) -> ApiRoutes {
    ApiRoutes::new(&format!("http://{addr}/v1")).unwrap()
}

fn controller(addr: SocketAddr) -> SyncController {
    let config = SyncConfig {
        api_base: format!("http://{addr}/v1"),
        poll_interval_ms: 50,
        ..SyncConfig::default()
    };
    SyncController::new(&config).unwrap()
}

async fn next_event(rx: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_pull_client_status_and_decode_errors() {
    let script = Script {
        progress: Mutex::new(
            vec![
                (StatusCode::OK, snapshot_json(SID, 42.0, false)),
                (StatusCode::INTERNAL_SERVER_ERROR, String::new()),
                (StatusCode::OK, "{\"session_id\": \"abc123\"".to_string()),
            ]
            .into(),
        ),
        ..Script::default()
    };
    let (addr, _script) = serve(script).await;
    let client = PullClient::new(routes(addr));

    let snap = client.fetch_snapshot(SID).await.unwrap();
    assert_eq!(snap.percentage, 42.0);
    assert_eq!(snap.sources[0].text, "RFC 6455");

    let err = client.fetch_snapshot(SID).await.unwrap_err();
    assert_eq!(err.kind(), "protocol");
    assert!(err.to_string().contains("500"));

    let err = client.fetch_snapshot(SID).await.unwrap_err();
    assert_eq!(err.kind(), "decode");
}

#[tokio::test]
async fn test_pull_client_sessions_and_start() {
    let (addr, _script) = serve(Script::default()).await;
    let client = PullClient::new(routes(addr));

    let sessions = client.fetch_active_sessions().await.unwrap();
    assert_eq!(sessions, vec![SID.to_string(), "def456".to_string()]);

    let started = client
        .start_research(&ResearchRequest {
            question: "What changed in HTTP/3?".into(),
            model_id: Some("gpt-4o".into()),
            additional_instructions: None,
        })
        .await
        .unwrap();
    assert_eq!(started.session_id, SID);
    assert_eq!(started.message, "Research started");

    let err = client
        .start_research(&ResearchRequest {
            question: String::new(),
            model_id: None,
            additional_instructions: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "protocol");
}

#[tokio::test]
async fn test_push_drops_malformed_frame_and_stays_open() {
    let script = Script {
        ws_frames: Some(vec![
            snapshot_json(SID, 10.0, false),
            "{not a snapshot".to_string(),
            snapshot_json(SID, 20.0, false),
        ]),
        ..Script::default()
    };
    let (addr, _script) = serve(script).await;
    let mut conn = PushClient::new(routes(addr)).open(SID);

    let mut seen = Vec::new();
    while seen.len() < 2 {
        match timeout(Duration::from_secs(5), conn.next_event()).await.unwrap() {
            Some(PushEvent::Snapshot(s)) => seen.push(s.percentage),
            other => panic!("unexpected push event {other:?}"),
        }
    }
    assert_eq!(seen, vec![10.0, 20.0]);

    // Still connected: nothing else arrives
    assert!(timeout(Duration::from_millis(200), conn.next_event())
        .await
        .is_err());
    conn.close();
    assert_eq!(conn.next_event().await, None);
}

#[tokio::test]
async fn test_push_rejected_handshake() {
    let (addr, _script) = serve(Script::default()).await;
    let mut conn = PushClient::new(routes(addr)).open(SID);

    match timeout(Duration::from_secs(5), conn.next_event()).await.unwrap() {
        Some(PushEvent::TransportError(e)) => {
            assert_eq!(e.kind(), "protocol");
            assert!(e.to_string().contains("404"));
        }
        other => panic!("expected handshake failure, got {other:?}"),
    }
    assert_eq!(conn.next_event().await, Some(PushEvent::Closed));
}

#[tokio::test]
async fn test_controller_fails_over_after_graceful_close() {
    let script = Script {
        ws_frames: Some(vec![
            snapshot_json(SID, 10.0, false),
            snapshot_json(SID, 20.0, false),
            snapshot_json(SID, 30.0, false),
        ]),
        ws_close: true,
        progress: Mutex::new(
            vec![
                (StatusCode::OK, snapshot_json(SID, 60.0, false)),
                (StatusCode::OK, snapshot_json(SID, 100.0, true)),
            ]
            .into(),
        ),
        ..Script::default()
    };
    let (addr, script) = serve(script).await;
    let ctl = controller(addr);

    let mut rx = ctl.start(SID);
    let mut percentages = Vec::new();
    let mut degraded = false;
    loop {
        match next_event(&mut rx).await {
            SyncEvent::Snapshot(s) => percentages.push(s.percentage),
            SyncEvent::StateChanged { is_live: false, .. } => degraded = true,
            SyncEvent::Completed(s) => {
                percentages.push(s.percentage);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(percentages, vec![10.0, 20.0, 30.0, 60.0, 100.0]);
    assert!(degraded);

    let view = ctl.view(SID).unwrap();
    assert_eq!(view.state, SyncState::Terminal);
    assert!(view.snapshot.unwrap().complete);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(script.progress_calls.load(Ordering::SeqCst), 2);
    assert_eq!(script.ws_opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_controller_polls_when_push_is_unavailable() {
    let script = Script {
        progress: Mutex::new(
            vec![
                (StatusCode::BAD_GATEWAY, String::new()),
                (StatusCode::OK, snapshot_json(SID, 100.0, true)),
            ]
            .into(),
        ),
        ..Script::default()
    };
    let (addr, _script) = serve(script).await;
    let ctl = controller(addr);

    let mut rx = ctl.start(SID);
    let mut errors = Vec::new();
    loop {
        match next_event(&mut rx).await {
            SyncEvent::Error(e) => errors.push(e.kind()),
            SyncEvent::Completed(_) => break,
            _ => {}
        }
    }
    // Rejected handshake, then one failed poll before the terminal snapshot
    assert_eq!(errors, vec!["protocol", "protocol"]);

    let view = ctl.view(SID).unwrap();
    assert_eq!(view.state, SyncState::Terminal);
    assert!(!view.is_live);
    assert!(ctl.stop(SID));
}
